//! Adaptive refinement of the tetrahedral hierarchy.
//!
//! [`refine`] holds the subdivision templates and the transitions that apply
//! them, [`derefine`] the collapses that undo them, and [`adapter`] the driver
//! that turns per-edge criteria into a conforming set of transitions.

pub mod adapter;
pub mod derefine;
pub mod refine;

pub use adapter::{ALWAYS_REFINE, MeshAdapter};
pub use derefine::{
    MIN_REFINEMENT_LEVEL, check_allowed_derefinement, derefine_eight_to_four,
    derefine_eight_to_one, derefine_eight_to_two, derefine_four_to_one, derefine_four_to_two,
    derefine_two_to_one,
};
pub use refine::{
    refine_one_to_eight, refine_one_to_four, refine_one_to_two, tetrahedron_bisection,
    tetrahedron_octasection, tetrahedron_quadrisection,
};
