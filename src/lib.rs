#![cfg_attr(docsrs, feature(doc_cfg))]
//! # tet-amr
//!
//! tet-amr is a Rust library for distributed adaptive refinement of tetrahedral meshes and for the leaderless renumbering that gives every mesh entity a contiguous global id afterwards, designed for scientific computing and PDE codes. Each PE owns its mesh chunk outright; all coordination happens through asynchronous point-to-point messages.
//!
//! ## Features
//! - Edge-driven refinement decisions: 1:2, 1:4 and 1:8 subdivisions plus the staged 2:8/4:8 composite transitions
//! - Derefinement collapses (2:1, 4:1, 8:1) with an explicit level floor; the undefined collapses fail fast
//! - Leaderless renumbering: all-to-all ownership arbitration, prefix-sum offsets, and a chained `[lower, upper)` row range per PE
//! - Per-chare outputs for the solver: rewritten connectivity, new→old id maps, and boundary (msum) adjacency for halo exchange
//! - Pluggable communication backends (serial, in-process threads, MPI)
//!
//! ## Determinism
//!
//! Every protocol decision is a pure function of the mesh and the PE index:
//! entities are numbered in ascending order, ownership goes to the lowest
//! claiming PE, and stores iterate in id order. Two runs over the same input
//! produce identical numberings, regardless of message arrival order.
//!
//! ## Usage
//! Add `tet-amr` as a dependency in your `Cargo.toml` and enable features as needed:
//!
//! ```toml
//! [dependencies]
//! tet-amr = "0.4"
//! # Optional features:
//! # features = ["mpi-support"]
//! ```

// Re-export our major subsystems:
pub mod adapt;
pub mod algs;
pub mod amr_error;
pub mod mesh;

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    pub use crate::adapt::{ALWAYS_REFINE, MeshAdapter};
    #[cfg(feature = "mpi-support")]
    pub use crate::algs::communicator::MpiComm;
    pub use crate::algs::communicator::{CommTag, Communicator, NoComm, RayonComm, Wait};
    pub use crate::algs::reorder::{ReorderConfig, ReorderedMesh, Reorderer};
    pub use crate::amr_error::AmrError;
    pub use crate::mesh::{
        ChareId, Edge, EdgeKey, EdgeStore, LockCase, NodeConnectivity, NodeId, NodeStore,
        RefinementCase, Tet, TetId, TetStore,
    };
}
