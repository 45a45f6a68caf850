//! AmrError: unified error type for tet-amr public APIs
//!
//! Covers the three failure classes of the crate: configuration errors
//! (user-fixable, reported with a descriptive message), invariant violations
//! (programming errors, never recovered), and unsupported transitions.

use thiserror::Error;

use crate::mesh::edge::EdgeKey;
use crate::mesh::{ChareId, NodeId, TetId};

/// Unified error type for tet-amr operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AmrError {
    /// A tet id was not found in the tet map.
    #[error("unknown tet id {0}")]
    UnknownTet(TetId),
    /// A tet id has no refinement state in the master element store.
    #[error("no refinement state recorded for tet {0}")]
    UnknownRefinementState(TetId),
    /// An edge key was not found in the edge store.
    #[error("unknown edge {0}")]
    UnknownEdge(EdgeKey),
    /// Inserting a tet under an id that is already occupied.
    #[error("tet id {0} already present")]
    DuplicateTet(TetId),
    /// A tet was given with repeated node ids.
    #[error("degenerate tet {id}: nodes {nodes:?} are not distinct")]
    DegenerateTet { id: TetId, nodes: [NodeId; 4] },
    /// Registering a ninth child on a parent.
    #[error("parent {parent} cannot take another child (already has {count})")]
    TooManyChildren { parent: TetId, count: usize },
    /// A parent's child count does not match the requested collapse.
    #[error("parent {parent} has {count} children, which the requested collapse does not accept")]
    CorruptChildCount { parent: TetId, count: usize },
    /// A one-to-two subdivision was requested on a tet with no marked edge.
    #[error("tet {0} has no edge marked for refinement")]
    NoMarkedEdge(TetId),
    /// A one-to-four subdivision was requested with no face fully marked.
    #[error("tet {0} has no face whose edges are all marked for refinement")]
    NoMarkedFace(TetId),
    /// A collapse was forced on a tet already at the minimum refinement level.
    #[error("tet {tet} at level {level} cannot be derefined below the minimum level")]
    DerefineBelowFloor { tet: TetId, level: u32 },
    /// A composite transition was scheduled on a tet with no parent.
    #[error("tet {0} requested a composite transition but has no parent")]
    CompositeWithoutParent(TetId),
    /// An edge that must already carry a midpoint does not.
    #[error("edge ({a},{b}) has no midpoint node")]
    MissingMidpoint { a: NodeId, b: NodeId },
    /// A node id has no entry in the coordinate arrays.
    #[error("node {0} has no coordinates")]
    MissingCoordinates(NodeId),
    /// One of the derefinement cases that has no defined subdivision semantics.
    #[error("unsupported derefinement transition: {0}")]
    UnsupportedTransition(&'static str),

    /// Connectivity whose length is not a whole number of tetrahedra.
    #[error("connectivity of {0} node indices is not a whole number of tetrahedra")]
    RaggedConnectivity(usize),
    /// The per-element chare assignment does not cover the connectivity.
    #[error("{elements} elements but {assignments} chare assignments")]
    ChareAssignmentMismatch { elements: usize, assignments: usize },
    /// An element was assigned to a chare id outside `[0, nchare)`.
    #[error("chare id {chare} out of range; the run has {nchare} chares")]
    ChareOutOfRange { chare: ChareId, nchare: ChareId },
    /// Over-decomposed run configuration: some chare would hold no elements.
    #[error(
        "overdecomposition of the mesh on PE {pe} is too large compared to the \
         number of work units: at least one chare would hold no mesh elements; \
         decrease the degree of virtualization or the number of PEs"
    )]
    OverDecomposition { pe: usize },
    /// A PE received data for a chare it does not own.
    #[error("PE {pe} received data for chare {chare}, which it does not own")]
    UnownedChare { chare: ChareId, pe: usize },
    /// An owned chare whose per-chare data is missing or empty.
    #[error("owned chare {0} has no mesh data")]
    MissingChareData(ChareId),
    /// A node survived reordering without a new id.
    #[error("node {0} has no new id after reordering")]
    UnassignedNode(NodeId),
    /// An edge survived reordering without a new id.
    #[error("edge {0} has no new id after reordering")]
    UnassignedEdge(EdgeKey),
    /// An edge-derived chare adjacency with no node-derived counterpart.
    /// Two chares sharing an edge always share its endpoints, so the
    /// node-derived entry must exist first.
    #[error("chare {chare} shares an edge with chare {neighbor} but no node")]
    AsymmetricAdjacency { chare: ChareId, neighbor: ChareId },
    /// Failure in communication with a neighbor PE.
    #[error("communication with PE {neighbor} failed: {source}")]
    CommError { neighbor: usize, r#source: String },
}
