//! Mesh-side stores: tets, edges, lineage, and midpoint nodes.

pub mod edge;
pub mod node;
pub mod state;
pub mod tet_store;

/// Global mesh node index.
pub type NodeId = u64;
/// Tet id, local to one PE's stores.
pub type TetId = u64;
/// Work-unit (chare) id assigned by the partitioner, in `[0, nchare)`.
pub type ChareId = u32;

pub use edge::{Edge, EdgeKey, EdgeStore, LockCase};
pub use node::{NodeConnectivity, NodeStore};
pub use state::{
    ActiveElementStore, MarkedRefinements, MasterElementStore, RefinementCase, RefinementState,
};
pub use tet_store::{Tet, TetStore, edge_keys, face_keys};
