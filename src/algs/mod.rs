//! Distributed algorithms: message transport, wire records, and the
//! renumbering protocol.

pub mod communicator;
pub mod reorder;
pub mod wire;

pub use communicator::{CommTag, Communicator, NoComm, RayonComm, Wait};
#[cfg(feature = "mpi-support")]
pub use communicator::MpiComm;
pub use reorder::{ReorderConfig, ReorderedMesh, Reorderer};
