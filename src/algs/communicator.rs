//! Thin façade over intra-process (thread) or inter-process (MPI) message
//! passing.
//!
//! Messages are contiguous byte slices. All handles are waitable but
//! non-blocking: the reconciliation protocol posts its receives, fires its
//! sends, and only trusts a buffer after `.wait()` returns.
//!
//! A received message is truncated to the posted buffer's capacity; shorter
//! messages come back shorter. Callers that need exact framing exchange sizes
//! first and post exact-capacity buffers.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::JoinHandle;

use bytes::Bytes;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use parking_lot::Mutex;

/// Base of a block of message tags.
///
/// Each protocol run works inside its own tag block so that concurrent runs
/// sharing a process (or an MPI communicator) never match each other's
/// messages. Phase tags are derived with [`CommTag::offset`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct CommTag(u16);

impl CommTag {
    pub const fn new(base: u16) -> Self {
        Self(base)
    }

    pub const fn base(self) -> u16 {
        self.0
    }

    /// Tag for phase `k` of the block.
    pub const fn offset(self, k: u16) -> u16 {
        self.0 + k
    }
}

/// Non-blocking point-to-point communication between PEs.
pub trait Communicator: Send + Sync + 'static {
    /// Handle returned by `isend`.
    type SendHandle: Wait + Send;
    /// Handle returned by `irecv`.
    type RecvHandle: Wait + Send;

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle;
    fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> Self::RecvHandle;

    /// This PE's index in `0..size()`.
    fn rank(&self) -> usize;

    /// Number of PEs.
    fn size(&self) -> usize;

    /// True only for the no-op backend used by single-PE unit tests.
    fn is_no_comm(&self) -> bool {
        false
    }
}

/// Anything that can be waited on.
pub trait Wait {
    /// Wait for completion and return the received data (if any).
    fn wait(self) -> Option<Vec<u8>>;
}

impl Wait for () {
    fn wait(self) -> Option<Vec<u8>> {
        None
    }
}

/// Compile-time no-op comm for pure serial unit tests.
#[derive(Clone, Debug, Default)]
pub struct NoComm;

impl Communicator for NoComm {
    type SendHandle = ();
    type RecvHandle = ();

    fn isend(&self, _peer: usize, _tag: u16, _buf: &[u8]) {}
    fn irecv(&self, _peer: usize, _tag: u16, _buf: &mut [u8]) {}

    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn is_no_comm(&self) -> bool {
        true
    }
}

// --- RayonComm: intra-process, one thread per PE --------------------------

/// (src, dst, tag)
type Key = (usize, usize, u16);

/// Process-wide mailbox. Each channel is a FIFO queue, so repeated messages
/// on one (src, dst, tag) channel arrive in send order.
static MAILBOX: Lazy<DashMap<Key, VecDeque<Bytes>>> = Lazy::new(DashMap::new);

pub struct LocalHandle {
    slot: Arc<Mutex<Option<Vec<u8>>>>,
    handle: Option<JoinHandle<()>>,
}

impl Wait for LocalHandle {
    fn wait(mut self) -> Option<Vec<u8>> {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        let mut guard = self.slot.lock();
        guard.take()
    }
}

/// In-process backend: every PE is a thread, all sharing [`MAILBOX`].
#[derive(Clone, Debug)]
pub struct RayonComm {
    rank: usize,
    size: usize,
}

impl RayonComm {
    pub fn new(rank: usize, size: usize) -> Self {
        Self { rank, size }
    }
}

impl Communicator for RayonComm {
    type SendHandle = ();
    type RecvHandle = LocalHandle;

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle {
        let key = (self.rank, peer, tag);
        MAILBOX.entry(key).or_default().push_back(Bytes::copy_from_slice(buf));
    }

    fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> Self::RecvHandle {
        let key = (peer, self.rank, tag);
        let slot = Arc::new(Mutex::new(None));
        let slot_clone = Arc::clone(&slot);
        let capacity = buf.len();
        let handle = std::thread::spawn(move || {
            loop {
                // Scope the shard lock so the sender can make progress.
                let received = match MAILBOX.get_mut(&key) {
                    Some(mut queue) => queue.pop_front(),
                    None => None,
                };
                if let Some(bytes) = received {
                    let len = bytes.len().min(capacity);
                    *slot_clone.lock() = Some(bytes[..len].to_vec());
                    break;
                }
                std::thread::yield_now();
            }
        });
        LocalHandle { slot, handle: Some(handle) }
    }

    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }
}

// --- MPI backend (feature = "mpi-support") --------------------------------

#[cfg(feature = "mpi-support")]
mod mpi_backend {
    use super::{Communicator, Wait};
    use mpi::request::{Request, StaticScope};
    use mpi::topology::SimpleCommunicator;
    use mpi::traits::{Communicator as _, Destination, Equivalence, Source};
    use std::sync::Arc;

    /// Inter-process backend over an MPI world communicator.
    #[derive(Clone)]
    pub struct MpiComm {
        _universe: Arc<mpi::environment::Universe>,
        world: SimpleCommunicator,
        rank: usize,
        size: usize,
    }

    impl MpiComm {
        /// Initializes MPI; returns `None` if it was already initialized.
        pub fn new() -> Option<Self> {
            let universe = mpi::initialize()?;
            let world = universe.world();
            let rank = world.rank() as usize;
            let size = world.size() as usize;
            Some(Self { _universe: Arc::new(universe), world, rank, size })
        }
    }

    /// Owns its leaked buffer until MPI is done with it.
    pub struct MpiSendHandle {
        req: Request<'static, [u8], StaticScope>,
        buf: *mut [u8],
    }

    unsafe impl Send for MpiSendHandle {}

    impl Wait for MpiSendHandle {
        fn wait(self) -> Option<Vec<u8>> {
            self.req.wait();
            unsafe { drop(Box::from_raw(self.buf)) };
            None
        }
    }

    pub struct MpiRecvHandle {
        req: Request<'static, [u8], StaticScope>,
        buf: *mut [u8],
    }

    unsafe impl Send for MpiRecvHandle {}

    impl Wait for MpiRecvHandle {
        fn wait(self) -> Option<Vec<u8>> {
            let status = self.req.wait();
            let received = status.count(u8::equivalence_datatype()) as usize;
            let mut data = unsafe { Box::from_raw(self.buf) }.into_vec();
            data.truncate(received);
            Some(data)
        }
    }

    impl Communicator for MpiComm {
        type SendHandle = MpiSendHandle;
        type RecvHandle = MpiRecvHandle;

        fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> MpiSendHandle {
            let owned: &'static mut [u8] = Box::leak(buf.to_vec().into_boxed_slice());
            let ptr = owned as *mut [u8];
            let req = self
                .world
                .process_at_rank(peer as i32)
                .immediate_send_with_tag(StaticScope, &*owned, tag as i32);
            MpiSendHandle { req, buf: ptr }
        }

        fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> MpiRecvHandle {
            let owned: &'static mut [u8] = Box::leak(vec![0u8; buf.len()].into_boxed_slice());
            let ptr = owned as *mut [u8];
            let req = self
                .world
                .process_at_rank(peer as i32)
                .immediate_receive_into_with_tag(StaticScope, owned, tag as i32);
            MpiRecvHandle { req, buf: ptr }
        }

        fn rank(&self) -> usize {
            self.rank
        }

        fn size(&self) -> usize {
            self.size
        }
    }
}

#[cfg(feature = "mpi-support")]
pub use mpi_backend::MpiComm;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rayon_roundtrip_two_ranks() {
        let comm0 = RayonComm::new(0, 2);
        let comm1 = RayonComm::new(1, 2);

        let mut recv_buf = [0u8; 4];
        let recv_handle = comm1.irecv(0, 7, &mut recv_buf);
        let send_handle = comm0.isend(1, 7, &[1, 2, 3, 4]);
        send_handle.wait();

        let data = recv_handle.wait().expect("expected data from rank 0");
        recv_buf.copy_from_slice(&data);
        assert_eq!(&recv_buf, &[1, 2, 3, 4]);
    }

    #[test]
    fn channel_is_fifo() {
        let comm0 = RayonComm::new(0, 2);
        let comm1 = RayonComm::new(1, 2);

        comm0.isend(1, 21, &[1]).wait();
        comm0.isend(1, 21, &[2]).wait();
        comm0.isend(1, 21, &[3]).wait();

        for expected in 1u8..=3 {
            let mut buf = [0u8; 1];
            let data = comm1.irecv(0, 21, &mut buf).wait().unwrap();
            assert_eq!(data, vec![expected]);
        }
    }

    #[test]
    fn oversized_message_is_truncated_to_capacity() {
        let comm0 = RayonComm::new(0, 2);
        let comm1 = RayonComm::new(1, 2);

        comm0.isend(1, 33, &[9, 8, 7, 6]).wait();
        let mut buf = [0u8; 2];
        let data = comm1.irecv(0, 33, &mut buf).wait().unwrap();
        assert_eq!(data, vec![9, 8]);
    }

    #[test]
    fn short_message_keeps_its_length() {
        let comm0 = RayonComm::new(0, 2);
        let comm1 = RayonComm::new(1, 2);

        comm0.isend(1, 45, &[5]).wait();
        let mut buf = [0u8; 8];
        let data = comm1.irecv(0, 45, &mut buf).wait().unwrap();
        assert_eq!(data, vec![5]);
    }

    #[test]
    fn tags_keep_channels_apart() {
        let comm0 = RayonComm::new(0, 2);
        let comm1 = RayonComm::new(1, 2);
        let tag = CommTag::new(64);

        comm0.isend(1, tag.offset(1), &[11]).wait();
        comm0.isend(1, tag.offset(0), &[22]).wait();

        let mut buf = [0u8; 1];
        let first = comm1.irecv(0, tag.offset(0), &mut buf).wait().unwrap();
        assert_eq!(first, vec![22]);
        let second = comm1.irecv(0, tag.offset(1), &mut buf).wait().unwrap();
        assert_eq!(second, vec![11]);
    }

    #[test]
    fn no_comm_reports_single_rank() {
        let comm = NoComm;
        assert!(comm.is_no_comm());
        assert_eq!(comm.rank(), 0);
        assert_eq!(comm.size(), 1);
        let mut buf = [0u8; 1];
        assert!(comm.irecv(0, 0, &mut buf).wait().is_none());
    }
}
