//! Point-to-point byte messaging between contexts, in process or over MPI.
//!
//! Messages are *contiguous byte buffers* addressed by `(source, destination,
//! tag)`. Sends are buffered and never block. Receives are polled with
//! [`Communicator::try_recv`]; callers that need to block use a [`RecvHandle`]
//! (or the runtime's wait loop), which sleeps on the communicator's traffic
//! epoch instead of spinning.

use crate::tulip::tags::CommTag;
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::{Arc, Barrier};
use std::time::Duration;

/// Message passing backend of a runtime context.
pub trait Communicator: Send + Sync + 'static {
    /// This context's id.
    fn rank(&self) -> usize;
    /// Number of participating contexts.
    fn size(&self) -> usize;
    /// Buffered send of `payload` to `peer`.
    fn send(&self, peer: usize, tag: CommTag, payload: Bytes);
    /// Take the oldest message from `peer` with `tag`, if one has arrived.
    fn try_recv(&self, peer: usize, tag: CommTag) -> Option<Bytes>;
    /// Monotonic counter bumped on every delivery to this context.
    fn traffic_epoch(&self) -> u64;
    /// Sleep until the traffic epoch moves past `seen` or `timeout` elapses.
    fn wait_for_traffic(&self, seen: u64, timeout: Duration);
    /// Block until every context has reached the barrier.
    fn barrier(&self);
    /// `true` for the single-context backend.
    fn is_no_comm(&self) -> bool {
        false
    }
}

/// Anything that can be waited on.
pub trait Wait {
    /// Wait for completion and return the received data (if any).
    fn wait(self) -> Option<Bytes>;
}

/// Handle for a receive posted with [`irecv`].
pub struct RecvHandle<'a> {
    comm: &'a dyn Communicator,
    peer: usize,
    tag: CommTag,
    poll: Duration,
}

impl RecvHandle<'_> {
    /// Non-blocking completion check.
    pub fn test(&self) -> Option<Bytes> {
        self.comm.try_recv(self.peer, self.tag)
    }
}

impl Wait for RecvHandle<'_> {
    fn wait(self) -> Option<Bytes> {
        if self.comm.is_no_comm() {
            return None;
        }
        loop {
            let seen = self.comm.traffic_epoch();
            if let Some(msg) = self.comm.try_recv(self.peer, self.tag) {
                return Some(msg);
            }
            self.comm.wait_for_traffic(seen, self.poll);
        }
    }
}

/// Post a receive. The returned handle blocks on `wait`.
pub fn irecv(comm: &dyn Communicator, peer: usize, tag: CommTag, poll: Duration) -> RecvHandle<'_> {
    RecvHandle {
        comm,
        peer,
        tag,
        poll,
    }
}

/// Compile-time no-op comm for single-context runs.
#[derive(Clone, Debug, Default)]
pub struct NoComm;

impl Communicator for NoComm {
    fn rank(&self) -> usize {
        0
    }
    fn size(&self) -> usize {
        1
    }
    fn send(&self, peer: usize, _tag: CommTag, _payload: Bytes) {
        panic!("NoComm cannot send (peer {peer}): only one context exists");
    }
    fn try_recv(&self, _peer: usize, _tag: CommTag) -> Option<Bytes> {
        None
    }
    fn traffic_epoch(&self) -> u64 {
        0
    }
    fn wait_for_traffic(&self, _seen: u64, _timeout: Duration) {}
    fn barrier(&self) {}
    fn is_no_comm(&self) -> bool {
        true
    }
}

// --- LocalComm: one thread per context inside a single process ---
type Key = (usize, usize, CommTag); // (src, dst, tag)

struct Doorbell {
    epoch: Mutex<u64>,
    rung: Condvar,
}

/// Shared state of an in-process group of contexts.
pub struct LocalUniverse {
    size: usize,
    mailbox: DashMap<Key, VecDeque<Bytes>>,
    doorbells: Vec<Doorbell>,
    barrier: Barrier,
}

impl LocalUniverse {
    /// Create a universe of `size` contexts and one communicator per context.
    pub fn new(size: usize) -> Vec<LocalComm> {
        assert!(size > 0, "a universe needs at least one context");
        let universe = Arc::new(Self {
            size,
            mailbox: DashMap::new(),
            doorbells: (0..size)
                .map(|_| Doorbell {
                    epoch: Mutex::new(0),
                    rung: Condvar::new(),
                })
                .collect(),
            barrier: Barrier::new(size),
        });
        (0..size)
            .map(|rank| LocalComm {
                rank,
                universe: universe.clone(),
            })
            .collect()
    }

    /// Number of undelivered messages (all destinations).
    pub fn in_flight(&self) -> usize {
        self.mailbox.iter().map(|e| e.value().len()).sum()
    }
}

/// Intra-process communicator backed by a shared mailbox.
#[derive(Clone)]
pub struct LocalComm {
    rank: usize,
    universe: Arc<LocalUniverse>,
}

impl std::fmt::Debug for LocalComm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalComm")
            .field("rank", &self.rank)
            .field("size", &self.universe.size)
            .finish()
    }
}

impl LocalComm {
    pub fn universe(&self) -> &LocalUniverse {
        &self.universe
    }
}

impl Communicator for LocalComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.universe.size
    }

    fn send(&self, peer: usize, tag: CommTag, payload: Bytes) {
        assert!(
            peer < self.universe.size,
            "send to context {peer} outside universe of {}",
            self.universe.size
        );
        self.universe
            .mailbox
            .entry((self.rank, peer, tag))
            .or_default()
            .push_back(payload);
        let bell = &self.universe.doorbells[peer];
        let mut epoch = bell.epoch.lock();
        *epoch += 1;
        bell.rung.notify_all();
    }

    fn try_recv(&self, peer: usize, tag: CommTag) -> Option<Bytes> {
        let key = (peer, self.rank, tag);
        let msg = self.universe.mailbox.get_mut(&key)?.pop_front();
        // drop empty queues so the mailbox does not grow with every tag
        self.universe.mailbox.remove_if(&key, |_, q| q.is_empty());
        msg
    }

    fn traffic_epoch(&self) -> u64 {
        *self.universe.doorbells[self.rank].epoch.lock()
    }

    fn wait_for_traffic(&self, seen: u64, timeout: Duration) {
        let bell = &self.universe.doorbells[self.rank];
        let mut epoch = bell.epoch.lock();
        if *epoch == seen {
            bell.rung.wait_for(&mut epoch, timeout);
        }
    }

    fn barrier(&self) {
        self.universe.barrier.wait();
    }
}

// --- MPI backend (feature = "mpi-support") ---
#[cfg(feature = "mpi-support")]
mod mpi_backend {
    use super::*;
    use crate::tulip::tags::MIN_TAG_UB;
    use mpi::environment::Universe;
    use mpi::topology::SimpleCommunicator;
    use mpi::traits::{Communicator as _, Destination, Source};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Instant;

    // first pause of a traffic wait, as a fraction of its timeout
    const FIRST_BACKOFF_DIVISOR: u32 = 16;

    /// Communicator over `MPI_COMM_WORLD`.
    ///
    /// Tags are folded into `0..=tag_ub` with [`CommTag::bounded`]. The default
    /// bound is the one the MPI standard guarantees; installations known to
    /// accept larger tags can raise it with [`MpiComm::with_tag_bound`].
    pub struct MpiComm {
        _universe: Arc<Universe>,
        world: SimpleCommunicator,
        rank: usize,
        size: usize,
        tag_ub: u32,
        epoch: AtomicU64,
        // serializes MPI calls; the library is initialized without MPI_THREAD_MULTIPLE
        call_lock: Mutex<()>,
    }

    // SAFETY: every MPI call goes through `call_lock`, so the world
    // communicator is never used from two threads at once.
    unsafe impl Send for MpiComm {}
    unsafe impl Sync for MpiComm {}

    impl MpiComm {
        pub fn new() -> Option<Self> {
            Self::with_tag_bound(MIN_TAG_UB)
        }

        /// # Panics
        /// If `tag_ub` is below the MPI minimum or above `i32::MAX`.
        pub fn with_tag_bound(tag_ub: u32) -> Option<Self> {
            assert!(
                (MIN_TAG_UB..=i32::MAX as u32).contains(&tag_ub),
                "tag bound {tag_ub} outside {MIN_TAG_UB}..={}",
                i32::MAX
            );
            let universe = mpi::initialize()?;
            let world = universe.world();
            let rank = world.rank() as usize;
            let size = world.size() as usize;
            Some(Self {
                _universe: Arc::new(universe),
                world,
                rank,
                size,
                tag_ub,
                epoch: AtomicU64::new(0),
                call_lock: Mutex::new(()),
            })
        }

        fn mpi_tag(&self, tag: CommTag) -> i32 {
            tag.bounded(self.tag_ub) as i32
        }

        fn pending(&self) -> bool {
            let _g = self.call_lock.lock();
            self.world.any_process().immediate_probe().is_some()
        }
    }

    impl Communicator for MpiComm {
        fn rank(&self) -> usize {
            self.rank
        }
        fn size(&self) -> usize {
            self.size
        }
        fn send(&self, peer: usize, tag: CommTag, payload: Bytes) {
            let tag = self.mpi_tag(tag);
            let _g = self.call_lock.lock();
            self.world
                .process_at_rank(peer as i32)
                .send_with_tag(&payload[..], tag);
        }
        fn try_recv(&self, peer: usize, tag: CommTag) -> Option<Bytes> {
            let tag = self.mpi_tag(tag);
            let _g = self.call_lock.lock();
            let (msg, _status) = self
                .world
                .process_at_rank(peer as i32)
                .immediate_matched_probe_with_tag(tag)?;
            let (data, _status) = msg.matched_receive_vec::<u8>();
            self.epoch.fetch_add(1, Ordering::Relaxed);
            Some(Bytes::from(data))
        }
        fn traffic_epoch(&self) -> u64 {
            self.epoch.load(Ordering::Relaxed)
        }
        /// MPI has no doorbell: probe for any incoming message with a
        /// doubling pause in between. A message that is already queued but
        /// not yet wanted ends the wait after the first pause, so callers
        /// waiting behind it poll at `timeout / 16`.
        fn wait_for_traffic(&self, seen: u64, timeout: Duration) {
            let deadline = Instant::now() + timeout;
            let mut pause = (timeout / FIRST_BACKOFF_DIVISOR).max(Duration::from_micros(1));
            while self.traffic_epoch() == seen {
                let now = Instant::now();
                if now >= deadline {
                    return;
                }
                std::thread::sleep(pause.min(deadline - now));
                if self.pending() {
                    return;
                }
                pause *= 2;
            }
        }
        fn barrier(&self) {
            let _g = self.call_lock.lock();
            self.world.barrier();
        }
    }
}

#[cfg(feature = "mpi-support")]
pub use mpi_backend::MpiComm;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_roundtrip_two_ranks() {
        let comms = LocalUniverse::new(2);
        let tag = CommTag::new(7);
        comms[0].send(1, tag, Bytes::from_static(&[1, 2, 3, 4]));
        let h = irecv(&comms[1], 0, tag, Duration::from_millis(1));
        assert_eq!(&h.wait().unwrap()[..], &[1, 2, 3, 4]);
        assert_eq!(comms[0].universe().in_flight(), 0);
    }

    #[test]
    fn local_fifo_per_tag() {
        let comms = LocalUniverse::new(2);
        let tag = CommTag::new(0x1001);
        for i in 0..10u8 {
            comms[0].send(1, tag, Bytes::from(vec![i]));
        }
        let got: Vec<u8> = (0..10)
            .map(|_| comms[1].try_recv(0, tag).unwrap()[0])
            .collect();
        assert_eq!(got, (0u8..10).collect::<Vec<_>>());
    }

    #[test]
    fn tags_isolate_streams() {
        let comms = LocalUniverse::new(2);
        comms[0].send(1, CommTag::new(0xB200), Bytes::from_static(b"b"));
        comms[0].send(1, CommTag::new(0xA100), Bytes::from_static(b"a"));
        assert_eq!(&comms[1].try_recv(0, CommTag::new(0xA100)).unwrap()[..], b"a");
        assert_eq!(&comms[1].try_recv(0, CommTag::new(0xB200)).unwrap()[..], b"b");
        assert!(comms[1].try_recv(0, CommTag::new(0xA100)).is_none());
    }

    #[test]
    fn blocking_receive_wakes_on_send() {
        let comms = LocalUniverse::new(2);
        let tag = CommTag::new(3);
        let receiver = comms[1].clone();
        let t = std::thread::spawn(move || {
            irecv(&receiver, 0, tag, Duration::from_secs(5)).wait()
        });
        std::thread::sleep(Duration::from_millis(10));
        comms[0].send(1, tag, Bytes::from_static(b"late"));
        assert_eq!(&t.join().unwrap().unwrap()[..], b"late");
    }

    #[test]
    fn no_comm_is_single_context() {
        let comm = NoComm;
        assert!(comm.is_no_comm());
        assert_eq!(comm.size(), 1);
        assert!(irecv(&comm, 0, CommTag::new(1), Duration::ZERO).wait().is_none());
    }
}
