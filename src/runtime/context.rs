//! Explicit per-process runtime state.
//!
//! A [`RuntimeContext`] is created by [`RuntimeContext::initialize`] and owns
//! everything the messaging and engine layers would otherwise keep in
//! globals: the communicator, the tag generators, the scheduler, the
//! expected-message counter and the worker pool. Handles are cheap to clone
//! and are passed to every component that talks to other contexts.

use crate::patch_error::PatchError;
use crate::runtime::config::RuntimeConfig;
use crate::runtime::scheduler::{Iterate, Scheduler};
use crate::tulip::communicator::{Communicator, LocalUniverse, NoComm};
use crate::tulip::tags::{CollectiveSequencer, CommTag, TagGenerator, TagSpace};
use bytes::Bytes;
use static_assertions::assert_impl_all;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

struct ContextInner {
    comm: Arc<dyn Communicator>,
    config: RuntimeConfig,
    tags: TagGenerator,
    collectives: CollectiveSequencer,
    scheduler: Scheduler,
    expected_messages: AtomicUsize,
    workers: rayon::ThreadPool,
}

/// Handle to this context's runtime state.
#[derive(Clone)]
pub struct RuntimeContext {
    inner: Arc<ContextInner>,
}

assert_impl_all!(RuntimeContext: Send, Sync, Clone);

impl std::fmt::Debug for RuntimeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeContext")
            .field("context", &self.my_context())
            .field("contexts", &self.num_contexts())
            .finish()
    }
}

impl RuntimeContext {
    /// Bring up a context on top of `comm`.
    pub fn initialize(config: RuntimeConfig, comm: Arc<dyn Communicator>) -> Result<Self, PatchError> {
        let rank = comm.rank();
        let workers = rayon::ThreadPoolBuilder::new()
            .num_threads(config.worker_threads.max(1))
            .thread_name(move |i| format!("multipatch-{rank}-worker-{i}"))
            .build()
            .map_err(|e| PatchError::Runtime(e.to_string()))?;
        log::info!(
            "initialized context {} of {} ({} workers)",
            rank,
            comm.size(),
            config.worker_threads
        );
        Ok(Self {
            inner: Arc::new(ContextInner {
                comm,
                config,
                tags: TagGenerator::new(),
                collectives: CollectiveSequencer::default(),
                scheduler: Scheduler::new(),
                expected_messages: AtomicUsize::new(0),
                workers,
            }),
        })
    }

    /// A single-context runtime with no messaging.
    pub fn serial(config: RuntimeConfig) -> Result<Self, PatchError> {
        Self::initialize(config, Arc::new(NoComm))
    }

    /// One context per MPI rank, configured from the environment.
    ///
    /// # Errors
    /// `PatchError::Runtime` if MPI was already initialized in this process.
    #[cfg(feature = "mpi-support")]
    pub fn initialize_mpi() -> Result<Self, PatchError> {
        match crate::tulip::communicator::MpiComm::new() {
            Some(comm) => Self::initialize(RuntimeConfig::from_env(), Arc::new(comm)),
            None => Err(PatchError::Runtime("MPI is already initialized".into())),
        }
    }

    /// Run `f` once per context of a fresh in-process universe, each on its
    /// own thread, and return the results in context order.
    pub fn run_local<R, F>(contexts: usize, config: RuntimeConfig, f: F) -> Vec<R>
    where
        R: Send,
        F: Fn(RuntimeContext) -> R + Sync,
    {
        let comms = LocalUniverse::new(contexts);
        std::thread::scope(|s| {
            let handles: Vec<_> = comms
                .into_iter()
                .map(|comm| {
                    let cfg = config.clone();
                    let f = &f;
                    s.spawn(move || {
                        let ctx = RuntimeContext::initialize(cfg, Arc::new(comm))
                            .unwrap_or_else(|e| panic!("context bring-up failed: {e}"));
                        f(ctx)
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| match h.join() {
                    Ok(r) => r,
                    Err(p) => std::panic::resume_unwind(p),
                })
                .collect()
        })
    }

    /// Drain outstanding work and synchronize with every other context.
    pub fn finalize(self) -> Result<(), PatchError> {
        self.block_and_evaluate()?;
        self.inner.comm.barrier();
        log::info!("finalized context {}", self.my_context());
        Ok(())
    }

    #[inline]
    pub fn my_context(&self) -> usize {
        self.inner.comm.rank()
    }

    #[inline]
    pub fn num_contexts(&self) -> usize {
        self.inner.comm.size()
    }

    /// `true` if data owned by `owner` is addressable here. `None` means
    /// "present on every context".
    #[inline]
    pub fn is_local(&self, owner: Option<usize>) -> bool {
        owner.is_none_or(|c| c == self.my_context())
    }

    pub fn comm(&self) -> &dyn Communicator {
        &*self.inner.comm
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    pub fn tags(&self) -> &TagGenerator {
        &self.inner.tags
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.inner.scheduler
    }

    pub fn workers(&self) -> &rayon::ThreadPool {
        &self.inner.workers
    }

    /// Tag for the next collective of kind `space`.
    pub fn next_collective_tag(&self, space: TagSpace) -> CommTag {
        self.inner.collectives.next(space)
    }

    /// Queue an iterate on this context's scheduler.
    pub fn spawn(&self, iterate: Iterate) {
        self.inner.scheduler.spawn(iterate);
    }

    pub(crate) fn expect_message(&self) {
        self.inner.expected_messages.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn message_arrived(&self) {
        let prev = self.inner.expected_messages.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "more arrivals than expected messages");
    }

    /// Receives scheduled but not yet satisfied.
    pub fn expected_messages(&self) -> usize {
        self.inner.expected_messages.load(Ordering::Acquire)
    }

    /// Send a message outside the scheduler (collectives use this).
    pub(crate) fn post(&self, peer: usize, tag: CommTag, payload: Bytes) {
        if self.inner.config.trace_messages {
            log::trace!(
                "context {} -> {}: tag {:#x}, {} bytes",
                self.my_context(),
                peer,
                tag.as_u32(),
                payload.len()
            );
        }
        self.inner.comm.send(peer, tag, payload);
    }

    /// Wait for one message while keeping the scheduler moving, so iterates
    /// other contexts depend on still run.
    pub(crate) fn wait_for_message(&self, from: usize, tag: CommTag) -> Result<Bytes, PatchError> {
        let comm = self.comm();
        loop {
            let seen = comm.traffic_epoch();
            if let Some(msg) = comm.try_recv(from, tag) {
                if self.inner.config.trace_messages {
                    log::trace!(
                        "context {} <- {}: tag {:#x}, {} bytes",
                        self.my_context(),
                        from,
                        tag.as_u32(),
                        msg.len()
                    );
                }
                return Ok(msg);
            }
            if !self.inner.scheduler.poll(comm)? {
                comm.wait_for_traffic(seen, self.inner.config.poll_interval());
            }
        }
    }

    /// Run all outstanding iterates and wait for every expected message.
    /// Data produced on another context may only be read after this returns.
    pub fn block_and_evaluate(&self) -> Result<(), PatchError> {
        let comm = self.comm();
        loop {
            let seen = comm.traffic_epoch();
            let progressed = self.inner.scheduler.poll(comm)?;
            if self.inner.scheduler.is_idle() && self.expected_messages() == 0 {
                return Ok(());
            }
            if !progressed {
                comm.wait_for_traffic(seen, self.inner.config.poll_interval());
            }
        }
    }

    /// Barrier across all contexts (drains local work first).
    pub fn barrier(&self) -> Result<(), PatchError> {
        self.block_and_evaluate()?;
        self.inner.comm.barrier();
        Ok(())
    }
}
