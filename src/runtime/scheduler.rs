//! Cooperative dependency scheduler.
//!
//! Work is submitted as [`Iterate`]s, each declaring up front which
//! [`DataObject`]s it reads and writes. Requests on one object are granted in
//! submission order; consecutive reads share the object, a write waits for
//! every earlier request to finish. Independent iterates may run in any order.
//!
//! An iterate can finish in two ways: it completes when its body returns, or
//! it parks on a message ([`IterateOutcome::AwaitMessage`]). A parked iterate
//! keeps its locks until the message arrives and the arrival handler has run;
//! this is how a receive holds its target's write lock while data is in
//! flight.

use crate::patch_error::PatchError;
use crate::tulip::communicator::Communicator;
use crate::tulip::tags::CommTag;
use bytes::Bytes;
use hashbrown::HashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_OBJECT: AtomicU64 = AtomicU64::new(1);

/// Identity of a lockable piece of data (one engine's storage block).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DataObject(u64);

impl DataObject {
    /// A fresh, process-unique object id.
    pub fn new() -> Self {
        Self(NEXT_OBJECT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn id(self) -> u64 {
        self.0
    }
}

impl Default for DataObject {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LockMode {
    Read,
    Write,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LockRequest {
    pub object: DataObject,
    pub mode: LockMode,
}

/// Called with the payload once a parked iterate's message arrives.
pub type ArrivalHandler = Box<dyn FnOnce(Bytes) -> Result<(), PatchError> + Send>;

/// A message an iterate is parked on.
pub struct PendingMessage {
    pub from: usize,
    pub tag: CommTag,
    pub on_arrival: ArrivalHandler,
}

pub enum IterateOutcome {
    Complete,
    AwaitMessage(PendingMessage),
}

type Body = Box<dyn FnOnce() -> Result<IterateOutcome, PatchError> + Send>;

/// A unit of work with declared data dependencies.
pub struct Iterate {
    label: &'static str,
    requests: Vec<LockRequest>,
    body: Body,
}

impl Iterate {
    pub fn new<F>(label: &'static str, body: F) -> Self
    where
        F: FnOnce() -> Result<IterateOutcome, PatchError> + Send + 'static,
    {
        Self {
            label,
            requests: Vec::new(),
            body: Box::new(body),
        }
    }

    pub fn reads(mut self, object: DataObject) -> Self {
        self.requests.push(LockRequest {
            object,
            mode: LockMode::Read,
        });
        self
    }

    pub fn writes(mut self, object: DataObject) -> Self {
        self.requests.push(LockRequest {
            object,
            mode: LockMode::Write,
        });
        self
    }

    pub fn label(&self) -> &'static str {
        self.label
    }
}

#[derive(Default)]
struct LockState {
    readers: usize,
    writer: bool,
    queue: VecDeque<(u64, LockMode)>,
}

impl LockState {
    fn grantable(&self, id: u64, mode: LockMode) -> bool {
        if self.writer {
            return false;
        }
        match mode {
            LockMode::Write => self.readers == 0 && self.queue.front().map(|e| e.0) == Some(id),
            LockMode::Read => {
                for &(qid, qmode) in &self.queue {
                    if qid == id {
                        return true;
                    }
                    if qmode == LockMode::Write {
                        return false;
                    }
                }
                false
            }
        }
    }

    fn is_idle(&self) -> bool {
        self.readers == 0 && !self.writer && self.queue.is_empty()
    }
}

struct Queued {
    id: u64,
    iterate: Iterate,
}

struct Parked {
    label: &'static str,
    requests: Vec<LockRequest>,
    message: PendingMessage,
}

#[derive(Default)]
struct State {
    next_id: u64,
    queued: VecDeque<Queued>,
    parked: Vec<Parked>,
    locks: HashMap<DataObject, LockState>,
}

/// Per-context cooperative executor. Iterates run on the thread that drives
/// [`Scheduler::poll`].
#[derive(Default)]
pub struct Scheduler {
    state: Mutex<State>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `iterate`; its lock requests join each object's queue now.
    pub fn spawn(&self, iterate: Iterate) {
        let mut st = self.state.lock();
        let id = st.next_id;
        st.next_id += 1;
        for req in &iterate.requests {
            st.locks
                .entry(req.object)
                .or_default()
                .queue
                .push_back((id, req.mode));
        }
        log::trace!("scheduler: queued iterate {id} ({})", iterate.label);
        st.queued.push_back(Queued { id, iterate });
    }

    fn take_runnable(&self) -> Option<Iterate> {
        let mut st = self.state.lock();
        let State { queued, locks, .. } = &mut *st;
        let pos = queued.iter().position(|q| {
            q.iterate.requests.iter().all(|r| {
                locks
                    .get(&r.object)
                    .is_some_and(|l| l.grantable(q.id, r.mode))
            })
        })?;
        let Queued { id, iterate } = queued.remove(pos)?;
        for req in &iterate.requests {
            if let Some(l) = locks.get_mut(&req.object) {
                if let Some(i) = l.queue.iter().position(|e| e.0 == id) {
                    l.queue.remove(i);
                }
                match req.mode {
                    LockMode::Read => l.readers += 1,
                    LockMode::Write => l.writer = true,
                }
            }
        }
        Some(iterate)
    }

    fn release(&self, requests: &[LockRequest]) {
        let mut st = self.state.lock();
        for req in requests {
            let idle = match st.locks.get_mut(&req.object) {
                Some(l) => {
                    match req.mode {
                        LockMode::Read => {
                            debug_assert!(l.readers > 0, "read lock released twice");
                            l.readers = l.readers.saturating_sub(1);
                        }
                        LockMode::Write => {
                            debug_assert!(l.writer, "write lock released twice");
                            l.writer = false;
                        }
                    }
                    l.is_idle()
                }
                None => false,
            };
            if idle {
                st.locks.remove(&req.object);
            }
        }
    }

    /// Run every runnable iterate and deliver every arrived message.
    /// Returns `true` if anything made progress.
    pub fn poll(&self, comm: &dyn Communicator) -> Result<bool, PatchError> {
        let mut progress = false;
        loop {
            let mut round = false;
            while let Some(iterate) = self.take_runnable() {
                round = true;
                let Iterate {
                    label,
                    requests,
                    body,
                } = iterate;
                match body() {
                    Ok(IterateOutcome::Complete) => self.release(&requests),
                    Ok(IterateOutcome::AwaitMessage(message)) => {
                        self.state.lock().parked.push(Parked {
                            label,
                            requests,
                            message,
                        });
                    }
                    Err(e) => {
                        self.release(&requests);
                        return Err(e);
                    }
                }
            }
            if self.deliver(comm)? {
                round = true;
            }
            if !round {
                return Ok(progress);
            }
            progress = true;
        }
    }

    fn deliver(&self, comm: &dyn Communicator) -> Result<bool, PatchError> {
        let parked = std::mem::take(&mut self.state.lock().parked);
        if parked.is_empty() {
            return Ok(false);
        }
        let mut still_waiting = Vec::with_capacity(parked.len());
        let mut delivered = false;
        let mut first_err = None;
        for p in parked {
            if first_err.is_some() {
                still_waiting.push(p);
                continue;
            }
            match comm.try_recv(p.message.from, p.message.tag) {
                Some(payload) => {
                    delivered = true;
                    log::trace!(
                        "scheduler: message for {} from context {} arrived",
                        p.label,
                        p.message.from
                    );
                    let res = (p.message.on_arrival)(payload);
                    self.release(&p.requests);
                    if let Err(e) = res {
                        first_err = Some(e);
                    }
                }
                None => still_waiting.push(p),
            }
        }
        self.state.lock().parked.extend(still_waiting);
        match first_err {
            Some(e) => Err(e),
            None => Ok(delivered),
        }
    }

    /// Iterates queued or parked on a message.
    pub fn outstanding(&self) -> usize {
        let st = self.state.lock();
        st.queued.len() + st.parked.len()
    }

    pub fn is_idle(&self) -> bool {
        self.outstanding() == 0
    }
}
