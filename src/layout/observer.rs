//! Layout to engine notifications.
//!
//! A layout keeps weak references to its observers. Notifications go to a
//! snapshot of the observers that are still alive, taken without holding any
//! layout lock, so an observer may query the layout while handling an event.

use crate::engine::DynamicEvent;
use crate::patch_error::PatchError;
use parking_lot::Mutex;
use std::sync::Weak;
use std::sync::atomic::{AtomicU64, Ordering};

/// What happened to a layout.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LayoutEvent {
    /// Every node may have changed; reallocate.
    Repartition,
    Dynamic(DynamicEvent),
}

pub trait LayoutObserver<const D: usize>: Send + Sync {
    fn on_repartition(&self) -> Result<(), PatchError>;

    fn on_dynamic_event(&self, event: &DynamicEvent) -> Result<(), PatchError>;
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

type Entry<const D: usize> = (ObserverId, Weak<dyn LayoutObserver<D>>);

pub struct ObserverList<const D: usize> {
    next: AtomicU64,
    entries: Mutex<Vec<Entry<D>>>,
}

impl<const D: usize> Default for ObserverList<D> {
    fn default() -> Self {
        Self {
            next: AtomicU64::new(0),
            entries: Mutex::new(Vec::new()),
        }
    }
}

impl<const D: usize> std::fmt::Debug for ObserverList<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverList").field("len", &self.len()).finish()
    }
}

impl<const D: usize> ObserverList<D> {
    pub fn attach(&self, observer: Weak<dyn LayoutObserver<D>>) -> ObserverId {
        let id = ObserverId(self.next.fetch_add(1, Ordering::Relaxed));
        self.entries.lock().push((id, observer));
        id
    }

    pub fn detach(&self, id: ObserverId) {
        self.entries.lock().retain(|(i, _)| *i != id);
    }

    /// Observers still alive.
    pub fn len(&self) -> usize {
        self.entries.lock().iter().filter(|(_, w)| w.strong_count() > 0).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver `event` to every live observer; dead entries are dropped.
    /// Every observer hears the event even if an earlier one fails; the
    /// first error is returned afterwards.
    pub fn notify(&self, event: &LayoutEvent) -> Result<(), PatchError> {
        let live: Vec<_> = {
            let mut entries = self.entries.lock();
            entries.retain(|(_, w)| w.strong_count() > 0);
            entries.iter().filter_map(|(_, w)| w.upgrade()).collect()
        };
        log::debug!("notifying {} observers of {}", live.len(), event_name(event));
        let mut first_err = None;
        for observer in live {
            let res = match event {
                LayoutEvent::Repartition => observer.on_repartition(),
                LayoutEvent::Dynamic(e) => observer.on_dynamic_event(e),
            };
            if let Err(e) = res {
                log::warn!("observer rejected {}: {e}", event_name(event));
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

fn event_name(event: &LayoutEvent) -> &'static str {
    match event {
        LayoutEvent::Repartition => "repartition",
        LayoutEvent::Dynamic(_) => "dynamic event",
    }
}
