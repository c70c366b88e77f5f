//! Resizable 1-d patch that lives on one context.
//!
//! The owner keeps a [`DynamicBrick`]; every other context tracks only the
//! domain, adjusting its length by the same amounts so that all contexts
//! agree on sizes until the next sync relabels them.

use crate::domain::{IndexSet, Interval};
use crate::engine::dynamic_events::{validate_copy_list, validate_kill_list};
use crate::engine::{DeleteMethod, DynamicBrick, Element, LocalEngine, Patch};
use crate::layout::Node;
use crate::patch_error::PatchError;
use crate::runtime::RuntimeContext;
use crate::tulip::remote_proxy::RemoteProxy;
use parking_lot::RwLock;
use std::sync::Arc;

#[derive(Clone, Debug)]
pub struct RemoteDynamicEngine<T> {
    ctx: RuntimeContext,
    owner: Option<usize>,
    local: Option<DynamicBrick<T>>,
    // domain as seen by non-owners; unused where `local` is present
    shadow: Arc<RwLock<Interval<1>>>,
}

impl<T: Element> RemoteDynamicEngine<T> {
    /// # Panics
    /// If `owner` is not a context.
    pub fn new(ctx: &RuntimeContext, domain: Interval<1>, owner: Option<usize>) -> Self {
        if let Some(o) = owner {
            assert!(
                o < ctx.num_contexts(),
                "owner {o} outside {} contexts",
                ctx.num_contexts()
            );
        }
        Self {
            ctx: ctx.clone(),
            owner,
            local: ctx.is_local(owner).then(|| DynamicBrick::new(domain)),
            shadow: Arc::new(RwLock::new(domain)),
        }
    }

    pub fn domain(&self) -> Interval<1> {
        match &self.local {
            Some(b) => b.domain(),
            None => *self.shadow.read(),
        }
    }

    pub fn owner(&self) -> Option<usize> {
        self.owner
    }

    pub fn engine_is_local(&self) -> bool {
        self.local.is_some()
    }

    fn check(&self, i: i64) {
        let d = self.domain();
        assert!(d.contains_point(&[i]), "index {i} outside remote domain {d}");
    }

    /// Collective unless replicated, like [`RemoteEngine::read`](crate::engine::RemoteEngine::read).
    ///
    /// # Panics
    /// If `i` is outside the current domain.
    pub fn read(&self, i: i64) -> Result<T, PatchError> {
        self.check(i);
        let here = self.local.as_ref().map(|b| b.read(&[i])).unwrap_or_default();
        match self.owner {
            None => Ok(here),
            Some(owner) => RemoteProxy::broadcast(&self.ctx, here, owner),
        }
    }

    /// Write on the owner; a no-op elsewhere.
    pub fn write(&self, i: i64, value: T) {
        self.check(i);
        if let Some(b) = &self.local {
            b.write(&[i], value);
        }
    }

    pub fn make_own_copy(&mut self) {
        match self.local.as_mut() {
            Some(b) => b.make_own_copy(),
            None => {
                let d = *self.shadow.read();
                self.shadow = Arc::new(RwLock::new(d));
            }
        }
    }

    fn resize_shadow(&self, len: usize) {
        let mut d = self.shadow.write();
        *d = Interval::sized([d.first(0)], [len]);
    }

    pub fn create(&self, n: usize) {
        match &self.local {
            Some(b) => b.create(n),
            None => self.resize_shadow(self.domain().size() + n),
        }
    }

    /// Remove `kill` (absolute unless `offset`). Non-owners check the list
    /// against their cached domain and shrink by its size.
    pub fn destroy(&self, kill: &IndexSet, method: DeleteMethod, offset: bool) -> Result<(), PatchError> {
        match &self.local {
            Some(b) => b.destroy(kill, method, offset),
            None => {
                let d = self.domain();
                let rel: Vec<i64> = match offset {
                    true => kill.to_points(),
                    false => kill.to_points().iter().map(|p| p - d.first(0)).collect(),
                };
                validate_kill_list(&rel, d.size())?;
                self.resize_shadow(d.size() - rel.len());
                Ok(())
            }
        }
    }

    pub fn copy(&self, from: &IndexSet, offset: bool) -> Result<(), PatchError> {
        match &self.local {
            Some(b) => b.copy(from, offset),
            None => {
                let d = self.domain();
                let rel: Vec<i64> = match offset {
                    true => from.to_points(),
                    false => from.to_points().iter().map(|p| p - d.first(0)).collect(),
                };
                validate_copy_list(&rel, d.size())?;
                self.resize_shadow(d.size() + rel.len());
                Ok(())
            }
        }
    }

    /// Append `values` on the owner, `count` default-length elsewhere.
    pub fn append(&self, values: &[T], count: usize) {
        match &self.local {
            Some(b) => b.append(values),
            None => self.resize_shadow(self.domain().size() + count),
        }
    }

    /// Relabel. The owner checks the length; non-owners take `domain` as is.
    pub fn sync(&self, domain: Interval<1>) -> Result<(), PatchError> {
        match &self.local {
            Some(b) => b.sync(domain),
            None => {
                *self.shadow.write() = domain;
                Ok(())
            }
        }
    }
}

impl<T: Element> Patch<1> for RemoteDynamicEngine<T> {
    type Element = T;
    type Local = DynamicBrick<T>;

    fn from_node(ctx: &RuntimeContext, node: &Node<1>) -> Self {
        RemoteDynamicEngine::new(ctx, node.allocated, node.context)
    }

    fn domain(&self) -> Interval<1> {
        RemoteDynamicEngine::domain(self)
    }

    fn owning_context(&self) -> Option<usize> {
        self.owner
    }

    fn local_engine(&self) -> Option<&DynamicBrick<T>> {
        self.local.as_ref()
    }

    fn make_own_copy(&mut self) {
        RemoteDynamicEngine::make_own_copy(self);
    }

    fn create(&mut self, n: usize) -> Result<(), PatchError> {
        RemoteDynamicEngine::create(self, n);
        Ok(())
    }

    fn destroy(&mut self, kill: &IndexSet, method: DeleteMethod, offset: bool) -> Result<(), PatchError> {
        RemoteDynamicEngine::destroy(self, kill, method, offset)
    }

    fn copy(&mut self, from: &IndexSet, offset: bool) -> Result<(), PatchError> {
        RemoteDynamicEngine::copy(self, from, offset)
    }

    fn append(&mut self, values: &[T], count: usize) -> Result<(), PatchError> {
        RemoteDynamicEngine::append(self, values, count);
        Ok(())
    }

    fn sync(&mut self, domain: Interval<1>) -> Result<(), PatchError> {
        RemoteDynamicEngine::sync(self, domain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::RuntimeConfig;

    #[test]
    fn every_context_tracks_the_length() {
        let got = RuntimeContext::run_local(2, RuntimeConfig::default().with_workers(1), |ctx| {
            let e = RemoteDynamicEngine::<i32>::new(&ctx, Interval::range(0, 5), Some(0));
            for i in 0..6 {
                e.write(i, i as i32 * 10);
            }
            e.create(2);
            e.destroy(&IndexSet::List(vec![1, 2]), DeleteMethod::ShiftUp, false)
                .unwrap();
            e.copy(&IndexSet::List(vec![0]), true).unwrap();
            let len = e.domain().size();
            (e.engine_is_local(), len, e.read(1).unwrap(), e.read(6).unwrap())
        });
        assert_eq!(got[0], (true, 7, 30, 0));
        assert_eq!(got[1], (false, 7, 30, 0));
    }

    #[test]
    fn non_owner_rejects_bad_kill_list() {
        let got = RuntimeContext::run_local(2, RuntimeConfig::default().with_workers(1), |ctx| {
            let e = RemoteDynamicEngine::<i32>::new(&ctx, Interval::range(0, 3), Some(1));
            let res = e.destroy(&IndexSet::List(vec![2, 2]), DeleteMethod::BackFill, true);
            (res.is_err(), e.domain().size())
        });
        assert_eq!(got, vec![(true, 4), (true, 4)]);
    }

    #[test]
    #[should_panic(expected = "outside remote domain")]
    fn read_past_the_end_panics() {
        let ctx = RuntimeContext::serial(RuntimeConfig::default().with_workers(1)).unwrap();
        let e = RemoteDynamicEngine::<i32>::new(&ctx, Interval::range(0, 3), Some(0));
        let _ = e.read(4);
    }

    #[test]
    fn sync_relabels_everywhere() {
        let ctx = RuntimeContext::serial(RuntimeConfig::default().with_workers(1)).unwrap();
        let mut e = RemoteDynamicEngine::<u8>::new(&ctx, Interval::range(0, 3), Some(0));
        Patch::sync(&mut e, Interval::range(10, 13)).unwrap();
        assert_eq!(e.domain(), Interval::range(10, 13));
        assert!(Patch::sync(&mut e, Interval::range(0, 1)).is_err());
    }
}
