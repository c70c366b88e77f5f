//! A patch that lives on one context.
//!
//! Every context knows the domain and the owner; only the owner materializes
//! storage. Element access from other contexts goes through a collective
//! [`RemoteProxy`] pull, so all contexts must make the same access together.

use crate::domain::Interval;
use crate::engine::{Brick, Element, LocalEngine, Patch};
use crate::layout::Node;
use crate::patch_error::PatchError;
use crate::runtime::RuntimeContext;
use crate::tulip::remote_proxy::RemoteProxy;

#[derive(Clone, Debug)]
pub struct RemoteEngine<const D: usize, T> {
    ctx: RuntimeContext,
    domain: Interval<D>,
    owner: Option<usize>,
    local: Option<Brick<D, T>>,
}

impl<const D: usize, T: Element> RemoteEngine<D, T> {
    /// Storage over `domain` owned by `owner` (`None` for every context).
    ///
    /// # Panics
    /// If `owner` is not a context.
    pub fn new(ctx: &RuntimeContext, domain: Interval<D>, owner: Option<usize>) -> Self {
        if let Some(o) = owner {
            assert!(
                o < ctx.num_contexts(),
                "owner {o} outside {} contexts",
                ctx.num_contexts()
            );
        }
        let local = ctx.is_local(owner).then(|| Brick::new(domain));
        Self {
            ctx: ctx.clone(),
            domain,
            owner,
            local,
        }
    }

    pub fn domain(&self) -> Interval<D> {
        self.domain
    }

    pub fn owner(&self) -> Option<usize> {
        self.owner
    }

    pub fn engine_is_local(&self) -> bool {
        self.local.is_some()
    }

    fn check(&self, p: &[i64; D]) {
        assert!(
            self.domain.contains_point(p),
            "index {p:?} outside remote domain {}",
            self.domain
        );
    }

    /// Value at `p` on every context. Collective unless the patch is
    /// replicated.
    pub fn read(&self, p: &[i64; D]) -> Result<T, PatchError> {
        self.check(p);
        let here = self.local.as_ref().map(|b| b.read(p)).unwrap_or_default();
        match self.owner {
            None => Ok(here),
            Some(owner) => RemoteProxy::broadcast(&self.ctx, here, owner),
        }
    }

    /// Proxy for the element at `p`. Collective unless replicated; writes
    /// through it reach storage only on the owner.
    pub fn element(&self, p: &[i64; D]) -> Result<RemoteProxy<'static, T>, PatchError> {
        self.check(p);
        let point = *p;
        let here = self.local.as_ref().map(|b| b.read(p)).unwrap_or_default();
        let brick = self.local.clone();
        let sink = move |v: &T| {
            if let Some(b) = &brick {
                b.write(&point, *v);
            }
        };
        match self.owner {
            None => Ok(RemoteProxy::replicated(&self.ctx, here, sink)),
            Some(owner) => RemoteProxy::with_sink(&self.ctx, here, owner, sink),
        }
    }

    /// Write `value` at `p` on the owner; a no-op elsewhere.
    pub fn write(&self, p: &[i64; D], value: T) {
        self.check(p);
        if let Some(b) = &self.local {
            b.write(p, value);
        }
    }

    pub fn make_own_copy(&mut self) {
        if let Some(b) = self.local.as_mut() {
            b.make_own_copy();
        }
    }

    pub fn compressed(&self) -> bool {
        self.local.as_ref().is_some_and(|b| b.compressed())
    }

    pub fn compress(&self) -> bool {
        self.local.as_ref().is_some_and(|b| b.compress())
    }

    pub fn uncompress(&self) {
        if let Some(b) = &self.local {
            b.uncompress();
        }
    }
}

impl<const D: usize, T: Element> Patch<D> for RemoteEngine<D, T> {
    type Element = T;
    type Local = Brick<D, T>;

    fn from_node(ctx: &RuntimeContext, node: &Node<D>) -> Self {
        RemoteEngine::new(ctx, node.allocated, node.context)
    }

    fn domain(&self) -> Interval<D> {
        self.domain
    }

    fn owning_context(&self) -> Option<usize> {
        self.owner
    }

    fn local_engine(&self) -> Option<&Brick<D, T>> {
        self.local.as_ref()
    }

    fn make_own_copy(&mut self) {
        RemoteEngine::make_own_copy(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::RuntimeConfig;

    fn cfg() -> RuntimeConfig {
        RuntimeConfig::default().with_workers(1)
    }

    #[test]
    fn only_the_owner_holds_storage() {
        let got = RuntimeContext::run_local(3, cfg(), |ctx| {
            let e = RemoteEngine::<1, i32>::new(&ctx, Interval::range(0, 4), Some(1));
            e.write(&[2], 10 + ctx.my_context() as i32);
            (e.engine_is_local(), e.read(&[2]).unwrap())
        });
        assert_eq!(got, vec![(false, 11), (true, 11), (false, 11)]);
    }

    #[test]
    fn proxy_writes_reach_the_owner() {
        let got = RuntimeContext::run_local(2, cfg(), |ctx| {
            let e = RemoteEngine::<2, f64>::new(&ctx, Interval::new([0, 0], [1, 1]), Some(0));
            {
                let mut proxy = e.element(&[1, 0]).unwrap();
                proxy.set(2.5);
            }
            e.read(&[1, 0]).unwrap()
        });
        assert_eq!(got, vec![2.5, 2.5]);
    }

    #[test]
    fn replicated_engine_needs_no_messages() {
        let ctx = RuntimeContext::serial(cfg()).unwrap();
        let e = RemoteEngine::<1, i32>::new(&ctx, Interval::range(0, 2), None);
        e.element(&[0]).unwrap().set(4);
        assert_eq!(e.read(&[0]).unwrap(), 4);
        assert_eq!(ctx.expected_messages(), 0);
    }

    #[test]
    fn own_copy_detaches_storage() {
        let ctx = RuntimeContext::serial(cfg()).unwrap();
        let a = RemoteEngine::<1, i32>::new(&ctx, Interval::range(0, 2), Some(0));
        let mut b = a.clone();
        b.make_own_copy();
        b.write(&[1], 9);
        assert_eq!(a.read(&[1]).unwrap(), 0);
        assert_eq!(b.read(&[1]).unwrap(), 9);
        assert!(!b.compressed());
    }
}
