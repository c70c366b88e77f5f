//! Arrays decomposed into patches over a [`Layout`].
//!
//! A [`MultiPatchEngine`] holds one patch per layout node, indexed by global
//! node id, and observes its layout for its whole lifetime. Clones share the
//! patch set and the dirty-face mask; [`MultiPatchEngine::make_own_copy`]
//! detaches a private copy.
//!
//! Guard cells mirror a neighbour's owned cells. They are refreshed lazily:
//! writes mark every face dirty, [`fill_guards_handler`] refreshes the faces
//! that are dirty and requested, then clears exactly those.
//!
//! [`fill_guards_handler`]: MultiPatchEngine::fill_guards_handler

use crate::debug_invariants::DebugInvariants;
use crate::domain::{IndexSet, Interval};
use crate::engine::dynamic_events::validate_copy_list;
use crate::engine::{DeleteMethod, DirtyFaces, DynamicEvent, DynamicId, DynamicOp, GuardLayers, LocalEngine, Patch};
use crate::evaluator::local::{AssignOp, OpAddAssign, OpAssign};
use crate::layout::{Layout, LayoutObserver, Node, ObserverId};
use crate::patch_error::PatchError;
use crate::runtime::{CountingSemaphore, Iterate, IterateOutcome, RuntimeContext};
use crate::tulip::reduce::{OpAdd, OpAnd, all_reduce};
use crate::tulip::remote_proxy::RemoteProxy;
use crate::tulip::transport::{receive_with, send};
use hashbrown::{HashMap, HashSet};
use parking_lot::{Mutex, RwLock};
use std::ops::AddAssign;
use std::sync::Arc;

struct PatchSet<const D: usize, P> {
    ctx: RuntimeContext,
    layout: Arc<dyn Layout<D>>,
    patches: RwLock<Vec<P>>,
    dirty: DirtyFaces,
    applied: Mutex<Vec<Option<DynamicId>>>,
    observer: Mutex<Option<ObserverId>>,
}

impl<const D: usize, P> Drop for PatchSet<D, P> {
    fn drop(&mut self) {
        if let Some(id) = self.observer.get_mut().take() {
            self.layout.detach(id);
        }
    }
}

/// One allocation task per node on the worker pool; returns once all are in.
fn allocate<const D: usize, P: Patch<D>>(ctx: &RuntimeContext, nodes: &[Node<D>]) -> Vec<P> {
    let slots: Arc<Mutex<Vec<Option<P>>>> = Arc::new(Mutex::new((0..nodes.len()).map(|_| None).collect()));
    let done = Arc::new(CountingSemaphore::new(nodes.len()));
    for (i, node) in nodes.iter().copied().enumerate() {
        let rt = ctx.clone();
        let slots = Arc::clone(&slots);
        let done = Arc::clone(&done);
        ctx.workers().spawn(move || {
            let patch = P::from_node(&rt, &node);
            drop(rt);
            slots.lock()[i] = Some(patch);
            done.incr();
        });
    }
    done.wait();
    let mut slots = slots.lock();
    slots.drain(..).flatten().collect()
}

fn lift<const D: usize>(d: &Interval<1>) -> Interval<D> {
    Interval::new([d.first(0); D], [d.last(0); D])
}

/// Part of `view` within `width` cells of the guard patch's owned boundary
/// on `face`.
fn within_width<const D: usize>(view: &Interval<D>, owned: &Interval<D>, face: usize, width: usize) -> Interval<D> {
    let d = face / 2;
    let w = width as i64;
    let band = if face % 2 == 0 {
        view.with_dim(d, owned.first(d) - w, owned.first(d) - 1)
    } else {
        view.with_dim(d, owned.last(d) + 1, owned.last(d) + w)
    };
    view.intersect(&band)
}

/// Schedule `dst(view) op= src(view)` wherever the two patches live.
fn transfer<const D: usize, P, A>(ctx: &RuntimeContext, src: &P, dst: &P, view: Interval<D>, op: A)
where
    P: Patch<D>,
    A: AssignOp<P::Element>,
{
    match (src.local_engine(), dst.local_engine()) {
        (Some(s), Some(d)) => {
            let (from, to) = (s.data_object(), d.data_object());
            let (s, d) = (s.clone(), d.clone());
            ctx.spawn(
                Iterate::new("guard copy", move || {
                    let values = s.read_view(&view);
                    d.assign_view(&view, &values, op);
                    Ok(IterateOutcome::Complete)
                })
                .reads(from)
                .writes(to),
            );
        }
        (Some(s), None) => {
            if let Some(to) = dst.owning_context() {
                send(ctx, s, view, to);
            }
        }
        (None, Some(d)) => {
            if let Some(from) = src.owning_context() {
                receive_with(ctx, d, view, from, op);
            }
        }
        (None, None) => {}
    }
}

fn is_fresh(applied: &[Option<DynamicId>], patch: usize, id: DynamicId) -> bool {
    applied.get(patch).copied().flatten().is_none_or(|seen| seen < id)
}

fn local_of<const D: usize, P: Patch<D>>(patches: &[P], patch: usize) -> &P::Local {
    let n = patches.len();
    let Some(p) = patches.get(patch) else {
        panic!("patch {patch} outside {n} patches");
    };
    match p.local_engine() {
        Some(e) => e,
        None => panic!("patch {patch} is stored on context {:?}, not here", p.owning_context()),
    }
}

impl<const D: usize, P: Patch<D>> PatchSet<D, P> {
    /// Apply `f` to `patch` unless it already saw `id`. The check, the update
    /// and the mark happen under one write guard.
    fn apply<F>(&self, patch: usize, id: DynamicId, f: F) -> Result<(), PatchError>
    where
        F: FnOnce(&mut P) -> Result<(), PatchError>,
    {
        let mut patches = self.patches.write();
        let mut applied = self.applied.lock();
        let n = patches.len();
        let Some(p) = patches.get_mut(patch) else {
            panic!("patch {patch} outside {n} patches");
        };
        if !is_fresh(&applied, patch, id) {
            log::debug!("patch {patch} already saw dynamic event {}", id.get());
            return Ok(());
        }
        f(p)?;
        applied[patch] = Some(id);
        Ok(())
    }

    fn local_patch_engine(&self, patch: usize) -> P::Local {
        local_of::<D, P>(&self.patches.read(), patch).clone()
    }

    /// One list per patch. Each patch is marked as soon as its list is
    /// applied, so a retry after a failure only touches the rest.
    fn destroy_lists(
        &self,
        lists: &[(usize, Vec<i64>)],
        method: DeleteMethod,
        id: DynamicId,
    ) -> Result<(), PatchError> {
        for (patch, kill) in lists {
            self.apply(*patch, id, |p| p.destroy(&IndexSet::List(kill.clone()), method, true))?;
        }
        Ok(())
    }

    /// Entries run in order against the patches that had not seen `id` when
    /// the event arrived. Indices are checked for every entry before any
    /// patch changes; a target is marked after each entry that lands on it.
    fn copy_patches(&self, lists: &[(usize, usize, Vec<i64>)], id: DynamicId) -> Result<(), PatchError> {
        let mut patches = self.patches.write();
        let mut applied = self.applied.lock();
        let targets: HashSet<usize> = lists
            .iter()
            .map(|(_, to, _)| *to)
            .filter(|&to| is_fresh(&applied, to, id))
            .collect();
        let pending: Vec<&(usize, usize, Vec<i64>)> = lists.iter().filter(|(_, to, _)| targets.contains(to)).collect();

        let mut lengths: HashMap<usize, usize> = HashMap::new();
        for (from, to, idx) in &pending {
            let src_len = *lengths
                .entry(*from)
                .or_insert_with(|| patches[*from].domain().size());
            validate_copy_list(idx, src_len)?;
            *lengths.entry(*to).or_insert_with(|| patches[*to].domain().size()) += idx.len();
        }

        for (from, to, idx) in pending {
            let values: Vec<P::Element> = {
                let src = local_of::<D, P>(&patches, *from);
                let first = src.domain().first(0);
                idx.iter().map(|&i| src.read(&[first + i; D])).collect()
            };
            patches[*to].append(&values, idx.len())?;
            applied[*to] = Some(id);
        }
        Ok(())
    }

    fn sync_domains(&self, domains: &[Interval<1>], id: DynamicId) -> Result<(), PatchError> {
        let n = self.patches.read().len();
        if domains.len() != n {
            return Err(PatchError::DomainMismatch {
                expected: n,
                actual: domains.len(),
            });
        }
        for (i, d) in domains.iter().enumerate() {
            self.apply(i, id, |p| p.sync(lift(d)))?;
        }
        Ok(())
    }
}

impl<const D: usize, P: Patch<D>> LayoutObserver<D> for PatchSet<D, P> {
    fn on_repartition(&self) -> Result<(), PatchError> {
        let nodes = self.layout.nodes();
        let patches = allocate::<D, P>(&self.ctx, &nodes);
        log::debug!(
            "context {}: reallocated {} patches",
            self.ctx.my_context(),
            patches.len()
        );
        let mut slot = self.patches.write();
        *self.applied.lock() = vec![None; patches.len()];
        *slot = patches;
        drop(slot);
        self.dirty.set_all();
        Ok(())
    }

    fn on_dynamic_event(&self, event: &DynamicEvent) -> Result<(), PatchError> {
        if D != 1 {
            return Err(PatchError::UnsupportedOperation(
                "dynamic events on a multi-dimensional engine",
            ));
        }
        let id = event.id;
        match &event.op {
            DynamicOp::Create { patch, amount } => self.apply(*patch, id, |p| p.create(*amount)),
            DynamicOp::DestroyInterval { patch, set, method } => {
                self.apply(*patch, id, |p| p.destroy(&IndexSet::Interval(*set), *method, true))
            }
            DynamicOp::DestroyRange { patch, set, method } => {
                self.apply(*patch, id, |p| p.destroy(&IndexSet::Range(*set), *method, true))
            }
            DynamicOp::DestroyList { patch, set, method } => {
                self.apply(*patch, id, |p| p.destroy(&IndexSet::List(set.clone()), *method, true))
            }
            DynamicOp::DestroyIterList { lists, method } => self.destroy_lists(lists, *method, id),
            DynamicOp::CopyInterval { patch, set } => {
                self.apply(*patch, id, |p| p.copy(&IndexSet::Interval(*set), true))
            }
            DynamicOp::CopyRange { patch, set } => {
                self.apply(*patch, id, |p| p.copy(&IndexSet::Range(*set), true))
            }
            DynamicOp::CopyList { patch, set } => {
                self.apply(*patch, id, |p| p.copy(&IndexSet::List(set.clone()), true))
            }
            DynamicOp::CopyPatchList { lists } => self.copy_patches(lists, id),
            DynamicOp::Sync { domains } => self.sync_domains(domains, id),
        }
    }
}

pub struct MultiPatchEngine<const D: usize, P> {
    shared: Arc<PatchSet<D, P>>,
}

impl<const D: usize, P> Clone for MultiPatchEngine<D, P> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<const D: usize, P> std::fmt::Debug for MultiPatchEngine<D, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiPatchEngine")
            .field("domain", &self.shared.layout.domain())
            .field("patches", &self.shared.patches.read().len())
            .field("dirty", &self.shared.dirty.mask())
            .finish()
    }
}

impl<const D: usize, P: Patch<D>> MultiPatchEngine<D, P> {
    /// Allocate one patch per node of `layout` and start observing it.
    ///
    /// # Panics
    /// If `layout` is distributed and `P` has no owning context.
    pub fn new(ctx: &RuntimeContext, layout: Arc<dyn Layout<D>>) -> Self {
        let nodes = layout.nodes();
        let patches = allocate::<D, P>(ctx, &nodes);
        if layout.is_distributed() {
            assert!(
                patches.iter().all(|p| p.owning_context().is_some()),
                "a distributed layout needs patches with an owning context"
            );
        }
        log::debug!(
            "context {}: multi-patch engine over {} with {} patches",
            ctx.my_context(),
            layout.domain(),
            patches.len()
        );
        let applied = vec![None; patches.len()];
        Self::attach(ctx, layout, patches, DirtyFaces::new(2 * D), applied)
    }

    fn attach(
        ctx: &RuntimeContext,
        layout: Arc<dyn Layout<D>>,
        patches: Vec<P>,
        dirty: DirtyFaces,
        applied: Vec<Option<DynamicId>>,
    ) -> Self {
        let shared = Arc::new(PatchSet {
            ctx: ctx.clone(),
            layout,
            patches: RwLock::new(patches),
            dirty,
            applied: Mutex::new(applied),
            observer: Mutex::new(None),
        });
        let observer: Arc<dyn LayoutObserver<D>> = shared.clone();
        let id = shared.layout.attach(Arc::downgrade(&observer));
        *shared.observer.lock() = Some(id);
        Self { shared }
    }

    pub fn context(&self) -> &RuntimeContext {
        &self.shared.ctx
    }

    pub fn layout(&self) -> &Arc<dyn Layout<D>> {
        &self.shared.layout
    }

    pub fn domain(&self) -> Interval<D> {
        self.shared.layout.domain()
    }

    pub fn num_patches(&self) -> usize {
        self.shared.patches.read().len()
    }

    /// Shallow copy of patch `i`.
    pub fn patch(&self, i: usize) -> P {
        self.shared.patches.read()[i].clone()
    }

    /// Shallow copies of every patch, by global id.
    pub fn patches(&self) -> Vec<P> {
        self.shared.patches.read().clone()
    }

    /// Local storage of patch `i`.
    ///
    /// # Panics
    /// If patch `i` is stored on another context.
    pub fn local_patch_engine(&self, i: usize) -> P::Local {
        self.shared.local_patch_engine(i)
    }

    pub fn set_dirty(&self) {
        self.shared.dirty.set_all();
    }

    pub fn is_dirty(&self) -> bool {
        self.shared.dirty.is_dirty()
    }

    pub fn dirty_faces(&self) -> u32 {
        self.shared.dirty.mask()
    }

    /// Refresh the guard cells on dirty faces up to the widths in
    /// `required`. Collective when the layout is distributed.
    pub fn fill_guards_handler(&self, required: &GuardLayers<D>) -> Result<(), PatchError> {
        let set = &self.shared;
        let mask = set.dirty.mask() & required.face_mask();
        if mask == 0 {
            return Ok(());
        }
        let nodes = set.layout.nodes();
        let patches = self.patches();
        let mut scheduled = 0usize;
        for e in set.layout.fill_list() {
            if mask & (1 << e.face) == 0 {
                continue;
            }
            let width = required.face_width(e.face);
            let view = within_width(&e.domain, &nodes[e.guard_patch].domain, e.face, width);
            if view.is_empty() {
                continue;
            }
            transfer(&set.ctx, &patches[e.owned_patch], &patches[e.guard_patch], view, OpAssign);
            scheduled += 1;
        }
        set.ctx.block_and_evaluate()?;
        set.dirty.clear(mask);
        log::debug!(
            "context {}: filled guards ({scheduled} exchanges, faces {mask:#b})",
            set.ctx.my_context()
        );
        Ok(())
    }

    /// Refresh every internal guard cell.
    pub fn fill_guards(&self) -> Result<(), PatchError> {
        self.fill_guards_handler(&self.shared.layout.internal_guards())
    }

    /// Write `value` into the guard cells of every local patch.
    pub fn set_guards(&self, value: P::Element) -> Result<(), PatchError> {
        let set = &self.shared;
        set.ctx.block_and_evaluate()?;
        let patches = self.patches();
        for node in set.layout.nodes() {
            let Some(local) = patches[node.global_id].local_engine() else {
                continue;
            };
            for d in 0..D {
                let (alloc, own) = (&node.allocated, &node.domain);
                let below = alloc.with_dim(d, alloc.first(d), own.first(d) - 1);
                let above = alloc.with_dim(d, own.last(d) + 1, alloc.last(d));
                for slab in [below, above] {
                    if !slab.is_empty() {
                        local.fill_view(&slab, value);
                    }
                }
            }
        }
        set.dirty.set_all();
        Ok(())
    }

    /// Add each guard region into the owned cells it mirrors. Collective when
    /// the layout is distributed.
    pub fn accumulate_from_guards(&self) -> Result<(), PatchError>
    where
        P::Element: AddAssign,
    {
        let set = &self.shared;
        let patches = self.patches();
        for e in set.layout.fill_list() {
            transfer(&set.ctx, &patches[e.guard_patch], &patches[e.owned_patch], e.domain, OpAddAssign);
        }
        set.ctx.block_and_evaluate()?;
        set.dirty.set_all();
        Ok(())
    }

    fn local_engines(&self) -> Vec<P::Local> {
        self.shared
            .patches
            .read()
            .iter()
            .filter_map(|p| p.local_engine().cloned())
            .collect()
    }

    /// Compressed elements over all patches (allocated cells).
    pub fn elements_compressed(&self) -> Result<usize, PatchError> {
        let local: usize = self.local_engines().iter().map(|e| e.elements_compressed()).sum();
        if self.shared.layout.is_distributed() {
            all_reduce::<usize, OpAdd>(&self.shared.ctx, local, true)
        } else {
            Ok(local)
        }
    }

    /// `true` if every patch is compressed.
    pub fn compressed(&self) -> Result<bool, PatchError> {
        let local = self.local_engines().iter().all(|e| e.compressed());
        if self.shared.layout.is_distributed() {
            all_reduce::<bool, OpAnd>(&self.shared.ctx, local, true)
        } else {
            Ok(local)
        }
    }

    /// Compress every patch that can be; returns [`compressed`](Self::compressed).
    pub fn compress(&self) -> Result<bool, PatchError> {
        self.shared.ctx.block_and_evaluate()?;
        for e in self.local_engines() {
            e.compress();
        }
        self.compressed()
    }

    pub fn uncompress(&self) -> Result<(), PatchError> {
        self.shared.ctx.block_and_evaluate()?;
        self.local_engines().iter().for_each(|e| e.uncompress());
        Ok(())
    }

    /// Share of allocated cells held in compressed patches.
    pub fn compressed_fraction(&self) -> Result<f64, PatchError> {
        let total: usize = self.shared.layout.nodes().iter().map(|n| n.allocated.size()).sum();
        let compressed = self.elements_compressed()?;
        Ok(if total == 0 {
            0.0
        } else {
            compressed as f64 / total as f64
        })
    }

    fn owner_of(&self, p: &[i64; D]) -> Node<D> {
        let nodes = self.shared.layout.nodes();
        match nodes.into_iter().find(|n| n.domain.contains_point(p)) {
            Some(n) => n,
            None => panic!("index {p:?} outside {}", self.domain()),
        }
    }

    /// Value at global point `p` on every context. Collective when the
    /// owning patch lives on one context.
    pub fn read(&self, p: &[i64; D]) -> Result<P::Element, PatchError> {
        let node = self.owner_of(p);
        self.shared.ctx.block_and_evaluate()?;
        let patch = self.patch(node.global_id);
        let here = patch.local_engine().map(|e| e.read(p)).unwrap_or_default();
        match patch.owning_context() {
            None => Ok(here),
            Some(owner) => RemoteProxy::broadcast(&self.shared.ctx, here, owner),
        }
    }

    /// Write `value` at global point `p` where the owning patch is stored and
    /// mark the guards stale.
    pub fn write(&self, p: &[i64; D], value: P::Element) -> Result<(), PatchError> {
        let node = self.owner_of(p);
        self.shared.ctx.block_and_evaluate()?;
        if let Some(e) = self.patch(node.global_id).local_engine() {
            e.write(p, value);
        }
        self.set_dirty();
        Ok(())
    }

    /// Detach from other handles: deep-copy shared patches and the dirty
    /// mask, and observe the layout under a new registration.
    pub fn make_own_copy(&mut self) {
        let set = &self.shared;
        let mut patches = set.patches.read().clone();
        for p in &mut patches {
            p.make_own_copy();
        }
        let mut dirty = set.dirty.clone();
        dirty.make_own_copy();
        let applied = set.applied.lock().clone();
        let ctx = set.ctx.clone();
        let layout = Arc::clone(&set.layout);
        *self = Self::attach(&ctx, layout, patches, dirty, applied);
    }
}

impl<const D: usize, P: Patch<D>> DebugInvariants for MultiPatchEngine<D, P> {
    /// One patch per node; local patches are sized like their node.
    fn validate_invariants(&self) -> Result<(), PatchError> {
        let nodes = self.shared.layout.nodes();
        let patches = self.shared.patches.read();
        if nodes.len() != patches.len() {
            return Err(PatchError::DomainMismatch {
                expected: nodes.len(),
                actual: patches.len(),
            });
        }
        for (n, p) in nodes.iter().zip(patches.iter()) {
            if p.domain().size() != n.allocated.size() {
                return Err(PatchError::DomainMismatch {
                    expected: n.allocated.size(),
                    actual: p.domain().size(),
                });
            }
        }
        Ok(())
    }
}
