//! Resizable 1-d layout.
//!
//! Creates, destroys and copies act on this context's patches only and are
//! forwarded to the observing engines as [`DynamicEvent`]s. They change the
//! length of local nodes without renumbering anything, so afterwards the
//! node domains of different contexts overlap or leave gaps. [`sync`]
//! restores one consistent numbering on every context with the
//! [`PatchSizeSyncer`] and relabels every engine patch.
//!
//! [`sync`]: DynamicLayout::sync

use crate::debug_invariants::DebugInvariants;
use crate::domain::{Grid1, IndexSet, Interval};
use crate::engine::{DeleteMethod, DynamicEvent, DynamicOp, GuardLayers};
use crate::engine::dynamic_events::{validate_copy_list, validate_kill_list};
use crate::layout::grid_layout::Distribution;
use crate::layout::{FillEntry, Layout, LayoutEvent, Node, ObserverList, block_owner};
use crate::patch_error::PatchError;
use crate::runtime::RuntimeContext;
use crate::tulip::patch_size_syncer::{PatchSizeSyncer, renormalize};
use hashbrown::HashMap;
use parking_lot::RwLock;

pub struct DynamicLayout {
    ctx: RuntimeContext,
    distribution: Distribution,
    nodes: RwLock<Vec<Node<1>>>,
    observers: ObserverList<1>,
}

impl std::fmt::Debug for DynamicLayout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamicLayout")
            .field("nodes", &*self.nodes.read())
            .field("distribution", &self.distribution)
            .finish()
    }
}

fn node_for(global_id: usize, domain: Interval<1>, context: Option<usize>, local_id: Option<usize>) -> Node<1> {
    Node {
        domain,
        allocated: domain,
        context,
        global_id,
        local_id,
    }
}

impl DynamicLayout {
    /// Cut `domain` into `patches` contiguous pieces.
    ///
    /// # Panics
    /// If `patches` is zero.
    pub fn new(ctx: &RuntimeContext, domain: Interval<1>, patches: usize, distribution: Distribution) -> Self {
        assert!(patches > 0, "a dynamic layout needs at least one patch");
        let me = ctx.my_context();
        let len = domain.size();
        let mut local = 0;
        let nodes = (0..patches)
            .map(|g| {
                let lo = domain.first(0) + (g * len / patches) as i64;
                let hi = domain.first(0) + ((g + 1) * len / patches) as i64 - 1;
                let context = match distribution {
                    Distribution::Replicated => None,
                    Distribution::Distributed => Some(block_owner(g, patches, ctx.num_contexts())),
                };
                let local_id = context.is_none_or(|c| c == me).then(|| {
                    local += 1;
                    local - 1
                });
                node_for(g, Interval::range(lo, hi), context, local_id)
            })
            .collect();
        Self {
            ctx: ctx.clone(),
            distribution,
            nodes: RwLock::new(nodes),
            observers: ObserverList::default(),
        }
    }

    pub fn distribution(&self) -> Distribution {
        self.distribution
    }

    /// Current domain of node `patch`.
    pub fn patch_domain(&self, patch: usize) -> Interval<1> {
        self.node(patch).domain
    }

    fn node(&self, patch: usize) -> Node<1> {
        let nodes = self.nodes.read();
        assert!(patch < nodes.len(), "patch {patch} outside {} patches", nodes.len());
        nodes[patch]
    }

    fn local_node(&self, patch: usize) -> Node<1> {
        let node = self.node(patch);
        assert!(
            node.is_local(),
            "patch {patch} is owned by context {:?}, not {}",
            node.context,
            self.ctx.my_context()
        );
        node
    }

    /// Give each `(patch, len)` its new length, then tell the engines. If an
    /// engine rejects the event the old node domains are restored.
    fn commit(&self, lengths: Vec<(usize, usize)>, op: DynamicOp) -> Result<(), PatchError> {
        self.commit_with(
            |nodes| {
                for (patch, len) in lengths {
                    let n = &mut nodes[patch];
                    n.domain = Interval::sized([n.domain.first(0)], [len]);
                    n.allocated = n.domain;
                }
            },
            op,
        )
    }

    fn commit_with<F>(&self, update: F, op: DynamicOp) -> Result<(), PatchError>
    where
        F: FnOnce(&mut Vec<Node<1>>),
    {
        let before = {
            let mut nodes = self.nodes.write();
            let before = nodes.clone();
            update(&mut *nodes);
            before
        };
        let event = DynamicEvent::new(op);
        log::debug!(
            "context {}: dynamic event {} {:?}",
            self.ctx.my_context(),
            event.id.get(),
            event.op
        );
        if let Err(e) = self.observers.notify(&LayoutEvent::Dynamic(event)) {
            log::warn!("context {}: dynamic event rejected, layout rolled back: {e}", self.ctx.my_context());
            *self.nodes.write() = before;
            return Err(e);
        }
        Ok(())
    }

    /// Append `amount` elements to local patch `patch`.
    pub fn create(&self, amount: usize, patch: usize) -> Result<(), PatchError> {
        let node = self.local_node(patch);
        self.commit(vec![(patch, node.domain.size() + amount)], DynamicOp::Create { patch, amount })
    }

    /// Destroy the elements of `set` (absolute indices inside `patch`).
    pub fn destroy_in_patch(&self, set: &IndexSet, patch: usize, method: DeleteMethod) -> Result<(), PatchError> {
        let node = self.local_node(patch);
        let first = node.domain.first(0);
        let rel = set.shift(-first);
        validate_kill_list(&rel.to_points(), node.domain.size())?;
        let len = node.domain.size() - rel.size();
        let op = match rel {
            IndexSet::Interval(set) => DynamicOp::DestroyInterval { patch, set, method },
            IndexSet::Range(set) => DynamicOp::DestroyRange { patch, set, method },
            IndexSet::List(set) => DynamicOp::DestroyList { patch, set, method },
        };
        self.commit(vec![(patch, len)], op)
    }

    /// Destroy the elements of the global index list `kill` that fall in this
    /// context's patches. Every context passes the same list. Nothing changes
    /// unless every per-patch list is valid.
    pub fn destroy(&self, kill: &IndexSet, method: DeleteMethod) -> Result<(), PatchError> {
        let points = kill.to_points();
        let mut lists = Vec::new();
        let mut lengths = Vec::new();
        for node in self.local_nodes() {
            let rel: Vec<i64> = points
                .iter()
                .filter(|p| node.domain.contains_point(&[**p]))
                .map(|p| p - node.domain.first(0))
                .collect();
            if !rel.is_empty() {
                validate_kill_list(&rel, node.domain.size())?;
                lengths.push((node.global_id, node.domain.size() - rel.len()));
                lists.push((node.global_id, rel));
            }
        }
        self.commit(lengths, DynamicOp::DestroyIterList { lists, method })
    }

    /// Append copies of `set` (absolute indices inside `patch`) to `patch`.
    pub fn copy(&self, set: &IndexSet, patch: usize) -> Result<(), PatchError> {
        let node = self.local_node(patch);
        let rel = set.shift(-node.domain.first(0));
        validate_copy_list(&rel.to_points(), node.domain.size())?;
        let len = node.domain.size() + rel.size();
        let op = match rel {
            IndexSet::Interval(set) => DynamicOp::CopyInterval { patch, set },
            IndexSet::Range(set) => DynamicOp::CopyRange { patch, set },
            IndexSet::List(set) => DynamicOp::CopyList { patch, set },
        };
        self.commit(vec![(patch, len)], op)
    }

    /// Append copies of elements of one local patch to another, per
    /// `(from, to, absolute indices in from)` entry. Entries apply in order,
    /// so a later entry may read what an earlier one appended. Nothing
    /// changes unless every entry is valid.
    pub fn copy_patch(&self, lists: Vec<(usize, usize, Vec<i64>)>) -> Result<(), PatchError> {
        let mut lengths: HashMap<usize, usize> = HashMap::new();
        let mut rel_lists = Vec::with_capacity(lists.len());
        for (from, to, idx) in lists {
            let src = self.local_node(from);
            let dst = self.local_node(to);
            let rel: Vec<i64> = idx.iter().map(|p| p - src.domain.first(0)).collect();
            let src_len = *lengths.entry(from).or_insert_with(|| src.domain.size());
            validate_copy_list(&rel, src_len)?;
            *lengths.entry(to).or_insert_with(|| dst.domain.size()) += rel.len();
            rel_lists.push((from, to, rel));
        }
        self.commit(lengths.into_iter().collect(), DynamicOp::CopyPatchList { lists: rel_lists })
    }

    /// Renumber every node so patches are contiguous again, then relabel the
    /// engines. Collective over all contexts when distributed.
    pub fn sync(&self) -> Result<(), PatchError> {
        let local = self.local_nodes();
        let local_grid = boundaries(&local)?;
        let key = local.first().map(|n| n.global_id as i64);
        let global = match (self.distribution, key) {
            (Distribution::Replicated, Some(key)) => renormalize(vec![(key, local_grid)])?,
            (Distribution::Replicated, None) => Grid1::default(),
            (Distribution::Distributed, Some(key)) => {
                PatchSizeSyncer::new(&self.ctx, key, local_grid).calc_global_grid()?
            }
            (Distribution::Distributed, None) => PatchSizeSyncer::absent(&self.ctx).calc_global_grid()?,
        };
        let domains: Vec<Interval<1>> = global
            .points()
            .windows(2)
            .map(|w| Interval::range(w[0], w[1] - 1))
            .collect();
        let expected = self.nodes.read().len();
        if domains.len() != expected {
            return Err(PatchError::DomainMismatch {
                expected,
                actual: domains.len(),
            });
        }
        let relabel = domains.clone();
        self.commit_with(
            move |nodes| {
                for (n, d) in nodes.iter_mut().zip(&relabel) {
                    n.domain = *d;
                    n.allocated = *d;
                }
            },
            DynamicOp::Sync { domains },
        )?;
        crate::debug_invariants!(self.validate_invariants(), "DynamicLayout::sync");
        Ok(())
    }
}

/// Boundary points of consecutive nodes: first of the first node, then the
/// running end of each node.
fn boundaries(nodes: &[Node<1>]) -> Result<Grid1, PatchError> {
    let Some(first) = nodes.first() else {
        return Ok(Grid1::default());
    };
    let mut points = Vec::with_capacity(nodes.len() + 1);
    let mut at = first.domain.first(0);
    points.push(at);
    for n in nodes {
        at += n.domain.size() as i64;
        points.push(at);
    }
    Grid1::new(points)
}

impl Layout<1> for DynamicLayout {
    fn domain(&self) -> Interval<1> {
        let nodes = self.nodes.read();
        match (nodes.first(), nodes.last()) {
            (Some(a), Some(b)) => Interval::range(a.domain.first(0), b.domain.last(0)),
            _ => Interval::empty(),
        }
    }

    fn nodes(&self) -> Vec<Node<1>> {
        self.nodes.read().clone()
    }

    fn internal_guards(&self) -> GuardLayers<1> {
        GuardLayers::default()
    }

    fn fill_list(&self) -> Vec<FillEntry<1>> {
        Vec::new()
    }

    fn is_distributed(&self) -> bool {
        self.distribution == Distribution::Distributed
    }

    fn observers(&self) -> &ObserverList<1> {
        &self.observers
    }
}

impl DebugInvariants for DynamicLayout {
    /// After a sync, nodes tile the domain without gaps or overlaps.
    fn validate_invariants(&self) -> Result<(), PatchError> {
        let nodes = self.nodes.read();
        for w in nodes.windows(2) {
            if w[0].domain.last(0) + 1 != w[1].domain.first(0) {
                return Err(PatchError::Runtime(format!(
                    "patches {} and {} are not contiguous ({} then {})",
                    w[0].global_id, w[1].global_id, w[0].domain, w[1].domain
                )));
            }
        }
        Ok(())
    }
}
