//! Static block decomposition of an N-d box.
//!
//! The domain is cut into `blocks[d]` nearly equal pieces along every
//! dimension. Each piece becomes one node whose allocation is grown by the
//! internal guard layers. Nodes are numbered with dimension 0 varying
//! fastest and, when distributed, handed to contexts in contiguous runs.

use crate::debug_invariants::DebugInvariants;
use crate::domain::Interval;
use crate::engine::GuardLayers;
use crate::layout::{FillEntry, Layout, LayoutEvent, Node, ObserverList, block_owner};
use crate::patch_error::PatchError;
use crate::runtime::RuntimeContext;
use parking_lot::RwLock;

/// Whether patches live on one context each or everywhere.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum Distribution {
    /// Every context holds every patch.
    #[default]
    Replicated,
    /// Each patch is owned by exactly one context.
    Distributed,
}

#[derive(Debug)]
struct GridState<const D: usize> {
    blocks: [usize; D],
    nodes: Vec<Node<D>>,
    fill: Vec<FillEntry<D>>,
}

pub struct GridLayout<const D: usize> {
    me: usize,
    contexts: usize,
    domain: Interval<D>,
    guards: GuardLayers<D>,
    distribution: Distribution,
    state: RwLock<GridState<D>>,
    observers: ObserverList<D>,
}

impl<const D: usize> std::fmt::Debug for GridLayout<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GridLayout")
            .field("domain", &self.domain)
            .field("blocks", &self.state.read().blocks)
            .field("guards", &self.guards)
            .field("distribution", &self.distribution)
            .finish()
    }
}

impl<const D: usize> GridLayout<D> {
    /// # Panics
    /// If a block count is zero or exceeds the domain's length.
    pub fn new(
        ctx: &RuntimeContext,
        domain: Interval<D>,
        blocks: [usize; D],
        guards: GuardLayers<D>,
        distribution: Distribution,
    ) -> Self {
        let me = ctx.my_context();
        let contexts = ctx.num_contexts();
        let state = build(me, contexts, &domain, blocks, &guards, distribution);
        log::debug!(
            "context {me}: grid layout over {domain} with {} patches",
            state.nodes.len()
        );
        Self {
            me,
            contexts,
            domain,
            guards,
            distribution,
            state: RwLock::new(state),
            observers: ObserverList::default(),
        }
    }

    pub fn blocks(&self) -> [usize; D] {
        self.state.read().blocks
    }

    pub fn distribution(&self) -> Distribution {
        self.distribution
    }

    /// Re-cut into `blocks` and tell every observer to reallocate.
    pub fn repartition(&self, blocks: [usize; D]) -> Result<(), PatchError> {
        let state = build(
            self.me,
            self.contexts,
            &self.domain,
            blocks,
            &self.guards,
            self.distribution,
        );
        *self.state.write() = state;
        crate::debug_invariants!(self.validate_invariants(), "GridLayout::repartition");
        self.observers.notify(&LayoutEvent::Repartition)
    }

    /// Global id of the node owning point `p`.
    pub fn node_of(&self, p: &[i64; D]) -> Option<usize> {
        self.state
            .read()
            .nodes
            .iter()
            .find(|n| n.domain.contains_point(p))
            .map(|n| n.global_id)
    }
}

fn cuts(first: i64, len: usize, blocks: usize) -> Vec<(i64, i64)> {
    (0..blocks)
        .map(|i| {
            let lo = first + (i * len / blocks) as i64;
            let hi = first + ((i + 1) * len / blocks) as i64 - 1;
            (lo, hi)
        })
        .collect()
}

fn build<const D: usize>(
    me: usize,
    contexts: usize,
    domain: &Interval<D>,
    blocks: [usize; D],
    guards: &GuardLayers<D>,
    distribution: Distribution,
) -> GridState<D> {
    for d in 0..D {
        assert!(
            blocks[d] > 0 && blocks[d] <= domain.length(d).max(1),
            "cannot cut length {} into {} blocks",
            domain.length(d),
            blocks[d]
        );
    }
    let per_dim: Vec<Vec<(i64, i64)>> = (0..D)
        .map(|d| cuts(domain.first(d), domain.length(d), blocks[d]))
        .collect();
    let total: usize = blocks.iter().product();

    let mut nodes = Vec::with_capacity(total);
    let mut local = 0;
    for g in 0..total {
        let mut rest = g;
        let mut first = [0i64; D];
        let mut last = [0i64; D];
        for d in 0..D {
            let (lo, hi) = per_dim[d][rest % blocks[d]];
            rest /= blocks[d];
            first[d] = lo;
            last[d] = hi;
        }
        let owned = Interval::new(first, last);
        let context = match distribution {
            Distribution::Replicated => None,
            Distribution::Distributed => Some(block_owner(g, total, contexts)),
        };
        let local_id = context.is_none_or(|c| c == me).then(|| {
            local += 1;
            local - 1
        });
        nodes.push(Node {
            domain: owned,
            allocated: owned.grow(guards.lower, guards.upper),
            context,
            global_id: g,
            local_id,
        });
    }
    let fill = fill_list(&nodes, guards);
    GridState {
        blocks,
        nodes,
        fill,
    }
}

/// Guard slab of `node` on `face`. Dimensions before the face's dimension
/// use the owned extent and later ones the allocated extent, so each corner
/// cell belongs to exactly one face.
fn guard_slab<const D: usize>(node: &Node<D>, face: usize, guards: &GuardLayers<D>) -> Interval<D> {
    let d = face / 2;
    let width = guards.face_width(face) as i64;
    let mut slab = node.allocated;
    for e in 0..d {
        slab = slab.with_dim(e, node.domain.first(e), node.domain.last(e));
    }
    if face % 2 == 0 {
        let lo = node.domain.first(d);
        slab.with_dim(d, lo - width, lo - 1)
    } else {
        let hi = node.domain.last(d);
        slab.with_dim(d, hi + 1, hi + width)
    }
}

fn fill_list<const D: usize>(nodes: &[Node<D>], guards: &GuardLayers<D>) -> Vec<FillEntry<D>> {
    let mut fill = Vec::new();
    for guard_node in nodes {
        for face in 0..2 * D {
            if guards.face_width(face) == 0 {
                continue;
            }
            let slab = guard_slab(guard_node, face, guards);
            for owned_node in nodes {
                if owned_node.global_id == guard_node.global_id {
                    continue;
                }
                let domain = slab.intersect(&owned_node.domain);
                if !domain.is_empty() {
                    fill.push(FillEntry {
                        owned_patch: owned_node.global_id,
                        guard_patch: guard_node.global_id,
                        face,
                        domain,
                    });
                }
            }
        }
    }
    fill
}

impl<const D: usize> Layout<D> for GridLayout<D> {
    fn domain(&self) -> Interval<D> {
        self.domain
    }

    fn nodes(&self) -> Vec<Node<D>> {
        self.state.read().nodes.clone()
    }

    fn internal_guards(&self) -> GuardLayers<D> {
        self.guards
    }

    fn fill_list(&self) -> Vec<FillEntry<D>> {
        self.state.read().fill.clone()
    }

    fn is_distributed(&self) -> bool {
        self.distribution == Distribution::Distributed
    }

    fn observers(&self) -> &ObserverList<D> {
        &self.observers
    }
}

impl<const D: usize> DebugInvariants for GridLayout<D> {
    fn validate_invariants(&self) -> Result<(), PatchError> {
        let st = self.state.read();
        let covered: usize = st.nodes.iter().map(|n| n.domain.size()).sum();
        if covered != self.domain.size() {
            return Err(PatchError::DomainMismatch {
                expected: self.domain.size(),
                actual: covered,
            });
        }
        for (i, a) in st.nodes.iter().enumerate() {
            if a.global_id != i || !self.domain.contains(&a.domain) {
                return Err(PatchError::Runtime(format!("node {i} is misplaced")));
            }
            if st.nodes[i + 1..].iter().any(|b| a.domain.touches(&b.domain)) {
                return Err(PatchError::Runtime(format!("node {i} overlaps another node")));
            }
        }
        for e in &st.fill {
            let guard = &st.nodes[e.guard_patch];
            let owned = &st.nodes[e.owned_patch];
            if !owned.domain.contains(&e.domain) || !guard.allocated.contains(&e.domain) {
                return Err(PatchError::Runtime(format!("fill entry {e:?} is out of bounds")));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::RuntimeConfig;

    fn serial() -> RuntimeContext {
        RuntimeContext::serial(RuntimeConfig::default().with_workers(1)).unwrap()
    }

    #[test]
    fn one_dimensional_cut_with_guards() {
        let ctx = serial();
        let l = GridLayout::new(
            &ctx,
            Interval::range(0, 9),
            [3],
            GuardLayers::uniform(1),
            Distribution::Replicated,
        );
        let doms: Vec<_> = l.nodes().iter().map(|n| n.domain).collect();
        assert_eq!(
            doms,
            vec![Interval::range(0, 2), Interval::range(3, 5), Interval::range(6, 9)]
        );
        assert_eq!(l.nodes()[1].allocated, Interval::range(2, 6));
        let fill = l.fill_list();
        // two interfaces, each filled from both sides
        assert_eq!(fill.len(), 4);
        assert!(fill.contains(&FillEntry {
            owned_patch: 0,
            guard_patch: 1,
            face: 0,
            domain: Interval::range(2, 2),
        }));
        assert!(fill.contains(&FillEntry {
            owned_patch: 1,
            guard_patch: 0,
            face: 1,
            domain: Interval::range(3, 3),
        }));
        l.validate_invariants().unwrap();
        assert!(!l.is_distributed());
        assert_eq!(l.size_local(), 3);
    }

    #[test]
    fn corners_are_filled_once() {
        let ctx = serial();
        let l = GridLayout::new(
            &ctx,
            Interval::new([0, 0], [3, 3]),
            [2, 2],
            GuardLayers::uniform(1),
            Distribution::Replicated,
        );
        // node 3 is the upper-right block; its lower-left guard corner is (1, 1)
        let corner: Vec<_> = l
            .fill_list()
            .into_iter()
            .filter(|e| e.guard_patch == 3 && e.domain.contains_point(&[1, 1]))
            .collect();
        assert_eq!(corner.len(), 1);
        assert_eq!(corner[0].owned_patch, 0);
        let cells: usize = l
            .fill_list()
            .iter()
            .filter(|e| e.guard_patch == 3)
            .map(|e| e.domain.size())
            .sum();
        assert_eq!(cells, 5);
    }

    #[test]
    fn distributed_nodes_have_owners() {
        let owners = RuntimeContext::run_local(2, RuntimeConfig::default().with_workers(1), |ctx| {
            let l = GridLayout::new(
                &ctx,
                Interval::range(0, 15),
                [4],
                GuardLayers::uniform(0),
                Distribution::Distributed,
            );
            let local: Vec<_> = l.local_nodes().iter().map(|n| n.global_id).collect();
            (l.is_distributed(), local, l.fill_list().len())
        });
        assert_eq!(owners[0], (true, vec![0, 1], 0));
        assert_eq!(owners[1], (true, vec![2, 3], 0));
    }

    #[test]
    fn repartition_rebuilds() {
        let ctx = serial();
        let l = GridLayout::new(
            &ctx,
            Interval::range(0, 7),
            [2],
            GuardLayers::uniform(1),
            Distribution::Replicated,
        );
        l.repartition([4]).unwrap();
        assert_eq!(l.size_global(), 4);
        assert_eq!(l.blocks(), [4]);
        assert_eq!(l.node_of(&[5]), Some(2));
    }
}
