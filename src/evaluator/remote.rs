//! Evaluation over patches that may live on other contexts.
//!
//! Each assignment piece is computed on one context, picked by a
//! [`GatherContexts`] vote over the left-hand side: the owner of the
//! left-hand patch, or every context when it is replicated. Right-hand views
//! stored elsewhere are sent there first. All transfers of an evaluation are
//! scheduled before a single [`block_and_evaluate`], then the local evaluator
//! runs on plain local engines.
//!
//! Every context must make the same evaluation calls in the same order.
//!
//! [`block_and_evaluate`]: crate::runtime::RuntimeContext::block_and_evaluate

use crate::domain::Interval;
use crate::engine::{LocalEngine, MultiPatchEngine, Patch};
use crate::evaluator::gather_contexts::GatherContexts;
use crate::evaluator::intersector::intersect_patches;
use crate::evaluator::local::{AssignOp, Kernel, evaluate_local};
use crate::layout::Node;
use crate::patch_error::PatchError;
use crate::runtime::RuntimeContext;
use crate::tulip::transport::{receive, send};

/// `true` if this context computes a piece assigned to `target`.
pub(crate) fn computes_here(ctx: &RuntimeContext, target: Option<usize>) -> bool {
    target.is_none_or(|c| c == ctx.my_context())
}

/// Make `view` of `leaf` available on the computing contexts. Returns the
/// storage to read on this context when it computes.
pub(crate) fn stage_leaf<const D: usize, P: Patch<D>>(
    ctx: &RuntimeContext,
    leaf: &P,
    view: Interval<D>,
    target: Option<usize>,
) -> Option<(P::Local, Interval<D>)> {
    let me = ctx.my_context();
    let here = computes_here(ctx, target);
    match leaf.owning_context() {
        None => leaf.local_engine().filter(|_| here).map(|e| (e.clone(), view)),
        Some(owner) if owner == me => {
            let local = leaf.local_engine()?;
            let targets: Vec<usize> = match target {
                Some(c) => vec![c],
                None => (0..ctx.num_contexts()).collect(),
            };
            for t in targets.into_iter().filter(|&t| t != me) {
                send(ctx, local, view, t);
            }
            here.then(|| (local.clone(), view))
        }
        Some(owner) => {
            if !here {
                return None;
            }
            let temp = P::Local::allocate(view);
            receive(ctx, &temp, view, owner);
            Some((temp, view))
        }
    }
}

/// One assignment piece ready to run on this context.
struct Piece<const D: usize, L> {
    lhs: L,
    lhs_view: Interval<D>,
    leaves: Vec<(L, Interval<D>)>,
}

impl<const D: usize, L: LocalEngine<D>> Piece<D, L> {
    fn run<A, K>(&self, op: A, kernel: &K)
    where
        A: AssignOp<L::Element>,
        K: Kernel<L::Element> + ?Sized,
    {
        let rhs: Vec<(&L, Interval<D>)> = self.leaves.iter().map(|(e, v)| (e, *v)).collect();
        evaluate_local(&self.lhs, &self.lhs_view, op, &rhs, kernel);
    }
}

fn stage_piece<const D: usize, P: Patch<D>>(
    ctx: &RuntimeContext,
    lhs: &P,
    lhs_view: Interval<D>,
    rhs: &[(&P, Interval<D>)],
) -> Option<Piece<D, P::Local>> {
    let gather = GatherContexts::new();
    gather.add(lhs.owning_context());
    let target = gather.most_common_context();
    let leaves: Vec<_> = rhs
        .iter()
        .filter_map(|(leaf, view)| stage_leaf(ctx, *leaf, *view, target))
        .collect();
    if !computes_here(ctx, target) {
        return None;
    }
    let Some(local) = lhs.local_engine() else {
        panic!("left-hand patch is not stored on computing context {}", ctx.my_context());
    };
    assert_eq!(leaves.len(), rhs.len(), "right-hand data missing on the computing context");
    Some(Piece {
        lhs: local.clone(),
        lhs_view,
        leaves,
    })
}

/// `lhs(lhs_view) op= kernel(rhs...)` for single patches.
pub fn evaluate_remote_single_patch<const D: usize, P, A, K>(
    ctx: &RuntimeContext,
    lhs: &P,
    lhs_view: &Interval<D>,
    op: A,
    rhs: &[(&P, Interval<D>)],
    kernel: &K,
) -> Result<(), PatchError>
where
    P: Patch<D>,
    A: AssignOp<P::Element>,
    K: Kernel<P::Element> + ?Sized,
{
    let piece = stage_piece(ctx, lhs, *lhs_view, rhs);
    ctx.block_and_evaluate()?;
    if let Some(piece) = piece {
        piece.run(op, kernel);
    }
    Ok(())
}

/// `lhs(lhs_view) op= kernel(rhs...)` over multi-patch engines. Right-hand
/// views must have the shape of `lhs_view`; they may sit at other indices.
/// Marks the left-hand guards dirty.
///
/// # Panics
/// If a right-hand view does not conform to `lhs_view`.
pub fn evaluate_remote_multi_patch<const D: usize, P, A, K>(
    lhs: &MultiPatchEngine<D, P>,
    lhs_view: &Interval<D>,
    op: A,
    rhs: &[(&MultiPatchEngine<D, P>, Interval<D>)],
    kernel: &K,
) -> Result<(), PatchError>
where
    P: Patch<D>,
    A: AssignOp<P::Element>,
    K: Kernel<P::Element> + ?Sized,
{
    let ctx = lhs.context().clone();
    for (_, view) in rhs {
        assert_eq!(
            view.lengths(),
            lhs_view.lengths(),
            "right-hand view {view} does not conform to {lhs_view}"
        );
    }
    let offsets: Vec<[i64; D]> = rhs
        .iter()
        .map(|(_, v)| std::array::from_fn(|d| v.first(d) - lhs_view.first(d)))
        .collect();
    let rhs_nodes: Vec<Vec<Node<D>>> = rhs.iter().map(|(e, _)| e.layout().nodes()).collect();
    let operands: Vec<(&[Node<D>], [i64; D])> = rhs_nodes
        .iter()
        .zip(&offsets)
        .map(|(n, o)| (n.as_slice(), *o))
        .collect();
    let pieces = intersect_patches(lhs_view, &lhs.layout().nodes(), &operands);

    let lhs_patches = lhs.patches();
    let rhs_patches: Vec<Vec<P>> = rhs.iter().map(|(e, _)| e.patches()).collect();
    let staged: Vec<Piece<D, P::Local>> = pieces
        .iter()
        .filter_map(|piece| {
            let leaves: Vec<(&P, Interval<D>)> = piece
                .rhs_patches
                .iter()
                .enumerate()
                .map(|(k, &g)| (&rhs_patches[k][g], piece.domain.shift(offsets[k])))
                .collect();
            stage_piece(&ctx, &lhs_patches[piece.lhs_patch], piece.domain, &leaves)
        })
        .collect();
    ctx.block_and_evaluate()?;
    for piece in &staged {
        piece.run(op, kernel);
    }
    lhs.set_dirty();
    log::debug!(
        "context {}: evaluated {} of {} pieces over {lhs_view}",
        ctx.my_context(),
        staged.len(),
        pieces.len()
    );
    Ok(())
}
