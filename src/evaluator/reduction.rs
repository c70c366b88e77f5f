//! Reductions over patches spread across contexts.
//!
//! Each piece is reduced where most of its leaves live. Pieces whose leaves
//! are all replicated are reduced on context 0 only, so every element enters
//! the result exactly once. Partial results are then folded with
//! [`ReduceOverContexts`] and broadcast, so every context returns the same
//! value.

use crate::domain::Interval;
use crate::engine::{MultiPatchEngine, Patch};
use crate::evaluator::gather_contexts::GatherContexts;
use crate::evaluator::intersector::intersect_patches;
use crate::evaluator::local::{Kernel, reduce_local};
use crate::evaluator::remote::{computes_here, stage_leaf};
use crate::layout::Node;
use crate::patch_error::PatchError;
use crate::runtime::RuntimeContext;
use crate::tulip::reduce::{ReduceOverContexts, ReductionOp};

type Staged<const D: usize, P> = Vec<(<P as Patch<D>>::Local, Interval<D>)>;

fn stage_reduction<const D: usize, P: Patch<D>>(
    ctx: &RuntimeContext,
    leaves: &[(&P, Interval<D>)],
) -> Option<Staged<D, P>> {
    let gather = GatherContexts::new();
    for (leaf, _) in leaves {
        gather.add(leaf.owning_context());
    }
    let target = gather.most_common_context().or(Some(0));
    let staged: Staged<D, P> = leaves
        .iter()
        .filter_map(|(leaf, view)| stage_leaf(ctx, *leaf, *view, target))
        .collect();
    computes_here(ctx, target).then(|| {
        assert_eq!(staged.len(), leaves.len(), "reduction operand missing on context {}", ctx.my_context());
        staged
    })
}

fn reduce_staged<const D: usize, P, K, Op>(staged: &[Staged<D, P>], kernel: &K) -> Option<P::Element>
where
    P: Patch<D>,
    K: Kernel<P::Element> + ?Sized,
    Op: ReductionOp<P::Element>,
{
    let mut partial: Option<P::Element> = None;
    for piece in staged {
        let refs: Vec<(&P::Local, Interval<D>)> = piece.iter().map(|(e, v)| (e, *v)).collect();
        if let Some(v) = reduce_local(&refs, kernel, <Op as ReductionOp<P::Element>>::fold) {
            match partial.as_mut() {
                Some(acc) => Op::fold(acc, v),
                None => partial = Some(v),
            }
        }
    }
    partial
}

fn agree<T, Op>(ctx: &RuntimeContext, partial: Option<T>) -> Result<T, PatchError>
where
    T: crate::engine::Element,
    Op: ReductionOp<T>,
{
    let valid = partial.is_some();
    ReduceOverContexts::<T, Op>::new(ctx, partial.unwrap_or_default(), 0, valid)?.broadcast()
}

/// Fold `kernel(leaves...)` over every point with `Op`. Collective.
///
/// # Errors
/// `PatchError::NoContribution` if the views are empty.
pub fn reduce_remote_single_patch<const D: usize, P, K, Op>(
    ctx: &RuntimeContext,
    leaves: &[(&P, Interval<D>)],
    kernel: &K,
) -> Result<P::Element, PatchError>
where
    P: Patch<D>,
    K: Kernel<P::Element> + ?Sized,
    Op: ReductionOp<P::Element>,
{
    let staged: Vec<Staged<D, P>> = stage_reduction(ctx, leaves).into_iter().collect();
    ctx.block_and_evaluate()?;
    let partial = reduce_staged::<D, P, K, Op>(&staged, kernel);
    agree::<P::Element, Op>(ctx, partial)
}

/// Multi-patch form of [`reduce_remote_single_patch`]. Views must conform
/// to the first one.
///
/// # Panics
/// If `leaves` is empty or a view does not conform.
pub fn reduce_remote_multi_patch<const D: usize, P, K, Op>(
    leaves: &[(&MultiPatchEngine<D, P>, Interval<D>)],
    kernel: &K,
) -> Result<P::Element, PatchError>
where
    P: Patch<D>,
    K: Kernel<P::Element> + ?Sized,
    Op: ReductionOp<P::Element>,
{
    let Some(((first, base), rest)) = leaves.split_first() else {
        panic!("reduction needs at least one operand");
    };
    let ctx = first.context().clone();
    for (_, view) in rest {
        assert_eq!(view.lengths(), base.lengths(), "reduction view {view} does not conform to {base}");
    }
    let offsets: Vec<[i64; D]> = rest
        .iter()
        .map(|(_, v)| std::array::from_fn(|d| v.first(d) - base.first(d)))
        .collect();
    let rest_nodes: Vec<Vec<Node<D>>> = rest.iter().map(|(e, _)| e.layout().nodes()).collect();
    let operands: Vec<(&[Node<D>], [i64; D])> = rest_nodes
        .iter()
        .zip(&offsets)
        .map(|(n, o)| (n.as_slice(), *o))
        .collect();
    let pieces = intersect_patches(base, &first.layout().nodes(), &operands);

    let first_patches = first.patches();
    let rest_patches: Vec<Vec<P>> = rest.iter().map(|(e, _)| e.patches()).collect();
    let staged: Vec<Staged<D, P>> = pieces
        .iter()
        .filter_map(|piece| {
            let mut operands: Vec<(&P, Interval<D>)> = vec![(&first_patches[piece.lhs_patch], piece.domain)];
            operands.extend(
                piece
                    .rhs_patches
                    .iter()
                    .enumerate()
                    .map(|(k, &g)| (&rest_patches[k][g], piece.domain.shift(offsets[k]))),
            );
            stage_reduction(&ctx, &operands)
        })
        .collect();
    ctx.block_and_evaluate()?;
    let partial = reduce_staged::<D, P, K, Op>(&staged, kernel);
    log::debug!(
        "context {}: reduced {} of {} pieces over {base}",
        ctx.my_context(),
        staged.len(),
        pieces.len()
    );
    agree::<P::Element, Op>(&ctx, partial)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Brick, GuardLayers, RemoteEngine};
    use crate::layout::{Distribution, GridLayout};
    use crate::runtime::RuntimeConfig;
    use crate::tulip::reduce::{OpAdd, OpMax};
    use std::sync::Arc;

    fn cfg() -> RuntimeConfig {
        RuntimeConfig::default().with_workers(1)
    }

    #[test]
    fn single_patch_sum_agrees_everywhere() {
        let got = RuntimeContext::run_local(3, cfg(), |ctx| {
            let dom = Interval::range(0, 4);
            let e = RemoteEngine::<1, i64>::new(&ctx, dom, Some(2));
            for i in 0..5 {
                e.write(&[i], i + 1);
            }
            reduce_remote_single_patch::<1, _, _, OpAdd>(&ctx, &[(&e, dom)], &|v: &[i64]| v[0]).unwrap()
        });
        assert_eq!(got, vec![15, 15, 15]);
    }

    #[test]
    fn replicated_leaves_count_once() {
        let got = RuntimeContext::run_local(2, cfg(), |ctx| {
            let dom = Interval::range(0, 3);
            let e = RemoteEngine::<1, i32>::new(&ctx, dom, None);
            for i in 0..4 {
                e.write(&[i], 1);
            }
            reduce_remote_single_patch::<1, _, _, OpAdd>(&ctx, &[(&e, dom)], &|v: &[i32]| v[0]).unwrap()
        });
        assert_eq!(got, vec![4, 4]);
    }

    #[test]
    fn multi_patch_max_of_products() {
        let got = RuntimeContext::run_local(2, cfg(), |ctx| {
            let layout = |blocks| {
                Arc::new(GridLayout::new(
                    &ctx,
                    Interval::range(0, 7),
                    [blocks],
                    GuardLayers::uniform(0),
                    Distribution::Distributed,
                ))
            };
            let a = MultiPatchEngine::<1, RemoteEngine<1, i32>>::new(&ctx, layout(2));
            let b = MultiPatchEngine::<1, RemoteEngine<1, i32>>::new(&ctx, layout(4));
            for i in 0..8 {
                a.write(&[i], i as i32).unwrap();
                b.write(&[i], 7 - i as i32).unwrap();
            }
            // a[i] * b[i + 1] for i in 0..=6
            reduce_remote_multi_patch::<1, _, _, OpMax>(
                &[(&a, Interval::range(0, 6)), (&b, Interval::range(1, 7))],
                &|v: &[i32]| v[0] * v[1],
            )
            .unwrap()
        });
        // i * (6 - i) peaks at i = 3
        assert_eq!(got, vec![9, 9]);
    }

    #[test]
    fn empty_views_have_no_contribution() {
        let ctx = RuntimeContext::serial(cfg()).unwrap();
        let e = Brick::<1, f64>::new(Interval::range(0, 3));
        let err = reduce_remote_single_patch::<1, _, _, OpAdd>(&ctx, &[(&e, Interval::empty())], &|v: &[f64]| v[0])
            .unwrap_err();
        assert_eq!(err, PatchError::NoContribution);
    }
}
