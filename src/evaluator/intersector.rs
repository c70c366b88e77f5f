//! Split an evaluation domain into pieces that each touch exactly one patch
//! of every operand.

use crate::domain::Interval;
use crate::layout::Node;
use itertools::iproduct;

/// One piece of an evaluation, in left-hand coordinates.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Intersection<const D: usize> {
    pub domain: Interval<D>,
    pub lhs_patch: usize,
    /// Patch of each right-hand operand, in operand order.
    pub rhs_patches: Vec<usize>,
}

/// Cut `view` (left-hand coordinates) by the owned domains of `lhs_nodes`
/// and then by every right-hand operand's nodes. Operand `k` is addressed at
/// left-hand point `p` as `p + offset_k`.
pub fn intersect_patches<const D: usize>(
    view: &Interval<D>,
    lhs_nodes: &[Node<D>],
    rhs: &[(&[Node<D>], [i64; D])],
) -> Vec<Intersection<D>> {
    let mut pieces: Vec<Intersection<D>> = lhs_nodes
        .iter()
        .map(|n| Intersection {
            domain: view.intersect(&n.domain),
            lhs_patch: n.global_id,
            rhs_patches: Vec::with_capacity(rhs.len()),
        })
        .filter(|p| !p.domain.is_empty())
        .collect();
    for (nodes, offset) in rhs {
        let back = offset.map(|o| -o);
        pieces = iproduct!(pieces.iter(), nodes.iter())
            .filter_map(|(piece, node)| {
                let domain = piece.domain.intersect(&node.domain.shift(back));
                (!domain.is_empty()).then(|| {
                    let mut rhs_patches = piece.rhs_patches.clone();
                    rhs_patches.push(node.global_id);
                    Intersection {
                        domain,
                        lhs_patch: piece.lhs_patch,
                        rhs_patches,
                    }
                })
            })
            .collect();
    }
    pieces
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nodes(cuts: &[(i64, i64)]) -> Vec<Node<1>> {
        cuts.iter()
            .enumerate()
            .map(|(g, &(a, b))| Node {
                domain: Interval::range(a, b),
                allocated: Interval::range(a, b),
                context: None,
                global_id: g,
                local_id: Some(g),
            })
            .collect()
    }

    #[test]
    fn misaligned_patches_split_pieces() {
        let lhs = nodes(&[(0, 4), (5, 9)]);
        let rhs = nodes(&[(0, 2), (3, 9)]);
        let got = intersect_patches(&Interval::range(0, 9), &lhs, &[(rhs.as_slice(), [0])]);
        let doms: Vec<_> = got.iter().map(|p| (p.domain, p.lhs_patch, p.rhs_patches[0])).collect();
        assert_eq!(
            doms,
            vec![
                (Interval::range(0, 2), 0, 0),
                (Interval::range(3, 4), 0, 1),
                (Interval::range(5, 9), 1, 1),
            ]
        );
    }

    #[test]
    fn offsets_shift_operands() {
        let lhs = nodes(&[(0, 9)]);
        let rhs = nodes(&[(0, 4), (5, 9)]);
        // lhs [0, 4] reads rhs [5, 9]
        let got = intersect_patches(&Interval::range(0, 4), &lhs, &[(rhs.as_slice(), [5])]);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].rhs_patches, vec![1]);
    }
}
