//! Local evaluation: element-wise kernels over views of local engines.
//!
//! This is the single-context evaluator every remote-aware path ends in. It
//! is invoked with a left-hand view, an assignment operator, right-hand views
//! of the same size and a kernel combining one element from each right-hand
//! view.

use crate::domain::Interval;
use crate::engine::LocalEngine;

/// How a computed value lands in the left-hand side.
pub trait AssignOp<T>: Copy + Send + Sync + 'static {
    fn apply(&self, lhs: &mut T, rhs: T);

    /// `true` if the result does not depend on the old left-hand value.
    fn overwrites(&self) -> bool {
        false
    }
}

/// `lhs = rhs`
#[derive(Copy, Clone, Debug, Default)]
pub struct OpAssign;

impl<T> AssignOp<T> for OpAssign {
    #[inline]
    fn apply(&self, lhs: &mut T, rhs: T) {
        *lhs = rhs;
    }
    fn overwrites(&self) -> bool {
        true
    }
}

/// `lhs += rhs`
#[derive(Copy, Clone, Debug, Default)]
pub struct OpAddAssign;

impl<T: std::ops::AddAssign> AssignOp<T> for OpAddAssign {
    #[inline]
    fn apply(&self, lhs: &mut T, rhs: T) {
        *lhs += rhs;
    }
}

/// `lhs -= rhs`
#[derive(Copy, Clone, Debug, Default)]
pub struct OpSubtractAssign;

impl<T: std::ops::SubAssign> AssignOp<T> for OpSubtractAssign {
    #[inline]
    fn apply(&self, lhs: &mut T, rhs: T) {
        *lhs -= rhs;
    }
}

/// `lhs *= rhs`
#[derive(Copy, Clone, Debug, Default)]
pub struct OpMultiplyAssign;

impl<T: std::ops::MulAssign> AssignOp<T> for OpMultiplyAssign {
    #[inline]
    fn apply(&self, lhs: &mut T, rhs: T) {
        *lhs *= rhs;
    }
}

/// Element-wise expression body: one operand per right-hand leaf.
pub trait Kernel<T>: Sync {
    fn eval(&self, operands: &[T]) -> T;
}

impl<T, F> Kernel<T> for F
where
    F: Fn(&[T]) -> T + Sync,
{
    #[inline]
    fn eval(&self, operands: &[T]) -> T {
        self(operands)
    }
}

/// Compute `kernel(rhs...)` over `lhs_view` and combine it into `lhs` with
/// `op`. Every right-hand view must have the size of `lhs_view`; elements are
/// matched in storage order.
///
/// # Panics
/// If a right-hand view's size differs from the left-hand view's.
pub fn evaluate_local<const D: usize, E, A, K>(
    lhs: &E,
    lhs_view: &Interval<D>,
    op: A,
    rhs: &[(&E, Interval<D>)],
    kernel: &K,
) where
    E: LocalEngine<D>,
    A: AssignOp<E::Element>,
    K: Kernel<E::Element> + ?Sized,
{
    let n = lhs_view.size();
    let columns: Vec<Vec<E::Element>> = rhs
        .iter()
        .map(|(engine, view)| {
            assert_eq!(
                view.size(),
                n,
                "right-hand view {view} does not conform to left-hand view {lhs_view}"
            );
            engine.read_view(view)
        })
        .collect();
    let mut operands = Vec::with_capacity(columns.len());
    let values: Vec<E::Element> = (0..n)
        .map(|i| {
            operands.clear();
            operands.extend(columns.iter().map(|c| c[i]));
            kernel.eval(&operands)
        })
        .collect();
    lhs.assign_view(lhs_view, &values, op);
}

/// Fold `kernel(operands...)` over the views with `fold`; `None` for empty
/// views.
pub fn reduce_local<const D: usize, E, K, F>(
    leaves: &[(&E, Interval<D>)],
    kernel: &K,
    mut fold: F,
) -> Option<E::Element>
where
    E: LocalEngine<D>,
    K: Kernel<E::Element> + ?Sized,
    F: FnMut(&mut E::Element, E::Element),
{
    let n = leaves.first().map(|(_, v)| v.size())?;
    let columns: Vec<Vec<E::Element>> = leaves
        .iter()
        .map(|(engine, view)| {
            assert_eq!(view.size(), n, "reduction views must conform");
            engine.read_view(view)
        })
        .collect();
    let mut acc: Option<E::Element> = None;
    let mut operands = Vec::with_capacity(columns.len());
    for i in 0..n {
        operands.clear();
        operands.extend(columns.iter().map(|c| c[i]));
        let v = kernel.eval(&operands);
        match acc.as_mut() {
            Some(a) => fold(a, v),
            None => acc = Some(v),
        }
    }
    acc
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Brick;

    #[test]
    fn saxpy_on_views() {
        let x = Brick::from_values(Interval::range(0, 3), vec![1.0, 2.0, 3.0, 4.0]);
        let y = Brick::from_values(Interval::range(10, 13), vec![10.0, 20.0, 30.0, 40.0]);
        let out = Brick::<1, f64>::with_value(Interval::range(0, 3), 0.0);
        let k = |v: &[f64]| 2.0 * v[0] + v[1];
        evaluate_local(
            &out,
            &Interval::range(0, 3),
            OpAssign,
            &[(&x, Interval::range(0, 3)), (&y, Interval::range(10, 13))],
            &k,
        );
        assert_eq!(out.values(), vec![12.0, 24.0, 36.0, 48.0]);
    }

    #[test]
    fn add_assign_on_subview() {
        let a = Brick::<1, i32>::with_value(Interval::range(0, 4), 1);
        let b = Brick::<1, i32>::with_value(Interval::range(0, 4), 5);
        evaluate_local(
            &a,
            &Interval::range(1, 2),
            OpAddAssign,
            &[(&b, Interval::range(3, 4))],
            &|v: &[i32]| v[0],
        );
        assert_eq!(a.values(), vec![1, 6, 6, 1, 1]);
    }

    #[test]
    fn reduce_sums_products() {
        let a = Brick::from_values(Interval::range(0, 2), vec![1, 2, 3]);
        let b = Brick::from_values(Interval::range(0, 2), vec![4, 5, 6]);
        let dot = reduce_local(
            &[(&a, Interval::range(0, 2)), (&b, Interval::range(0, 2))],
            &|v: &[i32]| v[0] * v[1],
            |acc, v| *acc += v,
        );
        assert_eq!(dot, Some(32));
        let none = reduce_local::<1, Brick<1, i32>, _, _>(&[], &|v: &[i32]| v[0], |a, v| *a += v);
        assert_eq!(none, None);
    }
}
