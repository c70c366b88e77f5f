//! Reduce-to-one, optionally followed by a broadcast of the agreed value.
//!
//! Every context enters the collective with a value and a `valid` flag.
//! Invalid contributions never reach the wire as values (they travel as an
//! empty marker so the root knows not to wait) and are never folded. The root
//! folds the valid values in ascending context order, which makes the result
//! deterministic for non-associative operators too.

use crate::patch_error::PatchError;
use crate::runtime::RuntimeContext;
use crate::tulip::collect::CollectionValue;
use crate::tulip::tags::{CommTag, TagSpace};
use crate::tulip::wire::{WireCodec, from_message, kind, to_message};
use std::marker::PhantomData;

/// A context's contribution to a reduction.
pub type ReductionValue<T> = CollectionValue<T>;

/// Binary fold used by [`ReduceOverContexts`].
pub trait ReductionOp<T> {
    fn fold(acc: &mut T, incoming: T);
}

macro_rules! reduction_op {
    ($(#[$doc:meta])* $name:ident, $bound:path, |$acc:ident, $x:ident| $body:expr) => {
        $(#[$doc])*
        #[derive(Copy, Clone, Debug, Default)]
        pub struct $name;

        impl<T: $bound> ReductionOp<T> for $name {
            #[inline]
            fn fold($acc: &mut T, $x: T) {
                $body
            }
        }
    };
}

reduction_op!(
    /// `acc += x`
    OpAdd, std::ops::AddAssign, |acc, x| *acc += x
);
reduction_op!(
    /// `acc *= x`
    OpMultiply, std::ops::MulAssign, |acc, x| *acc *= x
);
reduction_op!(
    /// `acc = min(acc, x)`
    OpMin, PartialOrd, |acc, x| if x < *acc { *acc = x }
);
reduction_op!(
    /// `acc = max(acc, x)`
    OpMax, PartialOrd, |acc, x| if x > *acc { *acc = x }
);
reduction_op!(
    /// `acc |= x`
    OpBitOr, std::ops::BitOrAssign, |acc, x| *acc |= x
);
reduction_op!(
    /// `acc &= x`
    OpBitAnd, std::ops::BitAndAssign, |acc, x| *acc &= x
);

/// Logical and.
#[derive(Copy, Clone, Debug, Default)]
pub struct OpAnd;

impl ReductionOp<bool> for OpAnd {
    #[inline]
    fn fold(acc: &mut bool, x: bool) {
        *acc = *acc && x;
    }
}

/// Logical or.
#[derive(Copy, Clone, Debug, Default)]
pub struct OpOr;

impl ReductionOp<bool> for OpOr {
    #[inline]
    fn fold(acc: &mut bool, x: bool) {
        *acc = *acc || x;
    }
}

/// One reduction instance. Construct it on every context, in the same order
/// relative to other reductions.
///
/// ```
/// # use multipatch::runtime::{RuntimeConfig, RuntimeContext};
/// # use multipatch::tulip::reduce::{OpAdd, ReduceOverContexts};
/// let ctx = RuntimeContext::serial(RuntimeConfig::default()).unwrap();
/// let sum = ReduceOverContexts::<i64, OpAdd>::new(&ctx, 3, 0, true)
///     .unwrap()
///     .broadcast()
///     .unwrap();
/// assert_eq!(sum, 3);
/// ```
pub struct ReduceOverContexts<T, Op> {
    ctx: RuntimeContext,
    tag: CommTag,
    to_context: usize,
    result: Option<T>,
    _op: PhantomData<Op>,
}

impl<T, Op> std::fmt::Debug for ReduceOverContexts<T, Op>
where
    T: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReduceOverContexts")
            .field("to_context", &self.to_context)
            .field("result", &self.result)
            .finish()
    }
}

impl<T, Op> ReduceOverContexts<T, Op>
where
    T: WireCodec + Clone + Send,
    Op: ReductionOp<T>,
{
    /// Gather and fold. Returns once this context's part is done: on the root
    /// that means every contribution has arrived.
    ///
    /// # Panics
    /// If `to_context` is not a context.
    pub fn new(ctx: &RuntimeContext, value: T, to_context: usize, valid: bool) -> Result<Self, PatchError> {
        let n = ctx.num_contexts();
        assert!(to_context < n, "reduction root {to_context} outside {n} contexts");
        let me = ctx.my_context();
        let tag = ctx.next_collective_tag(TagSpace::Reduction);
        let mine = CollectionValue {
            context: me,
            value: valid.then_some(value),
        };

        let result = if me != to_context {
            ctx.post(to_context, tag, to_message(kind::REDUCTION, &mine));
            None
        } else {
            let mut acc: Option<T> = None;
            for c in 0..n {
                let contribution = if c == me {
                    mine.value.clone()
                } else {
                    let msg = ctx.wait_for_message(c, tag)?;
                    let cv: ReductionValue<T> =
                        from_message(kind::REDUCTION, msg).map_err(|e| PatchError::Comm {
                            neighbor: c,
                            detail: e.to_string(),
                        })?;
                    cv.value
                };
                if let Some(v) = contribution {
                    match acc.as_mut() {
                        Some(a) => Op::fold(a, v),
                        None => acc = Some(v),
                    }
                }
            }
            log::debug!(
                "context {me}: reduction {} folded ({})",
                tag.seq(),
                if acc.is_some() { "valid" } else { "no contributors" }
            );
            acc
        };

        Ok(Self {
            ctx: ctx.clone(),
            tag,
            to_context,
            result,
            _op: PhantomData,
        })
    }

    /// The folded value; `None` off the root or when nobody contributed.
    pub fn result(&self) -> Option<&T> {
        self.result.as_ref()
    }

    pub fn to_context(&self) -> usize {
        self.to_context
    }

    /// Distribute the root's result to every context.
    ///
    /// # Errors
    /// `PatchError::NoContribution` on every context if no context passed
    /// `valid = true`.
    pub fn broadcast(self) -> Result<T, PatchError> {
        let ctx = &self.ctx;
        let me = ctx.my_context();
        let tag = self.tag.with_phase(1);
        let agreed = if me == self.to_context {
            if self.result.is_none() {
                log::warn!("context {me}: broadcasting reduction {} with no contributor", self.tag.seq());
            }
            let msg = to_message(kind::REDUCTION, &self.result);
            for c in (0..ctx.num_contexts()).filter(|&c| c != me) {
                ctx.post(c, tag, msg.clone());
            }
            self.result
        } else {
            let msg = ctx.wait_for_message(self.to_context, tag)?;
            from_message::<Option<T>>(kind::REDUCTION, msg).map_err(|e| PatchError::Comm {
                neighbor: self.to_context,
                detail: e.to_string(),
            })?
        };
        agreed.ok_or(PatchError::NoContribution)
    }
}

/// Reduce over every context and return the agreed value everywhere.
pub fn all_reduce<T, Op>(ctx: &RuntimeContext, value: T, valid: bool) -> Result<T, PatchError>
where
    T: WireCodec + Clone + Send,
    Op: ReductionOp<T>,
{
    ReduceOverContexts::<T, Op>::new(ctx, value, 0, valid)?.broadcast()
}
