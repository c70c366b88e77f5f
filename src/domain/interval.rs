//! Dense N-dimensional index boxes.

use crate::domain::Domain;
use crate::patch_error::PatchError;
use crate::tulip::wire::WireCodec;
use bytes::{Bytes, BytesMut};
use std::fmt;

/// Inclusive box `[first[d] ..= last[d]]` in every dimension `d`.
///
/// A box is empty when `last[d] < first[d]` in any dimension; `size()` is
/// then zero. Ordering is lexicographic on `(first, last)`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Interval<const D: usize> {
    first: [i64; D],
    last: [i64; D],
}

impl<const D: usize> Interval<D> {
    pub const fn new(first: [i64; D], last: [i64; D]) -> Self {
        Self { first, last }
    }

    /// Box starting at `first` with `lengths[d]` points along `d`.
    pub fn sized(first: [i64; D], lengths: [usize; D]) -> Self {
        let mut last = first;
        for d in 0..D {
            last[d] = first[d] + lengths[d] as i64 - 1;
        }
        Self { first, last }
    }

    /// The canonical empty box.
    pub fn empty() -> Self {
        Self {
            first: [0; D],
            last: [-1; D],
        }
    }

    #[inline]
    pub fn first(&self, d: usize) -> i64 {
        self.first[d]
    }

    #[inline]
    pub fn last(&self, d: usize) -> i64 {
        self.last[d]
    }

    pub fn firsts(&self) -> [i64; D] {
        self.first
    }

    pub fn lasts(&self) -> [i64; D] {
        self.last
    }

    /// Number of points along `d`.
    #[inline]
    pub fn length(&self, d: usize) -> usize {
        if self.last[d] < self.first[d] {
            0
        } else {
            (self.last[d] - self.first[d] + 1) as usize
        }
    }

    pub fn lengths(&self) -> [usize; D] {
        std::array::from_fn(|d| self.length(d))
    }

    pub fn size(&self) -> usize {
        (0..D).map(|d| self.length(d)).product()
    }

    pub fn is_empty(&self) -> bool {
        (0..D).any(|d| self.last[d] < self.first[d])
    }

    pub fn intersect(&self, other: &Self) -> Self {
        let mut out = *self;
        for d in 0..D {
            out.first[d] = self.first[d].max(other.first[d]);
            out.last[d] = self.last[d].min(other.last[d]);
        }
        out
    }

    pub fn touches(&self, other: &Self) -> bool {
        !self.intersect(other).is_empty()
    }

    /// `true` if every point of `other` lies in `self` (vacuous for empty).
    pub fn contains(&self, other: &Self) -> bool {
        other.is_empty()
            || (0..D).all(|d| other.first[d] >= self.first[d] && other.last[d] <= self.last[d])
    }

    pub fn contains_point(&self, p: &[i64; D]) -> bool {
        (0..D).all(|d| p[d] >= self.first[d] && p[d] <= self.last[d])
    }

    /// Grow by `lower[d]` cells below and `upper[d]` cells above.
    pub fn grow(&self, lower: [usize; D], upper: [usize; D]) -> Self {
        let mut out = *self;
        for d in 0..D {
            out.first[d] -= lower[d] as i64;
            out.last[d] += upper[d] as i64;
        }
        out
    }

    pub fn shift(&self, offset: [i64; D]) -> Self {
        let mut out = *self;
        for d in 0..D {
            out.first[d] += offset[d];
            out.last[d] += offset[d];
        }
        out
    }

    /// Replace the extent along `d`.
    pub fn with_dim(&self, d: usize, first: i64, last: i64) -> Self {
        let mut out = *self;
        out.first[d] = first;
        out.last[d] = last;
        out
    }

    /// Split along `d` into `[first, at - 1]` and `[at, last]`.
    pub fn split(&self, d: usize, at: i64) -> (Self, Self) {
        (
            self.with_dim(d, self.first[d], at - 1),
            self.with_dim(d, at, self.last[d]),
        )
    }

    /// Linear offset of `p`, dimension 0 varying fastest.
    pub fn offset_of(&self, p: &[i64; D]) -> usize {
        debug_assert!(self.contains_point(p), "point {p:?} outside {self}");
        let mut off = 0usize;
        let mut stride = 1usize;
        for d in 0..D {
            off += (p[d] - self.first[d]) as usize * stride;
            stride *= self.length(d);
        }
        off
    }

    /// Points in storage order (dimension 0 fastest).
    pub fn points(&self) -> IntervalPoints<D> {
        IntervalPoints {
            domain: *self,
            next: if self.is_empty() { None } else { Some(self.first) },
        }
    }
}

impl Interval<1> {
    /// One-dimensional `[first, last]`.
    pub const fn range(first: i64, last: i64) -> Self {
        Self::new([first], [last])
    }
}

impl<const D: usize> Domain for Interval<D> {
    fn size(&self) -> usize {
        Interval::size(self)
    }
}

impl<const D: usize> fmt::Display for Interval<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for d in 0..D {
            if d > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}:{}", self.first[d], self.last[d])?;
        }
        write!(f, "]")
    }
}

impl<const D: usize> WireCodec for Interval<D> {
    fn encode(&self, out: &mut BytesMut) {
        self.first.encode(out);
        self.last.encode(out);
    }
    fn decode(input: &mut Bytes) -> Result<Self, PatchError> {
        Ok(Self {
            first: <[i64; D]>::decode(input)?,
            last: <[i64; D]>::decode(input)?,
        })
    }
}

/// Iterator over the points of an [`Interval`].
#[derive(Clone, Debug)]
pub struct IntervalPoints<const D: usize> {
    domain: Interval<D>,
    next: Option<[i64; D]>,
}

impl<const D: usize> Iterator for IntervalPoints<D> {
    type Item = [i64; D];

    fn next(&mut self) -> Option<[i64; D]> {
        let cur = self.next?;
        let mut n = cur;
        let mut advanced = false;
        for d in 0..D {
            if n[d] < self.domain.last[d] {
                n[d] += 1;
                advanced = true;
                break;
            }
            n[d] = self.domain.first[d];
        }
        self.next = advanced.then_some(n);
        Some(cur)
    }
}
