//! One-dimensional strided ranges.

use crate::domain::{Domain, Interval};
use crate::patch_error::PatchError;
use crate::tulip::wire::WireCodec;
use bytes::{Bytes, BytesMut};

/// Points `first, first + stride, ...` not exceeding `last`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Range1 {
    first: i64,
    last: i64,
    stride: i64,
}

impl Range1 {
    /// # Panics
    /// If `stride` is not positive.
    pub fn new(first: i64, last: i64, stride: i64) -> Self {
        assert!(stride > 0, "Range1 stride must be positive, got {stride}");
        Self {
            first,
            last,
            stride,
        }
    }

    pub fn first(&self) -> i64 {
        self.first
    }

    /// Last point actually in the range.
    pub fn last(&self) -> i64 {
        if self.is_empty() {
            self.last
        } else {
            self.first + (self.size() as i64 - 1) * self.stride
        }
    }

    pub fn stride(&self) -> i64 {
        self.stride
    }

    pub fn size(&self) -> usize {
        if self.last < self.first {
            0
        } else {
            ((self.last - self.first) / self.stride + 1) as usize
        }
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn points(&self) -> impl Iterator<Item = i64> + use<> {
        let (first, stride) = (self.first, self.stride);
        (0..self.size() as i64).map(move |i| first + i * stride)
    }

    /// Smallest interval covering the range.
    pub fn bounding_interval(&self) -> Interval<1> {
        if self.is_empty() {
            Interval::empty()
        } else {
            Interval::range(self.first, self.last())
        }
    }

    pub fn shift(&self, delta: i64) -> Self {
        Self {
            first: self.first + delta,
            last: self.last + delta,
            stride: self.stride,
        }
    }
}

impl From<Interval<1>> for Range1 {
    fn from(i: Interval<1>) -> Self {
        Self::new(i.first(0), i.last(0), 1)
    }
}

impl Domain for Range1 {
    fn size(&self) -> usize {
        Range1::size(self)
    }
}

impl WireCodec for Range1 {
    fn encode(&self, out: &mut BytesMut) {
        (self.first, self.last, self.stride).encode(out);
    }
    fn decode(input: &mut Bytes) -> Result<Self, PatchError> {
        let (first, last, stride) = <(i64, i64, i64)>::decode(input)?;
        if stride <= 0 {
            return Err(PatchError::Wire(format!("non-positive stride {stride}")));
        }
        Ok(Self {
            first,
            last,
            stride,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strided_points() {
        let r = Range1::new(3, 12, 4);
        assert_eq!(r.points().collect::<Vec<_>>(), vec![3, 7, 11]);
        assert_eq!(r.size(), 3);
        assert_eq!(r.last(), 11);
        assert_eq!(r.bounding_interval(), Interval::range(3, 11));
    }

    #[test]
    fn empty_range() {
        let r = Range1::new(5, 4, 1);
        assert!(r.is_empty());
        assert_eq!(r.points().count(), 0);
    }
}
