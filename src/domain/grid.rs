//! One-dimensional irregular point lists.

use crate::domain::{Domain, Range1};
use crate::patch_error::PatchError;
use crate::tulip::wire::WireCodec;
use bytes::{Bytes, BytesMut};
use std::ops::Index;

/// Non-decreasing sequence of points. Layouts use grids to describe patch
/// boundaries: patch `i` covers `[g[i], g[i + 1] - 1]`, so an empty patch
/// repeats a point.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Grid1 {
    points: Vec<i64>,
}

impl Grid1 {
    /// # Errors
    /// `PatchError::InvalidKillList` if `points` ever decreases.
    pub fn new(points: Vec<i64>) -> Result<Self, PatchError> {
        if let Some(w) = points.windows(2).find(|w| w[0] > w[1]) {
            return Err(PatchError::InvalidKillList(format!(
                "grid points must not decrease ({} then {})",
                w[0], w[1]
            )));
        }
        Ok(Self { points })
    }

    pub fn first(&self) -> Option<i64> {
        self.points.first().copied()
    }

    pub fn last(&self) -> Option<i64> {
        self.points.last().copied()
    }

    pub fn size(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[i64] {
        &self.points
    }

    pub fn into_points(self) -> Vec<i64> {
        self.points
    }

    /// Every point moved by `delta`.
    pub fn shift(&self, delta: i64) -> Self {
        Self {
            points: self.points.iter().map(|p| p + delta).collect(),
        }
    }

    /// `true` if no point repeats.
    pub fn is_strictly_increasing(&self) -> bool {
        self.points.windows(2).all(|w| w[0] < w[1])
    }

    /// `true` if consecutive points are equally spaced.
    pub fn is_uniform(&self) -> bool {
        self.points
            .windows(3)
            .all(|w| w[1] - w[0] == w[2] - w[1])
    }
}

impl From<Range1> for Grid1 {
    fn from(r: Range1) -> Self {
        Self {
            points: r.points().collect(),
        }
    }
}

impl Index<usize> for Grid1 {
    type Output = i64;
    fn index(&self, i: usize) -> &i64 {
        &self.points[i]
    }
}

impl Domain for Grid1 {
    fn size(&self) -> usize {
        self.points.len()
    }
}

impl WireCodec for Grid1 {
    fn encode(&self, out: &mut BytesMut) {
        self.points.encode(out);
    }
    fn decode(input: &mut Bytes) -> Result<Self, PatchError> {
        let points = Vec::<i64>::decode(input)?;
        Grid1::new(points).map_err(|e| PatchError::Wire(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_decreasing() {
        assert!(Grid1::new(vec![0, 2, 2]).is_ok());
        assert!(Grid1::new(vec![3, 1]).is_err());
        assert!(Grid1::new(vec![]).is_ok());
    }

    #[test]
    fn from_range_and_shift() {
        let g = Grid1::from(Range1::new(10, 18, 2));
        assert_eq!(g.points(), &[10, 12, 14, 16, 18]);
        assert!(g.is_uniform());
        let s = g.shift(-10);
        assert_eq!(s.first(), Some(0));
        assert_eq!(s.last(), Some(8));
        assert_eq!(s[2], 4);
    }
}
