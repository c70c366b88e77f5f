//! Minimal domain types: dense boxes, strided ranges and point grids.
//!
//! Only the operations the engines and layouts need are provided: extents,
//! sizes, set algebra on boxes, splitting and a total order.

pub mod grid;
pub mod interval;
pub mod range;

pub use grid::Grid1;
pub use interval::{Interval, IntervalPoints};
pub use range::Range1;

use crate::tulip::wire::WireCodec;

/// Common surface of every domain type. `is_empty() == (size() == 0)`.
pub trait Domain: Clone + std::fmt::Debug + Ord + Send + Sync + WireCodec + 'static {
    fn size(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.size() == 0
    }
}

/// Index list addressed by destroy and copy requests on 1-d dynamic data.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IndexSet {
    Interval(Interval<1>),
    Range(Range1),
    List(Vec<i64>),
}

impl IndexSet {
    /// Points in ascending order, as given.
    pub fn to_points(&self) -> Vec<i64> {
        match self {
            IndexSet::Interval(i) => i.points().map(|p| p[0]).collect(),
            IndexSet::Range(r) => r.points().collect(),
            IndexSet::List(l) => l.clone(),
        }
    }

    pub fn size(&self) -> usize {
        match self {
            IndexSet::Interval(i) => i.size(),
            IndexSet::Range(r) => r.size(),
            IndexSet::List(l) => l.len(),
        }
    }

    /// Same set moved by `delta`.
    pub fn shift(&self, delta: i64) -> Self {
        match self {
            IndexSet::Interval(i) => IndexSet::Interval(i.shift([delta])),
            IndexSet::Range(r) => IndexSet::Range(r.shift(delta)),
            IndexSet::List(l) => IndexSet::List(l.iter().map(|p| p + delta).collect()),
        }
    }
}
