//! Dynamic events on 1-d resizable data and the delete algorithms behind them.

use crate::domain::{Interval, Range1};
use crate::patch_error::PatchError;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_DYNAMIC_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one dynamic operation. Engines remember the last id applied
/// per patch so an event delivered twice is applied once.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DynamicId(u64);

impl DynamicId {
    /// Next id in this process; ids only grow.
    pub fn next() -> Self {
        Self(NEXT_DYNAMIC_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

/// How destroyed slots are reclaimed.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum DeleteMethod {
    /// Fill holes with elements from the end. O(1) per hole, order not kept.
    #[default]
    BackFill,
    /// Compact survivors downward, keeping their order.
    ShiftUp,
}

/// What a dynamic event asks the engines to do. Patch numbers are global
/// patch ids; index sets are relative to the patch's first index.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DynamicOp {
    /// Append `amount` default elements to `patch`.
    Create { patch: usize, amount: usize },
    DestroyInterval {
        patch: usize,
        set: Interval<1>,
        method: DeleteMethod,
    },
    DestroyRange {
        patch: usize,
        set: Range1,
        method: DeleteMethod,
    },
    DestroyList {
        patch: usize,
        set: Vec<i64>,
        method: DeleteMethod,
    },
    /// Per-patch kill lists, as produced by splitting a global kill list.
    DestroyIterList {
        lists: Vec<(usize, Vec<i64>)>,
        method: DeleteMethod,
    },
    /// Append copies of `set` to the end of `patch`.
    CopyInterval { patch: usize, set: Interval<1> },
    CopyRange {
        patch: usize,
        set: Range1,
    },
    CopyList { patch: usize, set: Vec<i64> },
    /// Append copies of elements of `from` to the end of `to`, per entry.
    CopyPatchList { lists: Vec<(usize, usize, Vec<i64>)> },
    /// New domain of every patch, in global patch order.
    Sync { domains: Vec<Interval<1>> },
}

/// A dynamic operation stamped with its id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DynamicEvent {
    pub id: DynamicId,
    pub op: DynamicOp,
}

impl DynamicEvent {
    pub fn new(op: DynamicOp) -> Self {
        Self {
            id: DynamicId::next(),
            op,
        }
    }
}

/// Check that `kill` is strictly increasing and inside `0..len`.
pub fn validate_kill_list(kill: &[i64], len: usize) -> Result<(), PatchError> {
    if let Some(w) = kill.windows(2).find(|w| w[0] >= w[1]) {
        return Err(PatchError::InvalidKillList(format!(
            "indices must increase strictly ({} then {})",
            w[0], w[1]
        )));
    }
    match (kill.first(), kill.last()) {
        (Some(&lo), _) if lo < 0 => Err(PatchError::InvalidKillList(format!("index {lo} is negative"))),
        (_, Some(&hi)) if hi as usize >= len => Err(PatchError::InvalidKillList(format!(
            "index {hi} outside {len} elements"
        ))),
        _ => Ok(()),
    }
}

/// Check that every copy source index lies inside `0..len`.
pub fn validate_copy_list(idx: &[i64], len: usize) -> Result<(), PatchError> {
    match idx.iter().find(|&&i| i < 0 || i as usize >= len) {
        Some(bad) => Err(PatchError::InvalidKillList(format!(
            "copy index {bad} outside {len} elements"
        ))),
        None => Ok(()),
    }
}

/// Remove `kill` (sorted, in range) by moving survivors from the end into the
/// holes. Survivors past the new length move, the rest stay put.
pub fn delete_backfill<T>(values: &mut Vec<T>, kill: &[i64]) {
    let new_len = values.len() - kill.len();
    let holes = kill.iter().map(|&k| k as usize).take_while(|&k| k < new_len);
    let mut dead_tail = kill.iter().rev().map(|&k| k as usize).peekable();
    let sources = (new_len..values.len()).rev().filter(move |i| {
        if dead_tail.peek() == Some(i) {
            dead_tail.next();
            false
        } else {
            true
        }
    });
    let moves: Vec<(usize, usize)> = holes.zip(sources).collect();
    for (hole, src) in moves {
        values.swap(hole, src);
    }
    values.truncate(new_len);
}

/// Remove `kill` (sorted, in range) keeping the survivors' order.
pub fn delete_shiftup<T>(values: &mut Vec<T>, kill: &[i64]) {
    let mut kill = kill.iter().map(|&k| k as usize).peekable();
    let mut i = 0;
    values.retain(|_| {
        let keep = kill.peek() != Some(&i);
        if !keep {
            kill.next();
        }
        i += 1;
        keep
    });
}

/// Apply `method`.
pub fn delete_with<T>(values: &mut Vec<T>, kill: &[i64], method: DeleteMethod) {
    match method {
        DeleteMethod::BackFill => delete_backfill(values, kill),
        DeleteMethod::ShiftUp => delete_shiftup(values, kill),
    }
}
