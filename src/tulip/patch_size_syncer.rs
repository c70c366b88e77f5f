//! Renumbering of per-context patch boundaries after dynamic resizing.
//!
//! Every context describes its local patches by a [`Grid1`] of boundary
//! points plus a key that orders contexts along the global domain (usually
//! the global id of its first patch). After local creates and destroys the
//! grids no longer line up. [`PatchSizeSyncer::calc_global_grid`] gathers all
//! of them on context 0, chains them end to start in key order and hands the
//! resulting global grid back to every context.

use crate::domain::Grid1;
use crate::patch_error::PatchError;
use crate::runtime::RuntimeContext;
use crate::tulip::collect::CollectFromContexts;
use crate::tulip::remote_proxy::RemoteProxy;

#[derive(Debug)]
pub struct PatchSizeSyncer {
    ctx: RuntimeContext,
    local: Option<(i64, Grid1)>,
}

impl PatchSizeSyncer {
    pub fn new(ctx: &RuntimeContext, local_key: i64, local_grid: Grid1) -> Self {
        Self {
            ctx: ctx.clone(),
            local: Some((local_key, local_grid)),
        }
    }

    /// A context without local patches; it takes part in the exchange but
    /// contributes nothing.
    pub fn absent(ctx: &RuntimeContext) -> Self {
        Self {
            ctx: ctx.clone(),
            local: None,
        }
    }

    /// Collective. Returns the same global grid on every context.
    ///
    /// # Errors
    /// `PatchError::PatchKeyCollision` on every context if two contexts used
    /// the same key.
    pub fn calc_global_grid(&self) -> Result<Grid1, PatchError> {
        let ctx = &self.ctx;
        let (value, valid) = match &self.local {
            Some(entry) => (entry.clone(), true),
            None => (Default::default(), false),
        };
        let gathered = CollectFromContexts::<(i64, Grid1)>::new(ctx, value, 0, valid)?;

        // (colliding key, grid) so every context fails the same way
        let outcome: (Option<i64>, Grid1) = if gathered.is_root() {
            let entries: Vec<(i64, Grid1)> = gathered
                .entries()
                .iter()
                .filter_map(|cv| cv.value.clone())
                .collect();
            match renormalize(entries) {
                Ok(grid) => (None, grid),
                Err(PatchError::PatchKeyCollision(key)) => (Some(key), Grid1::default()),
                Err(e) => return Err(e),
            }
        } else {
            (None, Grid1::default())
        };

        match RemoteProxy::broadcast(ctx, outcome, 0)? {
            (Some(key), _) => {
                log::warn!("context {}: patch-size key {key} reported twice", ctx.my_context());
                Err(PatchError::PatchKeyCollision(key))
            }
            (None, grid) => {
                log::debug!(
                    "context {}: global patch grid has {} points",
                    ctx.my_context(),
                    grid.size()
                );
                Ok(grid)
            }
        }
    }
}

/// Chain `(key, grid)` pairs into one grid: sort by key, shift each grid so
/// its first point lands on the previous (shifted) grid's last point, and
/// keep that shared point once. Empty grids are skipped.
///
/// # Errors
/// `PatchError::PatchKeyCollision` if two entries share a key.
pub fn renormalize(mut entries: Vec<(i64, Grid1)>) -> Result<Grid1, PatchError> {
    entries.sort_by_key(|(key, _)| *key);
    if let Some(w) = entries.windows(2).find(|w| w[0].0 == w[1].0) {
        return Err(PatchError::PatchKeyCollision(w[0].0));
    }
    let grids: Vec<Grid1> = entries
        .into_iter()
        .map(|(_, g)| g)
        .filter(|g| !g.is_empty())
        .collect();

    let total: usize = grids.iter().map(Grid1::size).sum();
    let mut points = Vec::with_capacity(total);
    let mut prev_last: Option<i64> = None;
    let count = grids.len();
    for (i, grid) in grids.into_iter().enumerate() {
        let shifted = match (prev_last, grid.first()) {
            (Some(last), Some(first)) => grid.shift(last - first),
            _ => grid,
        };
        prev_last = shifted.last();
        let pts = shifted.points();
        if i + 1 < count {
            points.extend_from_slice(&pts[..pts.len() - 1]);
        } else {
            points.extend_from_slice(pts);
        }
    }
    Grid1::new(points)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Range1;
    use crate::runtime::RuntimeConfig;

    fn grid(first: i64, last: i64, stride: i64) -> Grid1 {
        Grid1::from(Range1::new(first, last, stride))
    }

    #[test]
    fn chains_in_key_order() {
        let g = renormalize(vec![
            (20, Grid1::new(vec![100, 103]).unwrap()),
            (0, Grid1::new(vec![0, 2, 4]).unwrap()),
            (10, Grid1::new(vec![50, 51, 60]).unwrap()),
        ])
        .unwrap();
        assert_eq!(g.points(), &[0, 2, 4, 5, 14, 17]);
    }

    #[test]
    fn collision_is_reported() {
        let r = renormalize(vec![(3, grid(0, 4, 2)), (3, grid(4, 8, 2))]);
        assert_eq!(r, Err(PatchError::PatchKeyCollision(3)));
    }

    #[test]
    fn empty_input_gives_empty_grid() {
        assert!(renormalize(vec![]).unwrap().is_empty());
        let g = renormalize(vec![(0, Grid1::default()), (1, grid(5, 7, 1))]).unwrap();
        assert_eq!(g.points(), &[5, 6, 7]);
    }

    #[test]
    fn serial_sync_returns_local_grid() {
        let ctx = RuntimeContext::serial(RuntimeConfig::default().with_workers(1)).unwrap();
        let g = PatchSizeSyncer::new(&ctx, 0, grid(3, 9, 3)).calc_global_grid().unwrap();
        assert_eq!(g.points(), &[3, 6, 9]);
    }
}
