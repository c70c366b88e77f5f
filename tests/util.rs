#![allow(dead_code)]
use multipatch::domain::Interval;
use multipatch::engine::{GuardLayers, MultiPatchEngine, RemoteEngine};
use multipatch::layout::{Distribution, GridLayout};
use multipatch::runtime::{RuntimeConfig, RuntimeContext};
use std::sync::Arc;

pub fn cfg() -> RuntimeConfig {
    RuntimeConfig::default().with_workers(2)
}

/// Run `f` on `n` in-process contexts and return the per-context results.
pub fn run<R, F>(n: usize, f: F) -> Vec<R>
where
    R: Send,
    F: Fn(RuntimeContext) -> R + Sync,
{
    RuntimeContext::run_local(n, cfg(), f)
}

/// Distributed 1-d grid layout over `[0, len)` cut into `blocks` patches.
pub fn line(ctx: &RuntimeContext, len: i64, blocks: usize, guards: usize) -> Arc<GridLayout<1>> {
    Arc::new(GridLayout::new(
        ctx,
        Interval::range(0, len - 1),
        [blocks],
        GuardLayers::uniform(guards),
        Distribution::Distributed,
    ))
}

pub type Line = MultiPatchEngine<1, RemoteEngine<1, i64>>;

/// Every element of `e`, read collectively.
pub fn values(e: &Line) -> Vec<i64> {
    let d = e.domain();
    (d.first(0)..=d.last(0)).map(|i| e.read(&[i]).unwrap()).collect()
}
