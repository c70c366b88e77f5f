mod util;
use multipatch::domain::Interval;
use multipatch::engine::{GuardLayers, LocalEngine, MultiPatchEngine, RemoteEngine};
use multipatch::layout::{Distribution, GridLayout, Layout};
use serial_test::serial;
use std::sync::Arc;
use util::*;

#[test]
#[serial]
fn two_dimensional_fill_includes_corners() {
    let got = run(4, |ctx| {
        let layout = Arc::new(GridLayout::new(
            &ctx,
            Interval::new([0, 0], [3, 3]),
            [2, 2],
            GuardLayers::uniform(1),
            Distribution::Distributed,
        ));
        let e = MultiPatchEngine::<2, RemoteEngine<2, i32>>::new(&ctx, layout);
        for x in 0..4 {
            for y in 0..4 {
                e.write(&[x, y], 10 * x as i32 + y as i32).unwrap();
            }
        }
        e.fill_guards().unwrap();
        let me = ctx.my_context();
        let local = e.local_patch_engine(me);
        match me {
            3 => Some([[1, 1], [1, 2], [2, 1], [4, 4]].map(|p| local.read(&p))),
            _ => None,
        }
    });
    assert_eq!(got[3], Some([11, 12, 21, 0]));
}

#[test]
#[serial]
fn guards_go_stale_after_writes() {
    let got = run(2, |ctx| {
        let e = Line::new(&ctx, line(&ctx, 8, 2, 2));
        // patch 0 lives on context 0 only
        let guard = || (ctx.my_context() == 0).then(|| e.local_patch_engine(0).read(&[4]));
        e.fill_guards().unwrap();
        let clean = e.is_dirty();
        e.write(&[4], 40).unwrap();
        let stale = guard();
        e.fill_guards().unwrap();
        (clean, stale, guard(), e.is_dirty())
    });
    assert_eq!(got[0], (false, Some(0), Some(40), false));
    assert_eq!(got[1], (false, None, None, false));
}

#[test]
#[serial]
fn accumulate_adds_across_contexts() {
    let got = run(2, |ctx| {
        let e = Line::new(&ctx, line(&ctx, 8, 2, 1));
        e.set_guards(1).unwrap();
        e.accumulate_from_guards().unwrap();
        values(&e)
    });
    assert_eq!(got[0], vec![0, 0, 0, 1, 1, 0, 0, 0]);
    assert_eq!(got[0], got[1]);
}

#[test]
#[serial]
fn repartition_is_seen_by_every_context() {
    let got = run(2, |ctx| {
        let layout = line(&ctx, 12, 2, 1);
        let e = Line::new(&ctx, layout.clone());
        layout.repartition([4]).unwrap();
        let local: Vec<usize> = layout.local_nodes().iter().map(|n| n.global_id).collect();
        for i in 0..12 {
            e.write(&[i], i).unwrap();
        }
        e.fill_guards().unwrap();
        (e.num_patches(), local, values(&e).iter().sum::<i64>())
    });
    assert_eq!(got[0], (4, vec![0, 1], 66));
    assert_eq!(got[1], (4, vec![2, 3], 66));
}

#[test]
#[serial]
fn clones_share_dirty_state() {
    let got = run(2, |ctx| {
        let a = Line::new(&ctx, line(&ctx, 6, 2, 1));
        let b = a.clone();
        b.fill_guards().unwrap();
        let shared = a.is_dirty();
        let mut c = a.clone();
        c.make_own_copy();
        c.write(&[0], 5).unwrap();
        (shared, a.is_dirty(), c.is_dirty(), a.read(&[0]).unwrap())
    });
    assert_eq!(got, vec![(false, false, true, 0); 2]);
}

/// Guard cells of this context's patches that mirror a neighbour's owned
/// cells, with the value each currently holds.
fn mirrored_guards<const D: usize>(e: &MultiPatchEngine<D, RemoteEngine<D, i32>>) -> Vec<([i64; D], i32)> {
    let whole = e.layout().domain();
    e.layout()
        .local_nodes()
        .iter()
        .flat_map(|n| {
            let local = e.local_patch_engine(n.global_id);
            n.allocated
                .points()
                .filter(|p| whole.contains_point(p) && !n.domain.contains_point(p))
                .map(|p| (p, local.read(&p)))
                .collect::<Vec<_>>()
        })
        .collect()
}

#[test]
#[serial]
fn fill_overwrites_poisoned_guards_in_1d() {
    let got = run(2, |ctx| {
        let e = MultiPatchEngine::<1, RemoteEngine<1, i32>>::new(&ctx, line(&ctx, 12, 4, 2));
        for i in 0..12 {
            e.write(&[i], 10 * i as i32 + 1).unwrap();
        }
        e.fill_guards().unwrap();
        e.set_guards(-1).unwrap();
        let poisoned = (e.dirty_faces(), mirrored_guards(&e));
        e.fill_guards_handler(&GuardLayers::uniform(2)).unwrap();
        (poisoned, mirrored_guards(&e), e.dirty_faces())
    });
    for ((mask, before), after, dirty) in got {
        assert_ne!(mask, 0);
        assert!(!before.is_empty());
        assert!(before.iter().all(|(_, v)| *v == -1));
        assert_eq!(after.len(), before.len());
        for ([i], v) in after {
            assert_eq!(v, 10 * i as i32 + 1, "guard cell {i}");
        }
        assert_eq!(dirty, 0);
    }
}

#[test]
#[serial]
fn fill_overwrites_poisoned_guards_in_2d() {
    let got = run(2, |ctx| {
        let layout = Arc::new(GridLayout::new(
            &ctx,
            Interval::new([0, 0], [5, 5]),
            [3, 2],
            GuardLayers::uniform(1),
            Distribution::Distributed,
        ));
        let e = MultiPatchEngine::<2, RemoteEngine<2, i32>>::new(&ctx, layout);
        for x in 0..6 {
            for y in 0..6 {
                e.write(&[x, y], 100 * x as i32 + y as i32 + 1).unwrap();
            }
        }
        e.fill_guards().unwrap();
        e.set_guards(-1).unwrap();
        let poisoned = (e.dirty_faces(), mirrored_guards(&e));
        e.fill_guards_handler(&GuardLayers::uniform(1)).unwrap();
        (poisoned, mirrored_guards(&e), e.dirty_faces())
    });
    for ((mask, before), after, dirty) in got {
        assert_ne!(mask, 0);
        assert!(!before.is_empty());
        assert!(before.iter().all(|(_, v)| *v == -1));
        assert_eq!(after.len(), before.len());
        for ([x, y], v) in after {
            assert_eq!(v, 100 * x as i32 + y as i32 + 1, "guard cell ({x}, {y})");
        }
        assert_eq!(dirty, 0);
    }
}
