mod util;
use multipatch::domain::{IndexSet, Interval};
use multipatch::PatchError;
use multipatch::engine::{
    Brick, DeleteMethod, DynamicBrick, DynamicEvent, DynamicOp, MultiPatchEngine, RemoteDynamicEngine,
};
use multipatch::layout::{Distribution, DynamicLayout, Layout, LayoutEvent};
use multipatch::runtime::RuntimeContext;
use proptest::prelude::*;
use serial_test::serial;
use std::sync::Arc;
use util::*;

type Particles = MultiPatchEngine<1, RemoteDynamicEngine<i64>>;

#[test]
#[serial]
fn local_resizes_then_sync_across_contexts() {
    let got = run(2, |ctx| {
        let layout = Arc::new(DynamicLayout::new(
            &ctx,
            Interval::range(0, 15),
            4,
            Distribution::Distributed,
        ));
        let e = Particles::new(&ctx, layout.clone());
        for i in 0..16 {
            e.write(&[i], 10 * i).unwrap();
        }
        layout
            .destroy(&IndexSet::List(vec![1, 8, 9, 14]), DeleteMethod::ShiftUp)
            .unwrap();
        if ctx.my_context() == 0 {
            layout.create(2, 1).unwrap();
        }
        layout.sync().unwrap();
        let doms: Vec<Interval<1>> = layout.nodes().iter().map(|n| n.domain).collect();
        let vals: Vec<i64> = (0..14).map(|i| e.read(&[i]).unwrap()).collect();
        (doms, vals)
    });
    let doms = vec![
        Interval::range(0, 2),
        Interval::range(3, 8),
        Interval::range(9, 10),
        Interval::range(11, 13),
    ];
    let vals = vec![0, 20, 30, 40, 50, 60, 70, 0, 0, 100, 110, 120, 130, 150];
    assert_eq!(got[0], (doms, vals));
    assert_eq!(got[0], got[1]);
}

#[test]
fn replayed_event_is_applied_once_per_engine() {
    let ctx = RuntimeContext::serial(cfg()).unwrap();
    let layout = Arc::new(DynamicLayout::new(
        &ctx,
        Interval::range(0, 9),
        2,
        Distribution::Replicated,
    ));
    let a = MultiPatchEngine::<1, DynamicBrick<f32>>::new(&ctx, layout.clone());
    let b = MultiPatchEngine::<1, DynamicBrick<f32>>::new(&ctx, layout.clone());
    let event = DynamicEvent::new(DynamicOp::Create { patch: 1, amount: 3 });
    for _ in 0..3 {
        layout.observers().notify(&LayoutEvent::Dynamic(event.clone())).unwrap();
    }
    assert_eq!(a.patch(1).len(), 8);
    assert_eq!(b.patch(1).len(), 8);

    // an id the engine has already seen is ignored whatever it carries
    let stale = DynamicEvent {
        id: event.id,
        op: DynamicOp::Create { patch: 1, amount: 100 },
    };
    layout.observers().notify(&LayoutEvent::Dynamic(stale)).unwrap();
    assert_eq!(a.patch(1).len(), 8);
}

#[test]
fn copy_appends_in_order() {
    let ctx = RuntimeContext::serial(cfg()).unwrap();
    let layout = Arc::new(DynamicLayout::new(
        &ctx,
        Interval::range(0, 5),
        2,
        Distribution::Replicated,
    ));
    let e = MultiPatchEngine::<1, DynamicBrick<i32>>::new(&ctx, layout.clone());
    for i in 0..6 {
        e.write(&[i], i as i32).unwrap();
    }
    layout.copy(&IndexSet::List(vec![5, 3]), 1).unwrap();
    layout.copy_patch(vec![(1, 0, vec![4])]).unwrap();
    assert_eq!(e.patch(0).values(), vec![0, 1, 2, 4]);
    assert_eq!(e.patch(1).values(), vec![3, 4, 5, 5, 3]);
    layout.sync().unwrap();
    assert_eq!(layout.patch_domain(1), Interval::range(4, 8));
    assert_eq!(e.read(&[8]).unwrap(), 3);
}

#[test]
fn rejected_kill_list_leaves_engines_alone() {
    let ctx = RuntimeContext::serial(cfg()).unwrap();
    let layout = Arc::new(DynamicLayout::new(
        &ctx,
        Interval::range(0, 7),
        2,
        Distribution::Replicated,
    ));
    let e = MultiPatchEngine::<1, DynamicBrick<i32>>::new(&ctx, layout.clone());
    let err = layout.destroy_in_patch(&IndexSet::List(vec![5, 5]), 1, DeleteMethod::BackFill);
    assert!(err.is_err());
    assert_eq!(e.patch(1).len(), 4);
    assert_eq!(layout.patch_domain(1), Interval::range(4, 7));
}

/// Replicated two-patch layout over `[0, 9]` with one engine holding `i` at `i`.
fn two_patches(ctx: &RuntimeContext) -> (Arc<DynamicLayout>, MultiPatchEngine<1, DynamicBrick<i32>>) {
    let layout = Arc::new(DynamicLayout::new(ctx, Interval::range(0, 9), 2, Distribution::Replicated));
    let e = MultiPatchEngine::<1, DynamicBrick<i32>>::new(ctx, layout.clone());
    for i in 0..10 {
        e.write(&[i], i as i32).unwrap();
    }
    (layout, e)
}

fn deliver(layout: &DynamicLayout, event: &DynamicEvent) -> Result<(), PatchError> {
    layout.observers().notify(&LayoutEvent::Dynamic(event.clone()))
}

#[test]
fn rejected_patch_copy_changes_nothing() {
    let ctx = RuntimeContext::serial(cfg()).unwrap();
    let (layout, e) = two_patches(&ctx);
    let err = layout.copy_patch(vec![(0, 1, vec![0]), (0, 1, vec![99])]).unwrap_err();
    assert!(matches!(err, PatchError::InvalidKillList(_)));
    assert_eq!(layout.patch_domain(1), Interval::range(5, 9));
    assert_eq!(e.patch(1).len(), 5);

    layout.copy_patch(vec![(0, 1, vec![0]), (0, 1, vec![4])]).unwrap();
    assert_eq!(layout.patch_domain(1).size(), e.patch(1).len());
    assert_eq!(e.patch(1).values(), vec![5, 6, 7, 8, 9, 0, 4]);
}

#[test]
fn engine_rejection_rolls_layout_back() {
    let ctx = RuntimeContext::serial(cfg()).unwrap();
    let layout = Arc::new(DynamicLayout::new(&ctx, Interval::range(0, 9), 2, Distribution::Replicated));
    let fixed = MultiPatchEngine::<1, Brick<1, i32>>::new(&ctx, layout.clone());
    let err = layout.create(4, 0).unwrap_err();
    assert!(matches!(err, PatchError::UnsupportedOperation(_)));
    assert_eq!(layout.patch_domain(0), Interval::range(0, 4));
    assert_eq!(fixed.patch(0).domain(), Interval::range(0, 4));
}

#[test]
fn replayed_destroy_list_resumes_after_failure() {
    let ctx = RuntimeContext::serial(cfg()).unwrap();
    let (layout, e) = two_patches(&ctx);
    let partial = DynamicEvent::new(DynamicOp::DestroyIterList {
        lists: vec![(0, vec![1]), (1, vec![99])],
        method: DeleteMethod::ShiftUp,
    });
    for _ in 0..2 {
        assert!(matches!(deliver(&layout, &partial), Err(PatchError::InvalidKillList(_))));
    }
    assert_eq!(e.patch(0).values(), vec![0, 2, 3, 4]);
    assert_eq!(e.patch(1).len(), 5);

    // same id: patch 0 already saw it, patch 1 did not
    let fixed = DynamicEvent {
        id: partial.id,
        op: DynamicOp::DestroyIterList {
            lists: vec![(0, vec![1]), (1, vec![0])],
            method: DeleteMethod::ShiftUp,
        },
    };
    deliver(&layout, &fixed).unwrap();
    deliver(&layout, &fixed).unwrap();
    assert_eq!(e.patch(0).values(), vec![0, 2, 3, 4]);
    assert_eq!(e.patch(1).values(), vec![6, 7, 8, 9]);
}

#[test]
fn replayed_patch_copy_is_applied_once() {
    let ctx = RuntimeContext::serial(cfg()).unwrap();
    let (layout, e) = two_patches(&ctx);
    // the second entry reads the element the first appended to patch 1
    let event = DynamicEvent::new(DynamicOp::CopyPatchList {
        lists: vec![(0, 1, vec![0]), (1, 0, vec![5])],
    });
    for _ in 0..3 {
        deliver(&layout, &event).unwrap();
    }
    assert_eq!(e.patch(0).values(), vec![0, 1, 2, 3, 4, 0]);
    assert_eq!(e.patch(1).values(), vec![5, 6, 7, 8, 9, 0]);

    let bad = DynamicEvent::new(DynamicOp::CopyPatchList {
        lists: vec![(0, 1, vec![1]), (0, 1, vec![50])],
    });
    assert!(deliver(&layout, &bad).is_err());
    assert_eq!(e.patch(1).len(), 6);

    let retry = DynamicEvent {
        id: bad.id,
        op: DynamicOp::CopyPatchList {
            lists: vec![(0, 1, vec![1])],
        },
    };
    deliver(&layout, &retry).unwrap();
    deliver(&layout, &retry).unwrap();
    assert_eq!(e.patch(1).values(), vec![5, 6, 7, 8, 9, 0, 1]);
}

#[test]
fn concurrent_replays_apply_once() {
    let ctx = RuntimeContext::serial(cfg()).unwrap();
    let (layout, e) = two_patches(&ctx);
    let event = DynamicEvent::new(DynamicOp::CopyList {
        patch: 0,
        set: vec![0, 1],
    });
    let grow = DynamicEvent::new(DynamicOp::Create { patch: 1, amount: 3 });
    std::thread::scope(|s| {
        for _ in 0..8 {
            s.spawn(|| {
                deliver(&layout, &event).unwrap();
                deliver(&layout, &grow).unwrap();
            });
        }
    });
    assert_eq!(e.patch(0).values(), vec![0, 1, 2, 3, 4, 0, 1]);
    assert_eq!(e.patch(1).len(), 8);
}

fn values_and_kills() -> impl Strategy<Value = (Vec<i32>, Vec<i64>)> {
    (0usize..40).prop_flat_map(|n| {
        (
            Just((0..n as i32).collect::<Vec<_>>()),
            prop::collection::btree_set(0..n.max(1) as i64, 0..=n),
        )
            .prop_map(move |(v, kill)| (v, kill.into_iter().filter(|&k| (k as usize) < n).collect()))
    })
}

proptest! {
    #[test]
    fn shiftup_keeps_survivor_order((values, kill) in values_and_kills()) {
        let brick = DynamicBrick::from_values(0, values.clone());
        brick.destroy(&IndexSet::List(kill.clone()), DeleteMethod::ShiftUp, true).unwrap();
        let want: Vec<i32> = values.into_iter().filter(|v| !kill.contains(&(*v as i64))).collect();
        prop_assert_eq!(brick.values(), want);
    }

    #[test]
    fn backfill_only_moves_tail((values, kill) in values_and_kills()) {
        let n = values.len();
        let brick = DynamicBrick::from_values(0, values.clone());
        brick.destroy(&IndexSet::List(kill.clone()), DeleteMethod::BackFill, true).unwrap();
        let got = brick.values();
        let new_len = n - kill.len();
        prop_assert_eq!(got.len(), new_len);
        for (i, v) in got.iter().enumerate() {
            prop_assert!(!kill.contains(&(*v as i64)));
            if !kill.contains(&(i as i64)) {
                prop_assert_eq!(*v, i as i32);
            } else {
                prop_assert!(*v as usize >= new_len);
            }
        }
    }
}
