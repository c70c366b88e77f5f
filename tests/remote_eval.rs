mod util;
use multipatch::domain::Interval;
use multipatch::engine::RemoteEngine;
use multipatch::evaluator::{
    OpAddAssign, OpAssign, evaluate_remote_multi_patch, evaluate_remote_single_patch,
    reduce_remote_multi_patch, reduce_remote_single_patch,
};
use multipatch::tulip::{OpAdd, OpMax};
use serial_test::serial;
use util::*;

#[test]
#[serial]
fn stencil_over_mismatched_layouts() {
    let got = run(3, |ctx| {
        let b = Line::new(&ctx, line(&ctx, 8, 3, 0));
        let a = Line::new(&ctx, line(&ctx, 8, 4, 0));
        for i in 0..8 {
            b.write(&[i], i * i).unwrap();
        }
        evaluate_remote_multi_patch(
            &a,
            &Interval::range(1, 6),
            OpAssign,
            &[(&b, Interval::range(0, 5)), (&b, Interval::range(2, 7))],
            &|v: &[i64]| v[0] + v[1],
        )
        .unwrap();
        let all = Interval::range(0, 7);
        let sum = reduce_remote_multi_patch::<1, _, _, OpAdd>(&[(&a, all)], &|v: &[i64]| v[0]).unwrap();
        let dot =
            reduce_remote_multi_patch::<1, _, _, OpAdd>(&[(&a, all), (&b, all)], &|v: &[i64]| v[0] * v[1])
                .unwrap();
        (values(&a), sum, dot)
    });
    let want: Vec<i64> = (0..8)
        .map(|i| if (1..=6).contains(&i) { 2 * i * i + 2 } else { 0 })
        .collect();
    for r in &got {
        assert_eq!(*r, (want.clone(), 194, 4732));
    }
}

#[test]
#[serial]
fn accumulating_into_remote_patch() {
    let got = run(3, |ctx| {
        let dom = Interval::range(0, 4);
        let a = RemoteEngine::<1, i32>::new(&ctx, dom, Some(2));
        let b = RemoteEngine::<1, i32>::new(&ctx, dom, Some(0));
        let c = RemoteEngine::<1, i32>::new(&ctx, dom, Some(1));
        for i in 0..5 {
            a.write(&[i], 100);
            b.write(&[i], i as i32);
            c.write(&[i], -2 * i as i32);
        }
        let kernel = |v: &[i32]| v[0] * v[1];
        evaluate_remote_single_patch(&ctx, &a, &dom, OpAddAssign, &[(&b, dom), (&c, dom)], &kernel).unwrap();
        let largest = reduce_remote_single_patch::<1, _, _, OpMax>(&ctx, &[(&a, dom)], &|v: &[i32]| v[0]).unwrap();
        (a.read(&[4]).unwrap(), largest)
    });
    // 100 - 2 i^2
    assert_eq!(got, vec![(68, 100); 3]);
}
