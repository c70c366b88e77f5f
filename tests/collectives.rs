mod util;
use multipatch::tulip::{CollectFromContexts, OpAdd, OpMax, OpMin, ReduceOverContexts, RemoteProxy};
use serial_test::serial;
use util::*;

#[test]
#[serial]
fn sum_of_threes_over_contexts() {
    for n in [1, 2, 4] {
        let got = run(n, |ctx| {
            ReduceOverContexts::<i32, OpAdd>::new(&ctx, 3, 0, true)
                .unwrap()
                .broadcast()
                .unwrap()
        });
        assert_eq!(got, vec![3 * n as i32; n]);
    }
}

#[test]
#[serial]
fn invalid_contributions_are_skipped() {
    let got = run(4, |ctx| {
        let me = ctx.my_context() as i64;
        let max = ReduceOverContexts::<i64, OpMax>::new(&ctx, me * 10, 0, me != 3)
            .unwrap()
            .broadcast()
            .unwrap();
        let min = ReduceOverContexts::<i64, OpMin>::new(&ctx, me * 10, 2, me != 0)
            .unwrap()
            .broadcast()
            .unwrap();
        (max, min)
    });
    assert_eq!(got, vec![(20, 10); 4]);
}

#[test]
#[serial]
fn collect_keeps_context_order() {
    let got = run(3, |ctx| {
        let me = ctx.my_context();
        let c = CollectFromContexts::<String>::new(&ctx, format!("ctx{me}"), 1, me != 0).unwrap();
        if c.is_root() {
            Some((0..3).map(|i| c.get(i).cloned()).collect::<Vec<_>>())
        } else {
            None
        }
    });
    assert_eq!(got[0], None);
    assert_eq!(got[1], Some(vec![None, Some("ctx1".into()), Some("ctx2".into())]));
    assert_eq!(got[2], None);
}

#[test]
#[serial]
fn proxy_reads_owner_value() {
    let got = run(3, |ctx| {
        let mut v = if ctx.my_context() == 1 { 2 } else { -1 };
        let proxy = RemoteProxy::new(&ctx, &mut v, 1).unwrap();
        (*proxy, proxy.is_live())
    });
    assert_eq!(got, vec![(2, false), (2, true), (2, false)]);
}

#[test]
#[serial]
fn proxy_writes_reach_owner_storage() {
    let got = run(2, |ctx| {
        let mut v = 0u64;
        {
            let mut proxy = RemoteProxy::new(&ctx, &mut v, 0).unwrap();
            proxy.set(7);
        }
        v
    });
    assert_eq!(got, vec![7, 0]);
}
