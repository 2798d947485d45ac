mod common;

use common::{NESTED, TWINS, WRAPPING, config, system};
use rKind::{
    Engine,
    bus::{Bus, Event},
    config::Engine as EngineKind,
    invgen::{IntDom, InvGen},
    prune::Pruner,
    smt::{
        Session,
        unroll::{Mode, Unroller},
    },
    store::Store,
    term::{Op, Term, TermNode},
    tracer::channel_tracer,
    EngineCtrl,
};

#[test]
fn lockstep_counters_yield_one_equality() {
    let Some(cfg) = config(&[EngineKind::InvgenInt], 6) else {
        return;
    };
    let ts = system(TWINS);
    let (x, y) = (ts.svars[0].at(0), ts.svars[1].at(0));
    // the property is left unresolved, invariants are what we look at
    let store = Store::new(&ts.props);
    let bus = Bus::new();
    let mut invgen = InvGen::<IntDom>::new(cfg, ts, store.clone(), bus.mailbox("invgen-int"));
    invgen.check().unwrap();
    invgen.on_exit();

    let equalities: Vec<Term> = store
        .invariants("twins")
        .into_iter()
        .filter(|t| match t.node() {
            TermNode::App(Op::Eq, args) => {
                args.len() == 2 && args.contains(&x) && args.contains(&y)
            }
            _ => false,
        })
        .collect();
    assert_eq!(equalities.len(), 1, "{equalities:?}");
}

#[test]
fn trivial_candidates_are_pruned() {
    let Some(cfg) = config(&[], 1) else {
        return;
    };
    let ts = system(WRAPPING);
    let x = ts.svars[0].at(0);
    let session = Session::new(&cfg.smt, "prune", EngineCtrl::default()).unwrap();
    let oracle = Unroller::new(session, ts, Mode::Step).unwrap();
    let mut pruner = Pruner::new(Some(oracle)).unwrap();
    pruner.add(&Term::le(&x, &Term::int(3))).unwrap();
    let weaker = Term::le(&x, &Term::int(4));
    let stronger = Term::le(&x, &Term::int(2));
    let (keep, trivial) = pruner
        .partition(vec![weaker.clone(), stronger.clone()])
        .unwrap();
    assert_eq!(keep, [stronger]);
    assert_eq!(trivial, [weaker]);
}

#[test]
fn published_invariants_are_not_trivial() {
    let Some(cfg) = config(&[EngineKind::InvgenInt], 5) else {
        return;
    };
    let ts = system(WRAPPING);
    let store = Store::new(&ts.props);
    let bus = Bus::new();
    let (tx, rx) = channel_tracer();
    bus.add_tracer(Box::new(tx));
    let mut invgen = InvGen::<IntDom>::new(cfg, ts, store.clone(), bus.mailbox("invgen-int"));
    invgen.check().unwrap();
    invgen.on_exit();

    let published: Vec<Term> = rx
        .try_iter()
        .filter_map(|(_, e)| match e {
            Event::Invariant { term, .. } => Some(term),
            _ => None,
        })
        .collect();
    assert!(!published.is_empty());
    assert_eq!(published, store.invariants("wrapping"));
    for t in published.iter() {
        assert!(!t.is_true());
    }
}

#[test]
fn subsystem_invariants_reach_every_caller() {
    let Some(cfg) = config(&[EngineKind::InvgenInt], 5) else {
        return;
    };
    let ts = system(NESTED);
    let store = Store::new(&ts.props);
    let bus = Bus::new();
    let mut invgen =
        InvGen::<IntDom>::new(cfg, ts.clone(), store.clone(), bus.mailbox("invgen-int"));
    invgen.check().unwrap();
    invgen.on_exit();

    let leaf = store.invariants("leaf");
    assert!(!leaf.is_empty());
    let (mid, top) = (store.invariants("mid"), store.invariants("top"));
    for inv in leaf.iter() {
        let lifted = ts.lift_to_callers("leaf", inv);
        assert_eq!(lifted.len(), 2);
        for (sys, t) in lifted {
            let found = match sys.name.as_str() {
                "mid" => &mid,
                "top" => &top,
                other => panic!("unexpected caller {other}"),
            };
            assert!(found.contains(&t), "{inv} was not lifted into {}", sys.name);
        }
    }
}
