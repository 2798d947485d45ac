mod common;

use common::{LATCH, TWINS, WRAPPING, config, system};
use rKind::{
    EngineCtrl,
    kind::{Candidate, SplitOpts, SplitStatistic, split},
    smt::{
        SatResult, Session,
        unroll::{Mode, Unroller},
    },
    term::Term,
    transys::TransSys,
};
use std::sync::Arc;

#[test]
fn unfalsifiable_candidates_replay_unsat() {
    let Some(cfg) = config(&[], 1) else {
        return;
    };
    let ts = system(WRAPPING);
    let x = ts.svars[0].clone();
    let session = Session::new(&cfg.smt, "split", EngineCtrl::default()).unwrap();
    let mut uts = Unroller::new(session, ts, Mode::Step).unwrap();
    uts.unroll_to(1).unwrap();

    let cands = [
        ("le3", Term::le(&x.at(0), &Term::int(3))),
        ("le2", Term::le(&x.at(0), &Term::int(2))),
        ("ge0", Term::ge(&x.at(0), &Term::int(0))),
    ];
    let mut acts = Vec::new();
    let mut checks = Vec::new();
    for (id, c) in cands.iter() {
        let act = uts.session.fresh_actlit().unwrap();
        uts.session.assert_act(&act, c).unwrap();
        checks.push(Candidate {
            id: *id,
            check: c.bump(1),
            act: act.term().clone(),
        });
        acts.push(act);
    }
    let opts = SplitOpts {
        compress: true,
        lazy_invariants: false,
    };
    let mut stat = SplitStatistic::default();
    let (standing, falsified) = split(&mut uts, checks, &[], opts, &mut stat).unwrap();
    let mut ids: Vec<&str> = standing.iter().map(|c| c.id).collect();
    ids.sort();
    assert_eq!(ids, ["ge0", "le3"]);
    assert_eq!(falsified.len(), 1);
    assert_eq!(falsified[0].id, "le2");

    // the standing candidates together cannot be falsified
    let neg = uts.session.fresh_actlit().unwrap();
    uts.session
        .assert_act(&neg, &Term::or(standing.iter().map(|c| c.check.not())))
        .unwrap();
    let mut assumptions: Vec<Term> = standing.iter().map(|c| c.act.clone()).collect();
    assumptions.push(neg.term().clone());
    assert_eq!(
        uts.session.check_sat_assuming(&assumptions).unwrap(),
        SatResult::Unsat
    );
}

fn step_session(ts: Arc<TransSys>, k: usize) -> Option<Unroller> {
    let cfg = config(&[], k)?;
    let session = Session::new(&cfg.smt, "split", EngineCtrl::default()).unwrap();
    let mut uts = Unroller::new(session, ts, Mode::Step).unwrap();
    uts.unroll_to(k).unwrap();
    Some(uts)
}

/// The first property of `uts` assumed at offsets `0..k` and checked at `k`.
fn inductive_step(uts: &mut Unroller, k: usize) -> Candidate<&'static str> {
    let prop = uts.sys().props[0].term.clone();
    let act = uts.session.fresh_actlit().unwrap();
    for j in 0..k {
        uts.session.assert_act(&act, &prop.bump(j as i32)).unwrap();
    }
    Candidate {
        id: "safe",
        check: prop.bump(k as i32),
        act: act.term().clone(),
    }
}

#[test]
fn compression_rules_out_looping_counterexamples() {
    let ts = system(LATCH);
    for compress in [false, true] {
        let Some(mut uts) = step_session(ts.clone(), 3) else {
            return;
        };
        let cand = inductive_step(&mut uts, 3);
        let opts = SplitOpts {
            compress,
            lazy_invariants: false,
        };
        let mut stat = SplitStatistic::default();
        let (standing, falsified) = split(&mut uts, vec![cand], &[], opts, &mut stat).unwrap();
        if compress {
            // every counterexample repeats the state (x = 1, i = true)
            assert_eq!(standing.len(), 1);
            assert!(stat.num_compress > 0);
        } else {
            assert_eq!(falsified.len(), 1);
            assert_eq!(stat.num_compress, 0);
        }
    }
}

#[test]
fn lazy_invariants_block_violating_models() {
    let ts = system(LATCH);
    let x = ts.svars.iter().find(|s| s.name() == "x").unwrap().clone();
    let Some(uts) = step_session(ts, 1) else {
        return;
    };
    let mut uts = uts.with_lazy_invariants();
    uts.add_invariant(&Term::eq(&x.at(0), &Term::int(0))).unwrap();
    let cand = inductive_step(&mut uts, 1);
    let (check, act) = (cand.check.clone(), cand.act.clone());

    let mut stat = SplitStatistic::default();
    let eager = SplitOpts {
        compress: false,
        lazy_invariants: false,
    };
    let (_, falsified) = split(&mut uts, vec![cand], &[], eager, &mut stat).unwrap();
    assert_eq!(falsified.len(), 1);
    assert_eq!(stat.num_block, 0);

    let lazy = SplitOpts {
        compress: false,
        lazy_invariants: true,
    };
    let cand = Candidate {
        id: "safe",
        check,
        act,
    };
    let (standing, _) = split(&mut uts, vec![cand], &[], lazy, &mut stat).unwrap();
    assert_eq!(standing.len(), 1);
    assert!(stat.num_block > 0);
}

#[test]
fn division_by_zero_is_evaluated_with_solver_values() {
    let ts = system(TWINS);
    let var = |name: &str| ts.svars.iter().find(|s| s.name() == name).unwrap().clone();
    let (x, y) = (var("x"), var("y"));
    let Some(mut uts) = step_session(ts.clone(), 0) else {
        return;
    };
    uts.session
        .assert(&Term::eq(&x.at(0), &Term::int(5)))
        .unwrap();
    uts.session
        .assert(&Term::eq(&y.at(0), &Term::int(0)))
        .unwrap();
    let q = Term::div(&x.at(0), &y.at(0));
    let cands = vec![
        Candidate {
            id: "nonneg",
            check: Term::ge(&q, &Term::int(0)),
            act: Term::bool(true),
        },
        Candidate {
            id: "neg",
            check: Term::lt(&q, &Term::int(0)),
            act: Term::bool(true),
        },
    ];
    let opts = SplitOpts {
        compress: false,
        lazy_invariants: false,
    };
    let mut stat = SplitStatistic::default();
    let (standing, falsified) = split(&mut uts, cands, &[], opts, &mut stat).unwrap();
    assert!(standing.is_empty());
    assert_eq!(falsified.len(), 2);
}
