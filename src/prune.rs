//! Discards candidate invariants that known invariants already imply.

use crate::{
    smt::{SatResult, SmtError, unroll::Unroller},
    term::{Op, Term, TermNode},
};
use giputils::hash::GHashSet;
use log::debug;

pub struct Pruner {
    known: GHashSet<Term>,
    /// Step session with known invariants at offsets 0 and 1, unrolled once.
    oracle: Option<Unroller>,
    pub num_pruned: usize,
}

/// `(= b a)` for `(= a b)`, `(>= b a)` for `(<= a b)` and so on.
fn mirror(t: &Term) -> Option<Term> {
    let TermNode::App(op, args) = t.node() else {
        return None;
    };
    let [a, b] = args.as_slice() else {
        return None;
    };
    Some(match op {
        Op::Eq => Term::eq(b, a),
        Op::Le => Term::ge(b, a),
        Op::Ge => Term::le(b, a),
        Op::Lt => Term::gt(b, a),
        Op::Gt => Term::lt(b, a),
        _ => return None,
    })
}

impl Pruner {
    pub fn new(oracle: Option<Unroller>) -> Result<Self, SmtError> {
        let oracle = match oracle {
            Some(mut o) => {
                o.unroll_to(1)?;
                Some(o)
            }
            None => None,
        };
        Ok(Self {
            known: GHashSet::new(),
            oracle,
            num_pruned: 0,
        })
    }

    /// Syntactic check: constants, known invariants and their mirror images.
    pub fn is_trivial_syntactic(&self, t: &Term) -> bool {
        t.is_true()
            || self.known.contains(t)
            || mirror(t).is_some_and(|m| self.known.contains(&m))
            || matches!(t.node(), TermNode::App(Op::And, args) if args.iter().all(|a| self.known.contains(a)))
    }

    /// Whether the known invariants and one transition imply `t` in the
    /// post state.
    fn is_trivial_smt(&mut self, t: &Term) -> Result<bool, SmtError> {
        let Some(oracle) = self.oracle.as_mut() else {
            return Ok(false);
        };
        let act = oracle.session.fresh_actlit()?;
        oracle.session.assert_act(&act, &t.bump(1).not())?;
        let res = oracle.session.check_sat_assuming(&[act.term().clone()]);
        oracle.session.deactivate(act)?;
        Ok(res? == SatResult::Unsat)
    }

    pub fn is_trivial(&mut self, t: &Term) -> Result<bool, SmtError> {
        Ok(self.is_trivial_syntactic(t) || self.is_trivial_smt(t)?)
    }

    /// Splits candidates into non-trivial and trivial ones.
    pub fn partition(&mut self, cands: Vec<Term>) -> Result<(Vec<Term>, Vec<Term>), SmtError> {
        let mut keep = Vec::new();
        let mut trivial = Vec::new();
        for c in cands {
            if self.is_trivial(&c)? {
                trivial.push(c);
            } else {
                keep.push(c);
            }
        }
        self.num_pruned += trivial.len();
        if !trivial.is_empty() {
            debug!("pruned {} trivial candidate(s)", trivial.len());
        }
        Ok((keep, trivial))
    }

    /// Makes `t` known, both syntactically and to the solver.
    pub fn add(&mut self, t: &Term) -> Result<(), SmtError> {
        if !self.known.insert(t.clone()) {
            return Ok(());
        }
        if let Some(oracle) = self.oracle.as_mut() {
            oracle.add_invariant(t)?;
        }
        Ok(())
    }

    pub fn knows(&self, t: &Term) -> bool {
        self.known.contains(t)
    }
}
