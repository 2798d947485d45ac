use crate::{
    EngineError,
    smt::{SatResult, SmtError, unroll::Unroller},
    term::{Model, Term},
};
use log::trace;

#[derive(Clone, Copy, Debug, Default)]
pub struct SplitOpts {
    /// Assert distinctness of repeated states found in counterexamples.
    pub compress: bool,
    /// Block violated instances of lazily recorded invariants.
    pub lazy_invariants: bool,
}

#[derive(Debug, Default)]
pub struct SplitStatistic {
    pub num_query: usize,
    pub num_compress: usize,
    pub num_block: usize,
}

/// A candidate to falsify at the last offset.
pub struct Candidate<T> {
    pub id: T,
    /// The candidate instance that must hold.
    pub check: Term,
    /// Literal enabling the candidate's premises, `true` if it has none.
    pub act: Term,
}

pub enum Falsify {
    Unsat,
    Sat(Model),
}

/// Asks for a model under `assumptions`, refining it with path compression
/// and lazy invariant blocking until it survives both.
pub fn falsify(
    uts: &mut Unroller,
    assumptions: &[Term],
    opts: SplitOpts,
    stat: &mut SplitStatistic,
) -> Result<Falsify, SmtError> {
    loop {
        stat.num_query += 1;
        if uts.session.check_sat_assuming(assumptions)? == SatResult::Unsat {
            return Ok(Falsify::Unsat);
        }
        let model = uts.model()?;
        if opts.compress && compress(uts, &model)? {
            stat.num_compress += 1;
            continue;
        }
        if opts.lazy_invariants && uts.block_invariants(&model)? {
            stat.num_block += 1;
            continue;
        }
        return Ok(Falsify::Sat(model));
    }
}

/// Asserts that every pair of equal states in `model` must differ.
fn compress(uts: &mut Unroller, model: &Model) -> Result<bool, SmtError> {
    let svars = uts.sys().svars.clone();
    let depth = uts.depth();
    let mut found = false;
    for j in 1..=depth {
        for i in 0..j {
            if model.same_state(&svars, i as i32, j as i32) {
                trace!("compressing path: states {i} and {j} are equal");
                uts.assert_distinct(i, j)?;
                found = true;
            }
        }
    }
    Ok(found)
}

/// Splits `cands` into the candidates that cannot be falsified together and
/// the ones falsified along the way. `extra` are literals assumed in every
/// query.
pub fn split<T>(
    uts: &mut Unroller,
    cands: Vec<Candidate<T>>,
    extra: &[Term],
    opts: SplitOpts,
    stat: &mut SplitStatistic,
) -> Result<(Vec<Candidate<T>>, Vec<Candidate<T>>), EngineError> {
    let mut standing = cands;
    let mut falsified = Vec::new();
    while !standing.is_empty() {
        let neg = uts.session.fresh_actlit()?;
        let some_false = Term::or(standing.iter().map(|c| c.check.not()));
        uts.session.assert_act(&neg, &some_false)?;
        let mut assumptions = extra.to_vec();
        assumptions.extend(standing.iter().map(|c| c.act.clone()));
        assumptions.push(neg.term().clone());
        let res = match falsify(uts, &assumptions, opts, stat) {
            Ok(Falsify::Sat(mut model)) => {
                let checks: Vec<Term> = standing.iter().map(|c| c.check.clone()).collect();
                uts.session.complete(&mut model, &checks).map(|_| Some(model))
            }
            Ok(Falsify::Unsat) => Ok(None),
            Err(e) => Err(e),
        };
        uts.session.deactivate(neg)?;
        let Some(model) = res? else {
            break;
        };
        let before = falsified.len();
        let mut still = Vec::with_capacity(standing.len());
        for c in standing {
            if model.eval_bool(&c.check, 0)? {
                still.push(c);
            } else {
                falsified.push(c);
            }
        }
        if falsified.len() == before {
            return Err(SmtError::Unexpected("model falsifies no candidate".into()).into());
        }
        standing = still;
    }
    Ok((standing, falsified))
}
