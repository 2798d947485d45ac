//! Counterexample-guided invariant generation.
//!
//! Candidate terms mined from a system start in a single equivalence class.
//! The graph of classes is refined with states reachable at increasing
//! depths until the base case cannot falsify it, and the relations it then
//! encodes are checked for k-induction. Systems are handled bottom-up and
//! invariants of a subsystem are lifted to every caller.

pub mod chain;
pub mod domain;
pub mod graph;
pub mod mine;

pub use domain::{BoolDom, Domain, IntDom};

use crate::{
    Engine, EngineCtrl, EngineError,
    bus::{Cert, Event, FactKind, Mailbox},
    config::Config,
    kind::{Candidate, SplitOpts, SplitStatistic, split},
    prune::Pruner,
    smt::{
        SatResult, Session, SmtError,
        unroll::{Mode, Unroller},
    },
    store::Store,
    term::Term,
    transys::TransSys,
};
use giputils::{
    hash::GHashSet,
    statistic::{Average, AverageDuration},
};
use graph::{Cand, CandKind, Graph, GraphError};
use log::{debug, info};
use std::{mem::take, sync::Arc, time::Instant};

#[derive(Debug, Default)]
pub struct Statistic {
    pub depth: usize,
    pub num_refine: usize,
    pub num_candidates: usize,
    pub num_invariants: usize,
    pub num_trivial: usize,
    pub num_lifted: usize,
    pub avg_graph_size: Average,
    pub stabilize_time: AverageDuration,
    pub validate_time: AverageDuration,
    pub split: SplitStatistic,
}

/// Invariant generation state of one system.
struct Unit<D: Domain> {
    sys: Arc<TransSys>,
    graph: Graph<D>,
    base: Unroller,
    step: Unroller,
    pruner: Pruner,
    inv_seen: usize,
    /// Candidates proved, either published or found trivial.
    done: GHashSet<Term>,
    exhausted: bool,
}

impl<D: Domain> Unit<D> {
    fn skip(&self, t: &Term) -> bool {
        self.done.contains(t) || self.pruner.knows(t)
    }

    fn candidates(&self, all: bool) -> Vec<Cand> {
        self.graph.candidates(all, |t| self.skip(t))
    }

    fn learn(&mut self, t: &Term) -> Result<(), SmtError> {
        self.done.insert(t.clone());
        self.pruner.add(t)?;
        self.base.add_invariant(t)?;
        self.step.add_invariant(t)?;
        Ok(())
    }
}

/// What a depth brought for one system.
#[derive(Default)]
struct Progress {
    refined: bool,
    found: usize,
}

pub struct InvGen<D: Domain> {
    cfg: Config,
    top: Arc<TransSys>,
    store: Store,
    mailbox: Mailbox,
    ctrl: EngineCtrl,
    units: Vec<Unit<D>>,
    statistic: Statistic,
}

impl<D: Domain> InvGen<D> {
    pub fn new(cfg: Config, top: Arc<TransSys>, store: Store, mailbox: Mailbox) -> Self {
        Self {
            cfg,
            top,
            store,
            mailbox,
            ctrl: EngineCtrl::default(),
            units: Vec::new(),
            statistic: Statistic::default(),
        }
    }

    fn session(&self, sys: &TransSys, role: &str) -> Result<Session, SmtError> {
        Session::new(
            &self.cfg.smt,
            &format!("{}-{}-{role}", D::NAME, sys.name),
            self.ctrl.clone(),
        )
    }

    fn unit(&self, sys: Arc<TransSys>) -> Result<Option<Unit<D>>, SmtError> {
        let cands = mine::mine::<D>(&sys);
        debug!("{}: mined {} candidate(s) in {}", D::NAME, cands.len(), sys.name);
        let Some(graph) = Graph::new(cands) else {
            return Ok(None);
        };
        let base = Unroller::new(self.session(&sys, "base")?, sys.clone(), Mode::Base)?;
        let step = Unroller::new(self.session(&sys, "step")?, sys.clone(), Mode::Step)?;
        let oracle = if self.cfg.invgen.no_smt_prune {
            None
        } else {
            Some(Unroller::new(
                self.session(&sys, "prune")?,
                sys.clone(),
                Mode::Step,
            )?)
        };
        Ok(Some(Unit {
            sys,
            graph,
            base,
            step,
            pruner: Pruner::new(oracle)?,
            inv_seen: 0,
            done: GHashSet::new(),
            exhausted: false,
        }))
    }

    /// Takes in the invariants known for the unit's scope and hands them
    /// on to its callers.
    fn fold(&mut self, unit: &mut Unit<D>) -> Result<(), SmtError> {
        let invs = self.store.invariants_since(unit.sys.scope(), unit.inv_seen);
        unit.inv_seen += invs.len();
        for inv in invs {
            unit.learn(&inv)?;
            self.lift(&unit.sys, &inv, None);
        }
        Ok(())
    }

    /// Publishes `t`, an invariant of `sys`, for every system above it.
    fn lift(&mut self, sys: &TransSys, t: &Term, cert: Option<Cert>) {
        for (caller, lifted) in self.top.lift_to_callers(&sys.name, t) {
            if self.store.add_invariant(caller.scope(), &lifted) {
                debug!("{}: lifted {t} to {} as {lifted}", D::NAME, caller.name);
                self.statistic.num_lifted += 1;
                self.mailbox.broadcast(Event::Invariant {
                    kind: FactKind::of(&lifted),
                    scope: caller.scope().to_string(),
                    term: lifted,
                    cert: cert.clone(),
                });
            }
        }
    }

    /// Refines the graph until no state reachable in exactly `k` steps
    /// falsifies it.
    fn stabilize(&mut self, unit: &mut Unit<D>, k: usize) -> Result<bool, EngineError> {
        let start = Instant::now();
        unit.base.unroll_to(k)?;
        let mut refined = false;
        loop {
            let cands = unit.candidates(false);
            if cands.is_empty() {
                break;
            }
            let conj = Term::and(cands.iter().map(|c| c.term.bump(k as i32)));
            let act = unit.base.session.fresh_actlit()?;
            unit.base.session.assert_act(&act, &conj.not())?;
            let res = match unit.base.session.check_sat_assuming(&[act.term().clone()]) {
                Ok(SatResult::Sat) => {
                    let terms: Vec<Term> = unit.graph.terms().map(|t| t.bump(k as i32)).collect();
                    unit.base.model_for(&terms).map(Some)
                }
                Ok(SatResult::Unsat) => Ok(None),
                Err(e) => Err(e),
            };
            unit.base.session.deactivate(act)?;
            let Some(model) = res? else {
                break;
            };
            unit.graph.split(|t| model.eval_shifted(t, k as i32))?;
            if cfg!(debug_assertions) {
                unit.graph.check()?;
            }
            if unit
                .candidates(false)
                .iter()
                .any(|c| model.eval_bool(&c.term, k as i32) == Ok(false))
            {
                return Err(GraphError::Stuck.into());
            }
            refined = true;
            self.statistic.num_refine += 1;
        }
        self.statistic.avg_graph_size += unit.graph.len();
        self.statistic.stabilize_time += start.elapsed();
        Ok(refined)
    }

    /// Candidates that are `k+1`-inductive together.
    fn validate(
        &mut self,
        unit: &mut Unit<D>,
        cands: Vec<Cand>,
        k: usize,
    ) -> Result<Vec<Cand>, EngineError> {
        let start = Instant::now();
        unit.step.unroll_to(k + 1)?;
        let mut acts = Vec::with_capacity(cands.len());
        let mut checks = Vec::with_capacity(cands.len());
        for c in cands {
            let act = unit.step.session.fresh_actlit()?;
            let premises = Term::and((0..=k as i32).map(|i| c.term.bump(i)));
            unit.step.session.assert_act(&act, &premises)?;
            checks.push(Candidate {
                check: c.term.bump(k as i32 + 1),
                act: act.term().clone(),
                id: c,
            });
            acts.push(act);
        }
        let opts = SplitOpts {
            compress: false,
            lazy_invariants: false,
        };
        let res = split(&mut unit.step, checks, &[], opts, &mut self.statistic.split);
        for act in acts {
            unit.step.session.deactivate(act)?;
        }
        let (standing, _) = res?;
        self.statistic.validate_time += start.elapsed();
        Ok(standing.into_iter().map(|c| c.id).collect())
    }

    fn publish(&mut self, unit: &mut Unit<D>, t: &Term, k: usize) -> Result<(), SmtError> {
        unit.learn(t)?;
        let cert = Cert {
            engine: D::NAME,
            k: k + 1,
        };
        if self.store.add_invariant(unit.sys.scope(), t) {
            self.statistic.num_invariants += 1;
            self.mailbox.broadcast(Event::Invariant {
                kind: FactKind::of(t),
                scope: unit.sys.scope().to_string(),
                term: t.clone(),
                cert: Some(cert.clone()),
            });
        }
        self.lift(&unit.sys, t, Some(cert));
        Ok(())
    }

    fn round(&mut self, unit: &mut Unit<D>, k: usize) -> Result<Progress, EngineError> {
        self.fold(unit)?;
        let refined = self.stabilize(unit, k)?;
        let cands = unit.candidates(self.cfg.invgen.all_out);
        if cands.is_empty() {
            debug!("{}: graph of {} exhausted", D::NAME, unit.sys.name);
            unit.exhausted = true;
            return Ok(Progress {
                refined,
                found: 0,
            });
        }
        self.statistic.num_candidates += cands.len();
        let proved = self.validate(unit, cands, k)?;
        let terms: Vec<Term> = proved.iter().map(|c| c.term.clone()).collect();
        let (keep, trivial) = unit.pruner.partition(terms)?;
        self.statistic.num_trivial += trivial.len();
        for t in trivial {
            unit.done.insert(t);
        }
        for t in keep.iter() {
            self.publish(unit, t, k)?;
        }
        for c in proved {
            if let CandKind::Eq { node, member } = c.kind {
                unit.graph.drop_member(node, &member);
            }
        }
        if !keep.is_empty() {
            info!(
                "{} found {} invariant(s) for {} at depth {k}",
                D::NAME,
                keep.len(),
                unit.sys.name
            );
        }
        Ok(Progress {
            refined,
            found: keep.len(),
        })
    }

    fn run(&mut self) -> Result<(), EngineError> {
        let mut idle = 0;
        for k in 0..=self.cfg.end {
            if self.ctrl.is_terminated() {
                return Err(SmtError::Terminated.into());
            }
            // statuses and invariants are read from the store
            let _ = self.mailbox.recv_all();
            if self.store.all_resolved() {
                break;
            }
            let mut units = take(&mut self.units);
            let mut progress = Progress::default();
            let mut res = Ok(());
            for unit in units.iter_mut().filter(|u| !u.exhausted) {
                match self.round(unit, k) {
                    Ok(p) => {
                        progress.refined |= p.refined;
                        progress.found += p.found;
                    }
                    Err(e) => {
                        res = Err(e);
                        break;
                    }
                }
            }
            self.units = units;
            res?;
            self.statistic.depth = k;
            if self.units.iter().all(|u| u.exhausted) {
                info!("{}: every candidate graph is exhausted", D::NAME);
                break;
            }
            if progress.refined || progress.found > 0 {
                idle = 0;
            } else {
                idle += 1;
                if idle >= self.cfg.invgen.patience as usize {
                    debug!("{}: no progress for {idle} depth(s), stopping", D::NAME);
                    break;
                }
            }
        }
        Ok(())
    }
}

impl<D: Domain> Engine for InvGen<D> {
    fn name(&self) -> &'static str {
        D::NAME
    }

    fn check(&mut self) -> Result<(), EngineError> {
        let systems = if self.cfg.invgen.top_only {
            vec![self.top.clone()]
        } else {
            self.top.systems_bottom_up()
        };
        for sys in systems {
            if let Some(unit) = self.unit(sys)? {
                self.units.push(unit);
            }
        }
        if self.units.is_empty() {
            info!("{}: nothing to mine", D::NAME);
            return Ok(());
        }
        self.run()
    }

    fn on_exit(&mut self) {
        self.units.clear();
        self.statistic();
    }

    fn statistic(&mut self) {
        info!("{} statistic: {:#?}", D::NAME, self.statistic);
    }

    fn get_ctrl(&self) -> EngineCtrl {
        self.ctrl.clone()
    }
}
