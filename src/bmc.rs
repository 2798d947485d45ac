use crate::{
    Engine, EngineCtrl, EngineError,
    bus::{Event, Mailbox},
    config::Config,
    smt::{
        SatResult, Session, SmtError,
        unroll::{Mode, Unroller},
    },
    store::Store,
    term::Term,
    transys::{TransSys, property::PropStatus},
};
use giputils::statistic::Average;
use log::{debug, info};
use std::{sync::Arc, time::Instant};

#[derive(Debug, Default)]
pub struct Statistic {
    pub depth: usize,
    pub num_falsified: usize,
    pub num_invariants: usize,
    pub avg_split_rounds: Average,
}

/// Base case: searches counterexamples of increasing length from the
/// initial states and publishes the depth up to which properties hold.
pub struct Bmc {
    cfg: Config,
    sys: Arc<TransSys>,
    store: Store,
    mailbox: Mailbox,
    ctrl: EngineCtrl,
    uts: Option<Unroller>,
    unknown: Vec<String>,
    inv_seen: usize,
    statistic: Statistic,
}

impl Bmc {
    pub fn new(cfg: Config, sys: Arc<TransSys>, store: Store, mailbox: Mailbox) -> Self {
        Self {
            cfg,
            sys,
            store,
            mailbox,
            ctrl: EngineCtrl::default(),
            uts: None,
            unknown: Vec::new(),
            inv_seen: 0,
            statistic: Statistic::default(),
        }
    }

    fn fold(&mut self, uts: &mut Unroller) -> Result<(), SmtError> {
        for event in self.mailbox.recv_all() {
            if let Event::Status { prop, status } = event
                && status.is_resolved()
            {
                self.unknown.retain(|p| *p != prop);
            }
        }
        // statuses written before our subscription are in the store
        let store = &self.store;
        self.unknown
            .retain(|p| store.status(p).is_some_and(|s| !s.is_resolved()));
        if self.cfg.bmc.no_invariants {
            return Ok(());
        }
        let invs = self.store.invariants_since(self.sys.scope(), self.inv_seen);
        self.inv_seen += invs.len();
        for inv in invs {
            if uts.add_invariant(&inv)? {
                self.statistic.num_invariants += 1;
            }
        }
        Ok(())
    }

    fn publish(&mut self, prop: &str, status: PropStatus) -> Result<(), EngineError> {
        if self.store.set_status(prop, status.clone())? {
            self.mailbox.broadcast(Event::Status {
                prop: prop.to_string(),
                status,
            });
        }
        Ok(())
    }

    /// Finds every property that some path of length `k` falsifies.
    fn check_depth(&mut self, uts: &mut Unroller, k: usize) -> Result<(), EngineError> {
        let mut rounds = 0;
        while !self.unknown.is_empty() {
            rounds += 1;
            let props: Vec<(String, Term)> = self
                .unknown
                .iter()
                .filter_map(|p| self.store.prop_term(p).map(|t| (p.clone(), t.bump(k as i32))))
                .collect();
            let act = uts.session.fresh_actlit()?;
            uts.session
                .assert_act(&act, &Term::or(props.iter().map(|(_, t)| t.not())))?;
            let res = uts.session.check_sat_assuming(&[act.term().clone()]);
            let res = match res {
                Ok(SatResult::Sat) => {
                    let terms: Vec<Term> = props.iter().map(|(_, t)| t.clone()).collect();
                    let model = uts.model_for(&terms)?;
                    let mut falsified = Vec::new();
                    for (p, t) in props.iter() {
                        if !model.eval_bool(t, 0)? {
                            falsified.push(p.clone());
                        }
                    }
                    Ok(Some((model, falsified)))
                }
                Ok(SatResult::Unsat) => Ok(None),
                Err(e) => Err(e),
            };
            uts.session.deactivate(act)?;
            let Some((model, falsified)) = res? else {
                break;
            };
            if falsified.is_empty() {
                return Err(SmtError::Unexpected("model falsifies no property".into()).into());
            }
            let cex = self.sys.cex(&model, k);
            for p in falsified {
                info!("bmc found a counterexample for {p} at depth {k}");
                self.statistic.num_falsified += 1;
                self.unknown.retain(|u| *u != p);
                self.publish(&p, PropStatus::False(cex.clone()))?;
            }
        }
        self.statistic.avg_split_rounds += rounds;
        for p in self.unknown.clone() {
            self.publish(&p, PropStatus::KTrue(k))?;
            if let Some(t) = self.store.prop_term(&p) {
                uts.session.assert(&t.bump(k as i32))?;
            }
        }
        Ok(())
    }

    fn run(&mut self, uts: &mut Unroller) -> Result<(), EngineError> {
        for k in 0..=self.cfg.end {
            self.fold(uts)?;
            if self.unknown.is_empty() {
                break;
            }
            uts.unroll_to(k)?;
            debug!("bmc depth: {k}");
            let start = Instant::now();
            self.check_depth(uts, k)?;
            self.statistic.depth = k;
            debug!("bmc depth {k} done in {:?}", start.elapsed());
        }
        if !self.unknown.is_empty() {
            info!("bmc reached bound {}, stopping search", self.cfg.end);
        }
        Ok(())
    }
}

impl Engine for Bmc {
    fn name(&self) -> &'static str {
        "bmc"
    }

    fn check(&mut self) -> Result<(), EngineError> {
        self.unknown = self
            .store
            .statuses()
            .into_iter()
            .filter(|(_, s)| !s.is_resolved())
            .map(|(p, _)| p)
            .collect();
        let session = Session::new(&self.cfg.smt, "bmc", self.ctrl.clone())?;
        let mut uts = Unroller::new(session, self.sys.clone(), Mode::Base)?;
        let res = self.run(&mut uts);
        self.uts = Some(uts);
        res
    }

    fn on_exit(&mut self) {
        self.uts = None;
        self.statistic();
    }

    fn statistic(&mut self) {
        info!("bmc statistic: {:#?}", self.statistic);
    }

    fn get_ctrl(&self) -> EngineCtrl {
        self.ctrl.clone()
    }
}
