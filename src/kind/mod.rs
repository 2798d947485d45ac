//! Step case of k-induction.
//!
//! Properties are assumed at offsets `0..k` through one activation literal
//! each and checked at `k`. Properties that resist falsification at `k`
//! form an unfalsifiable group; a group becomes invariant once the base
//! case confirms every member of it and of the groups it was assumed with.

mod split;

pub use split::{Candidate, Falsify, SplitOpts, SplitStatistic, falsify, split};

use crate::{
    Engine, EngineCtrl, EngineError,
    bus::{Cert, Event, FactKind, Mailbox},
    config::{self, ConfirmPolicy},
    smt::{
        Actlit, Session, SmtError,
        unroll::{Mode, Unroller},
    },
    store::Store,
    term::Term,
    transys::{
        TransSys,
        property::{PropStatus, StatusError},
    },
};
use config::Config;
use giputils::hash::GHashMap;
use log::{debug, info};
use std::{sync::Arc, thread, time::Duration};

#[derive(Debug, Default)]
pub struct Statistic {
    pub depth: usize,
    pub num_proved: usize,
    pub num_unfalsifiable: usize,
    pub num_invariants: usize,
    pub split: SplitStatistic,
}

/// Properties found unfalsifiable together at `depth`, assuming every
/// earlier group.
#[derive(Debug)]
struct Group {
    members: Vec<String>,
    depth: usize,
}

pub struct Kind {
    cfg: Config,
    sys: Arc<TransSys>,
    store: Store,
    mailbox: Mailbox,
    ctrl: EngineCtrl,
    uts: Option<Unroller>,
    unknown: Vec<String>,
    groups: Vec<Group>,
    acts: GHashMap<String, Actlit>,
    inv_seen: usize,
    statistic: Statistic,
}

impl Kind {
    pub fn new(cfg: Config, sys: Arc<TransSys>, store: Store, mailbox: Mailbox) -> Self {
        Self {
            cfg,
            sys,
            store,
            mailbox,
            ctrl: EngineCtrl::default(),
            uts: None,
            unknown: Vec::new(),
            groups: Vec::new(),
            acts: GHashMap::new(),
            inv_seen: 0,
            statistic: Statistic::default(),
        }
    }

    fn opts(&self) -> SplitOpts {
        SplitOpts {
            compress: !self.cfg.kind.no_compress,
            lazy_invariants: self.cfg.kind.lazy_invariants,
        }
    }

    fn act(&mut self, uts: &mut Unroller, prop: &str) -> Result<Term, SmtError> {
        if let Some(a) = self.acts.get(prop) {
            return Ok(a.term().clone());
        }
        let a = uts.session.fresh_actlit()?;
        let t = a.term().clone();
        self.acts.insert(prop.to_string(), a);
        Ok(t)
    }

    fn prop_term(&self, prop: &str) -> Result<Term, EngineError> {
        self.store
            .prop_term(prop)
            .ok_or_else(|| StatusError::UnknownProperty(prop.into()).into())
    }

    fn grouped(&self) -> impl Iterator<Item = &String> {
        self.groups.iter().flat_map(|g| g.members.iter())
    }

    /// Stops tracking `prop`. A falsified property breaks its group and every
    /// later one; their other members return to the unknown set.
    fn untrack(&mut self, prop: &str, status: &PropStatus) {
        self.unknown.retain(|p| p != prop);
        if !status.is_false() {
            return;
        }
        let Some(i) = self
            .groups
            .iter()
            .position(|g| g.members.iter().any(|m| m == prop))
        else {
            return;
        };
        for g in self.groups.drain(i..) {
            for m in g.members {
                if m != prop {
                    debug!("kind: {m} loses its induction group");
                    self.unknown.push(m);
                }
            }
        }
    }

    /// Handles a property another engine decided.
    fn resolved(&mut self, uts: &mut Unroller, prop: &str) -> Result<(), SmtError> {
        let Some(status) = self.store.status(prop) else {
            return Ok(());
        };
        self.untrack(prop, &status);
        match status {
            PropStatus::False(_) => {
                if let Some(a) = self.acts.remove(prop) {
                    uts.session.deactivate(a)?;
                }
            }
            PropStatus::Invariant => {
                if let Some(t) = self.store.prop_term(prop) {
                    uts.add_invariant(&t)?;
                }
            }
            _ => (),
        }
        Ok(())
    }

    /// Folds in status changes and invariants found elsewhere.
    fn fold(&mut self, uts: &mut Unroller) -> Result<(), SmtError> {
        let mut changed: Vec<String> = Vec::new();
        for event in self.mailbox.recv_all() {
            if let Event::Status { prop, status } = event
                && status.is_resolved()
            {
                changed.push(prop);
            }
        }
        for p in self.unknown.iter().chain(self.grouped()) {
            if self.store.status(p).is_some_and(|s| s.is_resolved()) {
                changed.push(p.clone());
            }
        }
        changed.sort();
        changed.dedup();
        for p in changed {
            if self.unknown.contains(&p) || self.grouped().any(|m| *m == p) {
                self.resolved(uts, &p)?;
            }
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

    fn required(&self, depth: usize) -> Option<usize> {
        match self.cfg.kind.confirm {
            ConfirmPolicy::Sound => depth.checked_sub(1),
            ConfirmPolicy::Strict => Some(depth),
        }
    }

    fn confirmed(&self, prop: &str, required: Option<usize>) -> bool {
        match self.store.status(prop) {
            Some(PropStatus::Invariant) => true,
            Some(PropStatus::False(_)) | None => false,
            Some(s) => match required {
                None => true,
                Some(r) => s.ktrue().is_some_and(|k| k >= r),
            },
        }
    }

    /// Promotes the longest prefix of groups the base case confirms.
    fn promote(&mut self, uts: &mut Unroller) -> Result<(), EngineError> {
        let mut upto = None;
        for (i, g) in self.groups.iter().enumerate() {
            let required = self.required(g.depth);
            if !self.groups[..=i]
                .iter()
                .flat_map(|g| g.members.iter())
                .all(|m| self.confirmed(m, required))
            {
                break;
            }
            upto = Some(i);
        }
        let Some(upto) = upto else {
            return Ok(());
        };
        let k = self.groups[upto].depth;
        let groups: Vec<Group> = self.groups.drain(..=upto).collect();
        for m in groups.into_iter().flat_map(|g| g.members) {
            let term = self.prop_term(&m)?;
            if self.store.set_status(&m, PropStatus::Invariant)? {
                info!("kind proved {m} by {k}-induction");
                self.statistic.num_proved += 1;
                self.mailbox.broadcast(Event::Status {
                    prop: m.clone(),
                    status: PropStatus::Invariant,
                });
            }
            if self.store.add_invariant(self.sys.scope(), &term) {
                self.mailbox.broadcast(Event::Invariant {
                    kind: FactKind::of(&term),
                    scope: self.sys.scope().to_string(),
                    term: term.clone(),
                    cert: Some(Cert {
                        engine: "kind",
                        k,
                    }),
                });
            }
            uts.add_invariant(&term)?;
        }
        Ok(())
    }

    fn step(&mut self, uts: &mut Unroller, k: usize) -> Result<(), EngineError> {
        uts.unroll_to(k)?;
        debug!("kind depth: {k}");
        let tracked: Vec<String> = self.unknown.iter().chain(self.grouped()).cloned().collect();
        let mut cands = Vec::new();
        let mut extra = Vec::new();
        for p in tracked {
            let term = self.prop_term(&p)?;
            let act = self.act(uts, &p)?;
            if k > 0 {
                uts.session
                    .assert(&Term::implies(&act, &term.bump(k as i32 - 1)))?;
            }
            if self.unknown.contains(&p) {
                cands.push(Candidate {
                    id: p,
                    check: term.bump(k as i32),
                    act,
                });
            } else {
                extra.push(act);
            }
        }
        let opts = self.opts();
        let (standing, falsified) = split(uts, cands, &extra, opts, &mut self.statistic.split)?;
        if !falsified.is_empty() {
            debug!("kind: {} property(ies) falsifiable at depth {k}", falsified.len());
        }
        if !standing.is_empty() {
            let members: Vec<String> = standing.into_iter().map(|c| c.id).collect();
            debug!("kind: {members:?} unfalsifiable at depth {k}");
            self.statistic.num_unfalsifiable += members.len();
            self.unknown.retain(|p| !members.contains(p));
            self.groups.push(Group { members, depth: k });
        }
        Ok(())
    }

    fn run(&mut self, uts: &mut Unroller) -> Result<(), EngineError> {
        for k in 0..=self.cfg.end {
            self.fold(uts)?;
            self.promote(uts)?;
            if self.unknown.is_empty() {
                break;
            }
            self.step(uts, k)?;
            self.statistic.depth = k;
            self.promote(uts)?;
        }
        let base = self.cfg.engines.contains(&config::Engine::Bmc);
        while let Some(g) = self.groups.first() {
            if !base || self.required(g.depth).is_some_and(|r| r > self.cfg.end) {
                info!("kind: base case cannot confirm {:?}", g.members);
                break;
            }
            if self.ctrl.is_terminated() {
                return Err(SmtError::Terminated.into());
            }
            thread::sleep(Duration::from_millis(10));
            self.fold(uts)?;
            self.promote(uts)?;
        }
        Ok(())
    }
}

impl Engine for Kind {
    fn name(&self) -> &'static str {
        "kind"
    }

    fn check(&mut self) -> Result<(), EngineError> {
        self.unknown = self
            .store
            .statuses()
            .into_iter()
            .filter(|(_, s)| !s.is_resolved())
            .map(|(p, _)| p)
            .collect();
        let session = Session::new(&self.cfg.smt, "kind", self.ctrl.clone())?;
        let mut uts = Unroller::new(session, self.sys.clone(), Mode::Step)?;
        if self.cfg.kind.simple_path {
            uts = uts.with_simple_path();
        }
        if self.cfg.kind.lazy_invariants {
            uts = uts.with_lazy_invariants();
        }
        let res = self.run(&mut uts);
        self.uts = Some(uts);
        res
    }

    fn on_exit(&mut self) {
        self.acts.clear();
        self.uts = None;
        self.statistic();
    }

    fn statistic(&mut self) {
        info!("kind statistic: {:#?}", self.statistic);
    }

    fn get_ctrl(&self) -> EngineCtrl {
        self.ctrl.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bus::Bus,
        transys::{
            property::{Cex, Property},
            tests::counter,
        },
    };

    fn kind(confirm: ConfirmPolicy) -> Kind {
        let mut ts = counter("kind_groups", 3);
        let bounded = ts.props[0].term.clone();
        for name in ["p", "q", "r"] {
            ts.props.push(Property::new(name, bounded.clone()));
        }
        let mut cfg = Config::default();
        cfg.kind.confirm = confirm;
        let store = Store::new(&ts.props);
        Kind::new(cfg, Arc::new(ts), store, Bus::new().mailbox("kind"))
    }

    fn group(members: &[&str], depth: usize) -> Group {
        Group {
            members: members.iter().map(|m| m.to_string()).collect(),
            depth,
        }
    }

    #[test]
    fn falsified_member_breaks_later_groups() {
        let mut kind = kind(ConfirmPolicy::Sound);
        kind.groups = vec![group(&["bounded"], 1), group(&["p", "q"], 2), group(&["r"], 3)];
        kind.untrack("bounded", &PropStatus::Invariant);
        assert_eq!(kind.groups.len(), 3);
        kind.untrack("q", &PropStatus::False(Cex::default()));
        assert_eq!(kind.groups.len(), 1);
        assert_eq!(kind.groups[0].members, ["bounded"]);
        kind.unknown.sort();
        assert_eq!(kind.unknown, ["p", "r"]);
    }

    #[test]
    fn strict_confirmation_needs_the_full_depth() {
        let sound = kind(ConfirmPolicy::Sound);
        let strict = kind(ConfirmPolicy::Strict);
        for k in [&sound, &strict] {
            k.store.set_status("p", PropStatus::KTrue(1)).unwrap();
        }
        assert_eq!(sound.required(2), Some(1));
        assert_eq!(strict.required(2), Some(2));
        assert!(sound.confirmed("p", sound.required(2)));
        assert!(!strict.confirmed("p", strict.required(2)));

        assert_eq!(sound.required(0), None);
        assert!(sound.confirmed("q", sound.required(0)));
        assert!(!strict.confirmed("q", strict.required(0)));
        let cex = Cex {
            states: vec![Default::default(); 2],
        };
        sound.store.set_status("r", PropStatus::False(cex)).unwrap();
        assert!(!sound.confirmed("r", None));
    }
}
