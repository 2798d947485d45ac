use super::{Session, SmtError};
use crate::{
    term::{Model, Term},
    transys::TransSys,
};
use giputils::hash::GHashSet;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// Paths from the initial states.
    Base,
    /// Arbitrary paths.
    Step,
}

/// Unrolls a system's transition relation in a solver session.
pub struct Unroller {
    pub session: Session,
    sys: Arc<TransSys>,
    mode: Mode,
    depth: usize,
    simple_path: bool,
    lazy: bool,
    invariants: Vec<Term>,
    inv_set: GHashSet<Term>,
    asserted: GHashSet<Term>,
}

impl Unroller {
    pub fn new(mut session: Session, sys: Arc<TransSys>, mode: Mode) -> Result<Self, SmtError> {
        for s in sys.systems_bottom_up() {
            session.define(&s.init_def())?;
            session.define(&s.trans_def())?;
        }
        session.declare_svars(&sys.svars, 0)?;
        if mode == Mode::Base {
            session.assert(&sys.init_at(0))?;
        }
        Ok(Self {
            session,
            sys,
            mode,
            depth: 0,
            simple_path: false,
            lazy: false,
            invariants: Vec::new(),
            inv_set: GHashSet::new(),
            asserted: GHashSet::new(),
        })
    }

    /// All states of the unrolling are pairwise distinct.
    pub fn with_simple_path(mut self) -> Self {
        self.simple_path = true;
        self
    }

    /// Invariants are recorded but only asserted through [`Self::block_invariants`].
    pub fn with_lazy_invariants(mut self) -> Self {
        self.lazy = true;
        self
    }

    #[inline]
    pub fn sys(&self) -> &Arc<TransSys> {
        &self.sys
    }

    #[inline]
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Highest unrolled offset.
    #[inline]
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn invariants(&self) -> &[Term] {
        &self.invariants
    }

    /// `inv` moved so that it ends at offset `k`, if it fits.
    fn instance(inv: &Term, k: usize) -> Option<Term> {
        let hi = inv.offsets().map_or(0, |(_, hi)| hi);
        let lo = inv.offsets().map_or(0, |(lo, _)| lo);
        let shift = k as i32 - hi;
        (lo + shift >= 0).then(|| inv.bump(shift))
    }

    fn assert_instance(&mut self, t: Term) -> Result<bool, SmtError> {
        if !self.asserted.insert(t.clone()) {
            return Ok(false);
        }
        self.session.assert(&t)?;
        Ok(true)
    }

    pub fn unroll_to(&mut self, k: usize) -> Result<(), SmtError> {
        while self.depth < k {
            self.depth += 1;
            let d = self.depth;
            self.session.declare_svars(&self.sys.svars, d as i32)?;
            self.session.assert(&self.sys.trans_at(d as i32))?;
            if !self.lazy {
                for inv in self.invariants.clone() {
                    if let Some(i) = Self::instance(&inv, d) {
                        self.assert_instance(i)?;
                    }
                }
            }
            if self.simple_path {
                for i in 0..d {
                    self.assert_distinct(i, d)?;
                }
            }
        }
        Ok(())
    }

    /// Records an invariant over offsets 0 (one-state) or 0 and 1 (two-state)
    /// and, unless lazy, asserts it at every unrolled offset.
    pub fn add_invariant(&mut self, inv: &Term) -> Result<bool, SmtError> {
        if !self.inv_set.insert(inv.clone()) {
            return Ok(false);
        }
        self.invariants.push(inv.clone());
        if !self.lazy {
            for k in 0..=self.depth {
                if let Some(i) = Self::instance(inv, k) {
                    self.assert_instance(i)?;
                }
            }
        }
        Ok(true)
    }

    /// Asserts the instances of recorded invariants that `model` violates.
    /// Returns whether anything was asserted.
    pub fn block_invariants(&mut self, model: &Model) -> Result<bool, SmtError> {
        let mut blocked = false;
        for inv in self.invariants.clone() {
            for k in 0..=self.depth {
                let Some(i) = Self::instance(&inv, k) else {
                    continue;
                };
                if self.asserted.contains(&i) {
                    continue;
                }
                // instances the model cannot evaluate are asserted as well
                if model.eval_bool(&i, 0) != Ok(true) {
                    blocked |= self.assert_instance(i)?;
                }
            }
        }
        Ok(blocked)
    }

    /// States at offsets `i` and `j` differ in some state variable.
    pub fn assert_distinct(&mut self, i: usize, j: usize) -> Result<(), SmtError> {
        let diff = Term::or(
            self.sys
                .svars
                .iter()
                .map(|s| Term::eq(&s.at(i as i32), &s.at(j as i32)).not()),
        );
        self.session.assert(&diff)
    }

    /// Model of the state variables over every unrolled offset.
    pub fn model(&mut self) -> Result<Model, SmtError> {
        let svars = self.sys.svars.clone();
        self.session.model(&svars, 0..=self.depth as i32)
    }

    /// Model that can also evaluate `terms`, asking the solver for what the
    /// state variables alone do not determine.
    pub fn model_for(&mut self, terms: &[Term]) -> Result<Model, SmtError> {
        let mut model = self.model()?;
        self.session.complete(&mut model, terms)?;
        Ok(model)
    }
}
