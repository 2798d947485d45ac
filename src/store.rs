//! Shared property status table and invariant lists.

use crate::{
    term::Term,
    transys::property::{PropStatus, Property, StatusError},
};
use giputils::hash::{GHashMap, GHashSet};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

struct PropCell {
    name: String,
    term: Term,
    status: Mutex<PropStatus>,
}

#[derive(Default)]
struct Invariants {
    list: Vec<Term>,
    set: GHashSet<Term>,
}

struct StoreInner {
    props: Vec<PropCell>,
    index: GHashMap<String, usize>,
    invariants: RwLock<GHashMap<String, Invariants>>,
}

/// Handle to the store shared by all engines of a run. Status writes are
/// linearized per property, invariant lists only grow.
#[derive(Clone)]
pub struct Store(Arc<StoreInner>);

impl Store {
    pub fn new(props: &[Property]) -> Self {
        let props: Vec<PropCell> = props
            .iter()
            .map(|p| PropCell {
                name: p.name.clone(),
                term: p.term.clone(),
                status: Mutex::new(PropStatus::Unknown),
            })
            .collect();
        let index = props
            .iter()
            .enumerate()
            .map(|(i, p)| (p.name.clone(), i))
            .collect();
        Self(Arc::new(StoreInner {
            props,
            index,
            invariants: RwLock::new(GHashMap::new()),
        }))
    }

    fn cell(&self, prop: &str) -> Result<&PropCell, StatusError> {
        self.0
            .index
            .get(prop)
            .map(|i| &self.0.props[*i])
            .ok_or_else(|| StatusError::UnknownProperty(prop.to_string()))
    }

    pub fn prop_term(&self, prop: &str) -> Option<Term> {
        self.cell(prop).ok().map(|c| c.term.clone())
    }

    pub fn status(&self, prop: &str) -> Option<PropStatus> {
        let cell = self.cell(prop).ok()?;
        Some(cell.status.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }

    /// Applies a status update; `Ok(false)` when it carried no new information.
    pub fn set_status(&self, prop: &str, status: PropStatus) -> Result<bool, StatusError> {
        let cell = self.cell(prop)?;
        let mut cur = cell.status.lock().unwrap_or_else(PoisonError::into_inner);
        cur.update(prop, status)
    }

    pub fn statuses(&self) -> Vec<(String, PropStatus)> {
        self.0
            .props
            .iter()
            .map(|p| {
                let s = p.status.lock().unwrap_or_else(PoisonError::into_inner);
                (p.name.clone(), s.clone())
            })
            .collect()
    }

    pub fn all_resolved(&self) -> bool {
        self.statuses().iter().all(|(_, s)| s.is_resolved())
    }

    /// Appends an invariant for `scope`. Returns false if it was already known.
    pub fn add_invariant(&self, scope: &str, term: &Term) -> bool {
        let mut invs = self
            .0
            .invariants
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let invs = invs.entry(scope.to_string()).or_default();
        if !invs.set.insert(term.clone()) {
            return false;
        }
        invs.list.push(term.clone());
        true
    }

    pub fn is_invariant(&self, scope: &str, term: &Term) -> bool {
        let invs = self.0.invariants.read().unwrap_or_else(PoisonError::into_inner);
        invs.get(scope).is_some_and(|i| i.set.contains(term))
    }

    /// Snapshot of the invariants of `scope`.
    pub fn invariants(&self, scope: &str) -> Vec<Term> {
        self.invariants_since(scope, 0)
    }

    /// Invariants of `scope` appended at or after position `from`.
    pub fn invariants_since(&self, scope: &str, from: usize) -> Vec<Term> {
        let invs = self.0.invariants.read().unwrap_or_else(PoisonError::into_inner);
        invs.get(scope)
            .map(|i| i.list.get(from..).map(<[Term]>::to_vec).unwrap_or_default())
            .unwrap_or_default()
    }

    pub fn num_invariants(&self, scope: &str) -> usize {
        let invs = self.0.invariants.read().unwrap_or_else(PoisonError::into_inner);
        invs.get(scope).map_or(0, |i| i.list.len())
    }
}
