use crate::term::{Term, Value};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fmt::{self, Display},
};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct Property {
    pub name: String,
    /// One-state predicate over offset 0.
    pub term: Term,
}

impl Property {
    pub fn new(name: &str, term: Term) -> Self {
        Self {
            name: name.to_string(),
            term,
        }
    }
}

/// A finite trace from an initial state; the last state violates the property.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cex {
    pub states: Vec<BTreeMap<String, Value>>,
}

impl Cex {
    /// Number of transitions, i.e. the depth at which the violation occurs.
    pub fn len(&self) -> usize {
        self.states.len().saturating_sub(1)
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

impl Display for Cex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (k, s) in self.states.iter().enumerate() {
            write!(f, "  step {k}:")?;
            for (name, v) in s.iter() {
                write!(f, " {name}={v}")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum PropStatus {
    #[default]
    Unknown,
    /// No counterexample of length at most `k`.
    KTrue(usize),
    Invariant,
    False(Cex),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StatusError {
    #[error("property `{0}` is invariant but a counterexample was announced")]
    InvariantFalsified(String),
    #[error("property `{0}` has a counterexample but was announced invariant")]
    FalseProved(String),
    #[error("property `{prop}` holds up to depth {ktrue} but a counterexample of length {cex} was announced")]
    CexBelowBound {
        prop: String,
        ktrue: usize,
        cex: usize,
    },
    #[error("unknown property `{0}`")]
    UnknownProperty(String),
}

impl PropStatus {
    #[inline]
    pub fn is_resolved(&self) -> bool {
        matches!(self, PropStatus::Invariant | PropStatus::False(_))
    }

    #[inline]
    pub fn is_invariant(&self) -> bool {
        matches!(self, PropStatus::Invariant)
    }

    #[inline]
    pub fn is_false(&self) -> bool {
        matches!(self, PropStatus::False(_))
    }

    /// Largest `k` such that the property is known to hold up to depth `k`.
    pub fn ktrue(&self) -> Option<usize> {
        match self {
            PropStatus::KTrue(k) => Some(*k),
            PropStatus::Invariant => Some(usize::MAX),
            PropStatus::False(cex) => cex.len().checked_sub(1),
            PropStatus::Unknown => None,
        }
    }

    /// Merges `new` into `self` following the monotonicity rules. Returns
    /// whether the status changed; weaker information is a no-op.
    pub fn update(&mut self, prop: &str, new: PropStatus) -> Result<bool, StatusError> {
        use PropStatus::*;
        let take = match (&*self, &new) {
            (_, Unknown) => false,
            (Unknown, _) => true,
            (KTrue(k), KTrue(n)) => n > k,
            (KTrue(_), Invariant) => true,
            (KTrue(k), False(cex)) => {
                if cex.len() <= *k {
                    return Err(StatusError::CexBelowBound {
                        prop: prop.to_string(),
                        ktrue: *k,
                        cex: cex.len(),
                    });
                }
                true
            }
            (Invariant, False(_)) => return Err(StatusError::InvariantFalsified(prop.to_string())),
            (Invariant, _) => false,
            (False(_), Invariant) => return Err(StatusError::FalseProved(prop.to_string())),
            (False(cex), KTrue(k)) => {
                if *k >= cex.len() {
                    return Err(StatusError::CexBelowBound {
                        prop: prop.to_string(),
                        ktrue: *k,
                        cex: cex.len(),
                    });
                }
                false
            }
            (False(old), False(cex)) => cex.len() < old.len(),
        };
        if take {
            *self = new;
        }
        Ok(take)
    }
}

impl Display for PropStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropStatus::Unknown => write!(f, "unknown"),
            PropStatus::KTrue(k) => write!(f, "true up to {k}"),
            PropStatus::Invariant => write!(f, "invariant"),
            PropStatus::False(cex) => write!(f, "falsified at depth {}", cex.len()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cex(len: usize) -> Cex {
        Cex {
            states: vec![BTreeMap::new(); len + 1],
        }
    }

    #[test]
    fn ktrue_only_grows() {
        let mut s = PropStatus::Unknown;
        assert_eq!(s.update("p", PropStatus::KTrue(3)), Ok(true));
        assert_eq!(s.update("p", PropStatus::KTrue(2)), Ok(false));
        assert_eq!(s.update("p", PropStatus::KTrue(3)), Ok(false));
        assert_eq!(s, PropStatus::KTrue(3));
        assert_eq!(s.update("p", PropStatus::KTrue(4)), Ok(true));
        assert_eq!(s.update("p", PropStatus::Unknown), Ok(false));
        assert_eq!(s, PropStatus::KTrue(4));
    }

    #[test]
    fn invariant_is_terminal() {
        let mut s = PropStatus::KTrue(1);
        assert_eq!(s.update("p", PropStatus::Invariant), Ok(true));
        assert_eq!(s.update("p", PropStatus::KTrue(10)), Ok(false));
        assert_eq!(s.update("p", PropStatus::Invariant), Ok(false));
        assert!(matches!(
            s.update("p", PropStatus::False(cex(5))),
            Err(StatusError::InvariantFalsified(_))
        ));
        assert_eq!(s, PropStatus::Invariant);
    }

    #[test]
    fn false_tightens_only() {
        let mut s = PropStatus::KTrue(2);
        assert!(s.update("p", PropStatus::False(cex(2))).is_err());
        assert_eq!(s.update("p", PropStatus::False(cex(5))), Ok(true));
        assert_eq!(s.update("p", PropStatus::False(cex(6))), Ok(false));
        assert_eq!(s.update("p", PropStatus::False(cex(4))), Ok(true));
        assert_eq!(s.update("p", PropStatus::KTrue(3)), Ok(false));
        assert!(s.update("p", PropStatus::KTrue(4)).is_err());
        assert!(matches!(
            s.update("p", PropStatus::Invariant),
            Err(StatusError::FalseProved(_))
        ));
        assert_eq!(s.ktrue(), Some(3));
    }
}
