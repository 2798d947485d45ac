use crate::term::{Term, Type, Value};
use std::collections::BTreeSet;

/// A totally ordered value domain candidate terms are compared in.
///
/// Values of a domain are compared with the derived order on [`Value`]:
/// `false < true` for booleans, which makes `a <= b` coincide with `a => b`.
pub trait Domain: Send + 'static {
    const NAME: &'static str;
    const TYPE: Type;

    /// `lo <= hi` as a candidate invariant.
    fn mk_le(lo: &Term, hi: &Term) -> Term;

    /// Representative of the initial, single class.
    fn bottom(cands: &BTreeSet<Term>) -> Option<Term>;

    #[inline]
    fn accepts(v: &Value) -> bool {
        match Self::TYPE {
            Type::Bool => v.as_bool().is_some(),
            Type::Int => v.as_int().is_some(),
        }
    }
}

pub struct BoolDom;

impl Domain for BoolDom {
    const NAME: &'static str = "invgen-bool";
    const TYPE: Type = Type::Bool;

    fn mk_le(lo: &Term, hi: &Term) -> Term {
        Term::implies(lo, hi)
    }

    fn bottom(_cands: &BTreeSet<Term>) -> Option<Term> {
        Some(Term::bool(false))
    }
}

pub struct IntDom;

impl Domain for IntDom {
    const NAME: &'static str = "invgen-int";
    const TYPE: Type = Type::Int;

    fn mk_le(lo: &Term, hi: &Term) -> Term {
        Term::le(lo, hi)
    }

    fn bottom(cands: &BTreeSet<Term>) -> Option<Term> {
        cands.first().cloned()
    }
}
