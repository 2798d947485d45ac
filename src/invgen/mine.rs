use super::domain::Domain;
use crate::{
    term::{Term, Type},
    transys::TransSys,
};
use std::collections::BTreeSet;

/// `t` over offset 0, if it mentions a single offset (or none).
fn normalize(t: &Term) -> Option<Term> {
    match t.offsets() {
        None => Some(t.clone()),
        Some((lo, hi)) if lo == hi => Some(t.bump(-lo)),
        Some(_) => None,
    }
}

/// Candidate terms of domain `D` for `sys`: the state variables and the
/// sub-terms of its initial predicate, transition relation and properties
/// that live in a single state. Sub-terms calling a subsystem are skipped.
pub fn mine<D: Domain>(sys: &TransSys) -> BTreeSet<Term> {
    let mut res = BTreeSet::new();
    if D::TYPE == Type::Bool {
        res.insert(Term::bool(true));
        res.insert(Term::bool(false));
    }
    for sv in sys.svars.iter().filter(|sv| sv.ty() == D::TYPE) {
        res.insert(sv.at(0));
    }
    let sources = [&sys.init, &sys.trans]
        .into_iter()
        .chain(sys.props.iter().map(|p| &p.term));
    for src in sources {
        for t in src.subterms() {
            if t.ty() != D::TYPE || t.is_opaque() {
                continue;
            }
            if D::TYPE == Type::Bool && t.is_const() {
                continue;
            }
            if let Some(t) = normalize(&t) {
                res.insert(t);
            }
        }
    }
    res
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        invgen::domain::{BoolDom, IntDom},
        transys::tests::counter,
    };

    #[test]
    fn counter_candidates() {
        let ts = counter("mine", 3);
        let x = &ts.svars[0];
        let ints = mine::<IntDom>(&ts);
        assert!(ints.contains(&x.at(0)));
        assert!(ints.contains(&Term::int(0)));
        assert!(ints.contains(&Term::int(3)));
        assert!(ints.contains(&Term::add([x.at(0), Term::int(1)])));
        assert!(ints.iter().all(|t| t.offsets().is_none_or(|o| o == (0, 0))));

        let bools = mine::<BoolDom>(&ts);
        assert!(bools.contains(&Term::bool(true)));
        assert!(bools.contains(&Term::ge(&x.at(0), &Term::int(3))));
        assert!(bools.contains(&Term::le(&x.at(0), &Term::int(3))));
        // relates two states
        assert!(!bools.contains(&ts.trans));
    }
}
