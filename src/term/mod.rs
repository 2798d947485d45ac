//! Hash-consed terms over state variable instances.
//!
//! Every structurally distinct term is created exactly once, so term equality
//! is an id comparison and terms can be used freely as map keys. Builders
//! apply light simplification (constant folding, double negation, `t = t`).

mod eval;
mod print;

pub use eval::{EvalError, Model, Value};
pub use print::{quote, svar_symbol};

use giputils::hash::{GHashMap, GHashSet};
use serde::{Deserialize, Serialize};
use std::{
    cmp::Ordering,
    fmt::{self, Debug, Display},
    hash::{Hash, Hasher},
    sync::{
        Arc, LazyLock, Mutex, PoisonError,
        atomic::{AtomicUsize, Ordering as AtomicOrdering},
    },
};
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Type {
    Bool,
    Int,
}

impl Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Bool => write!(f, "Bool"),
            Type::Int => write!(f, "Int"),
        }
    }
}

pub struct SVarInfo {
    id: usize,
    scope: String,
    name: String,
    ty: Type,
}

/// A state variable of some system. Instances at time offsets are terms.
#[derive(Clone)]
pub struct SVar(Arc<SVarInfo>);

static SVAR_ID: AtomicUsize = AtomicUsize::new(0);

impl SVar {
    pub fn new(scope: &str, name: &str, ty: Type) -> Self {
        Self(Arc::new(SVarInfo {
            id: SVAR_ID.fetch_add(1, AtomicOrdering::Relaxed),
            scope: scope.to_string(),
            name: name.to_string(),
            ty,
        }))
    }

    #[inline]
    pub fn id(&self) -> usize {
        self.0.id
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.0.name
    }

    #[inline]
    pub fn scope(&self) -> &str {
        &self.0.scope
    }

    #[inline]
    pub fn ty(&self) -> Type {
        self.0.ty
    }

    /// The instance of this variable at time offset `offset`.
    #[inline]
    pub fn at(&self, offset: i32) -> Term {
        Term::var(self, offset)
    }
}

impl PartialEq for SVar {
    fn eq(&self, other: &Self) -> bool {
        self.0.id == other.0.id
    }
}

impl Eq for SVar {}

impl Hash for SVar {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.id.hash(state)
    }
}

impl PartialOrd for SVar {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SVar {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.id.cmp(&other.0.id)
    }
}

impl Debug for SVar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.0.scope, self.0.name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Op {
    Not,
    And,
    Or,
    Implies,
    Ite,
    Eq,
    Distinct,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Neg,
    Mul,
    Div,
    Mod,
}

impl Op {
    pub fn symbol(&self) -> &'static str {
        match self {
            Op::Not => "not",
            Op::And => "and",
            Op::Or => "or",
            Op::Implies => "=>",
            Op::Ite => "ite",
            Op::Eq => "=",
            Op::Distinct => "distinct",
            Op::Lt => "<",
            Op::Le => "<=",
            Op::Gt => ">",
            Op::Ge => ">=",
            Op::Add => "+",
            Op::Sub | Op::Neg => "-",
            Op::Mul => "*",
            Op::Div => "div",
            Op::Mod => "mod",
        }
    }

    /// Unary minus shares its symbol with subtraction, see [`Term::try_app`].
    pub fn from_symbol(s: &str) -> Option<Op> {
        Some(match s {
            "not" => Op::Not,
            "and" => Op::And,
            "or" => Op::Or,
            "=>" => Op::Implies,
            "ite" => Op::Ite,
            "=" => Op::Eq,
            "distinct" => Op::Distinct,
            "<" => Op::Lt,
            "<=" => Op::Le,
            ">" => Op::Gt,
            ">=" => Op::Ge,
            "+" => Op::Add,
            "-" => Op::Sub,
            "*" => Op::Mul,
            "div" => Op::Div,
            "mod" => Op::Mod,
            _ => return None,
        })
    }
}

#[derive(Clone, PartialEq, Eq, Hash)]
pub enum TermNode {
    Bool(bool),
    Int(i64),
    /// State variable instance at a time offset.
    Var(SVar, i32),
    /// Nullary uninterpreted symbol (activation literals, function parameters).
    Free(String, Type),
    App(Op, Vec<Term>),
    /// Application of a defined boolean function (system `init`/`trans`).
    Call(String, Vec<Term>),
}

struct TermInner {
    id: usize,
    ty: Type,
    node: TermNode,
}

#[derive(Clone)]
pub struct Term(Arc<TermInner>);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TermError {
    #[error("`{op}` expects {expected} argument(s), got {got}")]
    Arity {
        op: &'static str,
        expected: &'static str,
        got: usize,
    },
    #[error("`{op}` applied to ill-sorted argument `{arg}`")]
    Sort { op: &'static str, arg: String },
}

#[derive(Default)]
struct Consign {
    table: GHashMap<TermNode, Term>,
}

static CONSIGN: LazyLock<Mutex<Consign>> = LazyLock::new(|| Mutex::new(Consign::default()));

fn mk(node: TermNode, ty: Type) -> Term {
    let mut consign = CONSIGN.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(t) = consign.table.get(&node) {
        return t.clone();
    }
    let term = Term(Arc::new(TermInner {
        id: consign.table.len(),
        ty,
        node: node.clone(),
    }));
    consign.table.insert(node, term.clone());
    term
}

impl PartialEq for Term {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.0.id == other.0.id
    }
}

impl Eq for Term {}

impl Hash for Term {
    #[inline]
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.id.hash(state)
    }
}

impl PartialOrd for Term {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Term {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.id.cmp(&other.0.id)
    }
}

impl Term {
    #[inline]
    pub fn id(&self) -> usize {
        self.0.id
    }

    #[inline]
    pub fn ty(&self) -> Type {
        self.0.ty
    }

    #[inline]
    pub fn node(&self) -> &TermNode {
        &self.0.node
    }

    pub fn args(&self) -> &[Term] {
        match self.node() {
            TermNode::App(_, args) | TermNode::Call(_, args) => args,
            _ => &[],
        }
    }

    pub fn bool(b: bool) -> Term {
        mk(TermNode::Bool(b), Type::Bool)
    }

    pub fn int(i: i64) -> Term {
        mk(TermNode::Int(i), Type::Int)
    }

    pub fn var(sv: &SVar, offset: i32) -> Term {
        mk(TermNode::Var(sv.clone(), offset), sv.ty())
    }

    pub fn free(name: &str, ty: Type) -> Term {
        mk(TermNode::Free(name.to_string(), ty), ty)
    }

    pub fn call(name: &str, args: Vec<Term>) -> Term {
        mk(TermNode::Call(name.to_string(), args), Type::Bool)
    }

    #[inline]
    pub fn as_bool(&self) -> Option<bool> {
        match self.node() {
            TermNode::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[inline]
    pub fn as_int(&self) -> Option<i64> {
        match self.node() {
            TermNode::Int(i) => Some(*i),
            _ => None,
        }
    }

    #[inline]
    pub fn is_true(&self) -> bool {
        self.as_bool() == Some(true)
    }

    #[inline]
    pub fn is_false(&self) -> bool {
        self.as_bool() == Some(false)
    }

    #[inline]
    pub fn is_const(&self) -> bool {
        matches!(self.node(), TermNode::Bool(_) | TermNode::Int(_))
    }

    pub fn not(&self) -> Term {
        match self.node() {
            TermNode::Bool(b) => Term::bool(!b),
            TermNode::App(Op::Not, args) => args[0].clone(),
            _ => mk(TermNode::App(Op::Not, vec![self.clone()]), Type::Bool),
        }
    }

    fn junction(op: Op, terms: impl IntoIterator<Item = Term>) -> Term {
        let absorbing = op == Op::Or;
        let mut seen = GHashSet::new();
        let mut args = Vec::new();
        let mut push = |t: Term, args: &mut Vec<Term>| -> bool {
            match t.as_bool() {
                Some(b) if b == absorbing => return true,
                Some(_) => return false,
                None => (),
            }
            if seen.contains(&t.not()) {
                return true;
            }
            if seen.insert(t.clone()) {
                args.push(t);
            }
            false
        };
        for t in terms {
            let absorbed = match t.node() {
                TermNode::App(o, inner) if *o == op => {
                    inner.iter().any(|i| push(i.clone(), &mut args))
                }
                _ => push(t, &mut args),
            };
            if absorbed {
                return Term::bool(absorbing);
            }
        }
        match args.len() {
            0 => Term::bool(!absorbing),
            1 => args.pop().unwrap_or_else(|| Term::bool(!absorbing)),
            _ => mk(TermNode::App(op, args), Type::Bool),
        }
    }

    pub fn and(terms: impl IntoIterator<Item = Term>) -> Term {
        Self::junction(Op::And, terms)
    }

    pub fn or(terms: impl IntoIterator<Item = Term>) -> Term {
        Self::junction(Op::Or, terms)
    }

    pub fn implies(a: &Term, b: &Term) -> Term {
        if a.is_false() || b.is_true() || a == b {
            return Term::bool(true);
        }
        if a.is_true() {
            return b.clone();
        }
        if b.is_false() {
            return a.not();
        }
        mk(TermNode::App(Op::Implies, vec![a.clone(), b.clone()]), Type::Bool)
    }

    pub fn ite(c: &Term, t: &Term, e: &Term) -> Term {
        match c.as_bool() {
            Some(true) => return t.clone(),
            Some(false) => return e.clone(),
            None => (),
        }
        if t == e {
            return t.clone();
        }
        mk(
            TermNode::App(Op::Ite, vec![c.clone(), t.clone(), e.clone()]),
            t.ty(),
        )
    }

    pub fn eq(a: &Term, b: &Term) -> Term {
        if a == b {
            return Term::bool(true);
        }
        if a.is_const() && b.is_const() {
            return Term::bool(false);
        }
        mk(TermNode::App(Op::Eq, vec![a.clone(), b.clone()]), Type::Bool)
    }

    pub fn distinct(terms: Vec<Term>) -> Term {
        match terms.len() {
            0 | 1 => Term::bool(true),
            2 => Term::eq(&terms[0], &terms[1]).not(),
            _ => mk(TermNode::App(Op::Distinct, terms), Type::Bool),
        }
    }

    fn cmp_op(op: Op, a: &Term, b: &Term) -> Term {
        if let (Some(x), Some(y)) = (a.as_int(), b.as_int()) {
            return Term::bool(match op {
                Op::Lt => x < y,
                Op::Le => x <= y,
                Op::Gt => x > y,
                _ => x >= y,
            });
        }
        if a == b {
            return Term::bool(matches!(op, Op::Le | Op::Ge));
        }
        mk(TermNode::App(op, vec![a.clone(), b.clone()]), Type::Bool)
    }

    pub fn lt(a: &Term, b: &Term) -> Term {
        Self::cmp_op(Op::Lt, a, b)
    }

    pub fn le(a: &Term, b: &Term) -> Term {
        Self::cmp_op(Op::Le, a, b)
    }

    pub fn gt(a: &Term, b: &Term) -> Term {
        Self::cmp_op(Op::Gt, a, b)
    }

    pub fn ge(a: &Term, b: &Term) -> Term {
        Self::cmp_op(Op::Ge, a, b)
    }

    fn arith(op: Op, args: Vec<Term>) -> Term {
        let consts: Option<Vec<i64>> = args.iter().map(|a| a.as_int()).collect();
        if let Some(consts) = consts {
            let folded = match op {
                Op::Add => consts.iter().try_fold(0i64, |acc, x| acc.checked_add(*x)),
                Op::Mul => consts.iter().try_fold(1i64, |acc, x| acc.checked_mul(*x)),
                Op::Neg => consts[0].checked_neg(),
                Op::Sub => consts[1..]
                    .iter()
                    .try_fold(consts[0], |acc, x| acc.checked_sub(*x)),
                Op::Div => consts[0].checked_div_euclid(consts[1]),
                Op::Mod => consts[0].checked_rem_euclid(consts[1]),
                _ => None,
            };
            if let Some(v) = folded {
                return Term::int(v);
            }
        }
        if matches!(op, Op::Add | Op::Mul) && args.len() == 1 {
            return args[0].clone();
        }
        mk(TermNode::App(op, args), Type::Int)
    }

    pub fn add(terms: impl IntoIterator<Item = Term>) -> Term {
        Self::arith(Op::Add, terms.into_iter().collect())
    }

    pub fn sub(a: &Term, b: &Term) -> Term {
        Self::arith(Op::Sub, vec![a.clone(), b.clone()])
    }

    pub fn neg(a: &Term) -> Term {
        Self::arith(Op::Neg, vec![a.clone()])
    }

    pub fn div(a: &Term, b: &Term) -> Term {
        Self::arith(Op::Div, vec![a.clone(), b.clone()])
    }

    pub fn modulo(a: &Term, b: &Term) -> Term {
        Self::arith(Op::Mod, vec![a.clone(), b.clone()])
    }

    /// Rebuilds an application from already well-sorted arguments.
    fn rebuild_app(op: Op, args: Vec<Term>) -> Term {
        match op {
            Op::Not => args[0].not(),
            Op::And => Term::and(args),
            Op::Or => Term::or(args),
            Op::Implies => Term::implies(&args[0], &args[1]),
            Op::Ite => Term::ite(&args[0], &args[1], &args[2]),
            Op::Eq => Term::eq(&args[0], &args[1]),
            Op::Distinct => Term::distinct(args),
            Op::Lt | Op::Le | Op::Gt | Op::Ge => Term::cmp_op(op, &args[0], &args[1]),
            _ => Term::arith(op, args),
        }
    }

    /// Sort-checked application, used when building terms from input text.
    pub fn try_app(op: Op, mut args: Vec<Term>) -> Result<Term, TermError> {
        let arity = |expected: &'static str, ok: bool, got: usize| {
            if ok {
                Ok(())
            } else {
                Err(TermError::Arity {
                    op: op.symbol(),
                    expected,
                    got,
                })
            }
        };
        let sort = |ty: Type, args: &[Term]| {
            for a in args {
                if a.ty() != ty {
                    return Err(TermError::Sort {
                        op: op.symbol(),
                        arg: a.to_string(),
                    });
                }
            }
            Ok(())
        };
        let n = args.len();
        match op {
            Op::Not => {
                arity("1", n == 1, n)?;
                sort(Type::Bool, &args)?;
            }
            Op::And | Op::Or => sort(Type::Bool, &args)?,
            Op::Implies => {
                arity("at least 2", n >= 2, n)?;
                sort(Type::Bool, &args)?;
                let mut res = args.pop().unwrap_or_else(|| Term::bool(true));
                while let Some(a) = args.pop() {
                    res = Term::implies(&a, &res);
                }
                return Ok(res);
            }
            Op::Ite => {
                arity("3", n == 3, n)?;
                sort(Type::Bool, &args[..1])?;
                sort(args[1].ty(), &args[2..])?;
            }
            Op::Eq | Op::Distinct => {
                arity("at least 2", n >= 2, n)?;
                sort(args[0].ty(), &args)?;
                if op == Op::Eq && n > 2 {
                    let eqs: Vec<Term> = args.windows(2).map(|w| Term::eq(&w[0], &w[1])).collect();
                    return Ok(Term::and(eqs));
                }
            }
            Op::Lt | Op::Le | Op::Gt | Op::Ge | Op::Div | Op::Mod => {
                arity("2", n == 2, n)?;
                sort(Type::Int, &args)?;
            }
            Op::Add | Op::Mul => {
                arity("at least 1", n >= 1, n)?;
                sort(Type::Int, &args)?;
            }
            Op::Sub => {
                arity("at least 1", n >= 1, n)?;
                sort(Type::Int, &args)?;
                if n == 1 {
                    return Ok(Term::neg(&args[0]));
                }
            }
            Op::Neg => {
                arity("1", n == 1, n)?;
                sort(Type::Int, &args)?;
            }
        }
        Ok(Term::rebuild_app(op, args))
    }

    /// Rebuilds the term bottom-up, replacing every leaf `l` for which
    /// `f(l)` returns a replacement. Shared subterms are rebuilt once.
    pub fn map_leaves(&self, f: &mut impl FnMut(&Term) -> Option<Term>) -> Term {
        let mut cache: GHashMap<Term, Term> = GHashMap::new();
        self.map_leaves_rec(f, &mut cache)
    }

    fn map_leaves_rec(
        &self,
        f: &mut impl FnMut(&Term) -> Option<Term>,
        cache: &mut GHashMap<Term, Term>,
    ) -> Term {
        if let Some(t) = cache.get(self) {
            return t.clone();
        }
        let res = match self.node() {
            TermNode::App(op, args) => {
                let args: Vec<Term> = args.iter().map(|a| a.map_leaves_rec(f, cache)).collect();
                if args.as_slice() == self.args() {
                    self.clone()
                } else {
                    Term::rebuild_app(*op, args)
                }
            }
            TermNode::Call(name, args) => {
                let args: Vec<Term> = args.iter().map(|a| a.map_leaves_rec(f, cache)).collect();
                Term::call(name, args)
            }
            _ => f(self).unwrap_or_else(|| self.clone()),
        };
        cache.insert(self.clone(), res.clone());
        res
    }

    /// Shifts every state variable instance by `delta` time steps.
    pub fn bump(&self, delta: i32) -> Term {
        if delta == 0 {
            return self.clone();
        }
        self.map_leaves(&mut |t| match t.node() {
            TermNode::Var(sv, o) => Some(Term::var(sv, o + delta)),
            _ => None,
        })
    }

    /// Renames state variables, keeping offsets.
    pub fn map_svars(&self, map: &GHashMap<SVar, SVar>) -> Term {
        self.map_leaves(&mut |t| match t.node() {
            TermNode::Var(sv, o) => map.get(sv).map(|n| Term::var(n, *o)),
            _ => None,
        })
    }

    /// All distinct subterms, children before parents.
    pub fn subterms(&self) -> Vec<Term> {
        let mut seen = GHashSet::new();
        let mut res = Vec::new();
        let mut stack = vec![(self.clone(), false)];
        while let Some((t, expanded)) = stack.pop() {
            if expanded {
                res.push(t);
                continue;
            }
            if !seen.insert(t.clone()) {
                continue;
            }
            stack.push((t.clone(), true));
            for a in t.args().iter().rev() {
                if !seen.contains(a) {
                    stack.push((a.clone(), false));
                }
            }
        }
        res
    }

    /// State variable instances occurring in the term.
    pub fn var_instances(&self) -> Vec<(SVar, i32)> {
        self.subterms()
            .into_iter()
            .filter_map(|t| match t.node() {
                TermNode::Var(sv, o) => Some((sv.clone(), *o)),
                _ => None,
            })
            .collect()
    }

    /// Smallest and largest offset of any state variable instance.
    pub fn offsets(&self) -> Option<(i32, i32)> {
        self.var_instances()
            .iter()
            .fold(None, |acc, (_, o)| match acc {
                None => Some((*o, *o)),
                Some((lo, hi)) => Some((lo.min(*o), hi.max(*o))),
            })
    }

    /// Whether the term applies a defined function or mentions a free symbol.
    pub fn is_opaque(&self) -> bool {
        self.subterms()
            .iter()
            .any(|t| matches!(t.node(), TermNode::Call(..) | TermNode::Free(..)))
    }
}

impl Debug for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consing_shares_structure() {
        let x = SVar::new("t", "x", Type::Int);
        let a = Term::le(&x.at(0), &Term::int(3));
        let b = Term::le(&x.at(0), &Term::int(3));
        assert_eq!(a, b);
        assert_eq!(a.id(), b.id());
        assert_ne!(a, Term::lt(&x.at(0), &Term::int(3)));
    }

    #[test]
    fn simplification() {
        let p = SVar::new("t", "p", Type::Bool).at(0);
        assert_eq!(p.not().not(), p);
        assert!(Term::and([p.clone(), p.not()]).is_false());
        assert!(Term::or([p.clone(), Term::bool(true)]).is_true());
        assert_eq!(Term::and([p.clone(), Term::bool(true), p.clone()]), p);
        assert!(Term::eq(&p, &p).is_true());
        assert_eq!(Term::add([Term::int(2), Term::int(3)]), Term::int(5));
        assert!(Term::lt(&Term::int(2), &Term::int(1)).is_false());
    }

    #[test]
    fn bump_shifts_offsets() {
        let x = SVar::new("t", "x", Type::Int);
        let t = Term::eq(&x.at(1), &Term::add([x.at(0), Term::int(1)]));
        let b = t.bump(3);
        assert_eq!(b.offsets(), Some((3, 4)));
        assert_eq!(b.bump(-3), t);
    }

    #[test]
    fn try_app_checks_sorts() {
        let x = SVar::new("t", "x", Type::Int).at(0);
        assert!(Term::try_app(Op::Not, vec![x.clone()]).is_err());
        assert!(Term::try_app(Op::Le, vec![x.clone()]).is_err());
        assert_eq!(
            Term::try_app(Op::Sub, vec![x.clone()]).unwrap(),
            Term::neg(&x)
        );
    }
}
