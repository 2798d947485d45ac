use super::{Op, SVar, Term, TermNode};
use giputils::hash::GHashMap;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i64),
}

impl Value {
    #[inline]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Int(_) => None,
        }
    }

    #[inline]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Bool(_) => None,
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EvalError {
    #[error("no value for `{0}` in model")]
    Unassigned(String),
    #[error("cannot evaluate uninterpreted `{0}`")]
    Uninterpreted(String),
    #[error("integer overflow in `{0}`")]
    Overflow(String),
    #[error("division by zero in `{0}`")]
    DivByZero(Term),
    #[error("ill-sorted value in `{0}`")]
    Sort(String),
}

/// Valuation of state variable instances.
#[derive(Clone, Debug, Default)]
pub struct Model {
    values: GHashMap<(SVar, i32), Value>,
    /// Solver values of terms without a local meaning, such as a division
    /// by zero, keyed by the term at its actual offsets.
    interp: GHashMap<Term, Value>,
}

impl Model {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, sv: &SVar, offset: i32, v: Value) {
        self.values.insert((sv.clone(), offset), v);
    }

    pub fn get(&self, sv: &SVar, offset: i32) -> Option<Value> {
        self.values.get(&(sv.clone(), offset)).copied()
    }

    /// Fixes the value of a term the model cannot evaluate on its own.
    pub fn interpret(&mut self, t: Term, v: Value) {
        self.interp.insert(t, v);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Whether `svars` take the same values at offsets `i` and `j`.
    pub fn same_state(&self, svars: &[SVar], i: i32, j: i32) -> bool {
        svars.iter().all(|sv| {
            let (a, b) = (self.get(sv, i), self.get(sv, j));
            a.is_some() && a == b
        })
    }

    #[inline]
    pub fn eval(&self, t: &Term) -> Result<Value, EvalError> {
        self.eval_shifted(t, 0)
    }

    #[inline]
    pub fn eval_bool(&self, t: &Term, shift: i32) -> Result<bool, EvalError> {
        self.eval_shifted(t, shift)?
            .as_bool()
            .ok_or_else(|| EvalError::Sort(t.to_string()))
    }

    /// Evaluates `t` as if it were bumped by `shift`.
    pub fn eval_shifted(&self, t: &Term, shift: i32) -> Result<Value, EvalError> {
        let mut cache = GHashMap::new();
        self.eval_rec(t, shift, &mut cache)
    }

    fn eval_rec(
        &self,
        t: &Term,
        shift: i32,
        cache: &mut GHashMap<Term, Value>,
    ) -> Result<Value, EvalError> {
        if let Some(v) = cache.get(t) {
            return Ok(*v);
        }
        let v = match t.node() {
            TermNode::Bool(b) => Value::Bool(*b),
            TermNode::Int(i) => Value::Int(*i),
            TermNode::Var(sv, o) => self
                .get(sv, o + shift)
                .ok_or_else(|| EvalError::Unassigned(t.bump(shift).to_string()))?,
            TermNode::Free(..) | TermNode::Call(..) => {
                return Err(EvalError::Uninterpreted(t.to_string()));
            }
            TermNode::App(op, args) => {
                let mut vals = Vec::with_capacity(args.len());
                if *op == Op::Ite {
                    let c = self.eval_rec(&args[0], shift, cache)?;
                    let branch = if c == Value::Bool(true) { &args[1] } else { &args[2] };
                    let v = self.eval_rec(branch, shift, cache)?;
                    cache.insert(t.clone(), v);
                    return Ok(v);
                }
                for a in args {
                    vals.push(self.eval_rec(a, shift, cache)?);
                }
                match apply(*op, &vals, t) {
                    Err(EvalError::DivByZero(_)) => {
                        let at = t.bump(shift);
                        match self.interp.get(&at) {
                            Some(v) => *v,
                            None => return Err(EvalError::DivByZero(at)),
                        }
                    }
                    res => res?,
                }
            }
        };
        cache.insert(t.clone(), v);
        Ok(v)
    }
}

fn apply(op: Op, vals: &[Value], t: &Term) -> Result<Value, EvalError> {
    let sort = || EvalError::Sort(t.to_string());
    let overflow = || EvalError::Overflow(t.to_string());
    let bools = || -> Result<Vec<bool>, EvalError> {
        vals.iter().map(|v| v.as_bool().ok_or_else(sort)).collect()
    };
    let ints = || -> Result<Vec<i64>, EvalError> {
        vals.iter().map(|v| v.as_int().ok_or_else(sort)).collect()
    };
    Ok(match op {
        Op::Not => Value::Bool(!bools()?[0]),
        Op::And => Value::Bool(bools()?.iter().all(|b| *b)),
        Op::Or => Value::Bool(bools()?.iter().any(|b| *b)),
        Op::Implies => {
            let b = bools()?;
            Value::Bool(!b[0] || b[1])
        }
        Op::Eq => Value::Bool(vals.windows(2).all(|w| w[0] == w[1])),
        Op::Distinct => Value::Bool(
            vals.iter()
                .enumerate()
                .all(|(i, a)| vals[i + 1..].iter().all(|b| a != b)),
        ),
        Op::Lt | Op::Le | Op::Gt | Op::Ge => {
            let i = ints()?;
            Value::Bool(match op {
                Op::Lt => i[0] < i[1],
                Op::Le => i[0] <= i[1],
                Op::Gt => i[0] > i[1],
                _ => i[0] >= i[1],
            })
        }
        Op::Add => Value::Int(
            ints()?
                .iter()
                .try_fold(0i64, |acc, x| acc.checked_add(*x))
                .ok_or_else(overflow)?,
        ),
        Op::Mul => Value::Int(
            ints()?
                .iter()
                .try_fold(1i64, |acc, x| acc.checked_mul(*x))
                .ok_or_else(overflow)?,
        ),
        Op::Sub => {
            let i = ints()?;
            Value::Int(
                i[1..]
                    .iter()
                    .try_fold(i[0], |acc, x| acc.checked_sub(*x))
                    .ok_or_else(overflow)?,
            )
        }
        Op::Neg => Value::Int(ints()?[0].checked_neg().ok_or_else(overflow)?),
        Op::Div | Op::Mod => {
            let i = ints()?;
            if i[1] == 0 {
                return Err(EvalError::DivByZero(t.clone()));
            }
            let r = if op == Op::Div {
                i[0].checked_div_euclid(i[1])
            } else {
                i[0].checked_rem_euclid(i[1])
            };
            Value::Int(r.ok_or_else(overflow)?)
        }
        Op::Ite => return Err(sort()),
    })
}
