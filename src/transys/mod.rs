pub mod property;

use crate::term::{Model, SVar, Term, TermNode, Type, Value};
use giputils::hash::{GHashMap, GHashSet};
use property::{Cex, Property};
use std::{collections::BTreeMap, sync::Arc};

/// A defined boolean function, `(define-fun name (params) Bool body)`.
#[derive(Clone, Debug)]
pub struct FunDef {
    pub name: String,
    pub params: Vec<(String, Type)>,
    pub body: Term,
}

/// An instantiation of a subsystem inside a caller.
#[derive(Clone, Debug)]
pub struct Instance {
    pub name: String,
    pub sys: Arc<TransSys>,
    /// Callee state variable to the caller state variable standing for it.
    pub map: GHashMap<SVar, SVar>,
}

impl Instance {
    /// Translates a term over the callee's variables into the caller's scope.
    #[inline]
    pub fn lift(&self, t: &Term) -> Term {
        t.map_svars(&self.map)
    }
}

/// A transition system. `init` ranges over offset 0 and `trans` relates
/// offset 0 to offset 1. Both may call the predicates of subsystems.
#[derive(Clone, Debug)]
pub struct TransSys {
    pub name: String,
    pub svars: Vec<SVar>,
    pub init: Term,
    pub trans: Term,
    pub props: Vec<Property>,
    pub subsystems: Vec<Instance>,
}

impl TransSys {
    #[inline]
    pub fn scope(&self) -> &str {
        &self.name
    }

    pub fn init_fun(&self) -> String {
        format!("{}.init", self.name)
    }

    pub fn trans_fun(&self) -> String {
        format!("{}.trans", self.name)
    }

    /// `init` instantiated at offset `k`.
    pub fn init_at(&self, k: i32) -> Term {
        Term::call(
            &self.init_fun(),
            self.svars.iter().map(|s| s.at(k)).collect(),
        )
    }

    /// `trans` instantiated between offsets `k - 1` and `k`.
    pub fn trans_at(&self, k: i32) -> Term {
        let args = self
            .svars
            .iter()
            .map(|s| s.at(k - 1))
            .chain(self.svars.iter().map(|s| s.at(k)))
            .collect();
        Term::call(&self.trans_fun(), args)
    }

    fn param_name(sv: &SVar, offset: i32) -> String {
        format!("{}.{}!{}", sv.scope(), sv.name(), offset)
    }

    fn fun_def(&self, name: String, body: &Term, offsets: &[i32]) -> FunDef {
        let params = offsets
            .iter()
            .flat_map(|o| {
                self.svars
                    .iter()
                    .map(move |s| (Self::param_name(s, *o), s.ty()))
            })
            .collect();
        let body = body.map_leaves(&mut |t| match t.node() {
            TermNode::Var(sv, o) => Some(Term::free(&Self::param_name(sv, *o), sv.ty())),
            _ => None,
        });
        FunDef { name, params, body }
    }

    pub fn init_def(&self) -> FunDef {
        self.fun_def(self.init_fun(), &self.init, &[0])
    }

    pub fn trans_def(&self) -> FunDef {
        self.fun_def(self.trans_fun(), &self.trans, &[0, 1])
    }

    /// This system and all its subsystems, callees before callers.
    pub fn systems_bottom_up(self: &Arc<Self>) -> Vec<Arc<TransSys>> {
        let mut res = Vec::new();
        let mut seen = GHashSet::new();
        let mut stack = vec![(self.clone(), false)];
        while let Some((sys, expanded)) = stack.pop() {
            if expanded {
                res.push(sys);
                continue;
            }
            if !seen.insert(sys.name.clone()) {
                continue;
            }
            stack.push((sys.clone(), true));
            for inst in sys.subsystems.iter().rev() {
                if !seen.contains(&inst.sys.name) {
                    stack.push((inst.sys.clone(), false));
                }
            }
        }
        res
    }

    /// Every instance of the system named `callee`, paired with its caller.
    pub fn instances_of(self: &Arc<Self>, callee: &str) -> Vec<(Arc<TransSys>, Instance)> {
        let mut res = Vec::new();
        for sys in self.systems_bottom_up() {
            for inst in sys.subsystems.iter() {
                if inst.sys.name == callee {
                    res.push((sys.clone(), inst.clone()));
                }
            }
        }
        res
    }

    /// `t`, a term over the system named `callee`, translated into every
    /// system that instantiates it directly or through intermediate callers.
    pub fn lift_to_callers(
        self: &Arc<Self>,
        callee: &str,
        t: &Term,
    ) -> Vec<(Arc<TransSys>, Term)> {
        let mut res = Vec::new();
        let mut seen = GHashSet::new();
        let mut todo = vec![(callee.to_string(), t.clone())];
        while let Some((callee, t)) = todo.pop() {
            for (caller, inst) in self.instances_of(&callee) {
                let lifted = inst.lift(&t);
                if seen.insert((caller.name.clone(), lifted.clone())) {
                    todo.push((caller.name.clone(), lifted.clone()));
                    res.push((caller, lifted));
                }
            }
        }
        res
    }

    /// Looks up a system by name among this system and its subsystems.
    pub fn find(self: &Arc<Self>, name: &str) -> Option<Arc<TransSys>> {
        self.systems_bottom_up().into_iter().find(|s| s.name == name)
    }

    /// Named values of the state at offset `k`.
    pub fn state(&self, model: &Model, k: i32) -> BTreeMap<String, Value> {
        self.svars
            .iter()
            .filter_map(|s| model.get(s, k).map(|v| (s.name().to_string(), v)))
            .collect()
    }

    /// Counterexample made of the states at offsets `0..=depth`.
    pub fn cex(&self, model: &Model, depth: usize) -> Cex {
        Cex {
            states: (0..=depth as i32).map(|k| self.state(model, k)).collect(),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// `x` counts from 0 up to `wrap` and restarts.
    pub fn counter(name: &str, wrap: i64) -> TransSys {
        let x = SVar::new(name, "x", Type::Int);
        let init = Term::eq(&x.at(0), &Term::int(0));
        let next = Term::ite(
            &Term::ge(&x.at(0), &Term::int(wrap)),
            &Term::int(0),
            &Term::add([x.at(0), Term::int(1)]),
        );
        let trans = Term::eq(&x.at(1), &next);
        let prop = Property::new("bounded", Term::le(&x.at(0), &Term::int(wrap)));
        TransSys {
            name: name.to_string(),
            svars: vec![x],
            init,
            trans,
            props: vec![prop],
            subsystems: Vec::new(),
        }
    }

    #[test]
    fn instantiation() {
        let ts = counter("c", 3);
        assert_eq!(ts.init_at(0).to_string(), "(|c.init| |c.x@0|)");
        assert_eq!(ts.trans_at(2).to_string(), "(|c.trans| |c.x@1| |c.x@2|)");
        let def = ts.trans_def();
        assert_eq!(def.params.len(), 2);
        assert!(def.body.var_instances().is_empty());
    }

    #[test]
    fn bottom_up_order() {
        let leaf = Arc::new(counter("leaf", 2));
        let y = SVar::new("top", "inst.x", Type::Int);
        let mut map = GHashMap::new();
        map.insert(leaf.svars[0].clone(), y.clone());
        let top = Arc::new(TransSys {
            name: "top".into(),
            svars: vec![y.clone()],
            init: Term::call(&leaf.init_fun(), vec![y.at(0)]),
            trans: Term::call(&leaf.trans_fun(), vec![y.at(0), y.at(1)]),
            props: Vec::new(),
            subsystems: vec![Instance {
                name: "inst".into(),
                sys: leaf.clone(),
                map,
            }],
        });
        let order: Vec<String> = top.systems_bottom_up().iter().map(|s| s.name.clone()).collect();
        assert_eq!(order, ["leaf", "top"]);
        let insts = top.instances_of("leaf");
        assert_eq!(insts.len(), 1);
        let lifted = insts[0].1.lift(&leaf.props[0].term);
        assert_eq!(lifted, Term::le(&y.at(0), &Term::int(2)));
    }

    fn wrap(name: &str, callee: Arc<TransSys>) -> Arc<TransSys> {
        let y = SVar::new(name, "y", Type::Int);
        let mut map = GHashMap::new();
        map.insert(callee.svars[0].clone(), y.clone());
        Arc::new(TransSys {
            name: name.into(),
            svars: vec![y.clone()],
            init: Term::call(&callee.init_fun(), vec![y.at(0)]),
            trans: Term::call(&callee.trans_fun(), vec![y.at(0), y.at(1)]),
            props: Vec::new(),
            subsystems: vec![Instance {
                name: "sub".into(),
                sys: callee,
                map,
            }],
        })
    }

    #[test]
    fn lifting_reaches_every_caller() {
        let leaf = Arc::new(counter("lift_leaf", 2));
        let mid = wrap("lift_mid", leaf.clone());
        let top = wrap("lift_top", mid.clone());
        let inv = Term::ge(&leaf.svars[0].at(0), &Term::int(0));
        let lifted = top.lift_to_callers("lift_leaf", &inv);
        let scopes: Vec<&str> = lifted.iter().map(|(s, _)| s.name.as_str()).collect();
        assert_eq!(scopes, ["lift_mid", "lift_top"]);
        assert_eq!(lifted[0].1, Term::ge(&mid.svars[0].at(0), &Term::int(0)));
        assert_eq!(lifted[1].1, Term::ge(&top.svars[0].at(0), &Term::int(0)));
        assert!(top.lift_to_callers("lift_top", &inv).is_empty());
    }
}
