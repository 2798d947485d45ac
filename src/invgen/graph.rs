//! Candidate term graph.
//!
//! Nodes are equivalence classes of candidate terms, edges go from a node to
//! the nodes whose values are never smaller. Every relation the graph encodes
//! holds in every model it was split with.

use super::{
    chain::{Chain, Split},
    domain::Domain,
};
use crate::term::{EvalError, Term, Value};
use giputils::hash::GHashSet;
use log::error;
use std::{
    collections::{BTreeSet, VecDeque},
    fmt::Write as _,
    io::{self, Write},
    marker::PhantomData,
    path::PathBuf,
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GraphError {
    #[error("inconsistent candidate graph: {reason} (dump: {dump:?})")]
    Inconsistent {
        reason: String,
        dump: Option<PathBuf>,
    },
    #[error("candidate `{0}` evaluates outside of its domain")]
    Sort(String),
    #[error("refinement made no progress on a falsifying model")]
    Stuck,
    #[error(transparent)]
    Eval(#[from] EvalError),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

#[derive(Debug)]
struct Node {
    rep: Term,
    class: BTreeSet<Term>,
    above: BTreeSet<NodeId>,
    below: BTreeSet<NodeId>,
    value: Option<Value>,
}

impl Node {
    fn new(rep: Term, class: BTreeSet<Term>) -> Self {
        Self {
            rep,
            class,
            above: BTreeSet::new(),
            below: BTreeSet::new(),
            value: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CandKind {
    /// `rep = member`; proving it makes `member` redundant.
    Eq { node: NodeId, member: Term },
    Rel,
}

#[derive(Clone, Debug)]
pub struct Cand {
    pub term: Term,
    pub kind: CandKind,
}

pub struct Graph<D: Domain> {
    nodes: Vec<Node>,
    _domain: PhantomData<D>,
}

type Pending = (Chain<NodeId>, BTreeSet<NodeId>, BTreeSet<NodeId>);

impl<D: Domain> Graph<D> {
    /// All candidates in a single class represented by the domain's bottom.
    pub fn new(cands: BTreeSet<Term>) -> Option<Self> {
        let rep = D::bottom(&cands)?;
        let mut class = cands;
        class.remove(&rep);
        Some(Self {
            nodes: vec![Node::new(rep, class)],
            _domain: PhantomData,
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn rep(&self, n: NodeId) -> &Term {
        &self.nodes[n.0].rep
    }

    pub fn class(&self, n: NodeId) -> &BTreeSet<Term> {
        &self.nodes[n.0].class
    }

    pub fn value(&self, n: NodeId) -> Option<Value> {
        self.nodes[n.0].value
    }

    /// Every candidate term, representatives included.
    pub fn terms(&self) -> impl Iterator<Item = &Term> + '_ {
        self.nodes
            .iter()
            .flat_map(|n| std::iter::once(&n.rep).chain(n.class.iter()))
    }

    fn ids(&self) -> impl Iterator<Item = NodeId> + use<D> {
        (0..self.nodes.len()).map(NodeId)
    }

    fn edges(&self) -> impl Iterator<Item = (NodeId, NodeId)> + '_ {
        self.ids()
            .flat_map(move |lo| self.nodes[lo.0].above.iter().map(move |hi| (lo, *hi)))
    }

    pub fn num_edges(&self) -> usize {
        self.nodes.iter().map(|n| n.above.len()).sum()
    }

    fn link(&mut self, lo: NodeId, hi: NodeId) {
        if lo == hi {
            return;
        }
        self.nodes[lo.0].above.insert(hi);
        self.nodes[hi.0].below.insert(lo);
    }

    /// Removes every edge of `n`, returning its former `above` and `below`.
    fn isolate(&mut self, n: NodeId) -> (BTreeSet<NodeId>, BTreeSet<NodeId>) {
        let above = std::mem::take(&mut self.nodes[n.0].above);
        let below = std::mem::take(&mut self.nodes[n.0].below);
        for a in above.iter() {
            self.nodes[a.0].below.remove(&n);
        }
        for b in below.iter() {
            self.nodes[b.0].above.remove(&n);
        }
        (above, below)
    }

    /// Candidates the graph encodes. Representative-only mode yields one
    /// equality per class member and one comparison per edge; exhaustive
    /// mode adds every equality within a class and every comparison across
    /// an edge. Constant-true candidates and those `skip` accepts are left
    /// out.
    pub fn candidates(&self, all: bool, skip: impl Fn(&Term) -> bool) -> Vec<Cand> {
        let mut res = Vec::new();
        let mut seen = GHashSet::new();
        let mut push = |term: Term, kind: CandKind| {
            if term.is_true() || skip(&term) || !seen.insert(term.clone()) {
                return;
            }
            res.push(Cand { term, kind });
        };
        for n in self.ids() {
            let node = &self.nodes[n.0];
            for m in node.class.iter() {
                push(
                    Term::eq(&node.rep, m),
                    CandKind::Eq {
                        node: n,
                        member: m.clone(),
                    },
                );
            }
            if all {
                let members: Vec<&Term> = node.class.iter().collect();
                for (i, a) in members.iter().enumerate() {
                    for b in members[i + 1..].iter() {
                        push(Term::eq(a, b), CandKind::Rel);
                    }
                }
            }
        }
        for (lo, hi) in self.edges() {
            let (lo, hi) = (&self.nodes[lo.0], &self.nodes[hi.0]);
            push(D::mk_le(&lo.rep, &hi.rep), CandKind::Rel);
            if all {
                for a in std::iter::once(&lo.rep).chain(lo.class.iter()) {
                    for b in std::iter::once(&hi.rep).chain(hi.class.iter()) {
                        push(D::mk_le(a, b), CandKind::Rel);
                    }
                }
            }
        }
        res
    }

    /// Forgets a class member proved equal to its representative.
    pub fn drop_member(&mut self, n: NodeId, member: &Term) -> bool {
        self.nodes
            .get_mut(n.0)
            .is_some_and(|node| node.class.remove(member))
    }

    /// Splits the class of `n` by value and detaches `n` from the graph.
    /// The resulting chain keeps `n` for the group of its representative and
    /// creates a node for every other value.
    fn split_class(
        &mut self,
        n: NodeId,
        eval: &mut impl FnMut(&Term) -> Result<Value, EvalError>,
    ) -> Result<Split<NodeId>, GraphError> {
        let mut value = |t: &Term| -> Result<Value, GraphError> {
            let v = eval(t)?;
            if !D::accepts(&v) {
                return Err(GraphError::Sort(t.to_string()));
            }
            Ok(v)
        };
        let rep = self.nodes[n.0].rep.clone();
        let rep_value = value(&rep)?;
        let mut chain: Chain<Vec<Term>> = Chain::default();
        chain.insert(rep_value, rep.clone());
        for m in self.nodes[n.0].class.iter() {
            chain.insert(value(m)?, m.clone());
        }
        let chain = chain.map(|v, terms| {
            if *v == rep_value {
                let node = &mut self.nodes[n.0];
                node.class = terms.into_iter().filter(|t| *t != rep).collect();
                node.value = Some(*v);
                n
            } else {
                let mut class: BTreeSet<Term> = terms.into_iter().collect();
                // non-empty, every link holds at least one term
                let rep = class.pop_first().unwrap_or_else(|| Term::bool(false));
                let mut node = Node::new(rep, class);
                node.value = Some(*v);
                self.nodes.push(node);
                NodeId(self.nodes.len() - 1)
            }
        });
        let (above, below) = self.isolate(n);
        Ok(Split {
            chain,
            above,
            below,
        })
    }

    fn valued(&self, n: NodeId) -> Result<Value, GraphError> {
        self.nodes[n.0]
            .value
            .ok_or_else(|| self.inconsistent(format!("node {} has no value", self.nodes[n.0].rep)))
    }

    /// Puts a split chain back in the graph. Nodes formerly above the split
    /// node go above the top of the chain. Nodes formerly below it go below
    /// the lowest link they do not exceed, and the links that exceed them are
    /// pushed further down. Only edges are added, so inserting the same
    /// split again changes nothing.
    fn insert_chain(&mut self, split: &Split<NodeId>) -> Result<(), GraphError> {
        if split.chain.is_empty() {
            return Err(self.inconsistent("empty chain".into()));
        }
        let ids: Vec<NodeId> = split.chain.iter().map(|(_, id)| *id).collect();
        for w in ids.windows(2) {
            self.link(w[1], w[0]);
        }
        let mut stack: Vec<Pending> = vec![(
            split.chain.clone(),
            split.outside(&split.above),
            split.outside(&split.below),
        )];
        while let Some((chain, kids, mut set)) = stack.pop() {
            let Some(&(top_value, top)) = chain.top() else {
                continue;
            };
            let Some(parent) = set.pop_first() else {
                for k in kids {
                    self.link(top, k);
                }
                continue;
            };
            stack.push((chain.clone(), kids.clone(), set));
            let parent_value = self.valued(parent)?;
            let grand_parents = split.outside(&self.nodes[parent.0].below);
            if parent_value <= top_value {
                for k in kids {
                    self.link(top, k);
                }
                let (above, rest) = chain.split_at(&parent_value);
                let Some(&(_, lowest)) = above.last() else {
                    return Err(self.inconsistent("chain split above its top".into()));
                };
                self.link(parent, lowest);
                if !rest.is_empty() {
                    stack.push((rest, BTreeSet::from([lowest]), grand_parents));
                }
            } else {
                for k in kids.iter() {
                    self.link(parent, *k);
                    self.link(top, *k);
                }
                stack.push((chain, BTreeSet::new(), grand_parents));
            }
        }
        Ok(())
    }

    /// Refines the graph so that it is consistent with `eval`. Nodes are
    /// processed once every node below them has been.
    pub fn split(
        &mut self,
        mut eval: impl FnMut(&Term) -> Result<Value, EvalError>,
    ) -> Result<(), GraphError> {
        for node in self.nodes.iter_mut() {
            node.value = None;
        }
        let mut todo: Vec<NodeId> = self
            .ids()
            .filter(|n| self.nodes[n.0].below.is_empty())
            .collect();
        while let Some(n) = todo.pop() {
            if self.nodes[n.0].value.is_some() {
                continue;
            }
            let split = self.split_class(n, &mut eval)?;
            self.insert_chain(&split)?;
            for c in split.members() {
                for a in self.nodes[c.0].above.iter() {
                    let node = &self.nodes[a.0];
                    if node.value.is_none()
                        && node.below.iter().all(|b| self.nodes[b.0].value.is_some())
                    {
                        todo.push(*a);
                    }
                }
            }
        }
        if let Some(n) = self.nodes.iter().find(|n| n.value.is_none()) {
            return Err(self.inconsistent(format!("node {} unreachable from the bottom", n.rep)));
        }
        Ok(())
    }

    fn violation(&self) -> Option<String> {
        let mut terms = GHashSet::new();
        for n in self.ids() {
            let node = &self.nodes[n.0];
            for t in std::iter::once(&node.rep).chain(node.class.iter()) {
                if !terms.insert(t.clone()) {
                    return Some(format!("{t} belongs to several classes"));
                }
            }
            for a in node.above.iter() {
                if *a == n || a.0 >= self.nodes.len() {
                    return Some(format!("bad edge from {}", node.rep));
                }
                if !self.nodes[a.0].below.contains(&n) {
                    return Some(format!("{} -> {} is one-sided", node.rep, self.nodes[a.0].rep));
                }
                if let (Some(lo), Some(hi)) = (node.value, self.nodes[a.0].value)
                    && lo > hi
                {
                    return Some(format!(
                        "{} -> {} contradicts values {lo} and {hi}",
                        node.rep, self.nodes[a.0].rep
                    ));
                }
            }
            for b in node.below.iter() {
                if b.0 >= self.nodes.len() || !self.nodes[b.0].above.contains(&n) {
                    return Some(format!("edge below {} is one-sided", node.rep));
                }
            }
            // a node without edges is both minimal and maximal, its class may
            // be empty
        }
        let mut indeg: Vec<usize> = self.nodes.iter().map(|n| n.below.len()).collect();
        let mut queue: VecDeque<NodeId> = self.ids().filter(|n| indeg[n.0] == 0).collect();
        let mut visited = 0;
        while let Some(n) = queue.pop_front() {
            visited += 1;
            for a in self.nodes[n.0].above.iter() {
                indeg[a.0] -= 1;
                if indeg[a.0] == 0 {
                    queue.push_back(*a);
                }
            }
        }
        (visited != self.nodes.len()).then(|| "cycle".to_string())
    }

    /// Structural check of the graph.
    pub fn check(&self) -> Result<(), GraphError> {
        match self.violation() {
            Some(reason) => Err(self.inconsistent(reason)),
            None => Ok(()),
        }
    }

    fn inconsistent(&self, reason: String) -> GraphError {
        let dump = self.dump();
        match dump.as_ref() {
            Some(p) => error!("{} graph inconsistent, dumped to {}", D::NAME, p.display()),
            None => error!("{} graph inconsistent, dump failed", D::NAME),
        }
        GraphError::Inconsistent { reason, dump }
    }

    /// Writes the graph to a temporary Graphviz file that outlives the run.
    pub fn dump(&self) -> Option<PathBuf> {
        let mut file = tempfile::Builder::new()
            .prefix("rkind-graph-")
            .suffix(".dot")
            .tempfile()
            .ok()?;
        self.dot_fmt(&mut file).ok()?;
        let (_, path) = file.keep().ok()?;
        Some(path)
    }

    pub fn dot_fmt(&self, w: &mut impl Write) -> io::Result<()> {
        writeln!(w, "digraph candidates {{")?;
        writeln!(w, "  node [shape=box];")?;
        for n in self.ids() {
            let node = &self.nodes[n.0];
            let mut label = node.rep.to_string();
            for m in node.class.iter() {
                let _ = write!(label, "\\n{m}");
            }
            if let Some(v) = node.value {
                let _ = write!(label, "\\n[{v}]");
            }
            writeln!(w, "  n{} [label=\"{}\"];", n.0, label.replace('"', "\\\""))?;
        }
        for (lo, hi) in self.edges() {
            writeln!(w, "  n{} -> n{};", lo.0, hi.0)?;
        }
        writeln!(w, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        invgen::domain::{BoolDom, IntDom},
        term::{Model, SVar, Type},
    };
    use proptest::prelude::*;

    fn int_vars(scope: &str, n: usize) -> Vec<SVar> {
        (0..n)
            .map(|i| SVar::new(scope, &format!("v{i}"), Type::Int))
            .collect()
    }

    fn model_of(vars: &[SVar], vals: &[i64]) -> Model {
        let mut m = Model::new();
        for (v, x) in vars.iter().zip(vals) {
            m.insert(v, 0, Value::Int(*x));
        }
        m
    }

    fn holds(cands: &[Cand], m: &Model) -> bool {
        cands.iter().all(|c| m.eval_bool(&c.term, 0) == Ok(true))
    }

    #[test]
    fn split_orders_classes() {
        let vars = int_vars("graph_split", 3);
        let terms: BTreeSet<Term> = vars.iter().map(|v| v.at(0)).collect();
        let mut g: Graph<IntDom> = Graph::new(terms).unwrap();
        assert_eq!(g.len(), 1);
        let m = model_of(&vars, &[1, 1, 5]);
        g.split(|t| m.eval(t)).unwrap();
        g.check().unwrap();
        assert_eq!(g.len(), 2);
        assert_eq!(g.num_edges(), 1);
        let cands = g.candidates(false, |_| false);
        assert!(holds(&cands, &m));
        assert!(cands.iter().any(|c| matches!(c.kind, CandKind::Eq { .. })));

        let m2 = model_of(&vars, &[0, 2, 5]);
        g.split(|t| m2.eval(t)).unwrap();
        g.check().unwrap();
        assert_eq!(g.len(), 3);
        let cands = g.candidates(false, |_| false);
        assert!(holds(&cands, &m));
        assert!(holds(&cands, &m2));
        assert!(cands.iter().all(|c| c.kind == CandKind::Rel));
    }

    #[test]
    fn splitting_with_same_model_is_idempotent() {
        let vars = int_vars("graph_idem", 4);
        let terms: BTreeSet<Term> = vars.iter().map(|v| v.at(0)).collect();
        let mut g: Graph<IntDom> = Graph::new(terms).unwrap();
        let m = model_of(&vars, &[3, -1, 3, 0]);
        g.split(|t| m.eval(t)).unwrap();
        let (len, edges) = (g.len(), g.num_edges());
        g.split(|t| m.eval(t)).unwrap();
        g.check().unwrap();
        assert_eq!((len, edges), (g.len(), g.num_edges()));
    }

    #[test]
    fn bool_graph_splits_from_false() {
        let a = SVar::new("graph_bool", "a", Type::Bool);
        let b = SVar::new("graph_bool", "b", Type::Bool);
        let terms = BTreeSet::from([Term::bool(true), Term::bool(false), a.at(0), b.at(0)]);
        let mut g: Graph<BoolDom> = Graph::new(terms).unwrap();
        assert!(g.rep(NodeId(0)).is_false());
        let mut m = Model::new();
        m.insert(&a, 0, Value::Bool(true));
        m.insert(&b, 0, Value::Bool(false));
        g.split(|t| m.eval(t)).unwrap();
        g.check().unwrap();
        assert_eq!(g.len(), 2);
        let cands = g.candidates(false, |_| false);
        assert!(holds(&cands, &m));
        // b is still equal to false, a to true
        assert!(
            cands
                .iter()
                .any(|c| c.term == Term::eq(&Term::bool(false), &b.at(0)))
        );
    }

    #[test]
    fn drop_member_removes_equalities() {
        let vars = int_vars("graph_drop", 2);
        let terms: BTreeSet<Term> = vars.iter().map(|v| v.at(0)).collect();
        let mut g: Graph<IntDom> = Graph::new(terms).unwrap();
        let cands = g.candidates(false, |_| false);
        assert_eq!(cands.len(), 1);
        let CandKind::Eq { node, member } = &cands[0].kind else {
            panic!("expected an equality");
        };
        assert!(g.drop_member(*node, member));
        assert!(g.candidates(false, |_| false).is_empty());
    }

    #[test]
    fn exhaustive_extraction_covers_members() {
        let vars = int_vars("graph_all", 4);
        let terms: BTreeSet<Term> = vars.iter().map(|v| v.at(0)).collect();
        let mut g: Graph<IntDom> = Graph::new(terms).unwrap();
        let m = model_of(&vars, &[0, 0, 1, 1]);
        g.split(|t| m.eval(t)).unwrap();
        let few = g.candidates(false, |_| false);
        let all = g.candidates(true, |_| false);
        assert_eq!(few.len(), 3);
        // three more comparisons across the edge
        assert_eq!(all.len(), 6);
        assert!(holds(&all, &m));
    }

    #[test]
    fn dot_output() {
        let vars = int_vars("graph_dot", 2);
        let terms: BTreeSet<Term> = vars.iter().map(|v| v.at(0)).collect();
        let mut g: Graph<IntDom> = Graph::new(terms).unwrap();
        let m = model_of(&vars, &[0, 1]);
        g.split(|t| m.eval(t)).unwrap();
        let mut out = Vec::new();
        g.dot_fmt(&mut out).unwrap();
        let out = String::from_utf8(out).unwrap();
        assert!(out.starts_with("digraph"));
        assert!(out.contains("n0 -> n1") || out.contains("n1 -> n0"));
    }

    #[test]
    fn incomparable_nodes_stand_alone() {
        let vars = int_vars("graph_alone", 2);
        let terms: BTreeSet<Term> = vars.iter().map(|v| v.at(0)).collect();
        let mut g: Graph<IntDom> = Graph::new(terms).unwrap();
        let m1 = model_of(&vars, &[0, 1]);
        let m2 = model_of(&vars, &[1, 0]);
        g.split(|t| m1.eval(t)).unwrap();
        g.split(|t| m2.eval(t)).unwrap();
        g.check().unwrap();
        assert_eq!(g.len(), 2);
        assert_eq!(g.num_edges(), 0);
        assert!(g.class(NodeId(0)).is_empty() && g.class(NodeId(1)).is_empty());
        assert!(g.candidates(true, |_| false).is_empty());
    }

    #[test]
    fn chain_insertion_is_idempotent() {
        let vars = int_vars("graph_reinsert", 4);
        let terms: BTreeSet<Term> = vars.iter().map(|v| v.at(0)).collect();
        let mut g: Graph<IntDom> = Graph::new(terms).unwrap();
        let m1 = model_of(&vars, &[0, 1, 1, 2]);
        g.split(|t| m1.eval(t)).unwrap();
        assert_eq!(g.rep(NodeId(2)), &vars[1].at(0));

        // a and d keep their values, b and c part
        let m2 = model_of(&vars, &[0, 2, 1, 2]);
        let split = g.split_class(NodeId(2), &mut |t: &Term| m2.eval(t)).unwrap();
        assert_eq!(split.chain.len(), 2);
        g.insert_chain(&split).unwrap();
        g.check().unwrap();
        let edges: Vec<_> = g.edges().collect();
        g.insert_chain(&split).unwrap();
        g.check().unwrap();
        assert_eq!(edges, g.edges().collect::<Vec<_>>());
        let cands = g.candidates(true, |_| false);
        assert!(holds(&cands, &m2));
        let c_le_b = Term::le(&vars[2].at(0), &vars[1].at(0));
        assert!(cands.iter().any(|c| c.term == c_le_b));
    }

    proptest! {
        #[test]
        fn refinement_keeps_every_model(
            models in prop::collection::vec(prop::collection::vec(-2i64..3, 7), 1..8)
        ) {
            let vars = int_vars("graph_prop", 7);
            let mut terms: BTreeSet<Term> = vars.iter().map(|v| v.at(0)).collect();
            terms.insert(Term::int(0));
            terms.insert(Term::add([vars[0].at(0), vars[1].at(0)]));
            terms.insert(Term::sub(&vars[2].at(0), &vars[3].at(0)));
            let mut g: Graph<IntDom> = Graph::new(terms).unwrap();
            let models: Vec<Model> = models.iter().map(|vals| model_of(&vars, vals)).collect();
            for (i, m) in models.iter().enumerate() {
                g.split(|t| m.eval(t)).unwrap();
                prop_assert!(g.check().is_ok());
                let cands = g.candidates(true, |_| false);
                for seen in models[..=i].iter() {
                    prop_assert!(holds(&cands, seen));
                }
            }
            if let Some(last) = models.last() {
                let shape = (g.len(), g.num_edges());
                g.split(|t| last.eval(t)).unwrap();
                prop_assert_eq!(shape, (g.len(), g.num_edges()));
            }
        }
    }
}
