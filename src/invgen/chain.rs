use crate::term::Value;
use std::collections::BTreeSet;

/// Values in strictly decreasing order, each with a payload.
#[derive(Clone, Debug)]
pub struct Chain<T> {
    links: Vec<(Value, T)>,
}

/// The chain a node was split into, with the node's neighbourhood as it was
/// when the node was split. Inserting it depends on nothing else.
#[derive(Clone, Debug)]
pub struct Split<T> {
    pub chain: Chain<T>,
    pub above: BTreeSet<T>,
    pub below: BTreeSet<T>,
}

impl<T: Ord + Copy> Split<T> {
    /// Members of the chain itself.
    pub fn members(&self) -> BTreeSet<T> {
        self.chain.iter().map(|(_, t)| *t).collect()
    }

    /// `set` without the members of the chain.
    pub fn outside(&self, set: &BTreeSet<T>) -> BTreeSet<T> {
        let members = self.members();
        set.difference(&members).copied().collect()
    }
}

impl<T> Default for Chain<T> {
    fn default() -> Self {
        Self { links: Vec::new() }
    }
}

impl<T> Chain<T> {
    #[inline]
    pub fn len(&self) -> usize {
        self.links.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Highest link.
    #[inline]
    pub fn top(&self) -> Option<&(Value, T)> {
        self.links.first()
    }

    /// Lowest link.
    #[inline]
    pub fn last(&self) -> Option<&(Value, T)> {
        self.links.last()
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &(Value, T)> {
        self.links.iter()
    }

    pub fn map<U>(self, mut f: impl FnMut(&Value, T) -> U) -> Chain<U> {
        Chain {
            links: self
                .links
                .into_iter()
                .map(|(v, t)| {
                    let u = f(&v, t);
                    (v, u)
                })
                .collect(),
        }
    }
}

impl<T: Clone> Chain<T> {
    /// Splits into the links with a value of at least `v` and the rest.
    pub fn split_at(&self, v: &Value) -> (Chain<T>, Chain<T>) {
        let at = self
            .links
            .iter()
            .position(|(w, _)| w < v)
            .unwrap_or(self.links.len());
        let (above, below) = self.links.split_at(at);
        (
            Chain {
                links: above.to_vec(),
            },
            Chain {
                links: below.to_vec(),
            },
        )
    }
}

impl<T> Chain<Vec<T>> {
    /// Adds `t` to the link of value `v`, creating it if needed.
    pub fn insert(&mut self, v: Value, t: T) {
        match self.links.binary_search_by(|(w, _)| v.cmp(w)) {
            Ok(i) => self.links[i].1.push(t),
            Err(i) => self.links.insert(i, (v, vec![t])),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordered_insertion() {
        let mut c: Chain<Vec<&str>> = Chain::default();
        c.insert(Value::Int(2), "a");
        c.insert(Value::Int(7), "b");
        c.insert(Value::Int(2), "c");
        c.insert(Value::Int(-1), "d");
        let vals: Vec<i64> = c.iter().filter_map(|(v, _)| v.as_int()).collect();
        assert_eq!(vals, [7, 2, -1]);
        assert_eq!(c.iter().nth(1).unwrap().1, vec!["a", "c"]);

        let (above, below) = c.split_at(&Value::Int(2));
        assert_eq!(above.len(), 2);
        assert_eq!(below.len(), 1);
        assert_eq!(above.last().unwrap().0, Value::Int(2));
        let (above, below) = c.split_at(&Value::Int(8));
        assert!(above.is_empty());
        assert_eq!(below.len(), 3);
    }

    #[test]
    fn neighbourhood_excludes_members() {
        let mut c: Chain<Vec<u8>> = Chain::default();
        c.insert(Value::Int(1), 0);
        c.insert(Value::Int(4), 1);
        let split = Split {
            chain: c.map(|v, _| v.as_int().unwrap_or_default() as u8),
            above: BTreeSet::from([4, 9]),
            below: BTreeSet::from([1, 2]),
        };
        assert_eq!(split.members(), BTreeSet::from([1, 4]));
        assert_eq!(split.outside(&split.above), BTreeSet::from([9]));
        assert_eq!(split.outside(&split.below), BTreeSet::from([2]));
    }

    #[test]
    fn booleans_descend_from_true() {
        let mut c: Chain<Vec<u8>> = Chain::default();
        c.insert(Value::Bool(false), 0);
        c.insert(Value::Bool(true), 1);
        assert_eq!(c.top().unwrap().0, Value::Bool(true));
        assert_eq!(c.last().unwrap().0, Value::Bool(false));
    }
}
