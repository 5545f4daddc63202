//! Deterministic disjoint-set over arbitrary ordered keys.

use std::collections::BTreeMap;

/// Union-find with path compression. The representative of a class is its
/// earliest-inserted member, so class identity does not depend on the order
/// unions happen in.
#[derive(Debug, Clone)]
pub struct DisjointSet<K: Ord + Clone> {
    ids: BTreeMap<K, usize>,
    keys: Vec<K>,
    parent: Vec<usize>,
}

impl<K: Ord + Clone> Default for DisjointSet<K> {
    fn default() -> Self {
        Self {
            ids: BTreeMap::new(),
            keys: Vec::new(),
            parent: Vec::new(),
        }
    }
}

impl<K: Ord + Clone> DisjointSet<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `key` as a singleton if unseen; returns its id.
    pub fn add(&mut self, key: &K) -> usize {
        if let Some(id) = self.ids.get(key) {
            return *id;
        }
        let id = self.keys.len();
        self.ids.insert(key.clone(), id);
        self.keys.push(key.clone());
        self.parent.push(id);
        id
    }

    pub fn contains(&self, key: &K) -> bool {
        self.ids.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    fn find_id(&mut self, x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut cur = x;
        while self.parent[cur] != cur {
            let next = self.parent[cur];
            self.parent[cur] = root;
            cur = next;
        }
        root
    }

    pub fn union(&mut self, a: &K, b: &K) {
        let ia = self.add(a);
        let ib = self.add(b);
        let ra = self.find_id(ia);
        let rb = self.find_id(ib);
        if ra == rb {
            return;
        }
        let (root, child) = if ra < rb { (ra, rb) } else { (rb, ra) };
        self.parent[child] = root;
    }

    /// Representative key of `key`'s class.
    pub fn find(&mut self, key: &K) -> Option<K> {
        let id = *self.ids.get(key)?;
        let root = self.find_id(id);
        Some(self.keys[root].clone())
    }

    pub fn same(&mut self, a: &K, b: &K) -> bool {
        match (self.ids.get(a).copied(), self.ids.get(b).copied()) {
            (Some(ia), Some(ib)) => self.find_id(ia) == self.find_id(ib),
            _ => a == b,
        }
    }

    /// Every class in order of its earliest member; members in insertion order.
    pub fn classes(&mut self) -> Vec<Vec<K>> {
        let mut by_root: BTreeMap<usize, Vec<K>> = BTreeMap::new();
        for id in 0..self.keys.len() {
            let root = self.find_id(id);
            by_root.entry(root).or_default().push(self.keys[id].clone());
        }
        by_root.into_values().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classes_are_order_independent() {
        let mut a = DisjointSet::new();
        for k in ["x", "y", "z", "w"] {
            a.add(&k);
        }
        a.union(&"z", &"y");
        a.union(&"y", &"x");

        let mut b = DisjointSet::new();
        for k in ["x", "y", "z", "w"] {
            b.add(&k);
        }
        b.union(&"x", &"y");
        b.union(&"z", &"x");

        assert_eq!(a.classes(), b.classes());
        assert_eq!(a.classes(), vec![vec!["x", "y", "z"], vec!["w"]]);
        assert_eq!(a.find(&"z"), Some("x"));
        assert!(a.same(&"x", &"z"));
        assert!(!a.same(&"x", &"w"));
    }
}
