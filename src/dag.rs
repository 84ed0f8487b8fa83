use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde::Serialize;

use crate::condition;

/// One unit of work in a plan graph. `op` is itself a dispatchable instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DagNode {
    pub id: String,
    pub op: String,
    /// Children in declaration order.
    pub next: Vec<String>,
    /// Parent id → condition expression. Empty means the node is root-eligible.
    pub conditions: BTreeMap<String, String>,
}

impl DagNode {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            op: String::new(),
            next: Vec::new(),
            conditions: BTreeMap::new(),
        }
    }

    pub fn is_unconditional(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn has_else(&self) -> bool {
        self.conditions.values().any(|c| condition::is_else(c))
    }

    /// Parents this node is guarded on with `else`.
    pub fn else_parents(&self) -> impl Iterator<Item = &str> {
        self.conditions
            .iter()
            .filter(|(_, c)| condition::is_else(c))
            .map(|(p, _)| p.as_str())
    }
}

/// Compiled plan graph. Built once by the compiler, read-only afterwards.
///
/// Nodes are kept in a `BTreeMap` so every walk over the graph is in
/// lexicographic id order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Dag {
    nodes: BTreeMap<String, DagNode>,
    children: BTreeMap<String, Vec<String>>,
}

impl Dag {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn ensure_node(&mut self, id: &str) {
        if !self.nodes.contains_key(id) {
            self.nodes.insert(id.to_string(), DagNode::new(id));
        }
    }

    pub(crate) fn define(&mut self, id: &str, op: &str) {
        self.ensure_node(id);
        if let Some(node) = self.nodes.get_mut(id) {
            node.op = op.to_string();
        }
    }

    pub(crate) fn connect(&mut self, parent: &str, child: &str, cond: Option<&str>) {
        self.ensure_node(parent);
        self.ensure_node(child);
        if let Some(p) = self.nodes.get_mut(parent) {
            p.next.push(child.to_string());
        }
        self.children
            .entry(parent.to_string())
            .or_default()
            .push(child.to_string());
        if let (Some(cond), Some(c)) = (cond, self.nodes.get_mut(child)) {
            c.conditions.insert(parent.to_string(), cond.to_string());
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: &str) -> Option<&DagNode> {
        self.nodes.get(id)
    }

    /// Nodes in lexicographic id order.
    pub fn nodes(&self) -> impl Iterator<Item = &DagNode> {
        self.nodes.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(|k| k.as_str())
    }

    pub fn children_of(&self, parent: &str) -> &[String] {
        self.children
            .get(parent)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Parents referenced by `id`'s conditions.
    pub fn parents_of(&self, id: &str) -> Vec<&str> {
        self.nodes
            .get(id)
            .map(|n| n.conditions.keys().map(|k| k.as_str()).collect())
            .unwrap_or_default()
    }

    pub fn roots(&self) -> impl Iterator<Item = &DagNode> {
        self.nodes.values().filter(|n| n.is_unconditional())
    }

    pub fn leaves(&self) -> impl Iterator<Item = &DagNode> {
        self.nodes.values().filter(|n| n.next.is_empty())
    }

    /// Every declared edge as `(parent, child)`, in parent order then declaration order.
    pub fn edges(&self) -> Vec<(&str, &str)> {
        self.nodes
            .values()
            .flat_map(|n| n.next.iter().map(move |c| (n.id.as_str(), c.as_str())))
            .collect()
    }

    /// Deterministic topological order over all edges (conditional or not).
    ///
    /// Kahn's algorithm with a lexicographic ready set. Nodes that sit on a
    /// cycle never reach in-degree zero; they are appended afterwards in id
    /// order so the result always lists every node exactly once.
    pub fn topological_order(&self) -> Vec<String> {
        let mut indegree: BTreeMap<&str, usize> =
            self.nodes.keys().map(|k| (k.as_str(), 0)).collect();
        for node in self.nodes.values() {
            for child in &node.next {
                if let Some(d) = indegree.get_mut(child.as_str()) {
                    *d += 1;
                }
            }
        }

        let mut ready: BTreeSet<&str> = indegree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(k, _)| *k)
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(id) = ready.pop_first() {
            order.push(id.to_string());
            let Some(node) = self.nodes.get(id) else {
                continue;
            };
            for child in &node.next {
                if let Some(d) = indegree.get_mut(child.as_str()) {
                    *d = d.saturating_sub(1);
                    if *d == 0 {
                        ready.insert(child.as_str());
                    }
                }
            }
        }

        if order.len() < self.nodes.len() {
            let placed: BTreeSet<String> = order.iter().cloned().collect();
            order.extend(self.nodes.keys().filter(|k| !placed.contains(*k)).cloned());
        }
        order
    }

    /// True if following `next` edges from some node leads back to it.
    pub fn has_cycle(&self) -> bool {
        let mut indegree: BTreeMap<&str, usize> =
            self.nodes.keys().map(|k| (k.as_str(), 0)).collect();
        for node in self.nodes.values() {
            for child in &node.next {
                if let Some(d) = indegree.get_mut(child.as_str()) {
                    *d += 1;
                }
            }
        }
        let mut queue: VecDeque<&str> = indegree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(k, _)| *k)
            .collect();
        let mut seen = 0usize;
        while let Some(id) = queue.pop_front() {
            seen += 1;
            if let Some(node) = self.nodes.get(id) {
                for child in &node.next {
                    if let Some(d) = indegree.get_mut(child.as_str()) {
                        *d = d.saturating_sub(1);
                        if *d == 0 {
                            queue.push_back(child.as_str());
                        }
                    }
                }
            }
        }
        seen < self.nodes.len()
    }
}
