//! Staged execution of a compiled plan graph.
//!
//! Each call to [`execute_plan`] owns its own status/result/trace state, so
//! concurrent plans never share working data.
//!
//! Stages:
//! 1. unconditional nodes run first, in topological order;
//! 2. a conditional node is promoted once every parent it is guarded on has
//!    finished, then runs or is skipped depending on its guards;
//! 3. `else` children wait for a fallback pass after the stages settle and run
//!    only if no sibling under the same parent ran;
//! 4. fallback results feed back into step 2 until nothing changes;
//! 5. the lexicographically first executed leaf supplies the plan result.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info, warn};

use crate::condition::{self, evaluate_condition};
use crate::dag::{Dag, DagNode};
use crate::instruction::{InstructionExecutor, Metadata};
use crate::trace::{Trace, SKIPPED_CONDITION, SKIPPED_ELSE, SKIPPED_UNRESOLVED};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    Ready,
    Pending,
    Executed,
    Skipped,
}

impl NodeStatus {
    pub fn is_finished(self) -> bool {
        matches!(self, NodeStatus::Executed | NodeStatus::Skipped)
    }
}

/// Outcome of one plan execution.
#[derive(Debug, Clone)]
pub struct PlanRun {
    pub output: String,
    pub trace: Trace,
    /// Leaf whose output became `output`, if any leaf executed.
    pub result_node: Option<String>,
    pub statuses: BTreeMap<String, NodeStatus>,
}

impl PlanRun {
    pub fn status_of(&self, id: &str) -> Option<NodeStatus> {
        self.statuses.get(id).copied()
    }
}

/// Run `dag` to completion, dispatching each node through `executor`.
///
/// `depth` is the nesting level of the plan instruction itself; nodes are
/// dispatched at `depth + 1`.
pub fn execute_plan<E>(
    dag: &Dag,
    executor: &E,
    session_id: &str,
    meta: &Metadata,
    depth: usize,
) -> PlanRun
where
    E: InstructionExecutor + ?Sized,
{
    let mut run = Scheduler::new(dag, executor, session_id, meta, depth);
    run.drive();
    run.finish()
}

struct Scheduler<'a, E: ?Sized> {
    dag: &'a Dag,
    executor: &'a E,
    session_id: &'a str,
    meta: &'a Metadata,
    depth: usize,
    status: BTreeMap<String, NodeStatus>,
    results: BTreeMap<String, String>,
    trace: Trace,
}

impl<'a, E> Scheduler<'a, E>
where
    E: InstructionExecutor + ?Sized,
{
    fn new(
        dag: &'a Dag,
        executor: &'a E,
        session_id: &'a str,
        meta: &'a Metadata,
        depth: usize,
    ) -> Self {
        let status = dag
            .nodes()
            .map(|n| {
                let s = if n.is_unconditional() {
                    NodeStatus::Ready
                } else {
                    NodeStatus::Pending
                };
                (n.id.clone(), s)
            })
            .collect();
        Self {
            dag,
            executor,
            session_id,
            meta,
            depth,
            status,
            results: BTreeMap::new(),
            trace: Trace::new(),
        }
    }

    fn status_of(&self, id: &str) -> NodeStatus {
        self.status.get(id).copied().unwrap_or(NodeStatus::Pending)
    }

    fn is_finished(&self, id: &str) -> bool {
        self.status_of(id).is_finished()
    }

    fn drive(&mut self) {
        let dag = self.dag;
        let mut queue: Vec<&'a DagNode> = dag
            .topological_order()
            .iter()
            .filter_map(|id| dag.node(id))
            .filter(|n| n.is_unconditional())
            .collect();

        loop {
            self.run_stages(queue);

            let resolved = self.else_pass();
            if resolved.is_empty() {
                break;
            }
            queue = self.promotable_children(&resolved, &mut BTreeSet::new());
        }

        self.mark_unresolved();
    }

    /// Stage loop: run the queue, promote children, repeat until quiet.
    fn run_stages(&mut self, mut queue: Vec<&'a DagNode>) {
        let mut enqueued: BTreeSet<&'a str> = queue.iter().map(|n| n.id.as_str()).collect();

        while !queue.is_empty() {
            let mut finished: Vec<&'a DagNode> = Vec::new();

            for node in queue {
                if self.is_finished(&node.id) {
                    continue;
                }
                if !node.is_unconditional() {
                    if node.conditions.keys().any(|p| !self.is_finished(p)) {
                        // Stays pending; a later parent completion promotes it again.
                        enqueued.remove(node.id.as_str());
                        continue;
                    }
                    if !self.guards_pass(node) {
                        self.skip(node, SKIPPED_CONDITION);
                        finished.push(node);
                        continue;
                    }
                }
                self.run_node(node, false);
                finished.push(node);
            }

            queue = self.promotable_children(&finished, &mut enqueued);
        }
    }

    fn guards_pass(&self, node: &DagNode) -> bool {
        node.conditions
            .iter()
            .filter(|(_, cond)| !condition::is_else(cond))
            .all(|(parent, cond)| {
                let output = self.results.get(parent).map(String::as_str).unwrap_or("");
                evaluate_condition(output, cond)
            })
    }

    /// Pending, non-`else` children of `finished` whose guarded parents are all done.
    fn promotable_children(
        &self,
        finished: &[&'a DagNode],
        enqueued: &mut BTreeSet<&'a str>,
    ) -> Vec<&'a DagNode> {
        let dag = self.dag;
        let mut next = Vec::new();
        for parent in finished {
            for child_id in &parent.next {
                let Some(child) = dag.node(child_id) else {
                    continue;
                };
                if enqueued.contains(child.id.as_str())
                    || self.status_of(&child.id) != NodeStatus::Pending
                    || child.has_else()
                {
                    continue;
                }
                if child.conditions.keys().all(|p| self.is_finished(p)) {
                    enqueued.insert(child.id.as_str());
                    next.push(child);
                }
            }
        }
        next
    }

    /// Resolve every pending `else` node whose parents are all finished;
    /// returns the nodes it finished.
    fn else_pass(&mut self) -> Vec<&'a DagNode> {
        let dag = self.dag;
        let candidates: Vec<&'a DagNode> = dag
            .nodes()
            .filter(|n| n.has_else() && self.status_of(&n.id) == NodeStatus::Pending)
            .filter(|n| n.conditions.keys().all(|p| self.is_finished(p)))
            .collect();

        let mut resolved = Vec::with_capacity(candidates.len());
        for node in candidates {
            let sibling_ran = node.else_parents().any(|parent| {
                dag.children_of(parent)
                    .iter()
                    .any(|sibling| sibling != &node.id && self.trace.ran(sibling))
            });

            if sibling_ran {
                self.skip(node, SKIPPED_ELSE);
            } else if !self.guards_pass(node) {
                self.skip(node, SKIPPED_CONDITION);
            } else {
                self.run_node(node, true);
            }
            resolved.push(node);
        }
        resolved
    }

    fn mark_unresolved(&mut self) {
        let dag = self.dag;
        let stuck: Vec<&'a DagNode> = dag
            .nodes()
            .filter(|n| !self.is_finished(&n.id))
            .collect();
        for node in stuck {
            warn!(node = %node.id, "plan node never became ready (cycle or unfinished parent)");
            self.skip(node, SKIPPED_UNRESOLVED);
        }
    }

    fn skip(&mut self, node: &DagNode, reason: &str) {
        debug!(node = %node.id, reason, "skipping node");
        self.trace.record(node.id.clone(), reason);
        self.status.insert(node.id.clone(), NodeStatus::Skipped);
    }

    fn run_node(&mut self, node: &DagNode, fallback: bool) {
        if fallback {
            info!(node = %node.id, op = %node.op, "executing fallback node");
        } else {
            info!(node = %node.id, op = %node.op, "executing node");
        }

        let out = self
            .executor
            .execute(self.session_id, &node.op, self.meta, self.depth + 1);

        self.trace
            .record(node.id.clone(), format!("{} => {}", node.op, out.output));
        self.trace.merge_namespaced(&node.id, out.trace);
        self.results.insert(node.id.clone(), out.output);
        self.status.insert(node.id.clone(), NodeStatus::Executed);
    }

    fn finish(self) -> PlanRun {
        let candidates: Vec<&str> = self
            .dag
            .leaves()
            .map(|n| n.id.as_str())
            .filter(|id| self.status_of(id) == NodeStatus::Executed && self.trace.ran(id))
            .collect();

        if candidates.len() > 1 {
            debug!(
                ?candidates,
                "plan has several executed leaves; using the first by id"
            );
        }

        let result_node = candidates.first().map(|id| id.to_string());
        let output = result_node
            .as_deref()
            .and_then(|id| self.results.get(id).cloned())
            .unwrap_or_default();

        PlanRun {
            output,
            trace: self.trace,
            result_node,
            statuses: self.status,
        }
    }
}
