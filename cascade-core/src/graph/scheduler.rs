//! Propagation Scheduler
//!
//! The scheduler determines the order in which nodes are evaluated during a
//! pass. It ensures that predecessors are always evaluated before their
//! successors, and that each node is evaluated at most once.
//!
//! # Algorithm
//!
//! 1. Starting from the seed sources, walk the live successor links and
//!    collect every reachable node.
//! 2. Sort the collected nodes topologically using Kahn's algorithm, counting
//!    only edges inside the collected set. When several nodes are ready at
//!    once, the one with the smallest id (the one constructed first) goes
//!    first, so the order is deterministic.
//! 3. Evaluate in that order. A node with no fired predecessor is skipped;
//!    it stays in the plan so its buffer is still cleared at the end.
//!
//! Graphs are acyclic by construction. If the sort cannot place every node
//! anyway, the pass fails with [`PropagationError::CycleDetected`].

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

use tracing::trace;

use super::node::{GraphNode, NodeId, NodeKind};
use crate::error::PropagationError;

/// Counters for a single evaluated pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct PassStats {
    /// Nodes that fired, sources included.
    pub nodes_evaluated: usize,

    /// Events appended by non-source nodes.
    pub events_produced: usize,
}

/// Computes evaluation order over the event graph and runs it.
pub(crate) struct PropagationScheduler;

impl PropagationScheduler {
    /// Collect every node reachable from `seeds` and order them so that
    /// predecessors come before successors.
    pub(crate) fn plan(
        seeds: &[Arc<dyn GraphNode>],
    ) -> Result<Vec<Arc<dyn GraphNode>>, PropagationError> {
        let mut reachable: BTreeMap<NodeId, Arc<dyn GraphNode>> = BTreeMap::new();
        let mut queue: VecDeque<Arc<dyn GraphNode>> = seeds.iter().cloned().collect();

        // BFS over live successor links
        while let Some(node) = queue.pop_front() {
            let id = node.id();
            if reachable.contains_key(&id) {
                continue;
            }
            for successor in node.successors() {
                queue.push_back(successor);
            }
            reachable.insert(id, node);
        }

        Self::topological_sort(reachable)
    }

    /// Perform a topological sort of the given nodes.
    fn topological_sort(
        nodes: BTreeMap<NodeId, Arc<dyn GraphNode>>,
    ) -> Result<Vec<Arc<dyn GraphNode>>, PropagationError> {
        let mut in_degree: HashMap<NodeId, usize> = HashMap::with_capacity(nodes.len());
        let mut ready: BTreeSet<NodeId> = BTreeSet::new();

        // Calculate in-degrees (only counting edges within the node set)
        for (&id, node) in &nodes {
            let degree = node
                .predecessor_ids()
                .iter()
                .filter(|pred| nodes.contains_key(*pred))
                .count();
            in_degree.insert(id, degree);
            if degree == 0 {
                ready.insert(id);
            }
        }

        // Kahn's algorithm, smallest id first
        let mut result = Vec::with_capacity(nodes.len());
        while let Some(id) = ready.pop_first() {
            let Some(node) = nodes.get(&id) else {
                continue;
            };

            for successor in node.successors() {
                if let Some(degree) = in_degree.get_mut(&successor.id()) {
                    *degree = degree.saturating_sub(1);
                    if *degree == 0 {
                        ready.insert(successor.id());
                    }
                }
            }
            result.push(Arc::clone(node));
        }

        if result.len() != nodes.len() {
            return Err(PropagationError::CycleDetected {
                unresolved: nodes.len() - result.len(),
            });
        }

        Ok(result)
    }

    /// Evaluate a planned pass in order.
    ///
    /// Stops at the first failing node. The caller is responsible for
    /// clearing the buffers of every planned node afterwards.
    pub(crate) fn run(plan: &[Arc<dyn GraphNode>]) -> Result<PassStats, PropagationError> {
        let mut stats = PassStats::default();

        for node in plan {
            if !node.has_input() {
                continue;
            }

            let kind = node.kind();
            let produced = node
                .evaluate()
                .map_err(|source| PropagationError::Evaluation {
                    node: node.id(),
                    kind,
                    source,
                })?;

            trace!(node = %node.id(), ?kind, produced, "evaluated node");
            stats.nodes_evaluated += 1;
            if kind != NodeKind::Source {
                stats.events_produced += produced;
            }
        }

        Ok(stats)
    }
}
