//! Event Graph
//!
//! This module implements the directed acyclic graph that events flow
//! through.
//!
//! # Overview
//!
//! - Nodes hold the events of the current pass and an operator (source,
//!   merge, filter or transform).
//! - Edges point from a predecessor to a successor. A successor owns its
//!   predecessors; a predecessor only holds weak back-references to its
//!   successors.
//!
//! When a transaction commits, the scheduler walks the graph from the seeded
//! sources and evaluates every reachable node after all of its predecessors.
//!
//! # Design Decisions
//!
//! 1. The graph is distributed over the nodes rather than kept in a central
//!    table, so a node disappears as soon as nothing refers to it.
//!
//! 2. Topology is fixed at construction. A node can only be built from
//!    existing nodes, which keeps the graph acyclic and makes node ids a
//!    valid topological order.
//!
//! 3. Node kinds form a closed set behind a single type-erased trait, so one
//!    scheduler can walk nodes of any event type.

pub(crate) mod combinators;
mod node;
mod scheduler;

pub use combinators::{EventSource, Events, WeakEventSource};
pub use node::{EventValue, NodeId, NodeKind};
pub(crate) use node::{EventNode, GraphNode};
pub(crate) use scheduler::PropagationScheduler;
