//! Combinators
//!
//! Handles to graph nodes and the constructors that wire new nodes to
//! existing ones. Constructors are reached through
//! [`Domain`](crate::transaction::Domain), which supplies the domain id every
//! input is checked against.

use std::fmt::Debug;
use std::ops::Deref;
use std::sync::{Arc, Weak};

use smallvec::SmallVec;

use super::node::{EventNode, EventValue, GraphNode, MapEvents, NodeId, NodeKind, Operator};
use crate::error::{BoxError, GraphError};
use crate::transaction::DomainId;

/// A reference-counted handle to a node producing events of type `E`.
///
/// Cloning the handle shares the node. The node, and everything upstream of
/// it, stays alive while any handle or downstream node refers to it.
pub struct Events<E: EventValue> {
    node: Arc<EventNode<E>>,
}

impl<E: EventValue> Events<E> {
    pub(crate) fn from_node(node: Arc<EventNode<E>>) -> Self {
        Self { node }
    }

    pub(crate) fn node(&self) -> &Arc<EventNode<E>> {
        &self.node
    }

    pub(crate) fn graph_node(&self) -> Arc<dyn GraphNode> {
        self.node.clone()
    }

    /// Get the node's ID.
    pub fn id(&self) -> NodeId {
        self.node.id()
    }

    /// Get the node's kind.
    pub fn kind(&self) -> NodeKind {
        self.node.kind()
    }

    /// Get the id of the domain the node was built in.
    pub fn domain_id(&self) -> DomainId {
        self.node.domain()
    }

    /// Number of observers currently attached to the node.
    pub fn observer_count(&self) -> usize {
        self.node.observer_count()
    }

    /// Whether two handles refer to the same node.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.node, &other.node)
    }
}

impl<E: EventValue> Clone for Events<E> {
    fn clone(&self) -> Self {
        Self {
            node: Arc::clone(&self.node),
        }
    }
}

impl<E: EventValue> Debug for Events<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Events")
            .field("id", &self.id())
            .field("kind", &self.kind())
            .field("domain", &self.domain_id())
            .finish()
    }
}

/// A handle to a source node. Events enter the graph only through sources.
///
/// Dereferences to [`Events`], so a source can be used wherever a stream is
/// expected.
pub struct EventSource<E: EventValue> {
    events: Events<E>,
}

impl<E: EventValue> EventSource<E> {
    /// Borrow the source as a plain stream handle.
    pub fn events(&self) -> &Events<E> {
        &self.events
    }

    /// Create a handle that does not keep the source alive.
    pub fn downgrade(&self) -> WeakEventSource<E> {
        WeakEventSource {
            id: self.id(),
            node: Arc::downgrade(self.events.node()),
        }
    }
}

impl<E: EventValue> Deref for EventSource<E> {
    type Target = Events<E>;

    fn deref(&self) -> &Events<E> {
        &self.events
    }
}

impl<E: EventValue> Clone for EventSource<E> {
    fn clone(&self) -> Self {
        Self {
            events: self.events.clone(),
        }
    }
}

impl<E: EventValue> Debug for EventSource<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSource")
            .field("id", &self.id())
            .field("domain", &self.domain_id())
            .finish()
    }
}

/// A non-owning handle to a source node.
///
/// Emitting through a weak handle whose source has been released fails with
/// [`UsageError::SourceReleased`](crate::error::UsageError::SourceReleased).
pub struct WeakEventSource<E: EventValue> {
    id: NodeId,
    node: Weak<EventNode<E>>,
}

impl<E: EventValue> WeakEventSource<E> {
    /// Id of the source this handle was created from.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Get a strong handle if the source is still alive.
    pub fn upgrade(&self) -> Option<EventSource<E>> {
        self.node.upgrade().map(|node| EventSource {
            events: Events::from_node(node),
        })
    }
}

impl<E: EventValue> Clone for WeakEventSource<E> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            node: Weak::clone(&self.node),
        }
    }
}

impl<E: EventValue> Debug for WeakEventSource<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeakEventSource")
            .field("id", &self.id)
            .field("alive", &(self.node.strong_count() > 0))
            .finish()
    }
}

/// Minimum number of inputs a merge node accepts.
const MIN_MERGE_INPUTS: usize = 2;

fn check_domain<E: EventValue>(domain: DomainId, input: &Events<E>) -> Result<(), GraphError> {
    if input.domain_id() == domain {
        Ok(())
    } else {
        Err(GraphError::DomainMismatch {
            node: input.id(),
            expected: domain,
            found: input.domain_id(),
        })
    }
}

pub(crate) fn make_source<E: EventValue>(domain: DomainId) -> EventSource<E> {
    EventSource {
        events: Events::from_node(EventNode::new(domain, Operator::Source)),
    }
}

pub(crate) fn make_merge<E: EventValue>(
    domain: DomainId,
    inputs: &[&Events<E>],
) -> Result<Events<E>, GraphError> {
    if inputs.len() < MIN_MERGE_INPUTS {
        return Err(GraphError::NotEnoughInputs {
            kind: NodeKind::Merge,
            required: MIN_MERGE_INPUTS,
            actual: inputs.len(),
        });
    }
    for input in inputs {
        check_domain(domain, input)?;
    }

    let nodes: SmallVec<[Arc<EventNode<E>>; 2]> =
        inputs.iter().map(|input| Arc::clone(input.node())).collect();
    Ok(Events::from_node(EventNode::new(domain, Operator::Merge(nodes))))
}

pub(crate) fn make_filter<E, P>(
    domain: DomainId,
    input: &Events<E>,
    predicate: P,
) -> Result<Events<E>, GraphError>
where
    E: EventValue,
    P: Fn(&E) -> Result<bool, BoxError> + Send + Sync + 'static,
{
    check_domain(domain, input)?;
    Ok(Events::from_node(EventNode::new(
        domain,
        Operator::Filter {
            input: Arc::clone(input.node()),
            predicate: Box::new(predicate),
        },
    )))
}

pub(crate) fn make_transform<I, O, F>(
    domain: DomainId,
    input: &Events<I>,
    func: F,
) -> Result<Events<O>, GraphError>
where
    I: EventValue,
    O: EventValue,
    F: Fn(&I) -> Result<O, BoxError> + Send + Sync + 'static,
{
    check_domain(domain, input)?;
    let mapping: MapEvents<I, O, F> = MapEvents::new(Arc::clone(input.node()), func);
    Ok(Events::from_node(EventNode::new(
        domain,
        Operator::Transform(Box::new(mapping)),
    )))
}
