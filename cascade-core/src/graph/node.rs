//! Graph Nodes
//!
//! This module defines the node type that lives in the event graph.
//!
//! A node owns its predecessors (strong `Arc` links held by its operator) and
//! knows its successors only through `Weak` back-references. The successor
//! list is used for fan-out during propagation and never keeps a node alive,
//! so dropping the last handle to a downstream node removes it from the graph.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use smallvec::SmallVec;

use crate::error::BoxError;
use crate::transaction::{Continuation, DomainId, ObserverId};

/// Values that can flow through the graph.
///
/// Implemented for every `Clone + Send + Sync + 'static` type.
pub trait EventValue: Clone + Send + Sync + 'static {}

impl<T> EventValue for T where T: Clone + Send + Sync + 'static {}

/// Unique identifier for a node in the event graph.
///
/// Ids are handed out in construction order. A node can only be built from
/// nodes that already exist, so a predecessor always has a smaller id than
/// any of its successors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(u64);

impl NodeId {
    /// Generate a new unique node ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The kind of node in the event graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// Externally fed. No predecessors.
    Source,

    /// Fan-in of two or more streams of the same event type.
    Merge,

    /// Passes on the events that satisfy a predicate.
    Filter,

    /// Maps every event to a new value, possibly of another type.
    Transform,
}

pub(crate) type Predicate<E> = Box<dyn Fn(&E) -> Result<bool, BoxError> + Send + Sync>;

pub(crate) type ObserverFn<E> = Box<dyn FnMut(&[E], &mut Continuation) + Send>;

/// Type-erased view of a node, used by the scheduler and the transaction
/// manager to walk a graph whose nodes carry different event types.
pub(crate) trait GraphNode: Send + Sync {
    fn id(&self) -> NodeId;

    fn kind(&self) -> NodeKind;

    fn domain(&self) -> DomainId;

    /// Distinct predecessor ids, in declaration order.
    fn predecessor_ids(&self) -> SmallVec<[NodeId; 2]>;

    /// Live successors. Released successors are pruned as a side effect.
    fn successors(&self) -> Vec<Arc<dyn GraphNode>>;

    fn link_successor(&self, id: NodeId, successor: Weak<dyn GraphNode>);

    /// Whether any predecessor (or, for a source, the node itself) holds
    /// events in the current pass.
    fn has_input(&self) -> bool;

    fn has_events(&self) -> bool;

    /// Run the node's operator over its predecessors' buffers and append the
    /// result to its own buffer. Returns the number of events appended.
    fn evaluate(&self) -> Result<usize, BoxError>;

    fn clear(&self);

    /// Call every attached observer with this pass's events.
    /// Returns the number of observers called.
    fn notify_observers(&self, continuation: &mut Continuation) -> usize;

    fn detach_observer(&self, id: ObserverId) -> bool;
}

/// Evaluation routine of a transform node, erased over the input type.
pub(crate) trait Mapping<O>: Send + Sync {
    fn input(&self) -> Arc<dyn GraphNode>;

    fn has_input(&self) -> bool;

    fn apply(&self, out: &mut Vec<O>) -> Result<(), BoxError>;
}

pub(crate) struct MapEvents<I, O, F> {
    input: Arc<EventNode<I>>,
    func: F,
    _output: PhantomData<fn() -> O>,
}

impl<I, O, F> MapEvents<I, O, F> {
    pub(crate) fn new(input: Arc<EventNode<I>>, func: F) -> Self {
        Self {
            input,
            func,
            _output: PhantomData,
        }
    }
}

impl<I, O, F> Mapping<O> for MapEvents<I, O, F>
where
    I: EventValue,
    O: EventValue,
    F: Fn(&I) -> Result<O, BoxError> + Send + Sync + 'static,
{
    fn input(&self) -> Arc<dyn GraphNode> {
        self.input.clone()
    }

    fn has_input(&self) -> bool {
        self.input.has_events()
    }

    fn apply(&self, out: &mut Vec<O>) -> Result<(), BoxError> {
        for event in self.input.snapshot() {
            out.push((self.func)(&event)?);
        }
        Ok(())
    }
}

/// The closed set of node operators.
pub(crate) enum Operator<E> {
    Source,
    Merge(SmallVec<[Arc<EventNode<E>>; 2]>),
    Filter {
        input: Arc<EventNode<E>>,
        predicate: Predicate<E>,
    },
    Transform(Box<dyn Mapping<E>>),
}

impl<E: EventValue> Operator<E> {
    fn kind(&self) -> NodeKind {
        match self {
            Operator::Source => NodeKind::Source,
            Operator::Merge(_) => NodeKind::Merge,
            Operator::Filter { .. } => NodeKind::Filter,
            Operator::Transform(_) => NodeKind::Transform,
        }
    }

    fn predecessors(&self) -> SmallVec<[Arc<dyn GraphNode>; 2]> {
        match self {
            Operator::Source => SmallVec::new(),
            Operator::Merge(inputs) => inputs
                .iter()
                .map(|input| input.clone() as Arc<dyn GraphNode>)
                .collect(),
            Operator::Filter { input, .. } => {
                let mut preds: SmallVec<[Arc<dyn GraphNode>; 2]> = SmallVec::new();
                preds.push(input.clone() as Arc<dyn GraphNode>);
                preds
            }
            Operator::Transform(mapping) => {
                let mut preds: SmallVec<[Arc<dyn GraphNode>; 2]> = SmallVec::new();
                preds.push(mapping.input());
                preds
            }
        }
    }
}

struct ObserverSlot<E> {
    id: ObserverId,
    callback: Arc<Mutex<ObserverFn<E>>>,
}

/// A node carrying events of type `E`.
pub(crate) struct EventNode<E> {
    id: NodeId,
    domain: DomainId,
    operator: Operator<E>,

    /// Events of the current pass. Empty outside a commit.
    buffer: Mutex<Vec<E>>,

    /// Non-owning back-references, tagged with the successor's id so that a
    /// successor is linked at most once.
    successors: Mutex<SmallVec<[(NodeId, Weak<dyn GraphNode>); 2]>>,

    observers: Mutex<Vec<ObserverSlot<E>>>,
}

impl<E: EventValue> EventNode<E> {
    /// Create a node and register it as a successor of its predecessors.
    pub(crate) fn new(domain: DomainId, operator: Operator<E>) -> Arc<Self> {
        let node = Arc::new(Self {
            id: NodeId::new(),
            domain,
            operator,
            buffer: Mutex::new(Vec::new()),
            successors: Mutex::new(SmallVec::new()),
            observers: Mutex::new(Vec::new()),
        });

        let weak: Weak<EventNode<E>> = Arc::downgrade(&node);
        let weak: Weak<dyn GraphNode> = weak;
        for pred in node.operator.predecessors() {
            pred.link_successor(node.id, weak.clone());
        }

        node
    }

    pub(crate) fn push(&self, event: E) {
        self.buffer.lock().push(event);
    }

    pub(crate) fn snapshot(&self) -> Vec<E> {
        self.buffer.lock().clone()
    }

    pub(crate) fn add_observer(&self, id: ObserverId, callback: ObserverFn<E>) {
        self.observers.lock().push(ObserverSlot {
            id,
            callback: Arc::new(Mutex::new(callback)),
        });
    }

    pub(crate) fn observer_count(&self) -> usize {
        self.observers.lock().len()
    }

    #[cfg(test)]
    pub(crate) fn successor_count(&self) -> usize {
        self.successors().len()
    }
}

impl<E: EventValue> GraphNode for EventNode<E> {
    fn id(&self) -> NodeId {
        self.id
    }

    fn kind(&self) -> NodeKind {
        self.operator.kind()
    }

    fn domain(&self) -> DomainId {
        self.domain
    }

    fn predecessor_ids(&self) -> SmallVec<[NodeId; 2]> {
        let mut ids: SmallVec<[NodeId; 2]> = SmallVec::new();
        for pred in self.operator.predecessors() {
            let id = pred.id();
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        ids
    }

    fn successors(&self) -> Vec<Arc<dyn GraphNode>> {
        let mut links = self.successors.lock();
        links.retain(|(_, weak)| weak.strong_count() > 0);
        links.iter().filter_map(|(_, weak)| weak.upgrade()).collect()
    }

    fn link_successor(&self, id: NodeId, successor: Weak<dyn GraphNode>) {
        let mut links = self.successors.lock();
        if !links.iter().any(|(linked, _)| *linked == id) {
            links.push((id, successor));
        }
    }

    fn has_input(&self) -> bool {
        match &self.operator {
            Operator::Source => self.has_events(),
            Operator::Merge(inputs) => inputs.iter().any(|input| input.has_events()),
            Operator::Filter { input, .. } => input.has_events(),
            Operator::Transform(mapping) => mapping.has_input(),
        }
    }

    fn has_events(&self) -> bool {
        !self.buffer.lock().is_empty()
    }

    fn evaluate(&self) -> Result<usize, BoxError> {
        // Inputs are snapshotted so no predecessor lock is held while user
        // code runs.
        let produced = match &self.operator {
            Operator::Source => return Ok(self.buffer.lock().len()),
            Operator::Merge(inputs) => {
                let mut out = Vec::new();
                for input in inputs {
                    out.extend(input.snapshot());
                }
                out
            }
            Operator::Filter { input, predicate } => {
                let mut out = Vec::new();
                for event in input.snapshot() {
                    if predicate(&event)? {
                        out.push(event);
                    }
                }
                out
            }
            Operator::Transform(mapping) => {
                let mut out = Vec::new();
                mapping.apply(&mut out)?;
                out
            }
        };

        let count = produced.len();
        self.buffer.lock().extend(produced);
        Ok(count)
    }

    fn clear(&self) {
        self.buffer.lock().clear();
    }

    fn notify_observers(&self, continuation: &mut Continuation) -> usize {
        // Snapshot the slots so callbacks may attach or detach observers.
        let callbacks: Vec<_> = self
            .observers
            .lock()
            .iter()
            .map(|slot| slot.callback.clone())
            .collect();
        if callbacks.is_empty() {
            return 0;
        }

        let events = self.snapshot();
        if events.is_empty() {
            return 0;
        }

        for slot in &callbacks {
            let mut guard = slot.lock();
            let callback: &mut ObserverFn<E> = &mut guard;
            callback(&events, continuation);
        }
        callbacks.len()
    }

    fn detach_observer(&self, id: ObserverId) -> bool {
        let mut observers = self.observers.lock();
        let before = observers.len();
        observers.retain(|slot| slot.id != id);
        observers.len() != before
    }
}
