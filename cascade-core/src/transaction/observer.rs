//! Observers and continuations.
//!
//! An observer is a consumer attached to a node. After a pass has been fully
//! evaluated, every node that fired calls its observers once with the events
//! of that pass. Observers never see a pass that was aborted.
//!
//! Observers receive a [`Continuation`]. Values emitted through it are not
//! propagated immediately; they become the input of the next pass of the same
//! commit, which starts once the current pass has been cleared.
//!
//! An observer must not commit directly, into this domain or any other:
//! it runs while the domain's propagation lock is held. Inputs for another
//! domain go through [`Continuation::defer`] and are committed after the
//! running commit has released its lock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;

use super::input::{InputBatch, SourceRef, Transaction};
use super::{Domain, DomainId};
use crate::error::UsageError;
use crate::graph::{EventValue, Events, GraphNode, NodeId};

/// Unique identifier for an attached observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

impl ObserverId {
    /// Generate a new unique observer ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ObserverId {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to an attached observer.
///
/// The handle keeps the observed node alive. The observer stays attached
/// until [`detach`](Observer::detach) is called or the node is released.
pub struct Observer {
    id: ObserverId,
    node: Arc<dyn GraphNode>,
}

impl Observer {
    pub(crate) fn new(id: ObserverId, node: Arc<dyn GraphNode>) -> Self {
        Self { id, node }
    }

    /// Get the observer's ID.
    pub fn id(&self) -> ObserverId {
        self.id
    }

    /// Id of the observed node.
    pub fn node_id(&self) -> NodeId {
        self.node.id()
    }

    /// Remove the observer from its node.
    ///
    /// Returns `false` if it was already removed. Safe to call from inside
    /// an observer callback; the removal takes effect from the next pass.
    pub fn detach(&self) -> bool {
        self.node.detach_observer(self.id)
    }
}

impl std::fmt::Debug for Observer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observer")
            .field("id", &self.id)
            .field("node", &self.node.id())
            .finish()
    }
}

/// Context handed to observers while a commit is running.
pub struct Continuation {
    domain: DomainId,
    batch: InputBatch,
    deferred: IndexMap<DomainId, Transaction>,
}

impl Continuation {
    pub(crate) fn new(domain: DomainId) -> Self {
        Self {
            domain,
            batch: InputBatch::new(domain),
            deferred: IndexMap::new(),
        }
    }

    /// Buffer an event for the next pass of the running commit.
    pub fn emit<E, S>(&mut self, source: &S, value: E) -> Result<(), UsageError>
    where
        E: EventValue,
        S: SourceRef<E> + ?Sized,
    {
        self.batch.push(source, value)
    }

    /// Transaction into `domain`, committed once the running commit has
    /// finished and released its lock.
    ///
    /// Repeated calls for the same domain within one pass return the same
    /// transaction.
    pub fn defer(&mut self, domain: &Domain) -> &mut Transaction {
        self.deferred
            .entry(domain.id())
            .or_insert_with(|| domain.begin())
    }

    /// Events `events` produced in the pass being observed.
    pub fn current_events<E: EventValue>(&self, events: &Events<E>) -> Result<Vec<E>, UsageError> {
        if events.domain_id() != self.domain {
            return Err(UsageError::DomainMismatch {
                node: events.id(),
                expected: self.domain,
                found: events.domain_id(),
            });
        }
        Ok(events.node().snapshot())
    }

    /// Number of inputs buffered for the next pass.
    pub fn len(&self) -> usize {
        self.batch.len()
    }

    /// Whether no follow-up pass is needed.
    pub fn is_empty(&self) -> bool {
        self.batch.is_empty()
    }

    /// Split into the next pass and the transactions deferred to later
    /// commits.
    pub(crate) fn into_parts(self) -> (InputBatch, Vec<Transaction>) {
        let deferred = self
            .deferred
            .into_values()
            .filter(|tx| !tx.is_empty())
            .collect();
        (self.batch, deferred)
    }
}

impl std::fmt::Debug for Continuation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Continuation")
            .field("domain", &self.domain)
            .field("inputs", &self.batch.len())
            .field("deferred", &self.deferred.len())
            .finish()
    }
}
