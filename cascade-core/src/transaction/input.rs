//! Transaction input.
//!
//! Emitted values are not pushed into source buffers right away. They are
//! collected in an [`InputBatch`] and applied when the batch is committed,
//! while the domain's propagation lock is held. Batching therefore never
//! touches shared state and never blocks.

use std::sync::Arc;

use indexmap::IndexMap;
use tracing::trace;

use super::domain::{CommitReport, Domain, DomainId};
use crate::error::{TransactionError, UsageError};
use crate::graph::{EventNode, EventSource, EventValue, GraphNode, NodeId, WeakEventSource};

/// Anything events can be emitted through.
pub trait SourceRef<E: EventValue> {
    /// Resolve to a live source handle.
    fn resolve(&self) -> Result<EventSource<E>, UsageError>;
}

impl<E: EventValue> SourceRef<E> for EventSource<E> {
    fn resolve(&self) -> Result<EventSource<E>, UsageError> {
        Ok(self.clone())
    }
}

impl<E: EventValue> SourceRef<E> for WeakEventSource<E> {
    fn resolve(&self) -> Result<EventSource<E>, UsageError> {
        self.upgrade()
            .ok_or(UsageError::SourceReleased { node: self.id() })
    }
}

/// A single value waiting to be pushed into its source.
trait PendingInput: Send {
    fn seed(&self) -> Arc<dyn GraphNode>;

    fn apply(self: Box<Self>);
}

struct SourceInput<E> {
    node: Arc<EventNode<E>>,
    value: E,
}

impl<E: EventValue> PendingInput for SourceInput<E> {
    fn seed(&self) -> Arc<dyn GraphNode> {
        self.node.clone()
    }

    fn apply(self: Box<Self>) {
        self.node.push(self.value);
    }
}

/// Inputs of one pass, in emission order.
pub(crate) struct InputBatch {
    domain: DomainId,
    inputs: Vec<Box<dyn PendingInput>>,
}

impl InputBatch {
    pub(crate) fn new(domain: DomainId) -> Self {
        Self {
            domain,
            inputs: Vec::new(),
        }
    }

    pub(crate) fn push<E, S>(&mut self, source: &S, value: E) -> Result<(), UsageError>
    where
        E: EventValue,
        S: SourceRef<E> + ?Sized,
    {
        let source = source.resolve()?;
        if source.domain_id() != self.domain {
            return Err(UsageError::DomainMismatch {
                node: source.id(),
                expected: self.domain,
                found: source.domain_id(),
            });
        }

        self.inputs.push(Box::new(SourceInput {
            node: Arc::clone(source.node()),
            value,
        }));
        Ok(())
    }

    pub(crate) fn len(&self) -> usize {
        self.inputs.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }

    /// Push every value into its source. Returns the distinct seed nodes in
    /// order of their first emission.
    ///
    /// Must only be called while holding the domain's propagation lock.
    pub(crate) fn apply(self) -> Vec<Arc<dyn GraphNode>> {
        let mut seeds: IndexMap<NodeId, Arc<dyn GraphNode>> = IndexMap::new();
        for input in self.inputs {
            let seed = input.seed();
            seeds.entry(seed.id()).or_insert(seed);
            input.apply();
        }
        seeds.into_values().collect()
    }
}

/// An explicitly scoped transaction.
///
/// Every emission is buffered in the transaction and nothing propagates
/// until [`commit`](Transaction::commit). Dropping an uncommitted transaction
/// discards its inputs.
///
/// # Example
///
/// ```rust,ignore
/// let mut tx = domain.begin();
/// tx.emit(&left, 1)?;
/// tx.emit(&right, 2)?;
/// let report = tx.commit()?;   // one propagation pass
/// ```
pub struct Transaction {
    domain: Domain,
    batch: InputBatch,
}

impl Transaction {
    pub(crate) fn new(domain: Domain) -> Self {
        let batch = InputBatch::new(domain.id());
        Self { domain, batch }
    }

    /// The domain this transaction commits into.
    pub fn domain(&self) -> &Domain {
        &self.domain
    }

    /// Buffer an event for `source`.
    pub fn emit<E, S>(&mut self, source: &S, value: E) -> Result<(), UsageError>
    where
        E: EventValue,
        S: SourceRef<E> + ?Sized,
    {
        self.batch.push(source, value)
    }

    /// Number of buffered inputs.
    pub fn len(&self) -> usize {
        self.batch.len()
    }

    /// Whether nothing has been emitted yet.
    pub fn is_empty(&self) -> bool {
        self.batch.is_empty()
    }

    /// Propagate every buffered input in a single commit.
    ///
    /// Fails with [`UsageError::ReentrantCommit`] when called from inside a
    /// running commit on this thread.
    pub fn commit(mut self) -> Result<CommitReport, TransactionError> {
        let batch = self.take_batch();
        self.domain.commit_batch(batch)
    }

    pub(crate) fn take_batch(&mut self) -> InputBatch {
        std::mem::replace(&mut self.batch, InputBatch::new(self.domain.id()))
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.batch.is_empty() {
            trace!(
                domain = %self.domain.id(),
                inputs = self.batch.len(),
                "discarding uncommitted transaction"
            );
        }
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("domain", &self.domain.id())
            .field("inputs", &self.batch.len())
            .finish()
    }
}
