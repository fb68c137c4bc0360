//! Domain
//!
//! A domain is an independent family of nodes together with the machinery
//! that commits transactions into it.
//!
//! # Commit Protocol
//!
//! 1. Refuse to start if this thread is already inside any commit. A commit
//!    only ever waits for one lock, so two domains cannot wait on each other.
//! 2. Take the domain's propagation lock. Commits from other threads queue
//!    here, so passes never interleave on shared nodes.
//! 3. Push the batched inputs into their sources.
//! 4. Plan and evaluate the pass with the propagation scheduler.
//! 5. Call the observers of every node that fired, in evaluation order.
//! 6. Clear every planned node's buffer. This also happens when evaluation
//!    fails or an observer panics.
//! 7. If observers emitted through their [`Continuation`], repeat from step 3
//!    with those inputs.
//! 8. Release the lock, then commit the transactions observers deferred to
//!    other domains, one at a time.
//!
//! # Thread Safety
//!
//! `Domain` is a cheap handle (`Arc` inside) and can be shared across
//! threads. Each thread batches into its own [`Transaction`] values; only the
//! commit itself is serialized.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, trace, warn};

use super::context::CommitContext;
use super::input::{InputBatch, SourceRef, Transaction};
use super::observer::{Continuation, Observer, ObserverId};
use crate::config::DomainConfig;
use crate::error::{BoxError, ConfigError, GraphError, PropagationError, TransactionError, UsageError};
use crate::graph::combinators::{make_filter, make_merge, make_source, make_transform};
use crate::graph::{EventSource, EventValue, Events, GraphNode, NodeId, PropagationScheduler};

/// Unique identifier for a domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DomainId(u64);

impl DomainId {
    /// Generate a new unique domain ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for DomainId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for DomainId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a committed transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct TransactionId(u64);

impl TransactionId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Summary of a successful commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitReport {
    pub transaction: TransactionId,

    /// Propagation passes run: one, plus one per continuation.
    /// Zero when nothing was emitted.
    pub passes: usize,

    /// Values pushed into sources, across all passes.
    pub inputs: usize,

    /// Nodes that fired, sources included, across all passes.
    pub nodes_evaluated: usize,

    /// Events appended by non-source nodes, across all passes.
    pub events_produced: usize,

    /// Observer invocations, across all passes.
    pub observers_notified: usize,

    /// Deferred transactions committed after this one released its lock,
    /// including those deferred by them in turn.
    pub deferred: usize,
}

impl CommitReport {
    fn new(transaction: TransactionId) -> Self {
        Self {
            transaction,
            passes: 0,
            inputs: 0,
            nodes_evaluated: 0,
            events_produced: 0,
            observers_notified: 0,
            deferred: 0,
        }
    }
}

/// Clears the buffers of every node touched by a pass when dropped.
struct PassGuard {
    nodes: Vec<Arc<dyn GraphNode>>,
}

impl PassGuard {
    fn new(nodes: Vec<Arc<dyn GraphNode>>) -> Self {
        Self { nodes }
    }

    fn track(&mut self, nodes: &[Arc<dyn GraphNode>]) {
        self.nodes.extend(nodes.iter().cloned());
    }
}

impl Drop for PassGuard {
    fn drop(&mut self) {
        for node in &self.nodes {
            node.clear();
        }
    }
}

struct DomainInner {
    id: DomainId,
    config: DomainConfig,

    /// Held for the whole duration of a commit.
    propagation: Mutex<()>,
}

/// An independent node family and its transaction manager.
///
/// # Example
///
/// ```rust,ignore
/// let domain = Domain::new();
/// let clicks = domain.source::<i32>();
/// let positive = domain.filter(&clicks, |x| *x > 0)?;
/// let doubled = domain.transform(&positive, |x| x * 2)?;
///
/// let _observer = domain.observe(&doubled, |events, _| println!("{events:?}"))?;
/// domain.emit(&clicks, 3)?;   // prints [6]
/// ```
#[derive(Clone)]
pub struct Domain {
    inner: Arc<DomainInner>,
}

static GLOBAL_DOMAIN: OnceLock<Domain> = OnceLock::new();

impl Domain {
    /// Create a domain with the default configuration.
    pub fn new() -> Self {
        Self::from_config(DomainConfig::default())
    }

    /// Create a domain from a validated configuration.
    pub fn with_config(config: DomainConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::from_config(config))
    }

    /// The process-wide domain, created on first use.
    pub fn global() -> &'static Domain {
        GLOBAL_DOMAIN.get_or_init(|| Self::from_config(DomainConfig::default().with_name("global")))
    }

    fn from_config(config: DomainConfig) -> Self {
        Self {
            inner: Arc::new(DomainInner {
                id: DomainId::new(),
                config,
                propagation: Mutex::new(()),
            }),
        }
    }

    /// Get the domain's ID.
    pub fn id(&self) -> DomainId {
        self.inner.id
    }

    /// Get the domain's configuration.
    pub fn config(&self) -> &DomainConfig {
        &self.inner.config
    }

    /// Whether this thread is currently inside a commit of this domain.
    pub fn is_committing(&self) -> bool {
        CommitContext::is_active(self.id())
    }

    // ------------------------------------------------------------------------
    // Graph construction
    // ------------------------------------------------------------------------

    /// Create a new source node.
    pub fn source<E: EventValue>(&self) -> EventSource<E> {
        make_source(self.id())
    }

    /// Merge two or more streams. Events are appended in the order the
    /// inputs are given here.
    pub fn merge<E: EventValue>(&self, inputs: &[&Events<E>]) -> Result<Events<E>, GraphError> {
        make_merge(self.id(), inputs)
    }

    /// Keep the events for which `predicate` holds.
    ///
    /// The predicate may be run more than once for the same event and must
    /// not have observable side effects.
    pub fn filter<E, P>(&self, input: &Events<E>, predicate: P) -> Result<Events<E>, GraphError>
    where
        E: EventValue,
        P: Fn(&E) -> bool + Send + Sync + 'static,
    {
        make_filter(self.id(), input, move |event: &E| Ok(predicate(event)))
    }

    /// Like [`filter`](Domain::filter), with a predicate that can fail.
    /// A failure aborts the transaction.
    pub fn try_filter<E, P, Error>(
        &self,
        input: &Events<E>,
        predicate: P,
    ) -> Result<Events<E>, GraphError>
    where
        E: EventValue,
        P: Fn(&E) -> Result<bool, Error> + Send + Sync + 'static,
        Error: Into<BoxError>,
    {
        make_filter(self.id(), input, move |event: &E| {
            predicate(event).map_err(Into::into)
        })
    }

    /// Map every event through `func`.
    pub fn transform<I, O, F>(&self, input: &Events<I>, func: F) -> Result<Events<O>, GraphError>
    where
        I: EventValue,
        O: EventValue,
        F: Fn(&I) -> O + Send + Sync + 'static,
    {
        make_transform(self.id(), input, move |event: &I| Ok(func(event)))
    }

    /// Like [`transform`](Domain::transform), with a mapping that can fail.
    /// A failure aborts the transaction and discards its output.
    pub fn try_transform<I, O, F, Error>(
        &self,
        input: &Events<I>,
        func: F,
    ) -> Result<Events<O>, GraphError>
    where
        I: EventValue,
        O: EventValue,
        F: Fn(&I) -> Result<O, Error> + Send + Sync + 'static,
        Error: Into<BoxError>,
    {
        make_transform(self.id(), input, move |event: &I| {
            func(event).map_err(Into::into)
        })
    }

    /// Attach an observer to `events`.
    ///
    /// The callback runs once per pass in which the node fired, after the
    /// whole pass has been evaluated.
    pub fn observe<E, F>(&self, events: &Events<E>, callback: F) -> Result<Observer, GraphError>
    where
        E: EventValue,
        F: FnMut(&[E], &mut Continuation) + Send + 'static,
    {
        if events.domain_id() != self.id() {
            return Err(GraphError::DomainMismatch {
                node: events.id(),
                expected: self.id(),
                found: events.domain_id(),
            });
        }

        let id = ObserverId::new();
        events.node().add_observer(id, Box::new(callback));
        Ok(Observer::new(id, events.graph_node()))
    }

    // ------------------------------------------------------------------------
    // Transactions
    // ------------------------------------------------------------------------

    /// Emit a single event in its own transaction and commit it immediately.
    ///
    /// Blocks while another thread is committing into this domain. Fails
    /// with [`UsageError::ReentrantCommit`] when called from an observer; use
    /// the observer's [`Continuation`] instead.
    pub fn emit<E, S>(&self, source: &S, value: E) -> Result<CommitReport, TransactionError>
    where
        E: EventValue,
        S: SourceRef<E> + ?Sized,
    {
        let mut batch = InputBatch::new(self.id());
        batch.push(source, value)?;
        self.commit_batch(batch)
    }

    /// Open an explicit transaction.
    pub fn begin(&self) -> Transaction {
        Transaction::new(self.clone())
    }

    /// Run `scope` against a fresh transaction and commit it if the scope
    /// succeeds. If the scope fails nothing is committed.
    pub fn transaction<F>(&self, scope: F) -> Result<CommitReport, TransactionError>
    where
        F: FnOnce(&mut Transaction) -> Result<(), UsageError>,
    {
        let mut tx = self.begin();
        scope(&mut tx)?;
        tx.commit()
    }

    /// Read the events `events` holds in the current pass.
    ///
    /// Only a commit of this domain running on the calling thread can see
    /// events. Everywhere else the result is empty, and no lock is taken.
    pub fn current_events<E: EventValue>(&self, events: &Events<E>) -> Result<Vec<E>, UsageError> {
        self.check_member(events.id(), events.domain_id())?;

        if self.is_committing() {
            Ok(events.node().snapshot())
        } else {
            Ok(Vec::new())
        }
    }

    fn check_member(&self, node: NodeId, found: DomainId) -> Result<(), UsageError> {
        if found == self.id() {
            Ok(())
        } else {
            Err(UsageError::DomainMismatch {
                node,
                expected: self.id(),
                found,
            })
        }
    }

    pub(crate) fn commit_batch(&self, batch: InputBatch) -> Result<CommitReport, TransactionError> {
        if CommitContext::depth() > 0 {
            return Err(UsageError::ReentrantCommit { domain: self.id() }.into());
        }

        let (mut report, deferred) = self.commit_exclusive(batch)?;
        report.deferred = self.commit_deferred(report.transaction, deferred)?;
        Ok(report)
    }

    /// Run every pass of one commit under the propagation lock. Returns the
    /// report and the transactions observers deferred to later commits.
    fn commit_exclusive(
        &self,
        batch: InputBatch,
    ) -> Result<(CommitReport, Vec<Transaction>), TransactionError> {
        let transaction = TransactionId::next();
        let mut report = CommitReport::new(transaction);
        if batch.is_empty() {
            trace!(domain = %self.config().name, %transaction, "empty commit");
            return Ok((report, Vec::new()));
        }

        let _lock = self.inner.propagation.lock();
        let _context = CommitContext::enter(self.id());
        debug!(
            domain = %self.config().name,
            %transaction,
            inputs = batch.len(),
            "commit started"
        );

        let mut batch = batch;
        let mut deferred = Vec::new();
        loop {
            report.passes += 1;
            report.inputs += batch.len();

            let continuation = self
                .run_pass(batch, &mut report)
                .map_err(|err| {
                    warn!(domain = %self.config().name, %transaction, error = %err, "pass aborted");
                    err
                })?;
            let (next, later) = continuation.into_parts();
            deferred.extend(later);

            if next.is_empty() {
                break;
            }

            let limit = self.config().max_continuations;
            if report.passes > limit {
                warn!(
                    domain = %self.config().name,
                    %transaction,
                    limit,
                    "continuation limit reached"
                );
                return Err(PropagationError::ContinuationLimit { limit }.into());
            }

            trace!(%transaction, inputs = next.len(), "continuing commit");
            batch = next;
        }

        debug!(
            domain = %self.config().name,
            %transaction,
            passes = report.passes,
            nodes_evaluated = report.nodes_evaluated,
            deferred = deferred.len(),
            "commit finished"
        );
        Ok((report, deferred))
    }

    /// Commit deferred transactions in the order they were deferred. Runs
    /// with no lock held, so each commit takes only its own domain's lock.
    ///
    /// The chain is bounded by `max_continuations`. On failure the remaining
    /// transactions are discarded.
    fn commit_deferred(
        &self,
        origin: TransactionId,
        deferred: Vec<Transaction>,
    ) -> Result<usize, TransactionError> {
        let limit = self.config().max_continuations;
        let mut queue = VecDeque::from(deferred);
        let mut committed = 0;

        while let Some(mut tx) = queue.pop_front() {
            if committed >= limit {
                warn!(
                    domain = %self.config().name,
                    transaction = %origin,
                    limit,
                    "deferred commit limit reached"
                );
                return Err(PropagationError::ContinuationLimit { limit }.into());
            }

            let batch = tx.take_batch();
            let (report, more) = tx.domain().commit_exclusive(batch)?;
            trace!(
                transaction = %origin,
                deferred = %report.transaction,
                domain = %tx.domain().config().name,
                "committed deferred transaction"
            );
            committed += 1;
            queue.extend(more);
        }

        Ok(committed)
    }

    /// Run one pass and return what observers emitted during it.
    fn run_pass(
        &self,
        batch: InputBatch,
        report: &mut CommitReport,
    ) -> Result<Continuation, PropagationError> {
        let seeds = batch.apply();
        let mut guard = PassGuard::new(seeds.clone());

        let plan = PropagationScheduler::plan(&seeds)?;
        guard.track(&plan);

        let stats = PropagationScheduler::run(&plan)?;
        report.nodes_evaluated += stats.nodes_evaluated;
        report.events_produced += stats.events_produced;

        let mut continuation = Continuation::new(self.id());
        for node in &plan {
            if node.has_events() {
                report.observers_notified += node.notify_observers(&mut continuation);
            }
        }

        Ok(continuation)
    }
}

impl Default for Domain {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Domain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Domain")
            .field("id", &self.id())
            .field("name", &self.config().name)
            .finish()
    }
}
