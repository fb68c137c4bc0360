//! Transactions
//!
//! This module implements the transaction manager: the protocol for
//! batching inputs and committing them to the graph as one atomic update.
//!
//! # Lifecycles
//!
//! - **Ad-hoc**: [`Domain::emit`] opens a one-shot transaction, adds the
//!   input and commits it immediately.
//! - **Explicit**: [`Domain::begin`] returns a [`Transaction`] that collects
//!   any number of inputs until [`Transaction::commit`]. The closure form
//!   [`Domain::transaction`] commits when the closure returns.
//! - **Continuation**: observers receive a [`Continuation`] while a commit is
//!   running. Inputs emitted through it are absorbed into the running commit
//!   as its next pass instead of starting a new transaction.
//! - **Deferred**: [`Continuation::defer`] collects inputs for another domain.
//!   They are committed as separate transactions once the running commit has
//!   released its lock. Committing directly from inside a commit is rejected
//!   for every domain, since two threads doing so in opposite directions
//!   would each wait on the other's lock.
//!
//! # Implementation Notes
//!
//! Batching state is always passed explicitly. The only thread-local state is
//! the commit marker in `context`, used to reject nested commits and to let
//! reads inside a commit see the live buffers.

mod context;
mod domain;
mod input;
mod observer;

pub use domain::{CommitReport, Domain, DomainId, TransactionId};
pub use input::{SourceRef, Transaction};
pub use observer::{Continuation, Observer, ObserverId};
