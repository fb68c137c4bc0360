//! Cascade Core
//!
//! This crate provides the core runtime for the Cascade event propagation
//! engine. It implements:
//!
//! - A graph of event combinators (sources, merges, filters, transforms)
//! - Glitch-free, topologically ordered propagation
//! - Transactions that batch many emissions into one atomic update
//! - Observers, and continuations for emissions made while observing
//!
//! Events only exist for the duration of the transaction that produced them.
//! Outside a commit every node's buffer is empty.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `graph`: Nodes, combinators and the propagation scheduler
//! - `transaction`: Domains, transactions, observers and the commit protocol
//! - `config`: Domain configuration
//! - `error`: Error types
//!
//! # Example
//!
//! ```rust,ignore
//! use cascade_core::Domain;
//!
//! let domain = Domain::new();
//! let left = domain.source::<i32>();
//! let right = domain.source::<i32>();
//! let both = domain.merge(&[left.events(), right.events()])?;
//!
//! let _observer = domain.observe(&both, |events, _| {
//!     println!("{events:?}");
//! })?;
//!
//! // Batch two emissions into one transaction
//! domain.transaction(|tx| {
//!     tx.emit(&left, 1)?;
//!     tx.emit(&right, 2)?;
//!     Ok(())
//! })?;
//! // Observer runs once, prints: "[1, 2]"
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod transaction;

pub use config::DomainConfig;
pub use error::{BoxError, ConfigError, GraphError, PropagationError, TransactionError, UsageError};
pub use graph::{EventSource, EventValue, Events, NodeId, NodeKind, WeakEventSource};
pub use transaction::{
    CommitReport, Continuation, Domain, DomainId, Observer, ObserverId, SourceRef, Transaction,
    TransactionId,
};
