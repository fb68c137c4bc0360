//! Error Types
//!
//! Errors are split by the moment they are detected:
//!
//! - [`GraphError`]: building a node from invalid inputs. Nothing is linked.
//! - [`PropagationError`]: a pass failed while evaluating the graph. The pass
//!   is aborted and every buffer it touched is cleared.
//! - [`UsageError`]: the engine was called in a way it cannot honor.
//!
//! [`TransactionError`] is what committing returns and wraps the last two.

use thiserror::Error;

use crate::graph::{NodeId, NodeKind};
use crate::transaction::DomainId;

/// Error type produced by fallible predicates and mapping functions.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors raised while constructing graph nodes.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("{kind:?} node requires at least {required} inputs, got {actual}")]
    NotEnoughInputs {
        kind: NodeKind,
        required: usize,
        actual: usize,
    },

    #[error("node {node} belongs to domain {found}, expected domain {expected}")]
    DomainMismatch {
        node: NodeId,
        expected: DomainId,
        found: DomainId,
    },
}

/// Errors raised while a commit walks the graph.
#[derive(Debug, Error)]
pub enum PropagationError {
    #[error("{kind:?} node {node} failed during evaluation: {source}")]
    Evaluation {
        node: NodeId,
        kind: NodeKind,
        #[source]
        source: BoxError,
    },

    #[error("dependency cycle detected, {unresolved} nodes could not be ordered")]
    CycleDetected { unresolved: usize },

    #[error("observers kept emitting after {limit} continuations")]
    ContinuationLimit { limit: usize },
}

/// Errors raised when the engine is misused.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum UsageError {
    #[error("source {node} was released before the event could be emitted")]
    SourceReleased { node: NodeId },

    #[error("node {node} belongs to domain {found}, not domain {expected}")]
    DomainMismatch {
        node: NodeId,
        expected: DomainId,
        found: DomainId,
    },

    #[error("cannot commit into domain {domain} from inside a running commit")]
    ReentrantCommit { domain: DomainId },
}

/// Errors returned by committing a transaction.
#[derive(Debug, Error)]
pub enum TransactionError {
    #[error(transparent)]
    Propagation(#[from] PropagationError),

    #[error(transparent)]
    Usage(#[from] UsageError),
}

impl TransactionError {
    /// The failing node, if the transaction was aborted by an evaluation error.
    pub fn failed_node(&self) -> Option<NodeId> {
        match self {
            Self::Propagation(PropagationError::Evaluation { node, .. }) => Some(*node),
            _ => None,
        }
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    ValidationError(String),
}
