//! Commit Context
//!
//! Tracks which domains are committing on the current thread.
//!
//! # Implementation
//!
//! We use a thread-local stack of domain ids. A commit pushes its domain when
//! it takes the propagation lock and pops it when the returned guard is
//! dropped, including during unwinding.
//!
//! The stack answers two questions:
//!
//! - Is this thread about to start a commit while already inside one? Into
//!   the same domain that would deadlock on its own lock. Into another domain
//!   it could deadlock against a thread committing in the opposite direction.
//!   Either way it is reported as an error.
//! - Is a read of a node's buffer happening inside that domain's commit? Then
//!   the buffer is read directly instead of waiting for the lock.
//!
//! Batching itself does not live here. Inputs are collected in explicit
//! `Transaction` and `Continuation` values.

use std::cell::RefCell;

use super::DomainId;

thread_local! {
    static COMMIT_STACK: RefCell<Vec<DomainId>> = const { RefCell::new(Vec::new()) };
}

/// Guard that pops the context when dropped.
pub(crate) struct CommitContext {
    domain: DomainId,
}

impl CommitContext {
    /// Mark `domain` as committing on this thread until the guard is dropped.
    pub(crate) fn enter(domain: DomainId) -> Self {
        COMMIT_STACK.with(|stack| stack.borrow_mut().push(domain));
        Self { domain }
    }

    /// Check whether `domain` is committing on this thread.
    pub(crate) fn is_active(domain: DomainId) -> bool {
        COMMIT_STACK.with(|stack| stack.borrow().contains(&domain))
    }

    /// Number of commits nested on this thread.
    pub(crate) fn depth() -> usize {
        COMMIT_STACK.with(|stack| stack.borrow().len())
    }
}

impl Drop for CommitContext {
    fn drop(&mut self) {
        COMMIT_STACK.with(|stack| {
            let popped = stack.borrow_mut().pop();

            if let Some(domain) = popped {
                debug_assert_eq!(
                    domain, self.domain,
                    "CommitContext mismatch: expected {:?}, got {:?}",
                    self.domain, domain
                );
            }
        });
    }
}
