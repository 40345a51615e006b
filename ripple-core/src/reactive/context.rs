//! Tracking Context
//!
//! The tracking context records which derived computation is currently
//! running. When a signal is read while a context is active, the signal
//! registers an edge from itself to that computation, which is how
//! dependencies are discovered without the caller declaring them.
//!
//! A thread-local stack supports nested computations (a derived value that
//! reads another derived value); the innermost entry is the one that
//! collects edges. The guard pops its entry on drop, so the stack stays
//! consistent even if a compute closure panics.

use std::cell::RefCell;

use super::DependentId;

thread_local! {
    static TRACK_STACK: RefCell<Vec<DependentId>> = const { RefCell::new(Vec::new()) };
}

/// Guard for an active tracking scope.
///
/// While the guard is alive, signal reads on this thread attribute their
/// edges to `dependent`. Dropping the guard ends the scope.
pub struct TrackingContext {
    dependent: DependentId,
}

impl TrackingContext {
    /// Enter a tracking scope for the given dependent computation.
    pub fn enter(dependent: DependentId) -> Self {
        TRACK_STACK.with(|stack| stack.borrow_mut().push(dependent));
        Self { dependent }
    }

    /// The dependent currently collecting edges on this thread, if any.
    pub fn current() -> Option<DependentId> {
        TRACK_STACK.with(|stack| stack.borrow().last().copied())
    }

    /// Whether any tracking scope is active on this thread.
    pub fn is_active() -> bool {
        TRACK_STACK.with(|stack| !stack.borrow().is_empty())
    }
}

impl Drop for TrackingContext {
    fn drop(&mut self) {
        TRACK_STACK.with(|stack| {
            let popped = stack.borrow_mut().pop();
            if let Some(id) = popped {
                debug_assert_eq!(
                    id, self.dependent,
                    "tracking scope mismatch: expected {:?}, got {:?}",
                    self.dependent, id
                );
            }
        });
    }
}
