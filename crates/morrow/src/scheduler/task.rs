//! Microtask unit and its execution scope.

use std::sync::Arc;

/// Execution context carried with a task and restored around its action.
///
/// `enter` runs immediately before the action, `exit` immediately after.
/// `exit` also runs when the action panics, before the unwind continues,
/// so an error-isolation domain is never left entered.
pub trait TaskScope: Send + Sync {
    /// Called on the draining thread before the task's action runs.
    fn enter(&self);

    /// Called after the action returns or panics.
    fn exit(&self);
}

/// A zero-argument deferred action, run once on a later scheduler turn.
pub struct Task {
    action: Box<dyn FnOnce() + Send>,
    scope: Option<Arc<dyn TaskScope>>,
}

impl Task {
    /// Create a task from a plain action.
    pub fn new<F>(action: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Task {
            action: Box::new(action),
            scope: None,
        }
    }

    /// Create a task whose action runs inside `scope`.
    pub fn with_scope<F>(action: F, scope: Arc<dyn TaskScope>) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Task {
            action: Box::new(action),
            scope: Some(scope),
        }
    }

    /// Consume and run the action, entering and exiting the scope around it.
    pub(crate) fn run(self) {
        struct ExitOnDrop<'a>(&'a dyn TaskScope);

        impl Drop for ExitOnDrop<'_> {
            fn drop(&mut self) {
                self.0.exit();
            }
        }

        let Task { action, scope } = self;
        let _guard = scope.as_deref().map(|s| {
            s.enter();
            ExitOnDrop(s)
        });
        action();
    }
}
