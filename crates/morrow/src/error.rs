//! Engine fault types.

use std::sync::Arc;

use crate::value::Value;

/// Faults the resolution engine raises on its own behalf.
///
/// These never unwind; each one becomes the rejection reason of the future
/// whose resolution tripped it, wrapped in [`Value::Error`]. Faults raised by
/// user code (a handler or a thenable subscription returning `Err`) are not
/// represented here: the returned fault value itself is carried as the
/// rejection reason.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    /// A future was asked to adopt itself as its own settlement value
    #[error("future resolved with itself")]
    SelfReference,

    /// The resolution procedure was driven with a non-settled status.
    /// Internal defect; cannot be reached through the public surface
    #[error("future driven to an unsettled status")]
    InvalidTransition,
}

impl From<ResolveError> for Value {
    fn from(err: ResolveError) -> Self {
        Value::Error(Arc::new(err))
    }
}
