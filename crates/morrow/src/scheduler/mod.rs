//! Cooperative FIFO microtask scheduling.
//!
//! One queue, one drain, strict FIFO. The central guarantee: a task never
//! runs synchronously inside the call that scheduled it. Turns are supplied
//! by a pluggable [`TickBackend`]; [`ThreadBackend`] serves them from a
//! dedicated thread, [`StepBackend`] hands the pump to the embedder.

mod backend;
#[allow(clippy::module_inception)]
mod scheduler;
mod task;

pub use backend::{StepBackend, ThreadBackend, TickBackend, TickFn};
pub use scheduler::{FaultPolicy, Scheduler};
pub use task::{Task, TaskScope};

use std::any::Any;

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}
