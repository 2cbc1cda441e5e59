//! Write-once futures.
//!
//! [`Promise`] is the deferred value. `then` derives new futures through
//! handler pairs, and the combinators (`chain`, `all`, `race`) compose whole
//! lists of heterogeneous elements. Every handler runs on a turn of the
//! owning [`Scheduler`](crate::scheduler::Scheduler), never synchronously
//! inside the call that triggered it.

mod combinators;
#[allow(clippy::module_inception)]
mod promise;

pub use promise::{Promise, Reject, Resolve, Status};
