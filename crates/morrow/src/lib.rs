//! Morrow
//!
//! This crate provides a write-once future engine driven by a cooperative
//! microtask scheduler:
//! - **Value**: Dynamic settlement values, invocables, and foreign thenables (`value` module)
//! - **Promise**: Write-once futures, `then` derivation, and the chain/all/race combinators (`promise` module)
//! - **Scheduler**: FIFO microtask queue over pluggable tick backends (`scheduler` module)
//! - **Report**: Unhandled-rejection sinks (`report` module)
//!
//! # Example
//!
//! ```rust,ignore
//! use morrow::{NativeFn, Promise, Scheduler, Value};
//!
//! let (scheduler, pump) = Scheduler::manual();
//! let p = Promise::pending(&scheduler);
//!
//! let doubled = p.then(
//!     Some(NativeFn::new(|v| Ok(Value::Int(v.as_int().unwrap_or(0) * 2)))),
//!     None,
//! );
//!
//! p.resolve(21);
//! pump.run_until_idle();
//! assert_eq!(doubled.result(), Some(Ok(Value::Int(42))));
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

// ============================================================================
// Core Modules
// ============================================================================

/// Engine fault taxonomy
pub mod error;

/// Write-once futures and combinators
pub mod promise;

/// Unhandled-rejection reporting
pub mod report;

/// Microtask scheduler and tick backends
pub mod scheduler;

/// Dynamic settlement values
pub mod value;

// ============================================================================
// Public API Re-exports
// ============================================================================

pub use error::ResolveError;
pub use promise::{Promise, Reject, Resolve, Status};
pub use report::{NullSink, RejectionSink, StderrSink};
pub use scheduler::{
    FaultPolicy, Scheduler, StepBackend, Task, TaskScope, ThreadBackend, TickBackend, TickFn,
};
pub use value::{NativeFn, SettleFn, Thenable, Value};
