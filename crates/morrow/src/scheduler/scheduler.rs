//! Queue and drain machinery.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;

use super::backend::{StepBackend, ThreadBackend, TickBackend};
use super::panic_message;
use super::task::Task;
use crate::report::{RejectionSink, StderrSink};

/// What a drain does with a panic escaping a task.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FaultPolicy {
    /// Re-request a drain for the remaining tasks, then resume the unwind.
    /// The fault reaches whoever drives the backend; for [`StepBackend`]
    /// that is the pumping caller. Queued order is preserved.
    Fatal,

    /// Report the fault to stderr and keep draining.
    Soft,
}

/// Cooperative FIFO microtask scheduler.
///
/// A cheaply clonable handle; all clones share one queue, backend, fault
/// policy, and rejection sink. Every future that defers work holds one.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    /// Queue plus the drain-pending flag, guarded together
    queue: Mutex<TaskQueue>,

    /// Source of turns
    backend: Arc<dyn TickBackend>,

    /// Panic handling during drains
    policy: FaultPolicy,

    /// Unhandled-rejection reporting target
    sink: Arc<dyn RejectionSink>,
}

struct TaskQueue {
    tasks: VecDeque<Task>,

    /// True while a drain is requested or running; suppresses duplicate
    /// backend requests
    tick_pending: bool,
}

impl Scheduler {
    /// Scheduler over a fresh [`ThreadBackend`], Soft policy, stderr sink.
    pub fn new() -> Self {
        Self::with_backend(Arc::new(ThreadBackend::new()), FaultPolicy::Soft)
    }

    /// Scheduler over a fresh manual pump, Fatal policy, stderr sink.
    ///
    /// Nothing runs until the returned backend is pumped, which makes every
    /// turn deterministic. The natural configuration for tests and
    /// host-managed embeddings.
    pub fn manual() -> (Self, Arc<StepBackend>) {
        let backend = Arc::new(StepBackend::new());
        let scheduler = Self::with_backend(backend.clone(), FaultPolicy::Fatal);
        (scheduler, backend)
    }

    /// Scheduler over an explicit backend and fault policy.
    pub fn with_backend(backend: Arc<dyn TickBackend>, policy: FaultPolicy) -> Self {
        Self::with_backend_and_sink(backend, policy, Arc::new(StderrSink))
    }

    /// Fully explicit constructor.
    pub fn with_backend_and_sink(
        backend: Arc<dyn TickBackend>,
        policy: FaultPolicy,
        sink: Arc<dyn RejectionSink>,
    ) -> Self {
        Scheduler {
            inner: Arc::new(SchedulerInner {
                queue: Mutex::new(TaskQueue {
                    tasks: VecDeque::new(),
                    tick_pending: false,
                }),
                backend,
                policy,
                sink,
            }),
        }
    }

    /// Append `task`; request a drain if none is pending.
    ///
    /// The task never runs inside this call, even when the caller is itself
    /// a task in the current drain.
    pub fn schedule(&self, task: Task) {
        let request = {
            let mut queue = self.inner.queue.lock();
            queue.tasks.push_back(task);
            !std::mem::replace(&mut queue.tick_pending, true)
        };

        if request {
            self.request_drain();
        }
    }

    /// Number of queued, not-yet-run tasks.
    pub fn pending_tasks(&self) -> usize {
        self.inner.queue.lock().tasks.len()
    }

    /// This scheduler's fault policy.
    pub fn fault_policy(&self) -> FaultPolicy {
        self.inner.policy
    }

    /// Sink receiving unhandled-rejection reports.
    pub(crate) fn rejection_sink(&self) -> Arc<dyn RejectionSink> {
        self.inner.sink.clone()
    }

    fn request_drain(&self) {
        let this = self.clone();
        self.inner.backend.request_tick(Box::new(move || this.drain()));
    }

    /// Pop and run tasks in FIFO order until the queue is empty.
    ///
    /// The final emptiness check and the flag clear happen under one lock,
    /// so a schedule racing with the end of a drain either lands before the
    /// check (and runs now) or finds the flag clear (and requests its own
    /// drain). No task is ever stranded.
    fn drain(&self) {
        loop {
            let task = {
                let mut queue = self.inner.queue.lock();
                match queue.tasks.pop_front() {
                    Some(task) => task,
                    None => {
                        queue.tick_pending = false;
                        return;
                    }
                }
            };

            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(move || task.run())) {
                match self.inner.policy {
                    FaultPolicy::Soft => {
                        eprintln!(
                            "morrow: task fault contained: {}",
                            panic_message(payload.as_ref())
                        );
                    }
                    FaultPolicy::Fatal => {
                        // The pending flag stays set for the drain requested
                        // here; remaining tasks keep their order on that turn.
                        self.request_drain();
                        panic::resume_unwind(payload);
                    }
                }
            }
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}
