//! The write-once future and its resolution procedure.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::ResolveError;
use crate::scheduler::{Scheduler, Task};
use crate::value::{NativeFn, SettleFn, Thenable, Value};

/// Settlement state of a future.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Status {
    /// Not yet settled
    Pending,
    /// Settled with a fulfillment value
    Fulfilled,
    /// Settled with a rejection reason
    Rejected,
}

/// Handler pair registered through `then`, parked on the derived future
/// until its upstream outcome arrives.
struct Reaction {
    on_fulfilled: Option<NativeFn>,
    on_rejected: Option<NativeFn>,
    /// Accepted for structural compatibility; the engine never fires
    /// progress events
    #[allow(dead_code)]
    on_progress: Option<NativeFn>,
}

/// Outcome of one pass through the resolution pipeline.
enum Resolved {
    /// Commit this settlement now
    Commit(Status, Value),
    /// Waiting on an upstream future or thenable; nothing to commit yet
    Deferred,
    /// The pass itself faulted; commit a rejection with this reason
    Fault(Value),
}

/// How the resolution procedure treats a proposed fulfillment value.
enum Settlement {
    /// Another future of this engine; adopt its settlement
    Native(Promise),
    /// Foreign thenable; assimilate through its subscription routine
    Foreign(Arc<dyn Thenable>),
    /// Plain data; commit as-is
    Ordinary(Value),
}

impl Settlement {
    fn classify(value: Value) -> Settlement {
        match value {
            Value::Promise(p) => Settlement::Native(p),
            Value::Thenable(t) => Settlement::Foreign(t),
            other => Settlement::Ordinary(other),
        }
    }
}

struct Shared {
    status: Status,
    value: Value,
    /// Derived futures awaiting this one's settlement, FIFO
    queue: VecDeque<Promise>,
    /// This future's own parked handler record; taken by the first
    /// resolution attempt and never restored
    reaction: Option<Reaction>,
}

struct PromiseInner {
    scheduler: Scheduler,
    shared: Mutex<Shared>,
    settled: Condvar,
}

/// A write-once deferred value.
///
/// `Promise` is a cheap clonable handle; clones observe and settle the same
/// cell. The status moves Pending to Fulfilled or Rejected exactly once, the
/// first settlement attempt wins, and every registered handler runs on a
/// later scheduler turn, never synchronously inside `then`, `resolve`,
/// `reject`, or a thenable subscription.
#[derive(Clone)]
pub struct Promise {
    inner: Arc<PromiseInner>,
}

impl Promise {
    /// Bare pending future tied to `scheduler`.
    pub fn pending(scheduler: &Scheduler) -> Self {
        Self::with_reaction(scheduler.clone(), None)
    }

    /// Future driven by a resolver callback.
    ///
    /// The resolver runs synchronously, receiving the two settlement
    /// handles. However early a handle fires, handlers still run on
    /// scheduler turns.
    pub fn new<F>(scheduler: &Scheduler, resolver: F) -> Self
    where
        F: FnOnce(Resolve, Reject),
    {
        let promise = Self::pending(scheduler);
        resolver(
            Resolve {
                target: promise.clone(),
            },
            Reject {
                target: promise.clone(),
            },
        );
        promise
    }

    /// Future that immediately resolves `value`: plain data settles it
    /// fulfilled, a future or thenable is adopted instead of stored.
    pub fn resolved(scheduler: &Scheduler, value: impl Into<Value>) -> Self {
        let promise = Self::pending(scheduler);
        promise.resolve(value.into());
        promise
    }

    /// Future starting rejected with `reason`.
    pub fn rejected(scheduler: &Scheduler, reason: impl Into<Value>) -> Self {
        let promise = Self::pending(scheduler);
        promise.reject(reason.into());
        promise
    }

    fn with_reaction(scheduler: Scheduler, reaction: Option<Reaction>) -> Self {
        Promise {
            inner: Arc::new(PromiseInner {
                scheduler,
                shared: Mutex::new(Shared {
                    status: Status::Pending,
                    value: Value::Null,
                    queue: VecDeque::new(),
                    reaction,
                }),
                settled: Condvar::new(),
            }),
        }
    }

    // ===== Derivation =====

    /// Derive a future through a handler pair.
    ///
    /// Exactly one handler runs once the receiver settles: `on_fulfilled`
    /// with the value, `on_rejected` with the reason. A missing handler
    /// passes the outcome through unchanged. Neither runs before `then`
    /// returns.
    pub fn then(&self, on_fulfilled: Option<NativeFn>, on_rejected: Option<NativeFn>) -> Promise {
        self.then_with_progress(on_fulfilled, on_rejected, None)
    }

    /// `then` accepting the vestigial progress slot, which is stored for
    /// API compatibility and never invoked.
    pub fn then_with_progress(
        &self,
        on_fulfilled: Option<NativeFn>,
        on_rejected: Option<NativeFn>,
        on_progress: Option<NativeFn>,
    ) -> Promise {
        let derived = Self::with_reaction(
            self.inner.scheduler.clone(),
            Some(Reaction {
                on_fulfilled,
                on_rejected,
                on_progress,
            }),
        );

        // A settled receiver with an empty queue propagates directly; any
        // other state queues behind whatever is already waiting.
        let settled_now = {
            let mut shared = self.inner.shared.lock();
            if shared.status != Status::Pending && shared.queue.is_empty() {
                Some((shared.status, shared.value.clone()))
            } else {
                shared.queue.push_back(derived.clone());
                None
            }
        };

        if let Some((status, value)) = settled_now {
            let target = derived.clone();
            self.inner
                .scheduler
                .schedule(Task::new(move || target.settle(status, value)));
        }

        derived
    }

    /// Sugar for `then(None, Some(on_rejected))`.
    pub fn catch(&self, on_rejected: NativeFn) -> Promise {
        self.then(None, Some(on_rejected))
    }

    // ===== Settlement =====

    /// Propose fulfillment with `value`. The first settlement wins; later
    /// calls are no-ops. A future or thenable value is adopted rather than
    /// stored verbatim.
    pub fn resolve(&self, value: impl Into<Value>) {
        self.settle(Status::Fulfilled, value.into());
    }

    /// Propose rejection with `reason`. The first settlement wins.
    pub fn reject(&self, reason: impl Into<Value>) {
        self.settle(Status::Rejected, reason.into());
    }

    /// The resolution procedure: one settlement attempt, end to end.
    pub(crate) fn settle(&self, status: Status, value: Value) {
        // First attempt wins. The parked handler record is taken exactly
        // once, by whichever attempt gets here first.
        let reaction = {
            let mut shared = self.inner.shared.lock();
            if shared.status != Status::Pending {
                return;
            }
            shared.reaction.take()
        };

        match self.resolve_value(status, value, reaction) {
            Resolved::Commit(status, value) => self.commit(status, value),
            Resolved::Deferred => {}
            Resolved::Fault(reason) => self.commit(Status::Rejected, reason),
        }
    }

    /// Handler application, self-check, and classification. Runs with no
    /// lock held; user code is invoked from here.
    fn resolve_value(
        &self,
        status: Status,
        value: Value,
        reaction: Option<Reaction>,
    ) -> Resolved {
        let mut status = status;
        let mut value = value;

        if let Some(reaction) = reaction {
            let handler = match status {
                Status::Fulfilled => reaction.on_fulfilled,
                Status::Rejected => reaction.on_rejected,
                Status::Pending => None,
            };
            if let Some(handler) = handler {
                match handler.call(value) {
                    Ok(out) => {
                        // A handler return is a fulfillment, whatever the
                        // upstream outcome was.
                        value = out;
                        status = Status::Fulfilled;
                    }
                    // A handler fault commits directly as the rejection;
                    // no further classification of the fault value.
                    Err(fault) => return Resolved::Fault(fault),
                }
            }
        }

        // A future cannot adopt itself. Checked whatever the status is, so
        // even a rejection reason naming this future trips it.
        if let Value::Promise(other) = &value {
            if other.ptr_eq(self) {
                return Resolved::Fault(ResolveError::SelfReference.into());
            }
        }

        // Driving the procedure with a non-settled status is an internal
        // defect; surfaced as a rejection rather than corrupted state.
        if status == Status::Pending {
            return Resolved::Fault(ResolveError::InvalidTransition.into());
        }

        // Only fulfillment values are assimilated; a rejection reason is
        // carried verbatim, futures and thenables included.
        if status == Status::Fulfilled {
            value = match Settlement::classify(value) {
                Settlement::Native(upstream) => return self.adopt(upstream),
                Settlement::Foreign(thenable) => return self.assimilate(thenable),
                Settlement::Ordinary(value) => value,
            };
        }

        Resolved::Commit(status, value)
    }

    /// Follow another future: take its settlement immediately if it already
    /// settled with an empty queue, otherwise wait in line behind its
    /// continuations.
    fn adopt(&self, upstream: Promise) -> Resolved {
        let ready = {
            let mut up = upstream.inner.shared.lock();
            if up.status != Status::Pending && up.queue.is_empty() {
                Some((up.status, up.value.clone()))
            } else {
                up.queue.push_back(self.clone());
                None
            }
        };

        if let Some((status, value)) = ready {
            // Scheduled, not recursed: a long already-settled chain must
            // not grow the stack.
            let target = self.clone();
            self.inner
                .scheduler
                .schedule(Task::new(move || target.settle(status, value)));
        }

        Resolved::Deferred
    }

    /// Subscribe to a foreign thenable with one-shot settlement callbacks.
    fn assimilate(&self, thenable: Arc<dyn Thenable>) -> Resolved {
        let tripped = Arc::new(AtomicBool::new(false));
        let resolve = self.one_shot(Status::Fulfilled, tripped.clone());
        let reject = self.one_shot(Status::Rejected, tripped.clone());

        match thenable.subscribe(resolve, reject) {
            Ok(()) => Resolved::Deferred,
            Err(fault) => {
                // A fault before the first callback committed rejects this
                // future; after, the settlement stands and the fault is
                // discarded.
                if tripped.load(Ordering::SeqCst) {
                    Resolved::Deferred
                } else {
                    Resolved::Fault(fault)
                }
            }
        }
    }

    /// Settlement callback honouring the shared first-wins flag.
    fn one_shot(&self, status: Status, tripped: Arc<AtomicBool>) -> SettleFn {
        let target = self.clone();
        Box::new(move |value| {
            if tripped
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                target.settle(status, value);
            }
        })
    }

    /// The exclusive commit: re-checks Pending under the state lock so
    /// exactly one settlement attempt wins, then starts the drain.
    fn commit(&self, status: Status, value: Value) {
        {
            let mut shared = self.inner.shared.lock();
            if shared.status != Status::Pending {
                return;
            }
            shared.status = status;
            shared.value = value;
        }
        self.inner.settled.notify_all();
        self.dispatch(true);
    }

    /// Propagate the settled outcome into queued continuations, one per
    /// scheduler turn, FIFO. Each turn dispatches the next record from a
    /// drop guard, so a panicking handler unwinding out of the turn cannot
    /// strand the records queued behind it. On the first call after
    /// settlement an empty queue under rejection means nobody is listening;
    /// the reason goes to the diagnostic sink on its own turn.
    fn dispatch(&self, first: bool) {
        struct DispatchOnDrop(Promise);

        impl Drop for DispatchOnDrop {
            fn drop(&mut self) {
                self.0.dispatch(false);
            }
        }

        let next = {
            let mut shared = self.inner.shared.lock();
            let outcome = (shared.status, shared.value.clone());
            match shared.queue.pop_front() {
                Some(derived) => Ok((derived, outcome)),
                None => Err(outcome),
            }
        };

        match next {
            Ok((derived, (status, value))) => {
                let upstream = self.clone();
                self.inner.scheduler.schedule(Task::new(move || {
                    let _chain = DispatchOnDrop(upstream);
                    derived.settle(status, value);
                }));
            }
            Err((status, value)) => {
                if first && status == Status::Rejected {
                    let sink = self.inner.scheduler.rejection_sink();
                    self.inner.scheduler.schedule(Task::new(move || {
                        sink.unhandled_rejection(&value);
                    }));
                }
            }
        }
    }

    // ===== Observation =====

    /// Current settlement state.
    pub fn status(&self) -> Status {
        self.inner.shared.lock().status
    }

    /// Settled outcome: `None` while pending, then `Some(Ok(value))` or
    /// `Some(Err(reason))` forever after.
    pub fn result(&self) -> Option<Result<Value, Value>> {
        snapshot(&self.inner.shared.lock())
    }

    /// Block the calling thread until this future settles.
    ///
    /// For host threads observing a thread-backed scheduler. Never call it
    /// from the scheduler's draining thread: the drain it would wait on is
    /// the one it is blocking.
    pub fn wait(&self) -> Result<Value, Value> {
        let mut shared = self.inner.shared.lock();
        loop {
            if let Some(outcome) = snapshot(&shared) {
                return outcome;
            }
            self.inner.settled.wait(&mut shared);
        }
    }

    /// [`Promise::wait`] with an upper bound; `None` on timeout. A bound
    /// too far out for the clock to represent falls back to the unbounded
    /// wait.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<Value, Value>> {
        let deadline = match Instant::now().checked_add(timeout) {
            Some(deadline) => deadline,
            None => return Some(self.wait()),
        };
        let mut shared = self.inner.shared.lock();
        loop {
            if let Some(outcome) = snapshot(&shared) {
                return Some(outcome);
            }
            if self
                .inner
                .settled
                .wait_until(&mut shared, deadline)
                .timed_out()
            {
                // The settle may have raced the deadline; one last look.
                return snapshot(&shared);
            }
        }
    }

    /// True when both handles refer to the same future.
    pub fn ptr_eq(&self, other: &Promise) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// The scheduler this future defers work through.
    pub fn scheduler(&self) -> &Scheduler {
        &self.inner.scheduler
    }
}

impl fmt::Debug for Promise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.shared.try_lock() {
            Some(shared) => f
                .debug_struct("Promise")
                .field("status", &shared.status)
                .finish_non_exhaustive(),
            None => f.write_str("Promise { <locked> }"),
        }
    }
}

fn snapshot(shared: &Shared) -> Option<Result<Value, Value>> {
    match shared.status {
        Status::Pending => None,
        Status::Fulfilled => Some(Ok(shared.value.clone())),
        Status::Rejected => Some(Err(shared.value.clone())),
    }
}

/// Fulfillment handle handed to a resolver callback.
#[derive(Clone)]
pub struct Resolve {
    target: Promise,
}

impl Resolve {
    /// Propose fulfillment of the paired future.
    pub fn call(&self, value: impl Into<Value>) {
        self.target.resolve(value.into());
    }
}

/// Rejection handle handed to a resolver callback.
#[derive(Clone)]
pub struct Reject {
    target: Promise,
}

impl Reject {
    /// Propose rejection of the paired future.
    pub fn call(&self, reason: impl Into<Value>) {
        self.target.reject(reason.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{NullSink, RejectionSink};
    use crate::scheduler::{FaultPolicy, StepBackend};
    use std::panic::{self, AssertUnwindSafe};

    /// Manual-pump scheduler that swallows unhandled-rejection reports.
    fn quiet() -> (Scheduler, Arc<StepBackend>) {
        let backend = Arc::new(StepBackend::new());
        let scheduler = Scheduler::with_backend_and_sink(
            backend.clone(),
            FaultPolicy::Fatal,
            Arc::new(NullSink),
        );
        (scheduler, backend)
    }

    struct CollectingSink {
        reasons: Mutex<Vec<Value>>,
    }

    impl CollectingSink {
        fn new() -> Arc<Self> {
            Arc::new(CollectingSink {
                reasons: Mutex::new(Vec::new()),
            })
        }

        fn reasons(&self) -> Vec<Value> {
            self.reasons.lock().clone()
        }
    }

    impl RejectionSink for CollectingSink {
        fn unhandled_rejection(&self, reason: &Value) {
            self.reasons.lock().push(reason.clone());
        }
    }

    #[test]
    fn test_starts_pending() {
        let (scheduler, _backend) = quiet();
        let p = Promise::pending(&scheduler);
        assert_eq!(p.status(), Status::Pending);
        assert_eq!(p.result(), None);
    }

    #[test]
    fn test_resolve_commits_fulfillment() {
        let (scheduler, _backend) = quiet();
        let p = Promise::pending(&scheduler);
        p.resolve(5);
        assert_eq!(p.status(), Status::Fulfilled);
        assert_eq!(p.result(), Some(Ok(Value::Int(5))));
    }

    #[test]
    fn test_reject_commits_rejection() {
        let (scheduler, _backend) = quiet();
        let p = Promise::pending(&scheduler);
        p.reject("nope");
        assert_eq!(p.status(), Status::Rejected);
        assert_eq!(p.result(), Some(Err(Value::from("nope"))));
    }

    #[test]
    fn test_first_settlement_wins() {
        let (scheduler, backend) = quiet();

        let p = Promise::pending(&scheduler);
        p.resolve(1);
        p.resolve(2);
        p.reject("late");
        backend.run_until_idle();
        assert_eq!(p.result(), Some(Ok(Value::Int(1))));

        let q = Promise::pending(&scheduler);
        q.reject("first");
        q.resolve(3);
        backend.run_until_idle();
        assert_eq!(q.result(), Some(Err(Value::from("first"))));
    }

    #[test]
    fn test_handler_never_runs_before_then_returns() {
        let (scheduler, backend) = quiet();
        let p = Promise::resolved(&scheduler, 1);

        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        let derived = p.then(
            Some(NativeFn::new(move |v| {
                flag.store(true, Ordering::SeqCst);
                Ok(v)
            })),
            None,
        );

        // Settled receiver, yet nothing runs until the pump turns.
        assert!(!ran.load(Ordering::SeqCst));
        assert_eq!(derived.status(), Status::Pending);

        backend.run_until_idle();
        assert!(ran.load(Ordering::SeqCst));
        assert_eq!(derived.result(), Some(Ok(Value::Int(1))));
    }

    #[test]
    fn test_handler_return_fulfills_derived() {
        let (scheduler, backend) = quiet();
        let p = Promise::resolved(&scheduler, 4);

        let derived = p.then(
            Some(NativeFn::new(|v| {
                Ok(Value::Int(v.as_int().unwrap_or(0) * 10))
            })),
            None,
        );

        backend.run_until_idle();
        assert_eq!(derived.result(), Some(Ok(Value::Int(40))));
    }

    #[test]
    fn test_handler_fault_rejects_derived() {
        let (scheduler, backend) = quiet();
        let p = Promise::resolved(&scheduler, 4);

        let derived = p.then(Some(NativeFn::new(|_| Err(Value::from("broke")))), None);

        backend.run_until_idle();
        assert_eq!(derived.result(), Some(Err(Value::from("broke"))));
    }

    #[test]
    fn test_missing_handler_passes_outcome_through() {
        let (scheduler, backend) = quiet();

        let rejected = Promise::rejected(&scheduler, "reason");
        let derived = rejected.then(Some(NativeFn::new(|v| Ok(v))), None);
        backend.run_until_idle();
        assert_eq!(derived.result(), Some(Err(Value::from("reason"))));

        let fulfilled = Promise::resolved(&scheduler, 2);
        let derived = fulfilled.then(None, Some(NativeFn::new(|v| Ok(v))));
        backend.run_until_idle();
        assert_eq!(derived.result(), Some(Ok(Value::Int(2))));
    }

    #[test]
    fn test_rejection_handler_recovers_to_fulfillment() {
        let (scheduler, backend) = quiet();
        let p = Promise::rejected(&scheduler, "reason");

        let derived = p.then(None, Some(NativeFn::new(|_| Ok(Value::Int(42)))));

        backend.run_until_idle();
        assert_eq!(derived.result(), Some(Ok(Value::Int(42))));
    }

    #[test]
    fn test_catch_is_rejection_sugar() {
        let (scheduler, backend) = quiet();
        let p = Promise::rejected(&scheduler, "oops");

        let recovered = p.catch(NativeFn::new(|reason| {
            Ok(Value::from(format!("saw {reason}")))
        }));

        backend.run_until_idle();
        assert_eq!(recovered.result(), Some(Ok(Value::from("saw oops"))));
    }

    #[test]
    fn test_continuations_drain_fifo() {
        let (scheduler, backend) = quiet();
        let p = Promise::pending(&scheduler);
        let log = Arc::new(Mutex::new(Vec::new()));

        for label in ["a", "b", "c"] {
            let log = log.clone();
            p.then(
                Some(NativeFn::new(move |v| {
                    log.lock().push(label);
                    Ok(v)
                })),
                None,
            );
        }

        p.resolve(0);
        backend.run_until_idle();
        assert_eq!(*log.lock(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_then_during_drain_keeps_order() {
        let (scheduler, backend) = quiet();
        let p = Promise::pending(&scheduler);
        let log = Arc::new(Mutex::new(Vec::new()));

        let log_a = log.clone();
        let p_again = p.clone();
        let log_late = log.clone();
        p.then(
            Some(NativeFn::new(move |v| {
                log_a.lock().push("a");
                // Attaching while the queue is still draining lands behind
                // the records already in line.
                let log = log_late.clone();
                p_again.then(
                    Some(NativeFn::new(move |v| {
                        log.lock().push("late");
                        Ok(v)
                    })),
                    None,
                );
                Ok(v)
            })),
            None,
        );

        let log_b = log.clone();
        p.then(
            Some(NativeFn::new(move |v| {
                log_b.lock().push("b");
                Ok(v)
            })),
            None,
        );

        p.resolve(0);
        backend.run_until_idle();
        assert_eq!(*log.lock(), vec!["a", "b", "late"]);
    }

    #[test]
    fn test_drain_survives_panicking_handler() {
        let backend = Arc::new(StepBackend::new());
        let scheduler = Scheduler::with_backend(backend.clone(), FaultPolicy::Soft);
        let p = Promise::pending(&scheduler);
        let log = Arc::new(Mutex::new(Vec::new()));

        let broken = p.then(Some(NativeFn::new(|_| panic!("handler bug"))), None);
        for label in ["b", "c"] {
            let log = log.clone();
            p.then(
                Some(NativeFn::new(move |v| {
                    log.lock().push(label);
                    Ok(v)
                })),
                None,
            );
        }

        p.resolve(0);
        backend.run_until_idle();

        // The faulting record is abandoned; the ones queued behind it
        // still drain in order.
        assert_eq!(broken.status(), Status::Pending);
        assert_eq!(*log.lock(), vec!["b", "c"]);
    }

    #[test]
    fn test_fatal_fault_leaves_chain_resumable() {
        let backend = Arc::new(StepBackend::new());
        let scheduler = Scheduler::with_backend_and_sink(
            backend.clone(),
            FaultPolicy::Fatal,
            Arc::new(NullSink),
        );
        let p = Promise::pending(&scheduler);

        let broken = p.then(Some(NativeFn::new(|_| panic!("handler bug"))), None);
        let healthy = p.then(Some(NativeFn::new(Ok)), None);

        p.resolve(7);
        let fault = panic::catch_unwind(AssertUnwindSafe(|| backend.run_until_idle()));
        assert!(fault.is_err());

        // The rethrow re-requested the drain, and the next record was
        // queued behind it before the unwind escaped.
        backend.run_until_idle();
        assert_eq!(broken.status(), Status::Pending);
        assert_eq!(healthy.result(), Some(Ok(Value::Int(7))));
    }

    #[test]
    fn test_self_reference_rejects() {
        let (scheduler, backend) = quiet();
        let p = Promise::pending(&scheduler);

        p.resolve(Value::Promise(p.clone()));
        backend.run_until_idle();

        match p.result() {
            Some(Err(Value::Error(err))) => assert_eq!(*err, ResolveError::SelfReference),
            other => panic!("expected self-reference rejection, got {other:?}"),
        }
    }

    #[test]
    fn test_self_reference_check_applies_to_rejections_too() {
        let (scheduler, backend) = quiet();
        let p = Promise::pending(&scheduler);

        p.reject(Value::Promise(p.clone()));
        backend.run_until_idle();

        match p.result() {
            Some(Err(Value::Error(err))) => assert_eq!(*err, ResolveError::SelfReference),
            other => panic!("expected self-reference rejection, got {other:?}"),
        }
    }

    #[test]
    fn test_invalid_transition_rejects() {
        let (scheduler, backend) = quiet();
        let p = Promise::pending(&scheduler);

        p.settle(Status::Pending, Value::Null);
        backend.run_until_idle();

        match p.result() {
            Some(Err(Value::Error(err))) => assert_eq!(*err, ResolveError::InvalidTransition),
            other => panic!("expected invariant rejection, got {other:?}"),
        }
    }

    #[test]
    fn test_adopts_settled_future() {
        let (scheduler, backend) = quiet();
        let source = Promise::resolved(&scheduler, 9);
        let p = Promise::pending(&scheduler);

        p.resolve(Value::Promise(source));
        // Adoption of a settled source still defers through the scheduler.
        assert_eq!(p.status(), Status::Pending);

        backend.run_until_idle();
        assert_eq!(p.result(), Some(Ok(Value::Int(9))));
    }

    #[test]
    fn test_adopts_pending_future() {
        let (scheduler, backend) = quiet();
        let source = Promise::pending(&scheduler);
        let p = Promise::pending(&scheduler);

        p.resolve(Value::Promise(source.clone()));
        backend.run_until_idle();
        assert_eq!(p.status(), Status::Pending);

        source.resolve("done");
        backend.run_until_idle();
        assert_eq!(p.result(), Some(Ok(Value::from("done"))));
    }

    #[test]
    fn test_adoption_chain_propagates() {
        let (scheduler, backend) = quiet();
        let a = Promise::pending(&scheduler);
        let b = Promise::pending(&scheduler);
        let c = Promise::pending(&scheduler);

        c.resolve(Value::Promise(b.clone()));
        b.resolve(Value::Promise(a.clone()));
        a.reject("root cause");

        backend.run_until_idle();
        assert_eq!(b.result(), Some(Err(Value::from("root cause"))));
        assert_eq!(c.result(), Some(Err(Value::from("root cause"))));
    }

    #[test]
    fn test_rejection_reason_is_never_adopted() {
        let (scheduler, backend) = quiet();
        let inner = Promise::resolved(&scheduler, 1);
        let p = Promise::pending(&scheduler);

        p.reject(Value::Promise(inner.clone()));
        backend.run_until_idle();

        match p.result() {
            Some(Err(Value::Promise(reason))) => assert!(reason.ptr_eq(&inner)),
            other => panic!("expected future-valued reason, got {other:?}"),
        }
    }

    struct EagerThenable {
        outcome: Result<Value, Value>,
    }

    impl Thenable for EagerThenable {
        fn subscribe(&self, resolve: SettleFn, reject: SettleFn) -> Result<(), Value> {
            match &self.outcome {
                Ok(v) => resolve(v.clone()),
                Err(r) => reject(r.clone()),
            }
            Ok(())
        }
    }

    struct DoubleCallThenable;

    impl Thenable for DoubleCallThenable {
        fn subscribe(&self, resolve: SettleFn, reject: SettleFn) -> Result<(), Value> {
            resolve(Value::Int(1));
            reject(Value::from("second"));
            resolve(Value::Int(2));
            Ok(())
        }
    }

    struct FaultingThenable {
        settle_first: bool,
    }

    impl Thenable for FaultingThenable {
        fn subscribe(&self, resolve: SettleFn, _reject: SettleFn) -> Result<(), Value> {
            if self.settle_first {
                resolve(Value::Int(10));
            }
            Err(Value::from("subscription blew up"))
        }
    }

    #[test]
    fn test_thenable_assimilation() {
        let (scheduler, backend) = quiet();
        let p = Promise::resolved(
            &scheduler,
            Value::thenable(EagerThenable {
                outcome: Ok(Value::Int(3)),
            }),
        );

        backend.run_until_idle();
        assert_eq!(p.result(), Some(Ok(Value::Int(3))));

        let q = Promise::resolved(
            &scheduler,
            Value::thenable(EagerThenable {
                outcome: Err(Value::from("no")),
            }),
        );

        backend.run_until_idle();
        assert_eq!(q.result(), Some(Err(Value::from("no"))));
    }

    #[test]
    fn test_thenable_first_call_wins() {
        let (scheduler, backend) = quiet();
        let p = Promise::resolved(&scheduler, Value::thenable(DoubleCallThenable));

        backend.run_until_idle();
        assert_eq!(p.result(), Some(Ok(Value::Int(1))));
    }

    #[test]
    fn test_thenable_fault_before_commit_rejects() {
        let (scheduler, backend) = quiet();
        let p = Promise::resolved(
            &scheduler,
            Value::thenable(FaultingThenable {
                settle_first: false,
            }),
        );

        backend.run_until_idle();
        assert_eq!(p.result(), Some(Err(Value::from("subscription blew up"))));
    }

    #[test]
    fn test_thenable_fault_after_commit_discarded() {
        let (scheduler, backend) = quiet();
        let p = Promise::resolved(
            &scheduler,
            Value::thenable(FaultingThenable { settle_first: true }),
        );

        backend.run_until_idle();
        assert_eq!(p.result(), Some(Ok(Value::Int(10))));
    }

    #[test]
    fn test_unhandled_rejection_reported_once_asynchronously() {
        let backend = Arc::new(StepBackend::new());
        let sink = CollectingSink::new();
        let scheduler =
            Scheduler::with_backend_and_sink(backend.clone(), FaultPolicy::Fatal, sink.clone());

        let p = Promise::pending(&scheduler);
        p.reject("ignored");

        // Settlement is synchronous, the report is not.
        assert_eq!(p.status(), Status::Rejected);
        assert!(sink.reasons().is_empty());

        backend.run_until_idle();
        assert_eq!(sink.reasons(), vec![Value::from("ignored")]);

        backend.run_until_idle();
        assert_eq!(sink.reasons().len(), 1);
    }

    #[test]
    fn test_handled_rejection_not_reported() {
        let backend = Arc::new(StepBackend::new());
        let sink = CollectingSink::new();
        let scheduler =
            Scheduler::with_backend_and_sink(backend.clone(), FaultPolicy::Fatal, sink.clone());

        let p = Promise::pending(&scheduler);
        let recovered = p.catch(NativeFn::new(|_| Ok(Value::Null)));
        p.reject("caught");

        backend.run_until_idle();
        assert!(sink.reasons().is_empty());
        assert_eq!(recovered.result(), Some(Ok(Value::Null)));
    }

    #[test]
    fn test_progress_slot_is_inert() {
        let (scheduler, backend) = quiet();
        let p = Promise::pending(&scheduler);

        let derived = p.then_with_progress(
            None,
            None,
            Some(NativeFn::new(|_| {
                panic!("progress handler must never fire")
            })),
        );

        p.resolve(1);
        backend.run_until_idle();
        assert_eq!(derived.result(), Some(Ok(Value::Int(1))));
    }

    #[test]
    fn test_resolver_constructor() {
        let (scheduler, backend) = quiet();

        let p = Promise::new(&scheduler, |resolve, _reject| resolve.call(7));
        assert_eq!(p.result(), Some(Ok(Value::Int(7))));

        let q = Promise::new(&scheduler, |_resolve, reject| reject.call("bad"));
        backend.run_until_idle();
        assert_eq!(q.result(), Some(Err(Value::from("bad"))));
    }

    #[test]
    fn test_resolver_handles_share_first_wins() {
        let (scheduler, backend) = quiet();

        let p = Promise::new(&scheduler, |resolve, reject| {
            resolve.call(1);
            reject.call("late");
            resolve.call(2);
        });

        backend.run_until_idle();
        assert_eq!(p.result(), Some(Ok(Value::Int(1))));
    }

    #[test]
    fn test_wait_on_settled_future() {
        let (scheduler, _backend) = quiet();
        let p = Promise::resolved(&scheduler, 11);
        assert_eq!(p.wait(), Ok(Value::Int(11)));
    }

    #[test]
    fn test_wait_timeout_expires_while_pending() {
        let (scheduler, _backend) = quiet();
        let p = Promise::pending(&scheduler);
        assert_eq!(p.wait_timeout(Duration::from_millis(10)), None);
    }

    #[test]
    fn test_ptr_eq_tracks_identity() {
        let (scheduler, _backend) = quiet();
        let p = Promise::pending(&scheduler);
        let q = Promise::pending(&scheduler);
        assert!(p.ptr_eq(&p.clone()));
        assert!(!p.ptr_eq(&q));
    }
}
