//! Turn sources for the scheduler.
//!
//! A backend answers one request: "run this callback on a future turn".
//! The scheduler never cares where turns come from; timers, event loops, or
//! plain threads all qualify as long as the callback is never run
//! synchronously inside the request and requests stay FIFO.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::thread;

use crossbeam::channel::{self, Sender};
use parking_lot::Mutex;

use super::panic_message;

/// Boxed drain callback handed to a backend.
pub type TickFn = Box<dyn FnOnce() + Send>;

/// External source of scheduler turns.
///
/// `request_tick` must arrange for the callback to run on a future turn, in
/// FIFO order with respect to other requests from the same scheduler, and
/// never synchronously inside the call itself.
pub trait TickBackend: Send + Sync {
    /// Enqueue `tick` to run on a future turn.
    fn request_tick(&self, tick: TickFn);
}

// ===== Thread backend =====

/// Backend that serves ticks on a dedicated named thread.
pub struct ThreadBackend {
    /// Tick requests travel to the serving thread over this channel
    sender: Option<Sender<TickFn>>,

    /// Serving thread handle, joined on drop
    handle: Option<thread::JoinHandle<()>>,
}

impl ThreadBackend {
    /// Spawn the tick thread.
    pub fn new() -> Self {
        let (sender, receiver) = channel::unbounded::<TickFn>();

        let handle = thread::Builder::new()
            .name("morrow-tick".to_string())
            .spawn(move || {
                while let Ok(tick) = receiver.recv() {
                    // A Fatal-policy drain re-requests a tick and then
                    // resumes its unwind; the thread must survive the unwind
                    // to serve that follow-up request.
                    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(tick)) {
                        eprintln!(
                            "morrow-tick: fault escaped a drain: {}",
                            panic_message(payload.as_ref())
                        );
                    }
                }
            })
            .expect("Failed to spawn tick thread");

        ThreadBackend {
            sender: Some(sender),
            handle: Some(handle),
        }
    }
}

impl TickBackend for ThreadBackend {
    fn request_tick(&self, tick: TickFn) {
        if let Some(sender) = &self.sender {
            // Disconnection only happens during teardown; a tick requested
            // after that has nothing left to drain.
            let _ = sender.send(tick);
        }
    }
}

impl Default for ThreadBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ThreadBackend {
    fn drop(&mut self) {
        self.sender.take();

        if let Some(handle) = self.handle.take() {
            // The final handle can be dropped by a task running on the tick
            // thread itself; joining from there would deadlock.
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

// ===== Step backend =====

/// Backend that records tick requests for an embedder-driven pump.
///
/// Nothing runs until the embedder calls [`StepBackend::tick`] or
/// [`StepBackend::run_until_idle`], which keeps every turn deterministic.
/// A fault escaping a Fatal-policy drain propagates to the pumping caller.
pub struct StepBackend {
    ticks: Mutex<VecDeque<TickFn>>,
}

impl StepBackend {
    /// Create an empty pump.
    pub fn new() -> Self {
        StepBackend {
            ticks: Mutex::new(VecDeque::new()),
        }
    }

    /// Run the oldest requested tick. Returns `false` when none is queued.
    pub fn tick(&self) -> bool {
        // The tick runs outside the lock; a drain re-requests ticks through
        // `request_tick`, which takes the lock again.
        let tick = self.ticks.lock().pop_front();
        match tick {
            Some(tick) => {
                tick();
                true
            }
            None => false,
        }
    }

    /// Run ticks until none remain. Returns how many ran.
    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        while self.tick() {
            ran += 1;
        }
        ran
    }

    /// Number of requested, not-yet-run ticks.
    pub fn queued(&self) -> usize {
        self.ticks.lock().len()
    }
}

impl TickBackend for StepBackend {
    fn request_tick(&self, tick: TickFn) {
        self.ticks.lock().push_back(tick);
    }
}

impl Default for StepBackend {
    fn default() -> Self {
        Self::new()
    }
}
