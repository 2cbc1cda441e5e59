//! Composition operators: chain, all, race.
//!
//! All three are plain consumers of the future contract: they build on
//! `then`, `resolve`, and `reject`, and lean on the write-once commit to
//! arbitrate competing settlements.

use std::sync::Arc;

use parking_lot::Mutex;

use super::promise::Promise;
use crate::scheduler::Scheduler;
use crate::value::{NativeFn, Value};

/// Re-invoke `value` with `argument` while it stays invocable.
///
/// The iterative loop replaces recursive unwinding, so adversarial chains of
/// invocables cannot grow the stack.
fn trampoline(mut value: Value, argument: &Value) -> Result<Value, Value> {
    while let Value::Func(f) = value {
        value = f.call(argument.clone())?;
    }
    Ok(value)
}

/// Slot vector and completion count for one `all` aggregate.
struct Gather {
    slots: Vec<Value>,
    remaining: usize,
}

impl Gather {
    /// Fill slot `index`; yields the finished list when it was the last.
    fn fill(&mut self, index: usize, value: Value) -> Option<Value> {
        self.slots[index] = value;
        self.remaining -= 1;
        if self.remaining == 0 {
            Some(Value::from(std::mem::take(&mut self.slots)))
        } else {
            None
        }
    }
}

/// Route one element of `all` into its slot.
fn settle_slot(
    scheduler: &Scheduler,
    aggregate: &Promise,
    gather: &Arc<Mutex<Gather>>,
    index: usize,
    item: Value,
    upstream: &Value,
) -> Result<(), Value> {
    // Invocable elements are unwound with the upstream value first; the
    // final non-invocable result is processed like any other element.
    let item = match item {
        Value::Func(_) => trampoline(item, upstream)?,
        other => other,
    };

    match item {
        Value::Promise(future) => subscribe_slot(aggregate, gather, index, future),
        Value::Thenable(_) => {
            // Assimilated into a native future first, so a double-calling
            // subscription cannot corrupt the completion count.
            let future = Promise::resolved(scheduler, item);
            subscribe_slot(aggregate, gather, index, future);
        }
        plain => {
            let done = gather.lock().fill(index, plain);
            if let Some(list) = done {
                aggregate.resolve(list);
            }
        }
    }
    Ok(())
}

/// Wire a slot future's outcome into the aggregate.
fn subscribe_slot(aggregate: &Promise, gather: &Arc<Mutex<Gather>>, index: usize, future: Promise) {
    let gather = gather.clone();
    let on_value = aggregate.clone();
    let on_reason = aggregate.clone();

    future.then(
        Some(NativeFn::new(move |value| {
            let done = gather.lock().fill(index, value);
            if let Some(list) = done {
                on_value.resolve(list);
            }
            Ok(Value::Null)
        })),
        Some(NativeFn::new(move |reason| {
            // First rejection wins; the write-once commit arbitrates.
            on_reason.reject(reason);
            Ok(Value::Null)
        })),
    );
}

impl Promise {
    /// Sequential composition starting from the receiver.
    ///
    /// Each step waits for the previous one. A non-invocable step (future,
    /// thenable, or plain data) becomes the next resolved value verbatim.
    /// An invocable step is called with the previous step's value and
    /// trampolined until the result stops being invocable. Empty `steps`
    /// returns the receiver itself.
    pub fn chain<I>(&self, steps: I) -> Promise
    where
        I: IntoIterator<Item = Value>,
    {
        let mut p = self.clone();
        for step in steps {
            p = match step {
                Value::Func(f) => p.then(
                    Some(NativeFn::new(move |val| {
                        trampoline(Value::Func(f.clone()), &val)
                    })),
                    None,
                ),
                other => p.then(Some(NativeFn::new(move |_val| Ok(other.clone()))), None),
            };
        }
        p
    }

    /// Fan-in: waits for the receiver, then for every element of `items`.
    ///
    /// Fulfills with a list matching input index order once every slot has a
    /// value; rejects on the first rejection among the elements without
    /// waiting for the rest. Futures and thenables are awaited, invocables
    /// are called with the receiver's value and their result processed like
    /// any element, plain values count immediately. Empty `items` fulfills
    /// with the receiver's value itself.
    pub fn all<I>(&self, items: I) -> Promise
    where
        I: IntoIterator<Item = Value>,
    {
        let items: Vec<Value> = items.into_iter().collect();
        let scheduler = self.scheduler().clone();

        self.then(
            Some(NativeFn::new(move |upstream| {
                if items.is_empty() {
                    return Ok(upstream);
                }

                let aggregate = Promise::pending(&scheduler);
                let gather = Arc::new(Mutex::new(Gather {
                    slots: items.clone(),
                    remaining: items.len(),
                }));

                for (index, item) in items.iter().enumerate() {
                    let routed = settle_slot(
                        &scheduler,
                        &aggregate,
                        &gather,
                        index,
                        item.clone(),
                        &upstream,
                    );
                    if let Err(fault) = routed {
                        // The walk stops at the first faulting element.
                        aggregate.reject(fault);
                        break;
                    }
                }

                Ok(Value::Promise(aggregate))
            })),
            None,
        )
    }

    /// First settlement wins.
    ///
    /// Waits for the receiver, then proposes every element of `entries` to
    /// one write-once future, in list order. Futures and thenables compete
    /// through the scheduler's ordering; an invocable element is trampolined
    /// (with no meaningful argument) and its result proposed immediately, so
    /// it settles the race within the construction turn unless an earlier
    /// element already settled synchronously. Empty `entries` yields a
    /// future that never settles.
    pub fn race<I>(&self, entries: I) -> Promise
    where
        I: IntoIterator<Item = Value>,
    {
        let entries: Vec<Value> = entries.into_iter().collect();
        let scheduler = self.scheduler().clone();

        self.then(
            Some(NativeFn::new(move |_upstream| {
                let winner = Promise::pending(&scheduler);
                for entry in &entries {
                    match entry {
                        Value::Func(_) => {
                            let settled = trampoline(entry.clone(), &Value::Null)?;
                            winner.resolve(settled);
                        }
                        other => winner.resolve(other.clone()),
                    }
                }
                Ok(Value::Promise(winner))
            })),
            None,
        )
    }
}
