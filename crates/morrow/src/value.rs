//! Dynamic value domain carried by settlements.
//!
//! Every fulfillment value and rejection reason is a [`Value`]. The enum is
//! deliberately a closed set of tags: the resolution engine classifies a
//! proposed settlement by matching on it (native future, foreign thenable,
//! or ordinary data) instead of probing for callable members.

use std::fmt;
use std::sync::Arc;

use crate::error::ResolveError;
use crate::promise::Promise;

/// Settlement callback handed to a thenable's subscription routine.
pub type SettleFn = Box<dyn Fn(Value) + Send>;

/// A foreign deferred value the engine can assimilate.
///
/// Implementors arrange for exactly one eventual outcome and report it by
/// invoking `resolve` or `reject`. The engine guards the pair with a shared
/// first-wins flag, so a misbehaving implementation that calls both, or one
/// of them repeatedly, still commits only the first outcome.
pub trait Thenable: Send + Sync {
    /// Subscribe to this value's eventual settlement.
    ///
    /// Returning `Err` before either callback has committed rejects the
    /// assimilating future with the returned fault; returning `Err` after a
    /// commit is discarded.
    fn subscribe(&self, resolve: SettleFn, reject: SettleFn) -> Result<(), Value>;
}

/// An invocable value: one argument in, fulfillment or fault out.
///
/// Handlers passed to `then` and invocable elements of the combinators share
/// this shape. A fault is signalled by returning `Err`; the engine converts
/// it into a rejection at the resolution boundary.
#[derive(Clone)]
pub struct NativeFn(Arc<dyn Fn(Value) -> Result<Value, Value> + Send + Sync>);

impl NativeFn {
    /// Wrap a closure as an invocable value.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(Value) -> Result<Value, Value> + Send + Sync + 'static,
    {
        NativeFn(Arc::new(f))
    }

    /// Invoke with a single argument.
    pub fn call(&self, value: Value) -> Result<Value, Value> {
        (self.0)(value)
    }

    fn ptr_eq(&self, other: &NativeFn) -> bool {
        same_data(&self.0, &other.0)
    }
}

impl fmt::Debug for NativeFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<fn>")
    }
}

/// A dynamic settlement value.
#[derive(Clone)]
pub enum Value {
    /// Absent value
    Null,
    /// Boolean
    Bool(bool),
    /// Signed integer
    Int(i64),
    /// Floating point number
    Float(f64),
    /// Immutable string
    Str(Arc<str>),
    /// Ordered sequence of values
    List(Arc<[Value]>),
    /// Engine-originated fault (see [`ResolveError`])
    Error(Arc<ResolveError>),
    /// Invocable value
    Func(NativeFn),
    /// Foreign deferred value
    Thenable(Arc<dyn Thenable>),
    /// Native future
    Promise(Promise),
}

impl Value {
    /// Wrap a closure as an invocable value.
    pub fn func<F>(f: F) -> Value
    where
        F: Fn(Value) -> Result<Value, Value> + Send + Sync + 'static,
    {
        Value::Func(NativeFn::new(f))
    }

    /// Wrap a foreign thenable.
    pub fn thenable<T>(t: T) -> Value
    where
        T: Thenable + 'static,
    {
        Value::Thenable(Arc::new(t))
    }

    /// True for [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Integer payload, if this is an `Int`.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Boolean payload, if this is a `Bool`.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// String payload, if this is a `Str`.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Element slice, if this is a `List`.
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Error(a), Value::Error(b)) => a == b,
            // Callables, thenables, and futures compare by identity.
            (Value::Func(a), Value::Func(b)) => a.ptr_eq(b),
            (Value::Thenable(a), Value::Thenable(b)) => same_data(a, b),
            (Value::Promise(a), Value::Promise(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("Null"),
            Value::Bool(b) => f.debug_tuple("Bool").field(b).finish(),
            Value::Int(n) => f.debug_tuple("Int").field(n).finish(),
            Value::Float(x) => f.debug_tuple("Float").field(x).finish(),
            Value::Str(s) => f.debug_tuple("Str").field(s).finish(),
            Value::List(items) => f.debug_tuple("List").field(items).finish(),
            Value::Error(err) => f.debug_tuple("Error").field(err).finish(),
            Value::Func(_) => f.write_str("Func(<fn>)"),
            Value::Thenable(_) => f.write_str("Thenable(<thenable>)"),
            Value::Promise(p) => f.debug_tuple("Promise").field(p).finish(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(n) => write!(f, "{n}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Str(s) => f.write_str(s),
            Value::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Value::Error(err) => write!(f, "{err}"),
            Value::Func(_) => f.write_str("<fn>"),
            Value::Thenable(_) => f.write_str("<thenable>"),
            Value::Promise(_) => f.write_str("<future>"),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(n as i64)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(Arc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(Arc::from(s.as_str()))
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(Arc::from(items))
    }
}

impl From<NativeFn> for Value {
    fn from(f: NativeFn) -> Self {
        Value::Func(f)
    }
}

impl From<Promise> for Value {
    fn from(p: Promise) -> Self {
        Value::Promise(p)
    }
}

/// Identity comparison for `Arc`ed trait objects, ignoring vtable addresses.
fn same_data<T: ?Sized>(a: &Arc<T>, b: &Arc<T>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}
