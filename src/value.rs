//! A small, concrete payload type used for entry-function arguments and
//! return lists, channel items, and the implicit per-context scalar slot
//! (`DEFSV`).
//!
//! A fully generic runtime would make every one of these sites generic
//! over `T`, but the scheduler's own bookkeeping (join queues, the
//! reaper's destroy list, channel buffers) needs a single concrete type it
//! can store in its tables without threading a type parameter through the
//! whole crate. `Value` is that type: cheap to clone, easy to assert on in
//! tests, and expressive enough for the scenarios this runtime targets.

use std::fmt;

/// A value passed between contexts: as an entry argument, a return value,
/// a channel item, or the contents of the `DEFSV` slot.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Unit,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Unit => write!(f, "()"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Str(s) => write!(f, "{s}"),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Value::List(vs) => {
                write!(f, "(")?;
                for (i, v) in vs.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, ")")
            }
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl Default for Value {
    /// The implicit scalar slot (`DEFSV`) starts out unset; `Value::Unit`
    /// is that empty state, not a meaningful zero value.
    fn default() -> Self {
        Value::Unit
    }
}

/// Convenience for building the `Vec<Value>` return/argument lists used
/// throughout the public API.
#[macro_export]
macro_rules! values {
    () => { ::std::vec::Vec::<$crate::Value>::new() };
    ($($v:expr),+ $(,)?) => {
        ::std::vec![$(::std::convert::Into::<$crate::Value>::into($v)),+]
    };
}
