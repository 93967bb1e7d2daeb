//! The runtime value carried for a single tagged argument or result.

use crate::heap::VAddr;
use crate::wire::Tag;

/// A decoded argument, or a value about to be encoded as a reply.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Ptr(VAddr),
    Double(f64),
    Void,
}

impl Value {
    pub fn tag(self) -> Tag {
        match self {
            Value::Int(_) => Tag::Int,
            Value::Ptr(_) => Tag::Ptr,
            Value::Double(_) => Tag::Double,
            Value::Void => Tag::Void,
        }
    }

    /// Extracts the `i` payload, or `None` if this isn't an `Int`.
    pub fn as_int(self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(n),
            _ => None,
        }
    }

    /// Extracts the `p` payload, or `None` if this isn't a `Ptr`.
    pub fn as_ptr(self) -> Option<VAddr> {
        match self {
            Value::Ptr(p) => Some(p),
            _ => None,
        }
    }

    /// Extracts the `d` payload, or `None` if this isn't a `Double`.
    pub fn as_double(self) -> Option<f64> {
        match self {
            Value::Double(d) => Some(d),
            _ => None,
        }
    }
}

/// The failure sentinel for a given result tag (§4.2): `-1` for `i`, the
/// null address for `p`. Doubles and void have no meaningful sentinel in
/// this protocol — every signature the failing-stub helper accepts returns
/// `i` or `p`.
pub fn failure_sentinel(tag: Tag) -> Value {
    match tag {
        Tag::Int => Value::Int(-1),
        Tag::Ptr => Value::Ptr(VAddr::NULL),
        Tag::Double => Value::Double(0.0),
        Tag::Void => Value::Void,
    }
}
