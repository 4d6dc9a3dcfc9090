//! Engine values.
//!
//! [`Value`] is what travels through the engine stack, globals and tables.
//! Scalars are stored inline; tables, functions and userdata live in the
//! managed [`Heap`](crate::Heap) and are referred to by [`ObjectHandle`].

use std::fmt;
use std::rc::Rc;

use ordered_float::OrderedFloat;

use crate::error::ConversionError;

/// Handle to an object in the managed heap.
///
/// The generational index prevents a stale handle from reaching an object
/// that reused the slot after collection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ObjectHandle {
    /// Index into the heap's slot vector
    pub index: u32,
    /// Generation for use-after-free detection
    pub generation: u32,
}

impl ObjectHandle {
    /// Create a new object handle.
    pub fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }
}

/// A dynamically typed engine value.
///
/// Managed values (tables, functions, userdata) compare by reference.
/// Integers and numbers compare numerically with each other.
#[derive(Clone, Default)]
pub enum Value {
    /// Absence of a value
    #[default]
    Nil,
    /// Boolean
    Bool(bool),
    /// Integer subtype of number
    Int(i64),
    /// Floating point subtype of number
    Number(f64),
    /// Immutable string
    String(Rc<str>),
    /// Table in the managed heap
    Table(ObjectHandle),
    /// Engine function in the managed heap
    Function(ObjectHandle),
    /// Userdata block in the managed heap
    Userdata(ObjectHandle),
}

impl Value {
    /// Engine-level type name, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "boolean",
            Value::Int(_) => "integer",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Table(_) => "table",
            Value::Function(_) => "function",
            Value::Userdata(_) => "userdata",
        }
    }

    /// Check if this value is nil.
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Truthiness: everything except `nil` and `false` is true.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Bool(false))
    }

    /// Heap handle of a managed value.
    pub fn as_handle(&self) -> Option<ObjectHandle> {
        match self {
            Value::Table(h) | Value::Function(h) | Value::Userdata(h) => Some(*h),
            _ => None,
        }
    }

    /// Create a string value.
    pub fn string(s: impl AsRef<str>) -> Self {
        Value::String(Rc::from(s.as_ref()))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Int(a), Value::Number(b)) | (Value::Number(b), Value::Int(a)) => {
                exact_integer(*b) == Some(*a)
            }
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Table(a), Value::Table(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => a == b,
            (Value::Userdata(a), Value::Userdata(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => f.write_str("nil"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Number(n) => write!(f, "{n:?}"),
            Value::String(s) => write!(f, "{s:?}"),
            Value::Table(h) => write!(f, "table#{}.{}", h.index, h.generation),
            Value::Function(h) => write!(f, "function#{}.{}", h.index, h.generation),
            Value::Userdata(h) => write!(f, "userdata#{}.{}", h.index, h.generation),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::string(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(Rc::from(s))
    }
}

/// Hashable form of a table key.
///
/// Floats with an exact integer value normalize to [`TableKey::Int`], so
/// `t[1]` and `t[1.0]` address the same entry.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TableKey {
    Bool(bool),
    Int(i64),
    Number(OrderedFloat<f64>),
    String(Rc<str>),
    Table(ObjectHandle),
    Function(ObjectHandle),
    Userdata(ObjectHandle),
}

impl TableKey {
    /// Convert a value to a key for insertion.
    ///
    /// `nil` and `NaN` cannot be keys.
    pub fn from_value(value: &Value) -> Result<Self, ConversionError> {
        Ok(match value {
            Value::Nil => return Err(ConversionError::InvalidKey("nil")),
            Value::Bool(b) => TableKey::Bool(*b),
            Value::Int(i) => TableKey::Int(*i),
            Value::Number(n) if n.is_nan() => return Err(ConversionError::InvalidKey("NaN")),
            Value::Number(n) => match exact_integer(*n) {
                Some(i) => TableKey::Int(i),
                None => TableKey::Number(OrderedFloat(*n)),
            },
            Value::String(s) => TableKey::String(Rc::clone(s)),
            Value::Table(h) => TableKey::Table(*h),
            Value::Function(h) => TableKey::Function(*h),
            Value::Userdata(h) => TableKey::Userdata(*h),
        })
    }

    /// Convert a value to a key for lookup; invalid keys find nothing.
    pub fn lookup(value: &Value) -> Option<Self> {
        Self::from_value(value).ok()
    }

    /// The value this key was built from.
    pub fn to_value(&self) -> Value {
        match self {
            TableKey::Bool(b) => Value::Bool(*b),
            TableKey::Int(i) => Value::Int(*i),
            TableKey::Number(n) => Value::Number(n.into_inner()),
            TableKey::String(s) => Value::String(Rc::clone(s)),
            TableKey::Table(h) => Value::Table(*h),
            TableKey::Function(h) => Value::Function(*h),
            TableKey::Userdata(h) => Value::Userdata(*h),
        }
    }

    /// Heap handle referenced by this key, if any.
    pub fn as_handle(&self) -> Option<ObjectHandle> {
        match self {
            TableKey::Table(h) | TableKey::Function(h) | TableKey::Userdata(h) => Some(*h),
            _ => None,
        }
    }

    /// String key shorthand.
    pub fn name(s: &str) -> Self {
        TableKey::String(Rc::from(s))
    }
}

/// The integer a float represents exactly, if any.
pub fn exact_integer(n: f64) -> Option<i64> {
    // 2^63 is exactly representable; i64::MAX is not.
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;
    if n.fract() == 0.0 && (-LIMIT..LIMIT).contains(&n) {
        Some(n as i64)
    } else {
        None
    }
}
