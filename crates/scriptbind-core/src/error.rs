//! Error types shared by the engine and the bridging layer.
//!
//! ## Error Hierarchy
//!
//! ```text
//! BridgeError (everything a round trip can fail with)
//! ├── ClassNotRegistered     - pushing a type that was never exported
//! ├── IncorrectPointerType   - ownership category mismatch
//! ├── ExpiredWeakPointer     - weak observer whose object is gone
//! ├── Expired                - scoped reference outside its call
//! ├── InvalidStackContents   - value of the wrong shape (ConversionError)
//! ├── IncorrectArity         - wrong number of arguments
//! ├── NotRegistered          - no upcast path between two classes
//! ├── AmbiguousUpcast        - more than one upcast path
//! ├── AlreadyExported        - class or upcast registered twice
//! ├── OutOfMemory            - memory budget exhausted
//! └── Runtime                - engine-level failure raised by a script
//! ```
//!
//! Native callbacks and engine functions share this type, so an error
//! raised deep inside a nested call reaches the outermost caller unchanged.

use thiserror::Error;

/// Convenience alias used throughout the workspace.
pub type Result<T, E = BridgeError> = std::result::Result<T, E>;

// ============================================================================
// Conversion Errors
// ============================================================================

/// Errors converting a single engine value to or from a native value.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConversionError {
    /// The value has a different type than expected.
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        expected: &'static str,
        actual: &'static str,
    },

    /// Integer value doesn't fit in the target type.
    #[error("integer overflow: {value} doesn't fit in {target_type}")]
    IntegerOverflow {
        value: i64,
        target_type: &'static str,
    },

    /// A number without an exact integer representation was read as an integer.
    #[error("number {value} has no integer representation")]
    NotAnInteger { value: f64 },

    /// A const handle was read where mutable access is required.
    #[error("const {type_name} cannot be accessed as mutable")]
    ConstViolation { type_name: &'static str },

    /// The managed object behind a handle has been collected.
    #[error("object has already been collected")]
    StaleHandle,

    /// The userdata has been finalized and no longer holds an object.
    #[error("object has been finalized")]
    Finalized,

    /// The value cannot be used as a table key.
    #[error("invalid table key: {0}")]
    InvalidKey(&'static str),

    /// A value expanded to several slots where one was required.
    #[error("value expands to {count} slots where exactly one is required")]
    NotSingleValue { count: usize },
}

impl ConversionError {
    /// Shorthand for a [`ConversionError::TypeMismatch`].
    pub fn mismatch(expected: &'static str, actual: &'static str) -> Self {
        ConversionError::TypeMismatch { expected, actual }
    }
}

// ============================================================================
// Bridge Errors
// ============================================================================

/// Every failure a native ↔ engine round trip can produce.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BridgeError {
    /// A class value was pushed before its type was exported.
    #[error("class not registered: {type_name}")]
    ClassNotRegistered { type_name: &'static str },

    /// The handle's ownership category can't provide the requested access.
    #[error("incorrect pointer type: {message}")]
    IncorrectPointerType { message: String },

    /// The weakly observed object no longer exists.
    #[error("weak pointer to {type_name} has expired")]
    ExpiredWeakPointer { type_name: &'static str },

    /// The scoped reference outlived the call that introduced it.
    #[error("reference to {type_name} has expired")]
    Expired { type_name: &'static str },

    /// A value on the stack could not be converted.
    #[error("invalid stack contents: {0}")]
    InvalidStackContents(#[from] ConversionError),

    /// A function was called with the wrong number of arguments.
    #[error("incorrect number of arguments: expected {expected}, got {actual}")]
    IncorrectArity { expected: usize, actual: usize },

    /// No upcast path leads from the stored class to the requested one.
    #[error("no upcast registered from {from} to {to}")]
    NotRegistered {
        from: &'static str,
        to: &'static str,
    },

    /// Several upcast paths lead from the stored class to the requested one.
    #[error("ambiguous upcast from {from} to {to}: {paths} inheritance paths")]
    AmbiguousUpcast {
        from: &'static str,
        to: &'static str,
        paths: usize,
    },

    /// A class or base relationship was registered twice.
    #[error("{what} is already exported")]
    AlreadyExported { what: String },

    /// The engine's memory budget is exhausted.
    #[error("not enough memory: {requested} bytes requested with {in_use} of {limit} in use")]
    OutOfMemory {
        requested: usize,
        in_use: usize,
        limit: usize,
    },

    /// A failure raised by the engine or by script code.
    #[error("runtime error: {0}")]
    Runtime(String),
}

impl BridgeError {
    /// Create a runtime error.
    pub fn runtime(message: impl Into<String>) -> Self {
        BridgeError::Runtime(message.into())
    }

    /// Create an incorrect pointer type error.
    pub fn incorrect_pointer(message: impl Into<String>) -> Self {
        BridgeError::IncorrectPointerType {
            message: message.into(),
        }
    }

    /// Check whether this error reports an object that is no longer reachable
    /// through its handle (expired weak observer or scoped reference).
    pub fn is_expired(&self) -> bool {
        matches!(
            self,
            BridgeError::Expired { .. } | BridgeError::ExpiredWeakPointer { .. }
        )
    }

    /// Check whether this error is a memory exhaustion.
    pub fn is_out_of_memory(&self) -> bool {
        matches!(self, BridgeError::OutOfMemory { .. })
    }
}
