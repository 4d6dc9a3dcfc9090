//! Stable identities for native types.
//!
//! A [`NativeTypeId`] pairs a Rust [`TypeId`] with a const flag, so that
//! `T` and `const T` are distinct keys in every registry while still being
//! recognisably the same underlying type.

use std::any::TypeId;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Identity of a native type as seen by the bridge.
///
/// Equality and hashing only consider the underlying type and the const
/// flag. The name is carried for diagnostics.
#[derive(Clone, Copy)]
pub struct NativeTypeId {
    type_id: TypeId,
    is_const: bool,
    name: &'static str,
}

impl NativeTypeId {
    /// Identity of the mutable form of `T`.
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            is_const: false,
            name: std::any::type_name::<T>(),
        }
    }

    /// Identity of `T` with an explicit display name.
    pub fn named<T: ?Sized + 'static>(name: &'static str) -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            is_const: false,
            name,
        }
    }

    /// Identity of the const form of `T`.
    pub fn of_const<T: ?Sized + 'static>() -> Self {
        Self::of::<T>().as_const()
    }

    /// The const form of this identity.
    pub fn as_const(self) -> Self {
        Self {
            is_const: true,
            ..self
        }
    }

    /// The mutable (non-const) form of this identity.
    pub fn as_mutable(self) -> Self {
        Self {
            is_const: false,
            ..self
        }
    }

    /// Whether this is the const form.
    pub fn is_const(&self) -> bool {
        self.is_const
    }

    /// Whether both identities name the same underlying type, ignoring const.
    pub fn same_type(&self, other: &NativeTypeId) -> bool {
        self.type_id == other.type_id
    }

    /// Whether a handle of this identity may be read as `requested`.
    ///
    /// A mutable handle satisfies both forms of its type; a const handle
    /// only satisfies a const request.
    pub fn satisfies(&self, requested: &NativeTypeId) -> bool {
        self.same_type(requested) && (requested.is_const || !self.is_const)
    }

    /// The underlying Rust type id.
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Diagnostic name of the type.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for NativeTypeId {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id && self.is_const == other.is_const
    }
}

impl Eq for NativeTypeId {}

impl Hash for NativeTypeId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
        self.is_const.hash(state);
    }
}

impl fmt::Debug for NativeTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativeTypeId({self})")
    }
}

impl fmt::Display for NativeTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_const {
            write!(f, "const {}", self.name)
        } else {
            f.write_str(self.name)
        }
    }
}
