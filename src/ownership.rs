//! Ownership of native objects held by the engine.
//!
//! A class handle is a userdata block holding a [`Handle`]: the identity the
//! object was pushed as plus one [`Ownership`] variant.
//!
//! - `Shared`: the handle co-owns the object through its [`Shared`] owner
//! - `Weak`: the handle observes an object owned elsewhere
//! - `Scoped`: the handle borrows the object for one native ↔ engine round
//!   trip, proven by a [`ValidityToken`]
//!
//! Each capability has one total accessor returning `Result`. Dropping the
//! handle (from the `__gc` finalizer) releases whatever the variant holds.

use std::any::Any;
use std::fmt;
use std::ops::Deref;
use std::ptr::NonNull;
use std::rc::{Rc, Weak};

use scriptbind_core::{BridgeError, ConversionError, Engine, NativeTypeId, Result, Value};
use scriptbind_registry::{ValidityRegistry, ValidityToken};

// ============================================================================
// Shared / WeakRef
// ============================================================================

/// Reference-counted owner of a native object, possibly pointing inside it.
///
/// `Shared<T>` behaves like `Rc<T>`, except that [`Shared::map`] can narrow
/// it to a field or base sub-object while the whole allocation stays alive.
pub struct Shared<T> {
    owner: Rc<dyn Any>,
    ptr: NonNull<T>,
}

impl<T: 'static> Shared<T> {
    /// Move `value` into a new allocation.
    pub fn new(value: T) -> Self {
        Self::from_rc(Rc::new(value))
    }

    /// Adopt an existing `Rc`.
    pub fn from_rc(rc: Rc<T>) -> Self {
        let ptr = NonNull::from(&*rc);
        Self { owner: rc, ptr }
    }
}

impl<T> Shared<T> {
    /// Point at a sub-object, sharing ownership of the whole allocation.
    pub fn map<U>(this: &Self, project: impl FnOnce(&T) -> &U) -> Shared<U> {
        let ptr = NonNull::from(project(&**this));
        Shared {
            owner: Rc::clone(&this.owner),
            ptr,
        }
    }

    /// Create a weak observer of the same object.
    pub fn downgrade(this: &Self) -> WeakRef<T> {
        WeakRef {
            owner: Rc::downgrade(&this.owner),
            ptr: this.ptr,
        }
    }

    /// Whether both point at the same object.
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        a.ptr == b.ptr
    }

    /// Number of strong owners of the allocation.
    pub fn strong_count(this: &Self) -> usize {
        Rc::strong_count(&this.owner)
    }

    pub(crate) fn into_parts(self) -> (Rc<dyn Any>, NonNull<()>) {
        (self.owner, self.ptr.cast())
    }

    /// # Safety
    ///
    /// `ptr` must point to a `T` inside the allocation kept alive by `owner`.
    pub(crate) unsafe fn from_parts(owner: Rc<dyn Any>, ptr: NonNull<()>) -> Self {
        Self {
            owner,
            ptr: ptr.cast(),
        }
    }
}

impl<T> Deref for Shared<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: `owner` keeps the allocation `ptr` points into alive.
        unsafe { self.ptr.as_ref() }
    }
}

impl<T> Clone for Shared<T> {
    fn clone(&self) -> Self {
        Self {
            owner: Rc::clone(&self.owner),
            ptr: self.ptr,
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Shared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Shared").field(&**self).finish()
    }
}

/// Non-owning observer of an object owned by [`Shared`] handles.
pub struct WeakRef<T> {
    owner: Weak<dyn Any>,
    ptr: NonNull<T>,
}

impl<T> WeakRef<T> {
    /// Regain ownership if the object still exists.
    pub fn upgrade(&self) -> Option<Shared<T>> {
        let owner = self.owner.upgrade()?;
        Some(Shared {
            owner,
            ptr: self.ptr,
        })
    }

    /// Whether the object has been dropped.
    pub fn is_expired(&self) -> bool {
        self.owner.strong_count() == 0
    }

    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        a.ptr == b.ptr
    }

    pub(crate) fn into_parts(self) -> (Weak<dyn Any>, NonNull<()>) {
        (self.owner, self.ptr.cast())
    }

    /// # Safety
    ///
    /// `ptr` must point to a `T` inside the allocation observed by `owner`.
    pub(crate) unsafe fn from_parts(owner: Weak<dyn Any>, ptr: NonNull<()>) -> Self {
        Self {
            owner,
            ptr: ptr.cast(),
        }
    }
}

impl<T> Clone for WeakRef<T> {
    fn clone(&self) -> Self {
        Self {
            owner: Weak::clone(&self.owner),
            ptr: self.ptr,
        }
    }
}

impl<T> fmt::Debug for WeakRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakRef")
            .field("expired", &self.is_expired())
            .finish()
    }
}

// ============================================================================
// Handle
// ============================================================================

/// How a handle holds its object.
pub(crate) enum Ownership {
    Shared {
        owner: Rc<dyn Any>,
        ptr: NonNull<()>,
    },
    Weak {
        owner: Weak<dyn Any>,
        ptr: NonNull<()>,
    },
    Scoped {
        ptr: NonNull<()>,
        token: ValidityToken,
    },
}

impl Ownership {
    fn kind(&self) -> &'static str {
        match self {
            Ownership::Shared { .. } => "shared",
            Ownership::Weak { .. } => "weak",
            Ownership::Scoped { .. } => "scoped",
        }
    }
}

/// Raw access that keeps the object alive while it is used.
pub(crate) struct Lease {
    _guard: Option<Rc<dyn Any>>,
    pub(crate) ptr: NonNull<()>,
}

/// Payload of a class handle userdata.
pub(crate) struct Handle {
    stored: NativeTypeId,
    ownership: Ownership,
}

impl Handle {
    pub(crate) fn new(stored: NativeTypeId, ownership: Ownership) -> Self {
        Self { stored, ownership }
    }

    /// Identity the object was pushed as.
    pub(crate) fn stored(&self) -> NativeTypeId {
        self.stored
    }

    pub(crate) fn is_const(&self) -> bool {
        self.stored.is_const()
    }

    fn scoped_error(&self, wanted: &str) -> BridgeError {
        BridgeError::incorrect_pointer(format!(
            "{} is held by reference and cannot be read as a {wanted} pointer",
            self.stored
        ))
    }

    fn expired_weak(&self) -> BridgeError {
        BridgeError::ExpiredWeakPointer {
            type_name: self.stored.name(),
        }
    }

    /// Shared ownership of the object.
    pub(crate) fn obtain_shared(&self) -> Result<(Rc<dyn Any>, NonNull<()>)> {
        match &self.ownership {
            Ownership::Shared { owner, ptr } => Ok((Rc::clone(owner), *ptr)),
            Ownership::Weak { owner, ptr } => {
                let owner = owner.upgrade().ok_or_else(|| self.expired_weak())?;
                Ok((owner, *ptr))
            }
            Ownership::Scoped { .. } => Err(self.scoped_error("shared")),
        }
    }

    /// A weak observer of the object.
    pub(crate) fn obtain_weak(&self) -> Result<(Weak<dyn Any>, NonNull<()>)> {
        match &self.ownership {
            Ownership::Shared { owner, ptr } => Ok((Rc::downgrade(owner), *ptr)),
            Ownership::Weak { owner, ptr } => Ok((Weak::clone(owner), *ptr)),
            Ownership::Scoped { .. } => Err(self.scoped_error("weak")),
        }
    }

    /// The object's address, if it is still reachable.
    pub(crate) fn obtain_raw(&self, validity: &ValidityRegistry) -> Result<NonNull<()>> {
        match &self.ownership {
            Ownership::Shared { ptr, .. } => Ok(*ptr),
            Ownership::Weak { owner, ptr } => {
                if owner.strong_count() == 0 {
                    return Err(self.expired_weak());
                }
                Ok(*ptr)
            }
            Ownership::Scoped { ptr, token } => {
                if !validity.is_live(*token) {
                    return Err(BridgeError::Expired {
                        type_name: self.stored.name(),
                    });
                }
                Ok(*ptr)
            }
        }
    }

    /// Raw access plus a strong owner held until the lease is dropped.
    pub(crate) fn lease(&self, validity: &ValidityRegistry) -> Result<Lease> {
        match &self.ownership {
            Ownership::Shared { owner, ptr } => Ok(Lease {
                _guard: Some(Rc::clone(owner)),
                ptr: *ptr,
            }),
            Ownership::Weak { owner, ptr } => Ok(Lease {
                _guard: Some(owner.upgrade().ok_or_else(|| self.expired_weak())?),
                ptr: *ptr,
            }),
            Ownership::Scoped { .. } => Ok(Lease {
                _guard: None,
                ptr: self.obtain_raw(validity)?,
            }),
        }
    }

    /// A handle to a sub-object with the same ownership category.
    ///
    /// `ptr` must point inside the object this handle refers to.
    pub(crate) fn rebind(&self, stored: NativeTypeId, ptr: NonNull<()>) -> Handle {
        let ownership = match &self.ownership {
            Ownership::Shared { owner, .. } => Ownership::Shared {
                owner: Rc::clone(owner),
                ptr,
            },
            Ownership::Weak { owner, .. } => Ownership::Weak {
                owner: Weak::clone(owner),
                ptr,
            },
            Ownership::Scoped { token, .. } => Ownership::Scoped { ptr, token: *token },
        };
        Handle { stored, ownership }
    }

    /// The handle stored in a class userdata.
    pub(crate) fn of<'e>(
        engine: &'e Engine,
        value: &Value,
        expected: &'static str,
    ) -> Result<&'e Handle> {
        if !matches!(value, Value::Userdata(_)) {
            return Err(ConversionError::mismatch(expected, value.type_name()).into());
        }
        engine
            .userdata_payload(value)?
            .downcast_ref::<Handle>()
            .ok_or_else(|| ConversionError::mismatch(expected, "userdata").into())
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("stored", &self.stored)
            .field("ownership", &self.ownership.kind())
            .finish()
    }
}
