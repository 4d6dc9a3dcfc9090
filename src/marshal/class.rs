//! Marshalling of exported class values.

use std::ptr::NonNull;

use scriptbind_core::{BridgeError, ConversionError, Engine, NativeTypeId, Result, Value};
use scriptbind_registry::{BridgeContext, ClassDescriptor};

use super::{NativeType, Push, Read};
use crate::ownership::{Handle, Ownership, Shared, WeakRef};

/// Identity of the mutable form of `T`.
pub fn type_id<T: NativeType>() -> NativeTypeId {
    NativeTypeId::named::<T>(T::NAME)
}

/// Create a class handle userdata for `stored`.
///
/// The descriptor is looked up before `ownership` is produced, so an
/// unexported class fails without minting anything.
pub(crate) fn push_handle(
    engine: &mut Engine,
    stored: NativeTypeId,
    ownership: impl FnOnce(&BridgeContext) -> Result<Ownership>,
) -> Result<Value> {
    let context = BridgeContext::of(engine);
    let descriptor = context.descriptor(&stored)?;
    let handle = Handle::new(stored, ownership(context.as_ref())?);
    attach(engine, &descriptor, handle)
}

/// Push a handle derived from another one, such as a sub-object projection.
pub(crate) fn push_rebound(engine: &mut Engine, handle: Handle) -> Result<Value> {
    let descriptor = BridgeContext::of(engine).descriptor(&handle.stored())?;
    attach(engine, &descriptor, handle)
}

fn attach(engine: &mut Engine, descriptor: &ClassDescriptor, handle: Handle) -> Result<Value> {
    let value = engine.create_userdata(Box::new(handle))?;
    engine.set_metatable(&value, Some(descriptor.metatable()))?;
    Ok(value)
}

/// Fail unless `T` is exported or is the stored type itself.
fn check_requested<T: NativeType>(context: &BridgeContext, stored: NativeTypeId) -> Result<()> {
    let requested = type_id::<T>();
    if stored.same_type(&requested) || context.types().borrow().is_exported(&requested) {
        Ok(())
    } else {
        Err(BridgeError::ClassNotRegistered {
            type_name: T::NAME,
        })
    }
}

/// Move a pointer to the stored object to its `T` sub-object.
///
/// # Safety
///
/// `ptr` must point to a live value of the `stored` type.
unsafe fn upcast_to<T: NativeType>(
    context: &BridgeContext,
    stored: NativeTypeId,
    ptr: NonNull<()>,
) -> Result<NonNull<()>> {
    check_requested::<T>(context, stored)?;
    // SAFETY: forwarded from the caller.
    unsafe { context.upcast(stored, type_id::<T>(), ptr) }
}

// ============================================================================
// Push
// ============================================================================

impl<T: NativeType> Push for Shared<T> {
    #[cfg_attr(feature = "profiling", profiling::function)]
    fn push(self, engine: &mut Engine) -> Result<Value> {
        push_handle(engine, type_id::<T>(), |_| {
            let (owner, ptr) = self.into_parts();
            Ok(Ownership::Shared { owner, ptr })
        })
    }
}

impl<T: NativeType> Push for WeakRef<T> {
    fn push(self, engine: &mut Engine) -> Result<Value> {
        push_handle(engine, type_id::<T>(), |_| {
            let (owner, ptr) = self.into_parts();
            Ok(Ownership::Weak { owner, ptr })
        })
    }
}

impl<T: NativeType> Push for &T {
    #[cfg_attr(feature = "profiling", profiling::function)]
    fn push(self, engine: &mut Engine) -> Result<Value> {
        push_handle(engine, type_id::<T>().as_const(), |context| {
            Ok(Ownership::Scoped {
                ptr: NonNull::from(self).cast(),
                token: context.mint()?,
            })
        })
    }
}

impl<T: NativeType> Push for &mut T {
    fn push(self, engine: &mut Engine) -> Result<Value> {
        push_handle(engine, type_id::<T>(), |context| {
            Ok(Ownership::Scoped {
                ptr: NonNull::from(self).cast(),
                token: context.mint()?,
            })
        })
    }
}

// ============================================================================
// Read
// ============================================================================

impl<T: NativeType> Read for Shared<T> {
    #[cfg_attr(feature = "profiling", profiling::function)]
    fn read(engine: &mut Engine, value: &Value) -> Result<Self> {
        let context = BridgeContext::of(engine);
        let handle = Handle::of(engine, value, T::NAME)?;
        let (owner, ptr) = handle.obtain_shared()?;
        // SAFETY: `owner` keeps the stored object alive.
        let ptr = unsafe { upcast_to::<T>(&context, handle.stored(), ptr) }?;
        // SAFETY: `ptr` points to the `T` inside the allocation `owner` owns.
        Ok(unsafe { Shared::from_parts(owner, ptr) })
    }
}

impl<T: NativeType> Read for WeakRef<T> {
    fn read(engine: &mut Engine, value: &Value) -> Result<Self> {
        let context = BridgeContext::of(engine);
        let handle = Handle::of(engine, value, T::NAME)?;
        let stored = handle.stored();
        let (owner, ptr) = handle.obtain_weak()?;

        let ptr = if stored.same_type(&type_id::<T>()) {
            ptr
        } else {
            let _alive = owner.upgrade().ok_or(BridgeError::ExpiredWeakPointer {
                type_name: stored.name(),
            })?;
            // SAFETY: `_alive` keeps the stored object alive.
            unsafe { upcast_to::<T>(&context, stored, ptr) }?
        };
        // SAFETY: `ptr` points to the `T` inside the allocation `owner` observes.
        Ok(unsafe { WeakRef::from_parts(owner, ptr) })
    }
}

/// Raw address of the `T` behind a class handle.
fn read_raw<T: NativeType>(engine: &mut Engine, value: &Value, mutable: bool) -> Result<NonNull<()>> {
    let context = BridgeContext::of(engine);
    let handle = Handle::of(engine, value, T::NAME)?;
    if mutable && handle.is_const() {
        return Err(ConversionError::ConstViolation {
            type_name: T::NAME,
        }
        .into());
    }
    let ptr = handle.obtain_raw(context.validity())?;
    // SAFETY: `obtain_raw` only succeeds while the stored object is alive.
    unsafe { upcast_to::<T>(&context, handle.stored(), ptr) }
}

/// Accepts both `T` and `const T` handles.
impl<T: NativeType> Read for *const T {
    fn read(engine: &mut Engine, value: &Value) -> Result<Self> {
        Ok(read_raw::<T>(engine, value, false)?.cast::<T>().as_ptr().cast_const())
    }
}

/// Requires a non-const handle.
impl<T: NativeType> Read for *mut T {
    fn read(engine: &mut Engine, value: &Value) -> Result<Self> {
        Ok(read_raw::<T>(engine, value, true)?.cast::<T>().as_ptr())
    }
}

/// By-value reads clone the object; both `T` and `const T` handles qualify.
impl<T: NativeType + Clone> Read for T {
    #[cfg_attr(feature = "profiling", profiling::function)]
    fn read(engine: &mut Engine, value: &Value) -> Result<Self> {
        let context = BridgeContext::of(engine);
        let handle = Handle::of(engine, value, T::NAME)?;
        let lease = handle.lease(context.validity())?;
        // SAFETY: the lease keeps the stored object alive.
        let ptr = unsafe { upcast_to::<T>(&context, handle.stored(), lease.ptr) }?;
        // SAFETY: as above; the clone completes before the lease is dropped.
        Ok(unsafe { ptr.cast::<T>().as_ref() }.clone())
    }
}
