//! Native function storage.
//!
//! Every function the engine can run, whether it was installed as script
//! code or exported from native code, is a [`NativeFn`]: a shared,
//! type-erased callable receiving a [`CallContext`].

use std::fmt;
use std::rc::Rc;

use crate::call_context::CallContext;
use crate::error::Result;

/// Trait for callable native functions.
///
/// The `call` method receives a [`CallContext`] that provides access to the
/// arguments and collects return values.
pub trait NativeCallable {
    /// Call this function with the given context.
    fn call(&self, ctx: &mut CallContext<'_>) -> Result<()>;
}

impl<F> NativeCallable for F
where
    F: Fn(&mut CallContext<'_>) -> Result<()>,
{
    fn call(&self, ctx: &mut CallContext<'_>) -> Result<()> {
        (self)(ctx)
    }
}

/// Type-erased, reference-counted native function.
///
/// Clones share the same callable; [`NativeFn::ptr_eq`] tells whether two
/// values are the same function.
#[derive(Clone)]
pub struct NativeFn {
    inner: Rc<dyn NativeCallable>,
}

impl NativeFn {
    /// Wrap any callable.
    pub fn new<C>(callable: C) -> Self
    where
        C: NativeCallable + 'static,
    {
        Self {
            inner: Rc::new(callable),
        }
    }

    /// Wrap a closure over the raw call context.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&mut CallContext<'_>) -> Result<()> + 'static,
    {
        Self::new(f)
    }

    /// Call this native function with the given context.
    pub fn call(&self, ctx: &mut CallContext<'_>) -> Result<()> {
        self.inner.call(ctx)
    }

    /// Whether both values share the same callable.
    pub fn ptr_eq(a: &NativeFn, b: &NativeFn) -> bool {
        Rc::ptr_eq(&a.inner, &b.inner)
    }
}

impl fmt::Debug for NativeFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeFn")
            .field("ptr", &Rc::as_ptr(&self.inner).cast::<()>())
            .finish()
    }
}
