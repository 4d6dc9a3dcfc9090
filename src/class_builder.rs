//! ClassBuilder for exporting native types to the engine.
//!
//! ClassBuilder provides a fluent API for giving a native type methods,
//! constructors and bases, then installing the result as two class
//! descriptors: one for `T` and one for `const T`.
//!
//! # Method tables
//!
//! Each descriptor's metatable indexes a method table. Lookups that miss
//! fall through in this order:
//!
//! ```text
//! T methods ──► const T methods ──► B1 methods ──► B2 methods ...
//! const T methods ──► const B1 methods ──► const B2 methods ...
//! ```
//!
//! so a const handle only ever sees const methods, and inherited methods
//! are found through the bases' tables without being copied.
//!
//! # Example
//!
//! ```
//! use std::cell::Cell;
//! use scriptbind::{ClassBuilder, Engine, Read, Shared};
//!
//! #[derive(Default)]
//! struct Counter { count: Cell<i32> }
//! scriptbind::native_type!(Counter);
//!
//! let mut engine = Engine::new();
//! ClassBuilder::<Counter>::new(&mut engine, "Counter")
//!     .method("increment", |c: &Counter| {
//!         c.count.set(c.count.get() + 1);
//!         c.count.get()
//!     })
//!     .const_method("get", |c: &Counter| c.count.get())
//!     .constructor(Counter::default)
//!     .build()
//!     .unwrap();
//!
//! let ctor = engine.global("Counter");
//! let counter = engine.call(&ctor, vec![]).unwrap().remove(0);
//! engine.call_method(&counter, "increment", vec![]).unwrap();
//!
//! let native = Shared::<Counter>::read(&mut engine, &counter).unwrap();
//! assert_eq!(native.count.get(), 1);
//! ```

use std::marker::PhantomData;
use std::ptr::NonNull;

use scriptbind_core::{
    BridgeError, CallContext, ConversionError, Engine, NativeFn, NativeTypeId, RegistryKey,
    Result, Value,
};
use scriptbind_registry::{BridgeContext, ClassDescriptor, UpcastLink};

use crate::function::{IntoNativeFn, check_arity};
use crate::marshal::{NativeType, PushMany, Read, push_rebound, type_id};
use crate::ownership::{Handle, Lease};

const FINALIZER: RegistryKey = RegistryKey::Named("scriptbind.finalizer");
const INDEX_CHAIN: RegistryKey = RegistryKey::Named("scriptbind.index_chain");

/// Which handles a method accepts as its receiver.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Access {
    /// Only handles to a mutable `T`
    Mutable,
    /// Handles to `T` and to `const T`
    Const,
}

struct BaseClass {
    name: &'static str,
    methods: Value,
    const_methods: Value,
    link: UpcastLink,
}

/// Builder for exporting a native type as a class.
///
/// Created by [`ClassBuilder::new`] or `State::export::<T>(name)`.
pub struct ClassBuilder<'e, T: NativeType> {
    /// Engine the class is exported to
    engine: &'e mut Engine,
    /// Class name shown to scripts
    name: String,
    /// Methods of non-const handles
    methods: Vec<(String, NativeFn)>,
    /// Methods of every handle
    const_methods: Vec<(String, NativeFn)>,
    /// Global constructor functions
    constructors: Vec<(String, NativeFn)>,
    /// Bases in registration order
    bases: Vec<BaseClass>,
    _marker: PhantomData<fn() -> T>,
}

impl<'e, T: NativeType> ClassBuilder<'e, T> {
    /// Start exporting `T` under `name`.
    pub fn new(engine: &'e mut Engine, name: impl Into<String>) -> Self {
        Self {
            engine,
            name: name.into(),
            methods: Vec::new(),
            const_methods: Vec::new(),
            constructors: Vec::new(),
            bases: Vec::new(),
            _marker: PhantomData,
        }
    }

    /// Add a method callable on non-const handles.
    ///
    /// The receiver is checked at call time: a const handle fails with
    /// [`ConversionError::ConstViolation`].
    pub fn method<F, Args, Ret>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: IntoMethod<T, Args, Ret>,
    {
        self.methods
            .push((name.into(), f.into_method(Access::Mutable)));
        self
    }

    /// Add a method callable on every handle.
    pub fn const_method<F, Args, Ret>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: IntoMethod<T, Args, Ret>,
    {
        self.const_methods
            .push((name.into(), f.into_method(Access::Const)));
        self
    }

    /// Add a method working directly on the call context.
    ///
    /// The receiver is argument 0; no checks are made on it.
    pub fn method_raw<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&mut CallContext<'_>) -> Result<()> + 'static,
    {
        self.methods.push((name.into(), NativeFn::from_fn(f)));
        self
    }

    /// Add a method returning a handle to a sub-object of the receiver.
    ///
    /// The returned handle shares the receiver's ownership, so scripts can
    /// modify the inner object in place. `U` must be exported.
    pub fn method_ref<U, F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        U: NativeType,
        F: for<'a> Fn(&'a T) -> &'a U + 'static,
    {
        self.methods
            .push((name.into(), ref_method::<T, U, F>(f, Access::Mutable)));
        self
    }

    /// Like [`method_ref`](Self::method_ref), returning a `const U` handle.
    pub fn const_method_ref<U, F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        U: NativeType,
        F: for<'a> Fn(&'a T) -> &'a U + 'static,
    {
        self.const_methods
            .push((name.into(), ref_method::<T, U, F>(f, Access::Const)));
        self
    }

    /// Add a constructor installed as a global named after the class.
    pub fn constructor<F, Args>(self, f: F) -> Self
    where
        F: IntoNativeFn<Args, T>,
    {
        let name = self.name.clone();
        self.constructor_named(name, f)
    }

    /// Add a constructor installed as the global `name`.
    pub fn constructor_named<F, Args>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: IntoNativeFn<Args, T>,
    {
        self.constructors.push((name.into(), f.into_native_fn()));
        self
    }

    /// Declare `B` as a base of `T`.
    ///
    /// `project` locates the `B` inside a `T`. `B` must already be
    /// exported. Bases are searched in the order they are declared.
    pub fn base<B, F>(mut self, project: F) -> Result<Self>
    where
        B: NativeType,
        F: Fn(&T) -> &B + 'static,
    {
        let context = BridgeContext::of(self.engine);
        let methods = context.descriptor(&type_id::<B>())?;
        let const_methods = context.descriptor(&type_id::<B>().as_const())?;

        self.bases.push(BaseClass {
            name: B::NAME,
            methods: methods.methods().clone(),
            const_methods: const_methods.methods().clone(),
            link: UpcastLink::new::<T, B>(T::NAME, B::NAME, project),
        });
        Ok(self)
    }

    /// Install the class.
    ///
    /// Fails with [`BridgeError::AlreadyExported`] if `T` was exported
    /// before.
    pub fn build(self) -> Result<()> {
        let context = BridgeContext::of(self.engine);
        let id = type_id::<T>();
        if context.types().borrow().contains(&id) {
            return Err(BridgeError::AlreadyExported {
                what: format!("class {}", self.name),
            });
        }

        let engine = self.engine;
        let finalizer = shared_finalizer(engine)?;

        let methods = method_table(engine, &self.methods)?;
        let const_methods = method_table(engine, &self.const_methods)?;

        let mut fallbacks = vec![const_methods.clone()];
        fallbacks.extend(self.bases.iter().map(|base| base.methods.clone()));
        set_fallbacks(engine, &methods, &fallbacks)?;

        let const_fallbacks: Vec<Value> = self
            .bases
            .iter()
            .map(|base| base.const_methods.clone())
            .collect();
        set_fallbacks(engine, &const_methods, &const_fallbacks)?;

        let const_name = format!("const {}", self.name);
        let metatable = class_metatable(engine, &self.name, &methods, &finalizer)?;
        let const_metatable = class_metatable(engine, &const_name, &const_methods, &finalizer)?;

        context.install(
            engine,
            ClassDescriptor::new(id, self.name.as_str(), metatable, methods),
        )?;
        context.install(
            engine,
            ClassDescriptor::new(id.as_const(), const_name, const_metatable, const_methods),
        )?;

        for base in &self.bases {
            log::debug!("{} inherits from {}", self.name, base.name);
            context.register_upcast(base.link.clone())?;
        }

        for (name, constructor) in self.constructors {
            let function = engine.wrap_function(constructor, Some(&name))?;
            engine.set_global(&name, function)?;
        }

        log::debug!(
            "exported class {} ({} methods, {} const methods, {} bases)",
            self.name,
            self.methods.len(),
            self.const_methods.len(),
            self.bases.len()
        );
        Ok(())
    }
}

// ============================================================================
// Tables
// ============================================================================

fn shared_function<F>(engine: &mut Engine, key: RegistryKey, name: &str, f: F) -> Result<Value>
where
    F: Fn(&mut CallContext<'_>) -> Result<()> + 'static,
{
    if let Some(function) = engine.registry_get(&key) {
        return Ok(function);
    }
    let function = engine.wrap_function(NativeFn::from_fn(f), Some(name))?;
    engine.registry_set(key, function.clone());
    Ok(function)
}

/// The `__gc` shared by every class metatable.
///
/// Dropping the payload releases whatever the handle owned.
fn shared_finalizer(engine: &mut Engine) -> Result<Value> {
    shared_function(engine, FINALIZER, "__gc", |ctx| {
        let handle = ctx.arg(0);
        drop(ctx.engine_mut().take_userdata_payload(&handle)?);
        Ok(())
    })
}

/// `__index` for tables with several fallbacks, stored as the sequence part
/// of the table's metatable.
fn index_chain(engine: &mut Engine) -> Result<Value> {
    shared_function(engine, INDEX_CHAIN, "__index", |ctx| {
        let table = ctx.arg(0);
        let key = ctx.arg(1);
        let engine = ctx.engine_mut();
        let Some(metatable) = engine.metatable(&table) else {
            return Ok(());
        };
        for slot in 1..=engine.raw_len(&metatable)? {
            let fallback = engine.raw_get(&metatable, &Value::Int(slot as i64))?;
            let found = engine.index(&fallback, &key)?;
            if !found.is_nil() {
                ctx.push_return(found);
                return Ok(());
            }
        }
        Ok(())
    })
}

fn method_table(engine: &mut Engine, methods: &[(String, NativeFn)]) -> Result<Value> {
    let table = engine.create_table()?;
    for (name, method) in methods {
        let function = engine.wrap_function(method.clone(), Some(name))?;
        engine.raw_set(&table, Value::string(name), function)?;
    }
    Ok(table)
}

fn set_fallbacks(engine: &mut Engine, table: &Value, fallbacks: &[Value]) -> Result<()> {
    let index = match fallbacks {
        [] => return Ok(()),
        [single] => single.clone(),
        _ => index_chain(engine)?,
    };
    let metatable = engine.create_table()?;
    engine.raw_set(&metatable, "__index".into(), index)?;
    if fallbacks.len() > 1 {
        for (slot, fallback) in fallbacks.iter().enumerate() {
            engine.raw_set(&metatable, Value::Int(slot as i64 + 1), fallback.clone())?;
        }
    }
    engine.set_metatable(table, Some(&metatable))
}

fn class_metatable(
    engine: &mut Engine,
    name: &str,
    methods: &Value,
    finalizer: &Value,
) -> Result<Value> {
    let metatable = engine.create_table()?;
    engine.raw_set(&metatable, "__index".into(), methods.clone())?;
    engine.raw_set(&metatable, "__gc".into(), finalizer.clone())?;
    engine.raw_set(&metatable, "__name".into(), Value::string(name))?;
    Ok(metatable)
}

// ============================================================================
// Methods
// ============================================================================

/// Lease the receiver of a method call and locate its `T`.
///
/// Returns `None` when the receiver has expired.
fn borrow_receiver<'e, T: NativeType>(
    engine: &'e Engine,
    context: &BridgeContext,
    this: &Value,
    access: Access,
) -> Result<Option<(&'e Handle, Lease, NonNull<T>)>> {
    let handle = Handle::of(engine, this, T::NAME)?;
    if access == Access::Mutable && handle.is_const() {
        return Err(ConversionError::ConstViolation { type_name: T::NAME }.into());
    }
    let lease = match handle.lease(context.validity()) {
        Ok(lease) => lease,
        Err(err) if err.is_expired() => {
            log::trace!("{} method called on an expired receiver", T::NAME);
            return Ok(None);
        }
        Err(err) => return Err(err),
    };
    // SAFETY: the lease keeps the stored object alive.
    let ptr = unsafe { context.upcast(handle.stored(), type_id::<T>(), lease.ptr) }?;
    Ok(Some((handle, lease, ptr.cast())))
}

fn ref_method<T, U, F>(f: F, access: Access) -> NativeFn
where
    T: NativeType,
    U: NativeType,
    F: for<'a> Fn(&'a T) -> &'a U + 'static,
{
    let stored: NativeTypeId = match access {
        Access::Mutable => type_id::<U>(),
        Access::Const => type_id::<U>().as_const(),
    };
    NativeFn::from_fn(move |ctx| {
        check_arity(1, ctx.arg_count())?;
        let context = BridgeContext::of(ctx.engine_mut());
        let this = ctx.arg(0);
        let rebound = {
            let Some((handle, _lease, ptr)) =
                borrow_receiver::<T>(ctx.engine(), &context, &this, access)?
            else {
                return Ok(());
            };
            // SAFETY: `_lease` keeps the receiver alive for this block.
            let inner = f(unsafe { ptr.as_ref() });
            handle.rebind(stored, NonNull::from(inner).cast())
        };
        let value = push_rebound(ctx.engine_mut(), rebound)?;
        ctx.push_return(value);
        Ok(())
    })
}

/// Conversion of typed closures into methods of `T`.
///
/// Implemented for `Fn(&T, A1, .., An) -> R` up to eight arguments. The
/// generated method checks its arity (counting the receiver), leases the
/// receiver, reads each argument and pushes the result. A method called on
/// an expired receiver returns nothing.
pub trait IntoMethod<T, Args, Ret> {
    fn into_method(self, access: Access) -> NativeFn;
}

macro_rules! impl_into_method {
    ($count:expr; $($arg:ident),*) => {
        impl<T, Func, Ret, $($arg,)*> IntoMethod<T, ($($arg,)*), Ret> for Func
        where
            T: NativeType,
            Func: Fn(&T, $($arg),*) -> Ret + 'static,
            Ret: PushMany,
            $($arg: Read,)*
        {
            #[allow(non_snake_case, unused_mut, unused_variables)]
            fn into_method(self, access: Access) -> NativeFn {
                NativeFn::from_fn(move |ctx: &mut CallContext<'_>| {
                    check_arity($count + 1, ctx.arg_count())?;
                    let context = BridgeContext::of(ctx.engine_mut());
                    let this = ctx.arg(0);
                    let Some((_, _lease, ptr)) =
                        borrow_receiver::<T>(ctx.engine(), &context, &this, access)?
                    else {
                        return Ok(());
                    };

                    let mut args = ctx.args()[1..].to_vec().into_iter();
                    $(let $arg = $arg::read(ctx.engine_mut(), &args.next().unwrap_or_default())?;)*
                    // SAFETY: `_lease` keeps the receiver alive until the call returns.
                    let receiver = unsafe { ptr.as_ref() };
                    let returns = (self)(receiver, $($arg),*).push_many(ctx.engine_mut())?;
                    ctx.extend_returns(returns);
                    Ok(())
                })
            }
        }
    };
}

impl_into_method!(0;);
impl_into_method!(1; A1);
impl_into_method!(2; A1, A2);
impl_into_method!(3; A1, A2, A3);
impl_into_method!(4; A1, A2, A3, A4);
impl_into_method!(5; A1, A2, A3, A4, A5);
impl_into_method!(6; A1, A2, A3, A4, A5, A6);
impl_into_method!(7; A1, A2, A3, A4, A5, A6, A7);
impl_into_method!(8; A1, A2, A3, A4, A5, A6, A7, A8);
