//! Callable adapters.
//!
//! Native closures reach the engine as userdata with a `__call`
//! metamethod. Reading such a value back yields the original [`NativeFn`],
//! so a closure survives a round trip with its identity intact. Any other
//! callable engine value is wrapped: the wrapper anchors the value in the
//! keep-alive table and calls back into the engine inside a call boundary.
//!
//! # Example
//!
//! ```
//! use scriptbind::{Engine, IntoNativeFn, NativeFn, Push, Read};
//!
//! let mut engine = Engine::new();
//! let add = (|a: i32, b: i32| a + b).into_native_fn();
//! let value = add.clone().push(&mut engine).unwrap();
//!
//! let back = NativeFn::read(&mut engine, &value).unwrap();
//! assert!(NativeFn::ptr_eq(&add, &back));
//! ```

use std::fmt;
use std::marker::PhantomData;

use scriptbind_core::{
    BridgeError, CallContext, ConversionError, Engine, KeepAlive, NativeCallable, NativeFn,
    RegistryKey, Result, Value,
};
use scriptbind_registry::BridgeContext;

use crate::marshal::{Push, PushMany, Read, ReadMany};

const ADAPTER_METATABLE: RegistryKey = RegistryKey::Named("scriptbind.native_function");

/// Payload of a callable adapter userdata.
struct Adapter(NativeFn);

fn adapter_metatable(engine: &mut Engine) -> Result<Value> {
    if let Some(metatable) = engine.registry_get(&ADAPTER_METATABLE) {
        return Ok(metatable);
    }

    let call = engine.wrap_function(
        NativeFn::from_fn(|ctx| {
            let callable = adapter_of(ctx.engine(), &ctx.arg(0))
                .ok_or_else(|| BridgeError::runtime("native function adapter has been finalized"))?;
            callable.call(&mut ctx.skip_args(1))
        }),
        Some("__call"),
    )?;
    let gc = engine.wrap_function(
        NativeFn::from_fn(|ctx| {
            let adapter = ctx.arg(0);
            ctx.engine_mut().take_userdata_payload(&adapter)?;
            Ok(())
        }),
        Some("__gc"),
    )?;

    let metatable = engine.create_table()?;
    engine.raw_set(&metatable, "__call".into(), call)?;
    engine.raw_set(&metatable, "__gc".into(), gc)?;
    engine.raw_set(&metatable, "__name".into(), "native function".into())?;
    engine.registry_set(ADAPTER_METATABLE, metatable.clone());
    Ok(metatable)
}

/// The closure behind an adapter userdata.
fn adapter_of(engine: &Engine, value: &Value) -> Option<NativeFn> {
    if !matches!(value, Value::Userdata(_)) {
        return None;
    }
    let payload = engine.userdata_payload(value).ok()?;
    payload.downcast_ref::<Adapter>().map(|adapter| adapter.0.clone())
}

impl Push for NativeFn {
    fn push(self, engine: &mut Engine) -> Result<Value> {
        let metatable = adapter_metatable(engine)?;
        let adapter = engine.create_userdata(Box::new(Adapter(self)))?;
        engine.set_metatable(&adapter, Some(&metatable))?;
        Ok(adapter)
    }
}

/// A callable engine value held from native code.
struct ScriptFunction {
    anchor: KeepAlive,
}

impl NativeCallable for ScriptFunction {
    fn call(&self, ctx: &mut CallContext<'_>) -> Result<()> {
        let func = ctx.engine().kept(&self.anchor).ok_or_else(|| {
            BridgeError::runtime("function called on an engine other than the one it came from")
        })?;
        let args = ctx.args().to_vec();
        let engine = ctx.engine_mut();
        let context = BridgeContext::of(engine);
        let _boundary = context.enter();
        let results = engine.call(&func, args)?;
        ctx.extend_returns(results);
        Ok(())
    }
}

fn is_callable(engine: &Engine, value: &Value) -> bool {
    match value {
        Value::Function(_) => true,
        Value::Table(_) | Value::Userdata(_) => engine
            .metatable(value)
            .and_then(|mt| engine.raw_get(&mt, &"__call".into()).ok())
            .is_some_and(|call| !call.is_nil()),
        _ => false,
    }
}

impl Read for NativeFn {
    fn read(engine: &mut Engine, value: &Value) -> Result<Self> {
        if let Some(callable) = adapter_of(engine, value) {
            return Ok(callable);
        }
        if !is_callable(engine, value) {
            return Err(ConversionError::mismatch("function", value.type_name()).into());
        }
        let anchor = engine.keep_alive(value.clone());
        Ok(NativeFn::new(ScriptFunction { anchor }))
    }
}

// ============================================================================
// Callback
// ============================================================================

/// A function with a typed signature, callable from native code.
///
/// `A` is the argument tuple and `R` the result type.
pub struct Callback<A, R> {
    func: NativeFn,
    _marker: PhantomData<fn(A) -> R>,
}

impl<A, R> Callback<A, R> {
    /// Wrap an untyped function.
    pub fn new(func: NativeFn) -> Self {
        Self {
            func,
            _marker: PhantomData,
        }
    }

    pub fn native_fn(&self) -> &NativeFn {
        &self.func
    }
}

impl<A: PushMany, R: ReadMany> Callback<A, R> {
    /// Call the function inside a call boundary.
    pub fn call(&self, engine: &mut Engine, args: A) -> Result<R> {
        let context = BridgeContext::of(engine);
        let boundary = context.enter();
        let args = {
            let _args = boundary.admit();
            args.push_many(engine)?
        };
        let results = engine.call_native(&self.func, args)?;
        R::read_many(engine, &results)
    }
}

impl<A, R> Clone for Callback<A, R> {
    fn clone(&self) -> Self {
        Self::new(self.func.clone())
    }
}

impl<A, R> fmt::Debug for Callback<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Callback").field(&self.func).finish()
    }
}

impl<A: 'static, R: 'static> Read for Callback<A, R> {
    fn read(engine: &mut Engine, value: &Value) -> Result<Self> {
        NativeFn::read(engine, value).map(Callback::new)
    }
}

impl<A, R> Push for Callback<A, R> {
    fn push(self, engine: &mut Engine) -> Result<Value> {
        self.func.push(engine)
    }
}

// ============================================================================
// IntoNativeFn
// ============================================================================

/// Conversion of typed closures into native functions.
///
/// Implemented for `Fn(A1, .., An) -> R` up to eight arguments, where every
/// argument is [`Read`] and the result is [`PushMany`]. The generated
/// function checks its arity, reads each argument and pushes the result.
pub trait IntoNativeFn<Args, Ret> {
    fn into_native_fn(self) -> NativeFn;
}

/// Wrap a typed closure as a [`NativeFn`].
pub fn function<F, Args, Ret>(f: F) -> NativeFn
where
    F: IntoNativeFn<Args, Ret>,
{
    f.into_native_fn()
}

pub(crate) fn check_arity(expected: usize, actual: usize) -> Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(BridgeError::IncorrectArity { expected, actual })
    }
}

macro_rules! impl_into_native_fn {
    ($count:expr; $($arg:ident),*) => {
        impl<Func, Ret, $($arg,)*> IntoNativeFn<($($arg,)*), Ret> for Func
        where
            Func: Fn($($arg),*) -> Ret + 'static,
            Ret: PushMany,
            $($arg: Read,)*
        {
            #[allow(non_snake_case, unused_mut, unused_variables)]
            fn into_native_fn(self) -> NativeFn {
                NativeFn::from_fn(move |ctx: &mut CallContext<'_>| {
                    check_arity($count, ctx.arg_count())?;
                    let mut args = ctx.args().to_vec().into_iter();
                    $(let $arg = $arg::read(ctx.engine_mut(), &args.next().unwrap_or_default())?;)*
                    let returns = (self)($($arg),*).push_many(ctx.engine_mut())?;
                    ctx.extend_returns(returns);
                    Ok(())
                })
            }
        }
    };
}

impl_into_native_fn!(0;);
impl_into_native_fn!(1; A1);
impl_into_native_fn!(2; A1, A2);
impl_into_native_fn!(3; A1, A2, A3);
impl_into_native_fn!(4; A1, A2, A3, A4);
impl_into_native_fn!(5; A1, A2, A3, A4, A5);
impl_into_native_fn!(6; A1, A2, A3, A4, A5, A6);
impl_into_native_fn!(7; A1, A2, A3, A4, A5, A6, A7);
impl_into_native_fn!(8; A1, A2, A3, A4, A5, A6, A7, A8);
