//! State: an engine plus the round-trip entry points.
//!
//! Every call made through [`State`] (or the free [`call`] function) runs
//! inside a call boundary. Native references pushed as arguments are valid
//! for the duration of that call and expire when it returns, even if the
//! script stored them somewhere.
//!
//! # Example
//!
//! ```
//! use scriptbind::State;
//!
//! let mut state = State::new();
//! state.set_function("add", |a: i64, b: i64| a + b).unwrap();
//!
//! let sum: i64 = state.call("add", (2, 3)).unwrap();
//! assert_eq!(sum, 5);
//! ```

use std::marker::PhantomData;

use scriptbind_core::{BridgeError, CallContext, Engine, EngineProperty, Result, Value};
use scriptbind_registry::{BridgeContext, CallBoundary};

use crate::class_builder::ClassBuilder;
use crate::function::IntoNativeFn;
use crate::marshal::{NativeType, Push, PushMany, Read, ReadMany};

/// Call `func` with `args` inside a call boundary.
///
/// Usable on a bare engine, for instance from inside a native callback.
/// References among `args` stay valid until the call returns.
pub fn call<R: ReadMany>(engine: &mut Engine, func: &Value, args: impl PushMany) -> Result<R> {
    let context = BridgeContext::of(engine);
    let boundary = context.enter();
    let args = {
        let _args = boundary.admit();
        args.push_many(engine)?
    };
    let results = engine.call(func, args)?;
    R::read_many(engine, &results)
}

/// An engine with its bridge registries.
#[derive(Debug, Default)]
pub struct State {
    engine: Engine,
}

impl State {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a state whose engine starts with the given properties.
    pub fn with_properties(properties: &[(EngineProperty, usize)]) -> Self {
        Self {
            engine: Engine::with_properties(properties),
        }
    }

    pub fn set_property(&mut self, property: EngineProperty, value: usize) {
        self.engine.set_property(property, value);
    }

    pub fn property(&self, property: EngineProperty) -> usize {
        self.engine.property(property)
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut Engine {
        &mut self.engine
    }

    /// Assign a global.
    ///
    /// Globals outlive any single call, so only owned values qualify.
    /// Borrowed values go through [`State::scope`] instead:
    ///
    /// ```compile_fail
    /// use scriptbind::State;
    ///
    /// struct Position { x: f32 }
    /// scriptbind::native_type!(Position);
    ///
    /// let mut state = State::new();
    /// let position = Position { x: 1.0 };
    /// state.set_global("position", &position).unwrap();
    /// ```
    pub fn set_global<V: Push + 'static>(&mut self, name: &str, value: V) -> Result<()> {
        let value = value.push(&mut self.engine)?;
        self.engine.set_global(name, value)
    }

    /// Read a global, converted to `R`.
    pub fn global<R: Read>(&mut self, name: &str) -> Result<R> {
        let value = self.engine.global(name);
        R::read(&mut self.engine, &value)
    }

    /// Install an engine function working directly on the call context.
    pub fn load_function<F>(&mut self, name: &str, f: F) -> Result<()>
    where
        F: Fn(&mut CallContext<'_>) -> Result<()> + 'static,
    {
        let function = self.engine.create_function(f)?;
        self.engine.set_global(name, function)
    }

    /// Install a typed native closure as the global `name`.
    pub fn set_function<F, Args, Ret>(&mut self, name: &str, f: F) -> Result<()>
    where
        F: IntoNativeFn<Args, Ret>,
    {
        self.set_global(name, f.into_native_fn())
    }

    /// Call the global function `name`.
    pub fn call<R: ReadMany>(&mut self, name: &str, args: impl PushMany) -> Result<R> {
        let func = self.engine.global(name);
        if func.is_nil() {
            return Err(BridgeError::runtime(format!(
                "attempt to call a nil value (global '{name}')"
            )));
        }
        call(&mut self.engine, &func, args)
    }

    /// Call a function value.
    pub fn call_value<R: ReadMany>(&mut self, func: &Value, args: impl PushMany) -> Result<R> {
        call(&mut self.engine, func, args)
    }

    /// Run `f` inside one call boundary.
    ///
    /// Borrowed values outliving the scope may be set as globals; they
    /// expire when the scope ends.
    pub fn scope<'env, R>(&mut self, f: impl FnOnce(&mut Scope<'_, 'env>) -> R) -> R {
        let context = BridgeContext::of(&mut self.engine);
        let mut scope = Scope {
            boundary: context.enter(),
            engine: &mut self.engine,
            _env: PhantomData,
        };
        f(&mut scope)
    }

    /// Start exporting `T` as the class `name`.
    pub fn export<T: NativeType>(&mut self, name: &str) -> ClassBuilder<'_, T> {
        ClassBuilder::new(&mut self.engine, name)
    }

    /// Run a full collection, returning the number of objects freed.
    pub fn collect(&mut self) -> usize {
        self.engine.collect()
    }

    /// Bytes currently allocated in the managed heap.
    pub fn memory_usage(&self) -> usize {
        self.engine.memory_usage()
    }

    /// Cap the managed heap at `bytes`; zero removes the cap.
    pub fn set_memory_limit(&mut self, bytes: usize) {
        self.engine
            .set_property(EngineProperty::MemoryLimit, bytes);
    }
}

/// A call boundary held open across several operations.
///
/// Created by [`State::scope`].
pub struct Scope<'s, 'env> {
    engine: &'s mut Engine,
    boundary: CallBoundary,
    _env: PhantomData<&'env mut &'env ()>,
}

impl<'env> Scope<'_, 'env> {
    /// Assign a global that may borrow from outside the scope.
    pub fn set_global<V: Push + 'env>(&mut self, name: &str, value: V) -> Result<()> {
        let value = {
            let _args = self.boundary.admit();
            value.push(self.engine)?
        };
        self.engine.set_global(name, value)
    }

    /// Read a global, converted to `R`.
    pub fn global<R: Read>(&mut self, name: &str) -> Result<R> {
        let value = self.engine.global(name);
        R::read(self.engine, &value)
    }

    /// Call the global function `name`; arguments may borrow from outside
    /// the scope.
    pub fn call<R: ReadMany>(&mut self, name: &str, args: impl PushMany + 'env) -> Result<R> {
        let func = self.engine.global(name);
        call(self.engine, &func, args)
    }

    /// The engine, for calls and reads inside the scope.
    ///
    /// References pushed through it directly are refused; borrowed values
    /// enter the scope through [`Scope::set_global`] or [`Scope::call`].
    pub fn engine(&mut self) -> &mut Engine {
        self.engine
    }
}
