//! Lifetime-safe bridging of native objects into a scripting engine.
//!
//! Native values cross into the engine through [`Push`] and come back
//! through [`Read`]. Class types exported with [`ClassBuilder`] are held by
//! the engine in one of three ways:
//!
//! - **shared**: the engine co-owns the object ([`Shared<T>`], or `T` by value)
//! - **weak**: the engine observes an object owned elsewhere ([`WeakRef<T>`])
//! - **scoped**: the engine borrows the object for one call (`&T`, `&mut T`)
//!
//! Scoped references are only honoured while the call that introduced them
//! is running; afterwards every access fails with
//! [`BridgeError::Expired`]. Upcasts to exported bases are resolved
//! through the per-engine upcast chain, so a handle to a derived class can
//! be read as any of its bases.
//!
//! # Example
//!
//! ```
//! use std::cell::Cell;
//! use scriptbind::{Shared, State};
//!
//! #[derive(Default)]
//! struct Counter { count: Cell<i32> }
//! scriptbind::native_type!(Counter);
//!
//! let mut state = State::new();
//! state
//!     .export::<Counter>("Counter")
//!     .method("increment", |c: &Counter| c.count.set(c.count.get() + 1))
//!     .build()
//!     .unwrap();
//!
//! let counter = Shared::new(Counter::default());
//! state.set_global("counter", counter.clone()).unwrap();
//!
//! let handle = state.engine().global("counter");
//! for _ in 0..3 {
//!     state.engine_mut().call_method(&handle, "increment", vec![]).unwrap();
//! }
//! assert_eq!(counter.count.get(), 3);
//! ```

pub mod class_builder;
pub mod function;
pub mod marshal;
pub mod ownership;
pub mod state;

pub use class_builder::{Access, ClassBuilder, IntoMethod};
pub use function::{Callback, IntoNativeFn, function};
pub use marshal::{
    NativeType, Push, PushMany, Read, ReadMany, const_type_id, push, read, type_id,
};
pub use ownership::{Shared, WeakRef};
pub use state::{Scope, State, call};

pub use scriptbind_core::{
    BridgeError, CallContext, ConversionError, Engine, EngineId, EngineProperty, KeepAlive,
    NativeCallable, NativeFn, NativeTypeId, Result, Value,
};
pub use scriptbind_registry::{
    Admission, BridgeContext, CallBoundary, ClassDescriptor, UpcastLink, ValidityRegistry,
    ValidityToken,
};
