//! Host engine for the scriptbind bridge.
//!
//! A small single-threaded engine with a garbage-collected heap of tables,
//! functions and userdata, a value stack, metatables with `__index`,
//! `__call` and `__gc`, a registry and a keep-alive table. The bridge in the
//! `scriptbind` crate exposes native objects to it.

pub mod call_context;
pub mod engine;
pub mod error;
pub mod heap;
pub mod keep_alive;
pub mod native_fn;
pub mod property;
pub mod type_id;
pub mod value;

pub use call_context::CallContext;
pub use engine::{Engine, EngineId, RegistryKey};
pub use error::{BridgeError, ConversionError, Result};
pub use heap::{Function, Heap, HeapObject, ObjectFlags, Table, Userdata};
pub use keep_alive::{KeepAlive, KeepAliveTable};
pub use native_fn::{NativeCallable, NativeFn};
pub use property::EngineProperty;
pub use type_id::NativeTypeId;
pub use value::{ObjectHandle, TableKey, Value, exact_integer};
