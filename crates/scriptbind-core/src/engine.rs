//! The host engine.
//!
//! [`Engine`] owns the managed heap, the value stack, the globals table, the
//! registry and the keep-alive table. It runs functions, resolves `__index`
//! and `__call` metamethods, and collects garbage, invoking each unreachable
//! userdata's `__gc` finalizer before freeing it.
//!
//! The engine is single-threaded and re-entrant: a function may call back
//! into the engine that is running it, up to
//! [`EngineProperty::MaxCallDepth`] levels deep.
//!
//! # Example
//!
//! ```
//! use scriptbind_core::{Engine, Value};
//!
//! let mut engine = Engine::new();
//! let double = engine
//!     .create_function(|ctx| {
//!         let Value::Int(x) = ctx.arg(0) else {
//!             return Err(scriptbind_core::BridgeError::runtime("expected an integer"));
//!         };
//!         ctx.push_return(Value::Int(x * 2));
//!         Ok(())
//!     })
//!     .unwrap();
//!
//! let results = engine.call(&double, vec![Value::Int(21)]).unwrap();
//! assert_eq!(results, vec![Value::Int(42)]);
//! ```

use std::any::{Any, TypeId};
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use rustc_hash::FxHashMap;

use crate::call_context::CallContext;
use crate::error::{BridgeError, ConversionError, Result};
use crate::heap::{Heap, HeapObject, ObjectFlags};
use crate::keep_alive::{KeepAlive, KeepAliveTable};
use crate::native_fn::NativeFn;
use crate::property::EngineProperty;
use crate::type_id::NativeTypeId;
use crate::value::{ObjectHandle, TableKey, Value};

/// Longest `__index` chain followed before assuming a loop.
const MAX_INDEX_CHAIN: usize = 100;

/// Unique identity of an engine instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct EngineId(u64);

impl EngineId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        EngineId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Key of an entry in the engine registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RegistryKey {
    /// Entry owned by a subsystem, under a fixed name
    Named(&'static str),
    /// Per-class entry
    Class(NativeTypeId),
}

/// A single-threaded, garbage-collected host engine.
pub struct Engine {
    id: EngineId,
    heap: Heap,
    stack: Vec<Value>,
    globals: ObjectHandle,
    registry: FxHashMap<RegistryKey, Value>,
    keep_alive: KeepAliveTable,
    user_data: FxHashMap<TypeId, Rc<dyn Any>>,
    depth: usize,
    max_call_depth: usize,
}

impl Engine {
    /// Create an engine with default properties.
    pub fn new() -> Self {
        let id = EngineId::next();
        let mut heap = Heap::new();
        // The heap starts unlimited, so this allocation cannot fail.
        let globals = match heap.allocate(HeapObject::table()) {
            Ok(handle) => handle,
            Err(_) => unreachable!("unlimited heap refused an allocation"),
        };

        Self {
            id,
            heap,
            stack: Vec::with_capacity(EngineProperty::InitialStackCapacity.default_value()),
            globals,
            registry: FxHashMap::default(),
            keep_alive: KeepAliveTable::new(id),
            user_data: FxHashMap::default(),
            depth: 0,
            max_call_depth: EngineProperty::MaxCallDepth.default_value(),
        }
    }

    /// Create an engine with the given properties applied.
    pub fn with_properties(properties: &[(EngineProperty, usize)]) -> Self {
        let mut engine = Self::new();
        for &(property, value) in properties {
            engine.set_property(property, value);
        }
        engine
    }

    /// This engine's identity.
    pub fn id(&self) -> EngineId {
        self.id
    }

    // ========================================================================
    // Properties
    // ========================================================================

    /// Change an engine property.
    pub fn set_property(&mut self, property: EngineProperty, value: usize) {
        match property {
            EngineProperty::MemoryLimit => self.heap.set_limit(value),
            EngineProperty::MaxCallDepth => self.max_call_depth = value,
            EngineProperty::InitialStackCapacity => {
                self.stack.reserve(value.saturating_sub(self.stack.len()));
            }
        }
    }

    /// Current value of an engine property.
    pub fn property(&self, property: EngineProperty) -> usize {
        match property {
            EngineProperty::MemoryLimit => self.heap.limit(),
            EngineProperty::MaxCallDepth => self.max_call_depth,
            EngineProperty::InitialStackCapacity => self.stack.capacity(),
        }
    }

    /// Bytes charged against the memory budget.
    pub fn memory_usage(&self) -> usize {
        self.heap.bytes_in_use()
    }

    /// Number of live managed objects.
    pub fn object_count(&self) -> usize {
        self.heap.live_count()
    }

    /// Read access to the heap.
    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    // ========================================================================
    // Object creation
    // ========================================================================

    /// Create an empty table.
    pub fn create_table(&mut self) -> Result<Value> {
        let handle = self.heap.allocate(HeapObject::table())?;
        Ok(Value::Table(handle))
    }

    /// Create an engine function from a closure over the call context.
    pub fn create_function<F>(&mut self, f: F) -> Result<Value>
    where
        F: Fn(&mut CallContext<'_>) -> Result<()> + 'static,
    {
        self.wrap_function(NativeFn::from_fn(f), None)
    }

    /// Create an engine function around an existing callable.
    pub fn wrap_function(&mut self, callable: NativeFn, name: Option<&str>) -> Result<Value> {
        let handle = self.heap.allocate(HeapObject::function(callable, name))?;
        Ok(Value::Function(handle))
    }

    /// Create a userdata block holding `payload`.
    pub fn create_userdata(&mut self, payload: Box<dyn Any>) -> Result<Value> {
        let handle = self.heap.allocate(HeapObject::userdata(payload))?;
        Ok(Value::Userdata(handle))
    }

    /// Payload of a userdata value.
    pub fn userdata_payload(&self, value: &Value) -> Result<&dyn Any, ConversionError> {
        let Value::Userdata(handle) = value else {
            return Err(ConversionError::mismatch("userdata", value.type_name()));
        };
        self.heap
            .userdata(*handle)?
            .payload()
            .ok_or(ConversionError::Finalized)
    }

    /// Take the payload out of a userdata value, leaving it empty.
    pub fn take_userdata_payload(&mut self, value: &Value) -> Result<Box<dyn Any>, ConversionError> {
        let Value::Userdata(handle) = value else {
            return Err(ConversionError::mismatch("userdata", value.type_name()));
        };
        self.heap.take_payload(*handle)
    }

    // ========================================================================
    // Tables and metatables
    // ========================================================================

    fn table_handle(value: &Value) -> Result<ObjectHandle, ConversionError> {
        match value {
            Value::Table(handle) => Ok(*handle),
            other => Err(ConversionError::mismatch("table", other.type_name())),
        }
    }

    /// Table lookup without metamethods.
    pub fn raw_get(&self, table: &Value, key: &Value) -> Result<Value> {
        let table = self.heap.table(Self::table_handle(table)?)?;
        Ok(TableKey::lookup(key)
            .and_then(|key| table.get(&key).cloned())
            .unwrap_or_default())
    }

    /// Table assignment without metamethods. Assigning nil removes the key.
    pub fn raw_set(&mut self, table: &Value, key: Value, value: Value) -> Result<()> {
        let handle = Self::table_handle(table)?;
        let key = TableKey::from_value(&key)?;
        self.heap.table_set(handle, key, value)
    }

    /// Sequence length of a table.
    pub fn raw_len(&self, table: &Value) -> Result<usize> {
        Ok(self.heap.table(Self::table_handle(table)?)?.len())
    }

    /// Every entry of a table, in unspecified order.
    pub fn pairs(&self, table: &Value) -> Result<Vec<(Value, Value)>> {
        let table = self.heap.table(Self::table_handle(table)?)?;
        Ok(table
            .iter()
            .map(|(key, value)| (key.to_value(), value.clone()))
            .collect())
    }

    /// Metatable of a table or userdata.
    pub fn metatable(&self, value: &Value) -> Option<Value> {
        match value {
            Value::Table(handle) | Value::Userdata(handle) => {
                self.heap.metatable(*handle).map(Value::Table)
            }
            _ => None,
        }
    }

    /// Set or clear the metatable of a table or userdata.
    pub fn set_metatable(&mut self, value: &Value, metatable: Option<&Value>) -> Result<()> {
        let metatable = metatable.map(Self::table_handle).transpose()?;
        match value {
            Value::Table(handle) | Value::Userdata(handle) => {
                self.heap.set_metatable(*handle, metatable)?;
                Ok(())
            }
            other => Err(ConversionError::mismatch("table or userdata", other.type_name()).into()),
        }
    }

    /// Raw metamethod lookup.
    fn metamethod(&self, value: &Value, event: &str) -> Value {
        let Some(handle) = value.as_handle().and_then(|h| self.heap.metatable(h)) else {
            return Value::Nil;
        };
        match self.heap.table(handle) {
            Ok(mt) => mt.get_str(event).cloned().unwrap_or_default(),
            Err(_) => Value::Nil,
        }
    }

    /// Indexing with `__index` fallback.
    ///
    /// Tables are read raw first. When the raw lookup finds nothing (or the
    /// value is not a table), the metatable's `__index` is consulted: a
    /// function is called with `(value, key)`, anything else is indexed in
    /// turn.
    pub fn index(&mut self, value: &Value, key: &Value) -> Result<Value> {
        let mut current = value.clone();
        for _ in 0..MAX_INDEX_CHAIN {
            if matches!(current, Value::Table(_)) {
                let found = self.raw_get(&current, key)?;
                if !found.is_nil() {
                    return Ok(found);
                }
            }

            let handler = self.metamethod(&current, "__index");
            match handler {
                Value::Nil if matches!(current, Value::Table(_)) => return Ok(Value::Nil),
                Value::Nil => {
                    return Err(BridgeError::runtime(format!(
                        "attempt to index a {} value",
                        current.type_name()
                    )));
                }
                Value::Function(_) => {
                    let results = self.call(&handler, vec![current, key.clone()])?;
                    return Ok(results.into_iter().next().unwrap_or_default());
                }
                next => current = next,
            }
        }
        Err(BridgeError::runtime("'__index' chain too long; possible loop"))
    }

    /// Index by string name.
    pub fn get_field(&mut self, value: &Value, name: &str) -> Result<Value> {
        self.index(value, &Value::string(name))
    }

    // ========================================================================
    // Globals, registry, keep-alive, user data
    // ========================================================================

    /// The globals table.
    pub fn globals(&self) -> Value {
        Value::Table(self.globals)
    }

    /// Read a global; nil if unset.
    pub fn global(&self, name: &str) -> Value {
        self.heap
            .table(self.globals)
            .ok()
            .and_then(|t| t.get_str(name).cloned())
            .unwrap_or_default()
    }

    /// Assign a global. Assigning nil removes it.
    pub fn set_global(&mut self, name: &str, value: Value) -> Result<()> {
        self.heap.table_set(self.globals, TableKey::name(name), value)
    }

    /// Read a registry entry.
    pub fn registry_get(&self, key: &RegistryKey) -> Option<Value> {
        self.registry.get(key).cloned()
    }

    /// Write a registry entry. Registry values are collection roots.
    pub fn registry_set(&mut self, key: RegistryKey, value: Value) {
        if value.is_nil() {
            self.registry.remove(&key);
        } else {
            self.registry.insert(key, value);
        }
    }

    /// Anchor a value until the returned token is dropped.
    pub fn keep_alive(&mut self, value: Value) -> KeepAlive {
        self.keep_alive.anchor(value)
    }

    /// The value behind an anchor, if the anchor belongs to this engine.
    pub fn kept(&self, anchor: &KeepAlive) -> Option<Value> {
        self.keep_alive.get(anchor).cloned()
    }

    /// The keep-alive table.
    pub fn keep_alive_table(&self) -> &KeepAliveTable {
        &self.keep_alive
    }

    /// Typed user data attached to this engine.
    pub fn user_data<T: Any>(&self) -> Option<Rc<T>> {
        let data = Rc::clone(self.user_data.get(&TypeId::of::<T>())?);
        data.downcast::<T>().ok()
    }

    /// Attach typed user data, replacing any previous value of that type.
    pub fn set_user_data<T: Any>(&mut self, data: Rc<T>) {
        self.user_data.insert(TypeId::of::<T>(), data);
    }

    /// Typed user data, created on first access.
    pub fn user_data_or_insert_with<T: Any>(&mut self, create: impl FnOnce() -> T) -> Rc<T> {
        if let Some(existing) = self.user_data::<T>() {
            return existing;
        }
        let data = Rc::new(create());
        self.set_user_data(Rc::clone(&data));
        data
    }

    // ========================================================================
    // Calls
    // ========================================================================

    pub(crate) fn stack(&self) -> &[Value] {
        &self.stack
    }

    pub(crate) fn stack_push(&mut self, value: Value) {
        self.stack.push(value);
    }

    /// Number of values on the stack; zero between top-level calls.
    pub fn stack_len(&self) -> usize {
        self.stack.len()
    }

    /// Current call nesting depth.
    pub fn call_depth(&self) -> usize {
        self.depth
    }

    /// Find what to run for `func`, following `__call` on tables and userdata.
    fn resolve_callable(&self, func: &Value) -> Result<(NativeFn, Option<Value>)> {
        match func {
            Value::Function(handle) => Ok((self.heap.function(*handle)?.callable().clone(), None)),
            Value::Table(_) | Value::Userdata(_) => match self.metamethod(func, "__call") {
                Value::Function(handle) => Ok((
                    self.heap.function(handle)?.callable().clone(),
                    Some(func.clone()),
                )),
                _ => Err(BridgeError::runtime(format!(
                    "attempt to call a {} value",
                    func.type_name()
                ))),
            },
            other => Err(BridgeError::runtime(format!(
                "attempt to call a {} value",
                other.type_name()
            ))),
        }
    }

    /// Call a function with `args`, returning every result.
    ///
    /// Errors raised by the callee propagate unchanged.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn call(&mut self, func: &Value, args: Vec<Value>) -> Result<Vec<Value>> {
        let (callable, receiver) = self.resolve_callable(func)?;
        self.invoke(&callable, receiver, args)
    }

    /// Run a native callable directly, as if it had been called from the engine.
    pub fn call_native(&mut self, callable: &NativeFn, args: Vec<Value>) -> Result<Vec<Value>> {
        self.invoke(callable, None, args)
    }

    fn invoke(
        &mut self,
        callable: &NativeFn,
        receiver: Option<Value>,
        args: Vec<Value>,
    ) -> Result<Vec<Value>> {
        if self.depth >= self.max_call_depth {
            return Err(BridgeError::runtime("stack overflow"));
        }

        let base = self.stack.len();
        self.stack.extend(receiver);
        self.stack.extend(args);
        let nargs = self.stack.len() - base;

        self.depth += 1;
        let outcome = callable.call(&mut CallContext::new(self, base, nargs));
        self.depth -= 1;

        let results = if self.stack.len() > base + nargs {
            self.stack.split_off(base + nargs)
        } else {
            Vec::new()
        };
        self.stack.truncate(base);
        outcome.map(|()| results)
    }

    /// Call the method `name` of `object`, passing `object` first.
    pub fn call_method(&mut self, object: &Value, name: &str, args: Vec<Value>) -> Result<Vec<Value>> {
        let method = self.get_field(object, name)?;
        if method.is_nil() {
            return Err(BridgeError::runtime(format!(
                "attempt to call a nil value (method '{name}')"
            )));
        }
        let mut full = Vec::with_capacity(args.len() + 1);
        full.push(object.clone());
        full.extend(args);
        self.call(&method, full)
    }

    // ========================================================================
    // Collection
    // ========================================================================

    fn roots(&self) -> Vec<ObjectHandle> {
        let mut roots = vec![self.globals];
        roots.extend(self.registry.values().filter_map(Value::as_handle));
        roots.extend(self.keep_alive.values().filter_map(Value::as_handle));
        roots.extend(self.stack.iter().filter_map(Value::as_handle));
        roots
    }

    /// Run `__gc` for a userdata about to be freed. Returns whether it ran.
    fn finalize(&mut self, handle: ObjectHandle) -> bool {
        let value = Value::Userdata(handle);
        let finalizer = self.metamethod(&value, "__gc");
        if finalizer.is_nil() {
            return false;
        }
        if self
            .heap
            .flags(handle)
            .is_some_and(|flags| flags.contains(ObjectFlags::FINALIZED))
        {
            return false;
        }
        self.heap.insert_flags(handle, ObjectFlags::FINALIZED);

        log::trace!("finalizing userdata #{}", handle.index);
        if let Err(err) = self.call(&finalizer, vec![value]) {
            log::warn!("finalizer for userdata #{} failed: {err}", handle.index);
        }
        true
    }

    /// Collect every object unreachable from the roots.
    ///
    /// Roots are the globals table, the registry, the keep-alive table and
    /// the value stack. Unreachable userdata have their `__gc` finalizer run
    /// before anything is freed. A finalizer that stores its object (or
    /// anything it reaches) somewhere reachable resurrects it: the roots are
    /// marked again after finalizers run and only objects still unreachable
    /// are freed. A resurrected userdata is never finalized a second time.
    /// Returns the number of objects freed.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn collect(&mut self) -> usize {
        let released = self.keep_alive.drain_released();

        let roots = self.roots();
        self.heap.mark(roots);
        let mut unreachable = self.heap.unmarked();
        self.heap.clear_marks();

        let mut finalized = 0;
        for &handle in &unreachable {
            let is_userdata = matches!(self.heap.get(handle), Some(HeapObject::Userdata(_)));
            if is_userdata && self.finalize(handle) {
                finalized += 1;
            }
        }

        if finalized > 0 {
            let roots = self.roots();
            self.heap.mark(roots);
            unreachable.retain(|&handle| {
                self.heap
                    .flags(handle)
                    .is_some_and(|flags| !flags.contains(ObjectFlags::MARKED))
            });
            self.heap.clear_marks();
        }

        let freed = unreachable
            .into_iter()
            .filter(|&handle| self.heap.free(handle).is_some())
            .count();
        log::debug!(
            "collected {freed} objects ({released} keep-alive releases), {} bytes in use",
            self.heap.bytes_in_use()
        );
        freed
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Engine {
    /// Closing the engine runs every pending finalizer.
    fn drop(&mut self) {
        self.stack.clear();
        for handle in self.heap.handles() {
            if matches!(self.heap.get(handle), Some(HeapObject::Userdata(_))) {
                self.finalize(handle);
            }
        }
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("id", &self.id)
            .field("heap", &self.heap)
            .field("stack_len", &self.stack.len())
            .field("registry_len", &self.registry.len())
            .field("keep_alive", &self.keep_alive)
            .finish()
    }
}
