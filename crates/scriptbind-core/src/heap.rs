//! Generational arena for garbage-collected engine objects.
//!
//! Objects are stored in a Vec of slots with generation tracking. When an
//! object is freed its slot is reused with the generation incremented, so
//! stale handles are detected instead of aliasing the new occupant.
//!
//! Liveness is decided by mark-and-sweep from the roots the engine supplies.
//! Every allocation and table growth is charged against an optional byte
//! budget; a charge that would exceed it fails without changing the heap.

use std::any::Any;
use std::fmt;
use std::rc::Rc;

use bitflags::bitflags;
use rustc_hash::FxHashMap;

use crate::error::{BridgeError, ConversionError, Result};
use crate::native_fn::NativeFn;
use crate::value::{ObjectHandle, TableKey, Value};

/// Estimated cost of an empty table.
const TABLE_COST: usize = 64;
/// Estimated cost of one table entry, excluding string key bytes.
const ENTRY_COST: usize = 40;
/// Estimated cost of a userdata block, excluding its payload.
const USERDATA_COST: usize = 48;
/// Estimated cost of a function object.
const FUNCTION_COST: usize = 40;

bitflags! {
    /// Per-object collector state.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct ObjectFlags: u8 {
        /// Reached during the current mark phase
        const MARKED = 1;
        /// Finalizer has already run
        const FINALIZED = 1 << 1;
    }
}

/// An associative table with an optional metatable.
#[derive(Default)]
pub struct Table {
    entries: FxHashMap<TableKey, Value>,
    metatable: Option<ObjectHandle>,
}

impl Table {
    /// Raw lookup, no metamethods.
    pub fn get(&self, key: &TableKey) -> Option<&Value> {
        self.entries.get(key)
    }

    /// Raw lookup by string key.
    pub fn get_str(&self, name: &str) -> Option<&Value> {
        self.entries.get(&TableKey::name(name))
    }

    /// Sequence length: the largest `n` such that keys `1..=n` are all present.
    pub fn len(&self) -> usize {
        let mut n = 0usize;
        while self.entries.contains_key(&TableKey::Int(n as i64 + 1)) {
            n += 1;
        }
        n
    }

    /// Whether the table has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over all entries in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = (&TableKey, &Value)> {
        self.entries.iter()
    }

    /// The table's metatable.
    pub fn metatable(&self) -> Option<ObjectHandle> {
        self.metatable
    }
}

/// An opaque native payload with an optional metatable.
pub struct Userdata {
    payload: Option<Box<dyn Any>>,
    metatable: Option<ObjectHandle>,
}

impl Userdata {
    /// The payload, unless it has been taken by a finalizer.
    pub fn payload(&self) -> Option<&dyn Any> {
        self.payload.as_deref()
    }

    /// The userdata's metatable.
    pub fn metatable(&self) -> Option<ObjectHandle> {
        self.metatable
    }
}

/// An engine-owned function.
pub struct Function {
    callable: NativeFn,
    name: Option<Rc<str>>,
}

impl Function {
    /// The callable run when this function is invoked.
    pub fn callable(&self) -> &NativeFn {
        &self.callable
    }

    /// Debug name, if given at creation.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

/// A managed object.
pub enum HeapObject {
    Table(Table),
    Function(Function),
    Userdata(Userdata),
}

impl HeapObject {
    /// Create an empty table.
    pub fn table() -> Self {
        HeapObject::Table(Table::default())
    }

    /// Create a userdata block.
    pub fn userdata(payload: Box<dyn Any>) -> Self {
        HeapObject::Userdata(Userdata {
            payload: Some(payload),
            metatable: None,
        })
    }

    /// Create a function object.
    pub fn function(callable: NativeFn, name: Option<&str>) -> Self {
        HeapObject::Function(Function {
            callable,
            name: name.map(Rc::from),
        })
    }

    /// Engine type name of the object.
    pub fn type_name(&self) -> &'static str {
        match self {
            HeapObject::Table(_) => "table",
            HeapObject::Function(_) => "function",
            HeapObject::Userdata(_) => "userdata",
        }
    }

    fn base_cost(&self) -> usize {
        match self {
            HeapObject::Table(_) => TABLE_COST,
            HeapObject::Function(_) => FUNCTION_COST,
            HeapObject::Userdata(_) => USERDATA_COST,
        }
    }

    /// Value referring to this object through `handle`.
    pub fn value(&self, handle: ObjectHandle) -> Value {
        match self {
            HeapObject::Table(_) => Value::Table(handle),
            HeapObject::Function(_) => Value::Function(handle),
            HeapObject::Userdata(_) => Value::Userdata(handle),
        }
    }
}

struct HeapSlot {
    generation: u32,
    object: Option<HeapObject>,
    flags: ObjectFlags,
    /// Bytes charged for this object
    size: usize,
}

/// Storage for every managed object of one engine.
pub struct Heap {
    slots: Vec<HeapSlot>,
    free_list: Vec<u32>,
    bytes_in_use: usize,
    /// Byte budget, 0 for unlimited
    limit: usize,
}

fn entry_cost(key: &TableKey) -> usize {
    match key {
        TableKey::String(s) => ENTRY_COST + s.len(),
        _ => ENTRY_COST,
    }
}

impl Heap {
    /// Create an empty heap with no memory limit.
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_list: Vec::new(),
            bytes_in_use: 0,
            limit: 0,
        }
    }

    /// Bytes currently charged.
    pub fn bytes_in_use(&self) -> usize {
        self.bytes_in_use
    }

    /// Current byte budget, 0 for unlimited.
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Set the byte budget, 0 for unlimited.
    pub fn set_limit(&mut self, limit: usize) {
        self.limit = limit;
    }

    /// Number of live objects.
    pub fn live_count(&self) -> usize {
        self.slots.len() - self.free_list.len()
    }

    fn reserve(&self, bytes: usize) -> Result<()> {
        if self.limit != 0 && self.bytes_in_use + bytes > self.limit {
            return Err(BridgeError::OutOfMemory {
                requested: bytes,
                in_use: self.bytes_in_use,
                limit: self.limit,
            });
        }
        Ok(())
    }

    /// Allocate a new object, charging its estimated size.
    pub fn allocate(&mut self, object: HeapObject) -> Result<ObjectHandle> {
        let size = object.base_cost();
        self.reserve(size)?;
        self.bytes_in_use += size;

        if let Some(index) = self.free_list.pop() {
            let slot = &mut self.slots[index as usize];
            slot.object = Some(object);
            slot.flags = ObjectFlags::empty();
            slot.size = size;
            Ok(ObjectHandle::new(index, slot.generation))
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(HeapSlot {
                generation: 0,
                object: Some(object),
                flags: ObjectFlags::empty(),
                size,
            });
            Ok(ObjectHandle::new(index, 0))
        }
    }

    fn slot(&self, handle: ObjectHandle) -> Option<&HeapSlot> {
        let slot = self.slots.get(handle.index as usize)?;
        (slot.generation == handle.generation && slot.object.is_some()).then_some(slot)
    }

    fn slot_mut(&mut self, handle: ObjectHandle) -> Option<&mut HeapSlot> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        (slot.generation == handle.generation && slot.object.is_some()).then_some(slot)
    }

    /// Get an object.
    ///
    /// Returns None if the handle is stale.
    pub fn get(&self, handle: ObjectHandle) -> Option<&HeapObject> {
        self.slot(handle)?.object.as_ref()
    }

    /// Check whether a handle still refers to a live object.
    pub fn contains(&self, handle: ObjectHandle) -> bool {
        self.slot(handle).is_some()
    }

    /// Get a table, failing for stale handles and other object kinds.
    pub fn table(&self, handle: ObjectHandle) -> Result<&Table, ConversionError> {
        match self.get(handle) {
            Some(HeapObject::Table(t)) => Ok(t),
            Some(other) => Err(ConversionError::mismatch("table", other.type_name())),
            None => Err(ConversionError::StaleHandle),
        }
    }

    /// Get a userdata block, failing for stale handles and other object kinds.
    pub fn userdata(&self, handle: ObjectHandle) -> Result<&Userdata, ConversionError> {
        match self.get(handle) {
            Some(HeapObject::Userdata(u)) => Ok(u),
            Some(other) => Err(ConversionError::mismatch("userdata", other.type_name())),
            None => Err(ConversionError::StaleHandle),
        }
    }

    /// Get a function object, failing for stale handles and other object kinds.
    pub fn function(&self, handle: ObjectHandle) -> Result<&Function, ConversionError> {
        match self.get(handle) {
            Some(HeapObject::Function(f)) => Ok(f),
            Some(other) => Err(ConversionError::mismatch("function", other.type_name())),
            None => Err(ConversionError::StaleHandle),
        }
    }

    /// Take the payload out of a userdata block, leaving it empty.
    pub fn take_payload(&mut self, handle: ObjectHandle) -> Result<Box<dyn Any>, ConversionError> {
        match self.slot_mut(handle).and_then(|s| s.object.as_mut()) {
            Some(HeapObject::Userdata(u)) => u.payload.take().ok_or(ConversionError::Finalized),
            Some(other) => Err(ConversionError::mismatch("userdata", other.type_name())),
            None => Err(ConversionError::StaleHandle),
        }
    }

    /// Metatable of a table or userdata.
    pub fn metatable(&self, handle: ObjectHandle) -> Option<ObjectHandle> {
        match self.get(handle)? {
            HeapObject::Table(t) => t.metatable,
            HeapObject::Userdata(u) => u.metatable,
            HeapObject::Function(_) => None,
        }
    }

    /// Set or clear the metatable of a table or userdata.
    pub fn set_metatable(
        &mut self,
        handle: ObjectHandle,
        metatable: Option<ObjectHandle>,
    ) -> Result<(), ConversionError> {
        match self.slot_mut(handle).and_then(|s| s.object.as_mut()) {
            Some(HeapObject::Table(t)) => t.metatable = metatable,
            Some(HeapObject::Userdata(u)) => u.metatable = metatable,
            Some(HeapObject::Function(_)) => {
                return Err(ConversionError::mismatch("table or userdata", "function"));
            }
            None => return Err(ConversionError::StaleHandle),
        }
        Ok(())
    }

    /// Raw table assignment. Assigning nil removes the entry.
    ///
    /// New entries are charged against the budget; removals are refunded.
    pub fn table_set(&mut self, handle: ObjectHandle, key: TableKey, value: Value) -> Result<()> {
        let is_new = !self.table(handle)?.entries.contains_key(&key);
        let cost = entry_cost(&key);
        if is_new && !value.is_nil() {
            self.reserve(cost)?;
        }

        let slot = self.slot_mut(handle).ok_or(ConversionError::StaleHandle)?;
        let Some(HeapObject::Table(table)) = slot.object.as_mut() else {
            return Err(ConversionError::mismatch("table", "object").into());
        };

        let (added, removed) = if value.is_nil() {
            (false, table.entries.remove(&key).is_some())
        } else {
            table.entries.insert(key, value);
            (is_new, false)
        };
        if added {
            slot.size += cost;
        } else if removed {
            slot.size -= cost;
        }
        if added {
            self.bytes_in_use += cost;
        } else if removed {
            self.bytes_in_use -= cost;
        }
        Ok(())
    }

    /// Free an object immediately, returning it.
    pub fn free(&mut self, handle: ObjectHandle) -> Option<HeapObject> {
        let slot = self.slot_mut(handle)?;
        let object = slot.object.take();
        slot.generation = slot.generation.wrapping_add(1);
        slot.flags = ObjectFlags::empty();
        let size = std::mem::take(&mut slot.size);
        self.bytes_in_use -= size;
        self.free_list.push(handle.index);
        object
    }

    /// Collector flags of a live object.
    pub fn flags(&self, handle: ObjectHandle) -> Option<ObjectFlags> {
        self.slot(handle).map(|s| s.flags)
    }

    /// Set collector flags on a live object.
    pub fn insert_flags(&mut self, handle: ObjectHandle, flags: ObjectFlags) {
        if let Some(slot) = self.slot_mut(handle) {
            slot.flags.insert(flags);
        }
    }

    /// Mark every object reachable from `roots`.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn mark(&mut self, roots: impl IntoIterator<Item = ObjectHandle>) {
        let mut worklist: Vec<ObjectHandle> = roots.into_iter().collect();

        while let Some(handle) = worklist.pop() {
            let Some(slot) = self.slot_mut(handle) else {
                continue;
            };
            if slot.flags.contains(ObjectFlags::MARKED) {
                continue;
            }
            slot.flags.insert(ObjectFlags::MARKED);

            match slot.object.as_ref() {
                Some(HeapObject::Table(table)) => {
                    worklist.extend(table.metatable);
                    for (key, value) in &table.entries {
                        worklist.extend(key.as_handle());
                        worklist.extend(value.as_handle());
                    }
                }
                Some(HeapObject::Userdata(userdata)) => worklist.extend(userdata.metatable),
                Some(HeapObject::Function(_)) | None => {}
            }
        }
    }

    /// Live objects not reached by the last mark phase.
    pub fn unmarked(&self) -> Vec<ObjectHandle> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.object.is_some() && !slot.flags.contains(ObjectFlags::MARKED))
            .map(|(index, slot)| ObjectHandle::new(index as u32, slot.generation))
            .collect()
    }

    /// Clear the mark bit on every object.
    pub fn clear_marks(&mut self) {
        for slot in &mut self.slots {
            slot.flags.remove(ObjectFlags::MARKED);
        }
    }

    /// Handles of every live object.
    pub fn handles(&self) -> Vec<ObjectHandle> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.object.is_some())
            .map(|(index, slot)| ObjectHandle::new(index as u32, slot.generation))
            .collect()
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Heap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Heap")
            .field("slot_count", &self.slots.len())
            .field("free_count", &self.free_list.len())
            .field("bytes_in_use", &self.bytes_in_use)
            .field("limit", &self.limit)
            .finish()
    }
}
