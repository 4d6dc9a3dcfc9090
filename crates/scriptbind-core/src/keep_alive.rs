//! Keep-alive table.
//!
//! Anchors engine values for native code that holds on to them beyond the
//! current call, independent of the engine's own stack. The anchor is an
//! opaque [`KeepAlive`] token; dropping it queues the slot for release,
//! which the engine applies before its next collection.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::engine::EngineId;
use crate::value::Value;

/// Opaque reference to an anchored value.
///
/// Not clonable: each anchor is released exactly once, when dropped. An
/// anchor that outlives its engine is inert.
pub struct KeepAlive {
    slot: u32,
    engine: EngineId,
    released: Weak<RefCell<Vec<u32>>>,
}

impl KeepAlive {
    /// Engine the anchored value belongs to.
    pub fn engine_id(&self) -> EngineId {
        self.engine
    }

    /// Whether the owning engine still exists.
    pub fn is_attached(&self) -> bool {
        self.released.strong_count() > 0
    }
}

impl Drop for KeepAlive {
    fn drop(&mut self) {
        if let Some(queue) = self.released.upgrade() {
            queue.borrow_mut().push(self.slot);
        }
    }
}

impl fmt::Debug for KeepAlive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeepAlive")
            .field("slot", &self.slot)
            .field("engine", &self.engine)
            .finish()
    }
}

/// Values anchored on behalf of native code.
pub struct KeepAliveTable {
    engine: EngineId,
    slots: Vec<Option<Value>>,
    free: Vec<u32>,
    released: Rc<RefCell<Vec<u32>>>,
}

impl KeepAliveTable {
    pub(crate) fn new(engine: EngineId) -> Self {
        Self {
            engine,
            slots: Vec::new(),
            free: Vec::new(),
            released: Rc::new(RefCell::new(Vec::new())),
        }
    }

    /// Anchor a value until the returned token is dropped.
    pub fn anchor(&mut self, value: Value) -> KeepAlive {
        let slot = match self.free.pop() {
            Some(slot) => {
                self.slots[slot as usize] = Some(value);
                slot
            }
            None => {
                self.slots.push(Some(value));
                (self.slots.len() - 1) as u32
            }
        };
        log::trace!("keep-alive anchored slot {slot}");
        KeepAlive {
            slot,
            engine: self.engine,
            released: Rc::downgrade(&self.released),
        }
    }

    /// The value behind an anchor of this engine.
    pub fn get(&self, anchor: &KeepAlive) -> Option<&Value> {
        if anchor.engine != self.engine {
            return None;
        }
        self.slots.get(anchor.slot as usize)?.as_ref()
    }

    /// Free the slots of dropped anchors.
    pub fn drain_released(&mut self) -> usize {
        let released = std::mem::take(&mut *self.released.borrow_mut());
        for &slot in &released {
            if let Some(entry) = self.slots.get_mut(slot as usize)
                && entry.take().is_some()
            {
                self.free.push(slot);
                log::trace!("keep-alive released slot {slot}");
            }
        }
        released.len()
    }

    /// Number of anchored values.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Whether nothing is anchored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every anchored value, for use as collection roots.
    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.slots.iter().flatten()
    }
}

impl fmt::Debug for KeepAliveTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeepAliveTable")
            .field("anchored", &self.len())
            .field("pending_release", &self.released.borrow().len())
            .finish()
    }
}
