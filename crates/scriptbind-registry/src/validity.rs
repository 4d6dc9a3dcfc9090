//! Reference validity registry.
//!
//! A scoped reference pushed into the engine carries a [`ValidityToken`].
//! The token is live from the push until the end of the native ↔ engine
//! round trip that introduced it; dereferencing the reference checks
//! membership in the live set.
//!
//! Round trips are bracketed by a [`CallBoundary`] guard. The guard records
//! the token counter on entry and, when dropped, retires every token minted
//! since, whether the round trip returned normally, failed or unwound.
//! Nested round trips nest guards, so the watermarks form a stack.
//!
//! Tokens are only minted while a boundary admits arguments
//! ([`CallBoundary::admit`]). The bridge admits while it pushes the
//! arguments handed to a call, which the caller keeps borrowed until the
//! call returns. A callback pushing a reference to one of its own locals
//! is refused, since nothing ties that local to the boundary.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::num::NonZeroU64;
use std::rc::Rc;

use rustc_hash::FxHashSet;
use scriptbind_core::{BridgeError, Result};

/// Proof of validity for one scoped reference.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValidityToken(NonZeroU64);

impl ValidityToken {
    /// Raw token id.
    pub fn get(self) -> u64 {
        self.0.get()
    }
}

/// Live scoped-reference tokens of one engine.
pub struct ValidityRegistry {
    live: RefCell<FxHashSet<ValidityToken>>,
    /// Last minted id, 0 before the first mint
    counter: Cell<u64>,
    /// Number of open call boundaries
    depth: Cell<usize>,
    /// Whether the innermost boundary is admitting arguments
    admitting: Cell<bool>,
}

impl ValidityRegistry {
    pub fn new() -> Self {
        Self {
            live: RefCell::new(FxHashSet::default()),
            counter: Cell::new(0),
            depth: Cell::new(0),
            admitting: Cell::new(false),
        }
    }

    /// Mint a token bound to the innermost open call boundary.
    ///
    /// Fails with `IncorrectPointerType` outside any boundary, since no
    /// round trip would ever end the reference's validity, and while the
    /// innermost boundary is not admitting arguments.
    pub fn mint(&self) -> Result<ValidityToken> {
        if self.depth.get() == 0 {
            return Err(BridgeError::incorrect_pointer(
                "references can only be passed inside a call",
            ));
        }
        if !self.admitting.get() {
            return Err(BridgeError::incorrect_pointer(
                "references can only be passed as call arguments",
            ));
        }
        let next = self.counter.get() + 1;
        self.counter.set(next);
        let token = NonZeroU64::new(next)
            .map(ValidityToken)
            .ok_or_else(|| BridgeError::runtime("validity token counter overflowed"))?;
        self.live.borrow_mut().insert(token);
        Ok(token)
    }

    /// Whether `token` is still live.
    pub fn is_live(&self, token: ValidityToken) -> bool {
        self.live.borrow().contains(&token)
    }

    /// Retire `token` before its boundary ends. Returns whether it was live.
    pub fn invalidate(&self, token: ValidityToken) -> bool {
        self.live.borrow_mut().remove(&token)
    }

    /// Number of live tokens.
    pub fn live_count(&self) -> usize {
        self.live.borrow().len()
    }

    /// Number of open call boundaries.
    pub fn depth(&self) -> usize {
        self.depth.get()
    }

    /// Whether a reference pushed now would be admitted.
    pub fn is_admitting(&self) -> bool {
        self.depth.get() > 0 && self.admitting.get()
    }

    /// Open a call boundary. Tokens minted until the guard drops expire with it.
    ///
    /// A new boundary does not admit arguments until [`CallBoundary::admit`].
    pub fn enter(self: &Rc<Self>) -> CallBoundary {
        self.depth.set(self.depth.get() + 1);
        log::trace!("call boundary enter (depth {})", self.depth.get());
        CallBoundary {
            registry: Rc::clone(self),
            watermark: self.counter.get(),
            admitting_before: self.admitting.replace(false),
        }
    }
}

impl Default for ValidityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ValidityRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidityRegistry")
            .field("live", &self.live.borrow().len())
            .field("counter", &self.counter.get())
            .field("depth", &self.depth.get())
            .finish()
    }
}

/// RAII guard over one native ↔ engine round trip.
#[must_use = "dropping the boundary immediately expires every reference minted in it"]
pub struct CallBoundary {
    registry: Rc<ValidityRegistry>,
    watermark: u64,
    /// Admission state of the enclosing boundary
    admitting_before: bool,
}

impl CallBoundary {
    /// The registry this boundary belongs to.
    pub fn registry(&self) -> &Rc<ValidityRegistry> {
        &self.registry
    }

    /// Admit references until the returned guard drops.
    ///
    /// Only values that stay borrowed until this boundary closes may be
    /// pushed while the guard is held.
    pub fn admit(&self) -> Admission<'_> {
        Admission {
            boundary: self,
            before: self.registry.admitting.replace(true),
        }
    }
}

/// Guard returned by [`CallBoundary::admit`].
#[must_use = "references are only admitted while the guard is held"]
pub struct Admission<'b> {
    boundary: &'b CallBoundary,
    before: bool,
}

impl Drop for Admission<'_> {
    fn drop(&mut self) {
        self.boundary.registry.admitting.set(self.before);
    }
}

impl Drop for CallBoundary {
    fn drop(&mut self) {
        let watermark = self.watermark;
        self.registry
            .live
            .borrow_mut()
            .retain(|token| token.get() <= watermark);
        self.registry.depth.set(self.registry.depth.get() - 1);
        self.registry.admitting.set(self.admitting_before);
        log::trace!("call boundary exit (depth {})", self.registry.depth.get());
    }
}

impl fmt::Debug for CallBoundary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallBoundary")
            .field("watermark", &self.watermark)
            .finish()
    }
}
