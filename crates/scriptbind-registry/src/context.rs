//! Per-engine bridge state.
//!
//! The type registry, upcast chain and validity registry belong to one
//! engine instance. They are bundled in a [`BridgeContext`] stored as the
//! engine's user data, so two engines never share descriptors or tokens.

use std::cell::RefCell;
use std::ptr::NonNull;
use std::rc::Rc;

use scriptbind_core::{Engine, NativeTypeId, Result};

use crate::type_registry::{ClassDescriptor, TypeRegistry};
use crate::upcast::{Resolution, UpcastChain, UpcastLink};
use crate::validity::{CallBoundary, ValidityRegistry, ValidityToken};

/// Bridge registries of one engine.
#[derive(Debug, Default)]
pub struct BridgeContext {
    types: RefCell<TypeRegistry>,
    upcasts: RefCell<UpcastChain>,
    validity: Rc<ValidityRegistry>,
}

impl BridgeContext {
    /// The context of `engine`, created on first use.
    pub fn of(engine: &mut Engine) -> Rc<BridgeContext> {
        engine.user_data_or_insert_with(BridgeContext::default)
    }

    /// The context of `engine`, if one was ever created.
    pub fn get(engine: &Engine) -> Option<Rc<BridgeContext>> {
        engine.user_data::<BridgeContext>()
    }

    pub fn types(&self) -> &RefCell<TypeRegistry> {
        &self.types
    }

    pub fn upcasts(&self) -> &RefCell<UpcastChain> {
        &self.upcasts
    }

    pub fn validity(&self) -> &Rc<ValidityRegistry> {
        &self.validity
    }

    /// Clone of the descriptor for `id`.
    pub fn descriptor(&self, id: &NativeTypeId) -> Result<ClassDescriptor> {
        self.types.borrow().lookup(id).cloned()
    }

    /// Install a class descriptor.
    pub fn install(&self, engine: &mut Engine, descriptor: ClassDescriptor) -> Result<()> {
        self.types.borrow_mut().install(engine, descriptor)
    }

    /// Install a base relationship.
    pub fn register_upcast(&self, link: UpcastLink) -> Result<()> {
        self.upcasts.borrow_mut().register(link)
    }

    /// The adjustment from `stored` to `requested`.
    pub fn resolve(&self, stored: NativeTypeId, requested: NativeTypeId) -> Result<Resolution> {
        self.upcasts.borrow().resolve(stored, requested)
    }

    /// Move `ptr` from `stored` to `requested`.
    ///
    /// # Safety
    ///
    /// `ptr` must point to a live value of the `stored` type.
    pub unsafe fn upcast(
        &self,
        stored: NativeTypeId,
        requested: NativeTypeId,
        ptr: NonNull<()>,
    ) -> Result<NonNull<()>> {
        let resolution = self.resolve(stored, requested)?;
        // SAFETY: forwarded from the caller.
        Ok(unsafe { resolution.apply(ptr) })
    }

    /// Open a call boundary on this engine's validity registry.
    pub fn enter(&self) -> CallBoundary {
        self.validity.enter()
    }

    /// Mint a token for a scoped reference.
    pub fn mint(&self) -> Result<ValidityToken> {
        self.validity.mint()
    }

    pub fn is_live(&self, token: ValidityToken) -> bool {
        self.validity.is_live(token)
    }
}
