//! Bridge registries.
//!
//! Per-engine bookkeeping for exported native classes:
//!
//! - [`TypeRegistry`]: class descriptors keyed by native type identity
//! - [`ValidityRegistry`]: live tokens of scoped references, bounded by
//!   [`CallBoundary`] guards
//! - [`UpcastChain`]: derived → base pointer adjustments
//!
//! [`BridgeContext`] bundles the three and hangs them off the engine.

pub mod context;
pub mod type_registry;
pub mod upcast;
pub mod validity;

pub use context::BridgeContext;
pub use type_registry::{ClassDescriptor, TypeRegistry};
pub use upcast::{Resolution, UpcastChain, UpcastLink};
pub use validity::{Admission, CallBoundary, ValidityRegistry, ValidityToken};
