//! Per-type class descriptors.
//!
//! Every exported native type has two descriptors: one keyed by `T` and one
//! keyed by `const T`. A descriptor carries the metatable stamped on every
//! handle of that type and the method table its `__index` resolves through.
//! Descriptors are immutable once installed.

use std::fmt;
use std::rc::Rc;

use rustc_hash::FxHashMap;
use scriptbind_core::{BridgeError, Engine, NativeTypeId, RegistryKey, Result, Value};

/// Script-visible description of one exported type.
#[derive(Clone, Debug)]
pub struct ClassDescriptor {
    id: NativeTypeId,
    name: Rc<str>,
    metatable: Value,
    methods: Value,
}

impl ClassDescriptor {
    pub fn new(id: NativeTypeId, name: impl Into<Rc<str>>, metatable: Value, methods: Value) -> Self {
        Self {
            id,
            name: name.into(),
            metatable,
            methods,
        }
    }

    pub fn id(&self) -> NativeTypeId {
        self.id
    }

    /// Script-visible class name, prefixed with `const ` for const descriptors.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Metatable stamped on handles of this type.
    pub fn metatable(&self) -> &Value {
        &self.metatable
    }

    /// Method table handles of this type look up methods in.
    pub fn methods(&self) -> &Value {
        &self.methods
    }
}

/// Class descriptors of one engine, keyed by type identity.
#[derive(Default)]
pub struct TypeRegistry {
    classes: FxHashMap<NativeTypeId, ClassDescriptor>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a descriptor and root its tables in the engine registry.
    pub fn install(&mut self, engine: &mut Engine, descriptor: ClassDescriptor) -> Result<()> {
        if self.classes.contains_key(&descriptor.id) {
            return Err(BridgeError::AlreadyExported {
                what: format!("class {}", descriptor.name),
            });
        }

        let root = engine.create_table()?;
        engine.raw_set(&root, "metatable".into(), descriptor.metatable.clone())?;
        engine.raw_set(&root, "methods".into(), descriptor.methods.clone())?;
        engine.registry_set(RegistryKey::Class(descriptor.id), root);

        self.classes.insert(descriptor.id, descriptor);
        Ok(())
    }

    /// Descriptor for exactly `id`.
    pub fn get(&self, id: &NativeTypeId) -> Option<&ClassDescriptor> {
        self.classes.get(id)
    }

    /// Descriptor for `id`, failing with `ClassNotRegistered`.
    pub fn lookup(&self, id: &NativeTypeId) -> Result<&ClassDescriptor> {
        self.classes
            .get(id)
            .ok_or(BridgeError::ClassNotRegistered {
                type_name: id.name(),
            })
    }

    pub fn contains(&self, id: &NativeTypeId) -> bool {
        self.classes.contains_key(id)
    }

    /// Whether the mutable form of the type behind `id` has been exported.
    pub fn is_exported(&self, id: &NativeTypeId) -> bool {
        self.classes.contains_key(&id.as_mutable())
    }

    /// Number of installed descriptors, counting const forms.
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.classes.values().map(ClassDescriptor::name))
            .finish()
    }
}
