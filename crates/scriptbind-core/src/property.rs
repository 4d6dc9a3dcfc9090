/// Tunable engine settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineProperty {
    /// Heap byte budget; 0 means unlimited.
    MemoryLimit,
    /// Deepest allowed nesting of engine calls.
    MaxCallDepth,
    /// Value stack capacity reserved at creation.
    InitialStackCapacity,
}

impl EngineProperty {
    pub fn default_value(&self) -> usize {
        match self {
            EngineProperty::MemoryLimit => 0,
            EngineProperty::MaxCallDepth => 200,
            EngineProperty::InitialStackCapacity => 64,
        }
    }
}
