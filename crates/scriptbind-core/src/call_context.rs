//! Context for native function calls.
//!
//! A call's arguments occupy a window of the engine stack. Return values are
//! pushed above the arguments and collected by the engine when the callable
//! returns.

use std::fmt;

use crate::engine::Engine;
use crate::value::Value;

/// Arguments and return slots of one call, plus access to the engine.
pub struct CallContext<'e> {
    engine: &'e mut Engine,
    /// Stack index of the first argument
    base: usize,
    /// Number of arguments
    nargs: usize,
}

impl<'e> CallContext<'e> {
    pub(crate) fn new(engine: &'e mut Engine, base: usize, nargs: usize) -> Self {
        Self {
            engine,
            base,
            nargs,
        }
    }

    /// Number of arguments passed.
    pub fn arg_count(&self) -> usize {
        self.nargs
    }

    /// Argument at `index`, or nil past the last one.
    pub fn arg(&self, index: usize) -> Value {
        self.args().get(index).cloned().unwrap_or_default()
    }

    /// All arguments.
    pub fn args(&self) -> &[Value] {
        &self.engine.stack()[self.base..self.base + self.nargs]
    }

    /// Push one return value.
    pub fn push_return(&mut self, value: Value) {
        self.engine.stack_push(value);
    }

    /// Push several return values in order.
    pub fn extend_returns(&mut self, values: impl IntoIterator<Item = Value>) {
        for value in values {
            self.engine.stack_push(value);
        }
    }

    /// Number of values returned so far.
    pub fn return_count(&self) -> usize {
        self.engine.stack().len() - (self.base + self.nargs)
    }

    /// A context over the same call with the first `n` arguments hidden.
    ///
    /// Returns pushed through the new context land in the same slots.
    pub fn skip_args(&mut self, n: usize) -> CallContext<'_> {
        let n = n.min(self.nargs);
        CallContext {
            engine: &mut *self.engine,
            base: self.base + n,
            nargs: self.nargs - n,
        }
    }

    /// The engine running this call.
    pub fn engine(&self) -> &Engine {
        &*self.engine
    }

    /// Mutable access to the engine, for nested calls and allocation.
    pub fn engine_mut(&mut self) -> &mut Engine {
        &mut *self.engine
    }
}

impl fmt::Debug for CallContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallContext")
            .field("base", &self.base)
            .field("arg_count", &self.nargs)
            .finish()
    }
}
