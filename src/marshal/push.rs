//! [`Push`] implementations for primitives and containers.

use std::collections::{BTreeMap, HashMap};
use std::hash::BuildHasher;

use scriptbind_core::{Engine, Result, Value};

use super::Push;

impl Push for Value {
    fn push(self, _engine: &mut Engine) -> Result<Value> {
        Ok(self)
    }
}

impl Push for bool {
    fn push(self, _engine: &mut Engine) -> Result<Value> {
        Ok(Value::Bool(self))
    }
}

macro_rules! impl_push_int {
    ($($ty:ty),*) => {
        $(
            impl Push for $ty {
                fn push(self, _engine: &mut Engine) -> Result<Value> {
                    Ok(Value::Int(self as i64))
                }
            }
        )*
    };
}

impl_push_int!(i8, i16, i32, i64, u8, u16, u32);

// Values above i64::MAX become floats, as the engine has no wider integer.
macro_rules! impl_push_wide_uint {
    ($($ty:ty),*) => {
        $(
            impl Push for $ty {
                fn push(self, _engine: &mut Engine) -> Result<Value> {
                    Ok(match i64::try_from(self) {
                        Ok(v) => Value::Int(v),
                        Err(_) => Value::Number(self as f64),
                    })
                }
            }
        )*
    };
}

impl_push_wide_uint!(u64, usize);

impl Push for isize {
    fn push(self, _engine: &mut Engine) -> Result<Value> {
        Ok(Value::Int(self as i64))
    }
}

impl Push for f32 {
    fn push(self, _engine: &mut Engine) -> Result<Value> {
        Ok(Value::Number(f64::from(self)))
    }
}

impl Push for f64 {
    fn push(self, _engine: &mut Engine) -> Result<Value> {
        Ok(Value::Number(self))
    }
}

impl Push for char {
    fn push(self, _engine: &mut Engine) -> Result<Value> {
        let mut buf = [0u8; 4];
        Ok(Value::string(self.encode_utf8(&mut buf)))
    }
}

impl Push for &str {
    fn push(self, _engine: &mut Engine) -> Result<Value> {
        Ok(Value::string(self))
    }
}

impl Push for String {
    fn push(self, _engine: &mut Engine) -> Result<Value> {
        Ok(Value::from(self))
    }
}

impl<T: Push> Push for Option<T> {
    fn push(self, engine: &mut Engine) -> Result<Value> {
        match self {
            Some(value) => value.push(engine),
            None => Ok(Value::Nil),
        }
    }
}

// ============================================================================
// Sequences
// ============================================================================

fn push_sequence<T: Push>(engine: &mut Engine, items: impl IntoIterator<Item = T>) -> Result<Value> {
    let table = engine.create_table()?;
    for (index, item) in items.into_iter().enumerate() {
        let value = item.push(engine)?;
        engine.raw_set(&table, Value::Int(index as i64 + 1), value)?;
    }
    Ok(table)
}

impl<T: Push> Push for Vec<T> {
    fn push(self, engine: &mut Engine) -> Result<Value> {
        push_sequence(engine, self)
    }
}

impl<T: Push, const N: usize> Push for [T; N] {
    fn push(self, engine: &mut Engine) -> Result<Value> {
        push_sequence(engine, self)
    }
}

impl<T: Push + Clone> Push for &[T] {
    fn push(self, engine: &mut Engine) -> Result<Value> {
        push_sequence(engine, self.iter().cloned())
    }
}

// ============================================================================
// Maps
// ============================================================================

fn push_map<K: Push, V: Push>(
    engine: &mut Engine,
    entries: impl IntoIterator<Item = (K, V)>,
) -> Result<Value> {
    let table = engine.create_table()?;
    for (key, value) in entries {
        let key = key.push(engine)?;
        let value = value.push(engine)?;
        engine.raw_set(&table, key, value)?;
    }
    Ok(table)
}

impl<K: Push, V: Push, S: BuildHasher> Push for HashMap<K, V, S> {
    fn push(self, engine: &mut Engine) -> Result<Value> {
        push_map(engine, self)
    }
}

impl<K: Push, V: Push> Push for BTreeMap<K, V> {
    fn push(self, engine: &mut Engine) -> Result<Value> {
        push_map(engine, self)
    }
}
