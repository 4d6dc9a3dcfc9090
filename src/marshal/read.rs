//! [`Read`] implementations for primitives and containers.
//!
//! Numbers coerce the way the engine does: integers read from floats with
//! an exact integer value, floats read from integers, and numeric strings
//! read as numbers. Strings read from numbers. `bool` reads truthiness.

use std::collections::{BTreeMap, HashMap};
use std::hash::{BuildHasher, Hash};

use scriptbind_core::{ConversionError, Engine, Result, Value, exact_integer};

use super::Read;

impl Read for Value {
    fn read(_engine: &mut Engine, value: &Value) -> Result<Self> {
        Ok(value.clone())
    }
}

impl Read for bool {
    fn read(_engine: &mut Engine, value: &Value) -> Result<Self> {
        Ok(value.is_truthy())
    }
}

/// Parse a numeric string the way the engine does.
fn parse_number(s: &str) -> Option<Value> {
    let s = s.trim();
    if let Ok(i) = s.parse::<i64>() {
        return Some(Value::Int(i));
    }
    s.parse::<f64>().ok().map(Value::Number)
}

/// The integer a value represents, before range checks.
fn integer_of(value: &Value) -> Result<i64, ConversionError> {
    match value {
        Value::Int(i) => Ok(*i),
        Value::Number(n) => exact_integer(*n).ok_or(ConversionError::NotAnInteger { value: *n }),
        Value::String(s) => match parse_number(s) {
            Some(number) => integer_of(&number),
            None => Err(ConversionError::mismatch("integer", "string")),
        },
        other => Err(ConversionError::mismatch("integer", other.type_name())),
    }
}

fn number_of(value: &Value) -> Result<f64, ConversionError> {
    match value {
        Value::Int(i) => Ok(*i as f64),
        Value::Number(n) => Ok(*n),
        Value::String(s) => match parse_number(s) {
            Some(number) => number_of(&number),
            None => Err(ConversionError::mismatch("number", "string")),
        },
        other => Err(ConversionError::mismatch("number", other.type_name())),
    }
}

macro_rules! impl_read_int {
    ($($ty:ty),*) => {
        $(
            impl Read for $ty {
                fn read(_engine: &mut Engine, value: &Value) -> Result<Self> {
                    let v = integer_of(value)?;
                    <$ty>::try_from(v).map_err(|_| {
                        ConversionError::IntegerOverflow {
                            value: v,
                            target_type: stringify!($ty),
                        }
                        .into()
                    })
                }
            }
        )*
    };
}

impl_read_int!(i8, i16, i32, i64, isize, u8, u16, u32);

// Unsigned values above i64::MAX arrive as floats.
macro_rules! impl_read_wide_uint {
    ($($ty:ty),*) => {
        $(
            impl Read for $ty {
                fn read(_engine: &mut Engine, value: &Value) -> Result<Self> {
                    const LIMIT: f64 = 18_446_744_073_709_551_616.0;
                    if let Value::Number(n) = value
                        && *n >= 9_223_372_036_854_775_808.0
                        && *n < LIMIT
                        && n.fract() == 0.0
                    {
                        return <$ty>::try_from(*n as u64).map_err(|_| {
                            ConversionError::NotAnInteger { value: *n }.into()
                        });
                    }
                    let v = integer_of(value)?;
                    <$ty>::try_from(v).map_err(|_| {
                        ConversionError::IntegerOverflow {
                            value: v,
                            target_type: stringify!($ty),
                        }
                        .into()
                    })
                }
            }
        )*
    };
}

impl_read_wide_uint!(u64, usize);

impl Read for f64 {
    fn read(_engine: &mut Engine, value: &Value) -> Result<Self> {
        Ok(number_of(value)?)
    }
}

impl Read for f32 {
    fn read(_engine: &mut Engine, value: &Value) -> Result<Self> {
        Ok(number_of(value)? as f32)
    }
}

impl Read for String {
    fn read(_engine: &mut Engine, value: &Value) -> Result<Self> {
        match value {
            Value::String(s) => Ok(s.to_string()),
            Value::Int(i) => Ok(i.to_string()),
            Value::Number(n) => Ok(format!("{n:?}")),
            other => Err(ConversionError::mismatch("string", other.type_name()).into()),
        }
    }
}

impl Read for char {
    fn read(_engine: &mut Engine, value: &Value) -> Result<Self> {
        if let Value::String(s) = value {
            let mut chars = s.chars();
            if let (Some(c), None) = (chars.next(), chars.next()) {
                return Ok(c);
            }
        }
        Err(ConversionError::mismatch("character", value.type_name()).into())
    }
}

impl<T: Read> Read for Option<T> {
    fn read(engine: &mut Engine, value: &Value) -> Result<Self> {
        match value {
            Value::Nil => Ok(None),
            other => T::read(engine, other).map(Some),
        }
    }
}

// ============================================================================
// Containers
// ============================================================================

fn expect_table(value: &Value) -> Result<(), ConversionError> {
    match value {
        Value::Table(_) => Ok(()),
        other => Err(ConversionError::mismatch("table", other.type_name())),
    }
}

impl<T: Read> Read for Vec<T> {
    fn read(engine: &mut Engine, value: &Value) -> Result<Self> {
        expect_table(value)?;
        let len = engine.raw_len(value)?;
        let mut items = Vec::with_capacity(len);
        for index in 1..=len {
            let item = engine.raw_get(value, &Value::Int(index as i64))?;
            items.push(T::read(engine, &item)?);
        }
        Ok(items)
    }
}

impl<K, V, S> Read for HashMap<K, V, S>
where
    K: Read + Eq + Hash,
    V: Read,
    S: BuildHasher + Default,
{
    fn read(engine: &mut Engine, value: &Value) -> Result<Self> {
        expect_table(value)?;
        let mut map = HashMap::with_hasher(S::default());
        for (key, item) in engine.pairs(value)? {
            let key = K::read(engine, &key)?;
            let item = V::read(engine, &item)?;
            map.insert(key, item);
        }
        Ok(map)
    }
}

impl<K: Read + Ord, V: Read> Read for BTreeMap<K, V> {
    fn read(engine: &mut Engine, value: &Value) -> Result<Self> {
        expect_table(value)?;
        let mut map = BTreeMap::new();
        for (key, item) in engine.pairs(value)? {
            let key = K::read(engine, &key)?;
            let item = V::read(engine, &item)?;
            map.insert(key, item);
        }
        Ok(map)
    }
}
