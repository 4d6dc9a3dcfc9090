//! Marshalling between native values and engine values.
//!
//! [`Push`] converts a native value into one engine value and [`Read`]
//! converts back. [`PushMany`] and [`ReadMany`] extend both to the
//! multi-value convention used for arguments and results: tuples expand to
//! one slot per element, `()` to none, and any single value to one slot.
//!
//! Class types opt in through [`NativeType`], usually with the
//! [`native_type!`](crate::native_type) macro. How a class value is pushed
//! decides how the engine holds it:
//!
//! | Pushed as       | Ownership | Descriptor |
//! |-----------------|-----------|------------|
//! | `T`, `Shared<T>`| shared    | `T`        |
//! | `WeakRef<T>`    | weak      | `T`        |
//! | `&mut T`        | scoped    | `T`        |
//! | `&T`            | scoped    | `const T`  |

mod class;
mod push;
mod read;

pub use class::type_id;
pub(crate) use class::push_rebound;

use scriptbind_core::{Engine, NativeTypeId, Result, Value};

/// Marker trait for native types that can be exported as classes.
///
/// # Example
///
/// ```
/// use scriptbind::NativeType;
///
/// struct Vec3 { x: f32, y: f32, z: f32 }
///
/// impl NativeType for Vec3 {
///     const NAME: &'static str = "Vec3";
/// }
/// ```
///
/// Implementing the trait by hand does not make `Vec3` pushable by value;
/// [`native_type!`](crate::native_type) adds that.
pub trait NativeType: 'static {
    /// Name used in diagnostics.
    const NAME: &'static str;
}

/// Implement [`NativeType`] and by-value [`Push`] for a class type.
///
/// Pushing the value moves it into a new shared owner.
///
/// ```
/// struct Counter { count: i32 }
///
/// struct Timer { ticks: u64 }
///
/// scriptbind::native_type!(Counter);
/// scriptbind::native_type!(Timer, "GameTimer");
/// ```
#[macro_export]
macro_rules! native_type {
    ($ty:ty) => {
        $crate::native_type!($ty, stringify!($ty));
    };
    ($ty:ty, $name:expr) => {
        impl $crate::NativeType for $ty {
            const NAME: &'static str = $name;
        }

        impl $crate::Push for $ty {
            fn push(self, engine: &mut $crate::Engine) -> $crate::Result<$crate::Value> {
                $crate::Push::push($crate::Shared::new(self), engine)
            }
        }
    };
}

/// Convert a native value into one engine value.
pub trait Push {
    /// Push this value, allocating in `engine` as needed.
    fn push(self, engine: &mut Engine) -> Result<Value>;
}

/// Convert a native value into any number of engine values.
pub trait PushMany {
    fn push_many(self, engine: &mut Engine) -> Result<Vec<Value>>;
}

/// Convert an engine value into a native value.
pub trait Read: Sized {
    /// Read `value`, failing if it has the wrong shape.
    fn read(engine: &mut Engine, value: &Value) -> Result<Self>;
}

/// Convert a run of engine values into a native value.
///
/// Missing values read as nil; surplus values are ignored.
pub trait ReadMany: Sized {
    fn read_many(engine: &mut Engine, values: &[Value]) -> Result<Self>;
}

/// Push one value.
pub fn push<T: Push>(engine: &mut Engine, value: T) -> Result<Value> {
    value.push(engine)
}

/// Read one value.
pub fn read<T: Read>(engine: &mut Engine, value: &Value) -> Result<T> {
    T::read(engine, value)
}

/// Identity of the const form of `T`.
pub fn const_type_id<T: NativeType>() -> NativeTypeId {
    type_id::<T>().as_const()
}

impl<T: Push> PushMany for T {
    fn push_many(self, engine: &mut Engine) -> Result<Vec<Value>> {
        Ok(vec![self.push(engine)?])
    }
}

impl PushMany for () {
    fn push_many(self, _engine: &mut Engine) -> Result<Vec<Value>> {
        Ok(Vec::new())
    }
}

impl<T: PushMany> PushMany for Result<T> {
    fn push_many(self, engine: &mut Engine) -> Result<Vec<Value>> {
        self?.push_many(engine)
    }
}

impl<T: Read> ReadMany for T {
    fn read_many(engine: &mut Engine, values: &[Value]) -> Result<Self> {
        T::read(engine, values.first().unwrap_or(&Value::Nil))
    }
}

impl ReadMany for () {
    fn read_many(_engine: &mut Engine, _values: &[Value]) -> Result<Self> {
        Ok(())
    }
}

macro_rules! impl_tuples {
    ($($name:ident $index:tt),+) => {
        impl<$($name: Push),+> PushMany for ($($name,)+) {
            fn push_many(self, engine: &mut Engine) -> Result<Vec<Value>> {
                Ok(vec![$(self.$index.push(engine)?),+])
            }
        }

        impl<$($name: Read),+> ReadMany for ($($name,)+) {
            fn read_many(engine: &mut Engine, values: &[Value]) -> Result<Self> {
                Ok(($($name::read(engine, values.get($index).unwrap_or(&Value::Nil))?,)+))
            }
        }
    };
}

impl_tuples!(A 0);
impl_tuples!(A 0, B 1);
impl_tuples!(A 0, B 1, C 2);
impl_tuples!(A 0, B 1, C 2, D 3);
impl_tuples!(A 0, B 1, C 2, D 3, E 4);
impl_tuples!(A 0, B 1, C 2, D 3, E 4, F 5);
impl_tuples!(A 0, B 1, C 2, D 3, E 4, F 5, G 6);
impl_tuples!(A 0, B 1, C 2, D 3, E 4, F 5, G 6, H 7);
