use std::cell::Cell;
use std::rc::Rc;

use scriptbind::{BridgeError, Callback, EngineProperty, Read, Shared, State, Value, native_type};

use super::init_logging;

struct Tracked {
    drops: Rc<Cell<usize>>,
}
native_type!(Tracked);

impl Drop for Tracked {
    fn drop(&mut self) {
        self.drops.set(self.drops.get() + 1);
    }
}

fn state_with_tracked() -> State {
    init_logging();
    let mut state = State::new();
    state.export::<Tracked>("Tracked").build().unwrap();
    state
}

// =============================================================================
// Finalization
// =============================================================================

#[test]
fn test_each_unreachable_object_finalized_once() {
    const N: usize = 25;
    let mut state = state_with_tracked();
    let drops = Rc::new(Cell::new(0));

    for _ in 0..N {
        scriptbind::push(
            state.engine_mut(),
            Tracked {
                drops: Rc::clone(&drops),
            },
        )
        .unwrap();
    }
    assert_eq!(drops.get(), 0);

    state.collect();
    assert_eq!(drops.get(), N);

    state.collect();
    assert_eq!(drops.get(), N);
}

#[test]
fn test_reachable_objects_survive_collection() {
    let mut state = state_with_tracked();
    let drops = Rc::new(Cell::new(0));
    state
        .set_global(
            "kept",
            Tracked {
                drops: Rc::clone(&drops),
            },
        )
        .unwrap();

    state.collect();
    assert_eq!(drops.get(), 0);

    state.engine_mut().set_global("kept", Value::Nil).unwrap();
    state.collect();
    assert_eq!(drops.get(), 1);
}

#[test]
fn test_native_owner_outlives_engine_handle() {
    let mut state = state_with_tracked();
    let drops = Rc::new(Cell::new(0));
    let tracked = Shared::new(Tracked {
        drops: Rc::clone(&drops),
    });

    scriptbind::push(state.engine_mut(), tracked.clone()).unwrap();
    state.collect();
    assert_eq!(drops.get(), 0);
    assert_eq!(Shared::strong_count(&tracked), 1);

    drop(tracked);
    assert_eq!(drops.get(), 1);
}

#[test]
fn test_dropping_state_finalizes_everything() {
    let drops = Rc::new(Cell::new(0));
    {
        let mut state = state_with_tracked();
        for name in ["a", "b", "c"] {
            state
                .set_global(
                    name,
                    Tracked {
                        drops: Rc::clone(&drops),
                    },
                )
                .unwrap();
        }
    }
    assert_eq!(drops.get(), 3);
}

// =============================================================================
// Memory budget
// =============================================================================

#[test]
fn test_memory_exhaustion_is_out_of_memory() {
    let mut state = State::with_properties(&[(EngineProperty::MemoryLimit, 8 * 1024)]);
    let big: Vec<i64> = (0..10_000).collect();

    let err = state.set_global("big", big).unwrap_err();
    assert!(err.is_out_of_memory(), "unexpected error: {err}");
    assert!(state.memory_usage() <= 8 * 1024);

    state.collect();
    state.set_memory_limit(0);
    let big: Vec<i64> = (0..10_000).collect();
    assert!(state.set_global("big", big).is_ok());
}

#[test]
fn test_out_of_memory_inside_callback_propagates() {
    let mut state = State::new();
    state
        .set_function("grow", |n: i64| (0..n).collect::<Vec<i64>>())
        .unwrap();
    state.set_memory_limit(state.memory_usage() + 4 * 1024);

    assert!(matches!(
        state.call::<Value>("grow", (100_000,)),
        Err(BridgeError::OutOfMemory { .. })
    ));
    assert_eq!(state.engine().stack_len(), 0);
}

// =============================================================================
// Callbacks held natively
// =============================================================================

#[test]
fn test_callback_anchored_until_dropped() {
    let mut state = State::new();
    state
        .load_function("double", |ctx| {
            let arg = ctx.arg(0);
            let x = i64::read(ctx.engine_mut(), &arg)?;
            ctx.push_return(Value::Int(x * 2));
            Ok(())
        })
        .unwrap();

    let double = state.global::<Callback<(i64,), i64>>("double").unwrap();
    state.engine_mut().set_global("double", Value::Nil).unwrap();
    state.collect();

    assert_eq!(double.call(state.engine_mut(), (21,)).unwrap(), 42);
    assert_eq!(state.engine().keep_alive_table().len(), 1);

    drop(double);
    state.collect();
    assert!(state.engine().keep_alive_table().is_empty());
}
