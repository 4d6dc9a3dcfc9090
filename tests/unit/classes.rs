use std::cell::Cell;

use scriptbind::{BridgeError, ConversionError, NativeFn, Read, Shared, State, Value, native_type};

use super::{Counter, state_with_classes};

// =============================================================================
// Shared mutable state
// =============================================================================

#[test]
fn test_counter_incremented_from_script() {
    let mut state = state_with_classes();
    state
        .load_function("bump_three_times", |ctx| {
            let counter = ctx.arg(0);
            for _ in 0..3 {
                ctx.engine_mut().call_method(&counter, "increment", vec![])?;
            }
            Ok(())
        })
        .unwrap();

    let counter = Shared::new(Counter::default());
    state
        .call::<()>("bump_three_times", (counter.clone(),))
        .unwrap();
    assert_eq!(counter.count.get(), 3);
}

#[test]
fn test_method_results_and_arguments() {
    let mut state = state_with_classes();
    let counter = Shared::new(Counter::default());
    state.set_global("counter", counter.clone()).unwrap();
    let handle = state.engine().global("counter");
    let engine = state.engine_mut();

    assert_eq!(
        engine.call_method(&handle, "increment", vec![]).unwrap(),
        vec![Value::Int(1)]
    );
    engine
        .call_method(&handle, "add", vec![Value::Int(41)])
        .unwrap();
    assert_eq!(
        engine.call_method(&handle, "get", vec![]).unwrap(),
        vec![Value::Int(42)]
    );
    assert_eq!(
        engine
            .call_method(&handle, "add", vec![Value::string("many")])
            .unwrap_err(),
        BridgeError::InvalidStackContents(ConversionError::mismatch("integer", "string"))
    );
}

#[test]
fn test_method_arity_includes_receiver() {
    let mut state = state_with_classes();
    state.set_global("counter", Counter::default()).unwrap();
    let handle = state.engine().global("counter");
    let engine = state.engine_mut();

    assert_eq!(
        engine.call_method(&handle, "add", vec![]).unwrap_err(),
        BridgeError::IncorrectArity {
            expected: 2,
            actual: 1
        }
    );
}

#[test]
fn test_constructor_returns_shared_owner() {
    let mut state = state_with_classes();
    let counter: Shared<Counter> = state.call("Counter", ()).unwrap();
    assert_eq!(counter.count.get(), 0);
    assert_eq!(Shared::strong_count(&counter), 2);

    state.collect();
    assert_eq!(Shared::strong_count(&counter), 1);
}

// =============================================================================
// Const handles
// =============================================================================

#[test]
fn test_const_handle_rejects_mutating_method() {
    let mut state = state_with_classes();
    let counter = Counter::default();
    state.set_global("mutable", Counter::default()).unwrap();

    state.scope(|scope| {
        scope.set_global("readonly", &counter).unwrap();
        let engine = scope.engine();
        let readonly = engine.global("readonly");

        assert_eq!(
            engine.call_method(&readonly, "get", vec![]).unwrap(),
            vec![Value::Int(0)]
        );
        assert!(matches!(
            engine.call_method(&readonly, "increment", vec![]),
            Err(BridgeError::Runtime(_))
        ));

        let mutable = engine.global("mutable");
        let increment = engine.get_field(&mutable, "increment").unwrap();
        assert_eq!(
            engine.call(&increment, vec![readonly]).unwrap_err(),
            BridgeError::InvalidStackContents(ConversionError::ConstViolation {
                type_name: "Counter"
            })
        );
    });
    assert_eq!(counter.count.get(), 0);
}

#[test]
fn test_mutable_reference_allows_mutating_method() {
    let mut state = state_with_classes();
    let mut counter = Counter::default();

    state.scope(|scope| {
        scope.set_global("borrowed", &mut counter).unwrap();
        let engine = scope.engine();
        let borrowed = engine.global("borrowed");
        engine.call_method(&borrowed, "increment", vec![]).unwrap();
    });
    assert_eq!(counter.count.get(), 1);
}

// =============================================================================
// Expired receivers
// =============================================================================

#[test]
fn test_method_on_expired_receiver_returns_nil() {
    let mut state = state_with_classes();
    state
        .load_function("stash", |ctx| {
            let value = ctx.arg(0);
            ctx.engine_mut().set_global("stashed", value)
        })
        .unwrap();

    let counter = Counter::default();
    state.call::<()>("stash", (&counter,)).unwrap();

    let stashed = state.engine().global("stashed");
    let results = state
        .engine_mut()
        .call_method(&stashed, "get", vec![])
        .unwrap();
    assert!(results.is_empty());
}

#[test]
fn test_method_on_dead_weak_receiver_returns_nil() {
    let mut state = state_with_classes();
    let counter = Shared::new(Counter::default());
    state.set_global("weak", Shared::downgrade(&counter)).unwrap();
    drop(counter);

    let weak = state.engine().global("weak");
    let results = state.engine_mut().call_method(&weak, "get", vec![]).unwrap();
    assert!(results.is_empty());
}

// =============================================================================
// Sub-object references
// =============================================================================

#[derive(Debug, Default)]
struct Position {
    x: Cell<f32>,
}
native_type!(Position);

#[derive(Debug, Default)]
struct Player {
    score: u32,
    position: Position,
}
native_type!(Player);

fn state_with_player() -> State {
    let mut state = State::new();
    state
        .export::<Position>("Position")
        .method("nudge", |p: &Position, dx: f32| p.x.set(p.x.get() + dx))
        .const_method("x", |p: &Position| p.x.get())
        .build()
        .unwrap();
    state
        .export::<Player>("Player")
        .method_ref("position", |p: &Player| &p.position)
        .const_method_ref("view", |p: &Player| &p.position)
        .const_method("score", |p: &Player| p.score)
        .build()
        .unwrap();
    state
}

#[test]
fn test_reference_method_mutates_in_place() {
    let mut state = state_with_player();
    let player = Shared::new(Player::default());
    state.set_global("player", player.clone()).unwrap();

    let handle = state.engine().global("player");
    let engine = state.engine_mut();
    let position = engine.call_method(&handle, "position", vec![]).unwrap().remove(0);
    engine
        .call_method(&position, "nudge", vec![Value::Number(2.5)])
        .unwrap();

    assert_eq!(player.position.x.get(), 2.5);
}

#[test]
fn test_reference_method_shares_owner() {
    let mut state = state_with_player();
    let player = Shared::new(Player::default());
    let weak = Shared::downgrade(&player);
    state.set_global("player", player).unwrap();

    let handle = state.engine().global("player");
    let position = state
        .engine_mut()
        .call_method(&handle, "position", vec![])
        .unwrap()
        .remove(0);
    state.engine_mut().set_global("player", Value::Nil).unwrap();
    state.engine_mut().set_global("position", position).unwrap();
    state.collect();

    assert!(weak.upgrade().is_some());
    let inner = state.global::<Shared<Position>>("position").unwrap();
    inner.x.set(1.0);
    assert_eq!(weak.upgrade().unwrap().position.x.get(), 1.0);
}

#[test]
fn test_const_reference_method_returns_const_handle() {
    let mut state = state_with_player();
    state.set_global("player", Player::default()).unwrap();

    let handle = state.engine().global("player");
    let engine = state.engine_mut();
    let view = engine.call_method(&handle, "view", vec![]).unwrap().remove(0);

    assert_eq!(
        engine.call_method(&view, "x", vec![]).unwrap(),
        vec![Value::Number(0.0)]
    );
    assert!(engine.call_method(&view, "nudge", vec![Value::Number(1.0)]).is_err());
}

// =============================================================================
// Export rules
// =============================================================================

#[test]
fn test_export_twice_fails() {
    let mut state = state_with_classes();
    let err = state.export::<Counter>("Counter").build().unwrap_err();
    assert_eq!(
        err,
        BridgeError::AlreadyExported {
            what: "class Counter".to_string()
        }
    );
}

#[test]
fn test_pushed_closure_reads_back_identical() {
    let mut state = State::new();
    let calls = std::rc::Rc::new(Cell::new(0));
    let seen = calls.clone();
    let tick = scriptbind::function(move |n: i32| {
        seen.set(seen.get() + n);
    });

    state.set_global("tick", tick.clone()).unwrap();
    let back = state.global::<NativeFn>("tick").unwrap();
    assert!(NativeFn::ptr_eq(&tick, &back));

    state.call::<()>("tick", (2,)).unwrap();
    let value = state.engine().global("tick");
    let again = NativeFn::read(state.engine_mut(), &value).unwrap();
    state.engine_mut().call_native(&again, vec![Value::Int(3)]).unwrap();
    assert_eq!(calls.get(), 5);
}
