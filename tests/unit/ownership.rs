use scriptbind::{BridgeError, Read, Shared, State, Value, WeakRef};

use super::{Point, state_with_classes};

/// Installs `stash(x)`, which stores its argument in the global `stashed`.
fn install_stash(state: &mut State) {
    state
        .load_function("stash", |ctx| {
            let value = ctx.arg(0);
            ctx.engine_mut().set_global("stashed", value)
        })
        .unwrap();
}

// =============================================================================
// Exclusivity
// =============================================================================

#[test]
fn test_scoped_reference_refuses_ownership() {
    let mut state = state_with_classes();
    let point = Point { x: 1.0, y: 2.0 };

    state.scope(|scope| {
        scope.set_global("p", &point).unwrap();

        assert!(matches!(
            scope.global::<Shared<Point>>("p"),
            Err(BridgeError::IncorrectPointerType { .. })
        ));
        assert!(matches!(
            scope.global::<WeakRef<Point>>("p"),
            Err(BridgeError::IncorrectPointerType { .. })
        ));

        let raw = scope.global::<*const Point>("p").unwrap();
        assert_eq!(raw, &point as *const Point);
    });
}

#[test]
fn test_const_reference_is_not_mutable() {
    let mut state = state_with_classes();
    let mut point = Point { x: 1.0, y: 2.0 };

    state.scope(|scope| {
        scope.set_global("shared_ref", &point).unwrap();
        assert!(matches!(
            scope.global::<*mut Point>("shared_ref"),
            Err(BridgeError::InvalidStackContents(
                scriptbind::ConversionError::ConstViolation { .. }
            ))
        ));
    });

    state.scope(|scope| {
        scope.set_global("unique_ref", &mut point).unwrap();
        let raw = scope.global::<*mut Point>("unique_ref").unwrap();
        assert!(!raw.is_null());
    });
}

#[test]
fn test_dead_weak_observer_is_expired() {
    let mut state = state_with_classes();
    let shared = Shared::new(Point { x: 1.0, y: 2.0 });
    state.set_global("weak", Shared::downgrade(&shared)).unwrap();
    drop(shared);

    for result in [
        state.global::<Shared<Point>>("weak").map(|_| ()),
        state.global::<*const Point>("weak").map(|_| ()),
        state.global::<Point>("weak").map(|_| ()),
    ] {
        assert!(matches!(result, Err(BridgeError::ExpiredWeakPointer { .. })));
    }

    let weak = state.global::<WeakRef<Point>>("weak").unwrap();
    assert!(weak.is_expired());
}

#[test]
fn test_shared_owner_keeps_object_alive() {
    let mut state = state_with_classes();
    let shared = Shared::new(Point { x: 1.0, y: 2.0 });
    let weak = Shared::downgrade(&shared);

    state.set_global("p", shared).unwrap();
    assert!(weak.upgrade().is_some());

    state.engine_mut().set_global("p", Value::Nil).unwrap();
    state.collect();
    assert!(weak.is_expired());
}

// =============================================================================
// Scope expiry
// =============================================================================

#[test]
fn test_stashed_reference_expires_after_call() {
    let mut state = state_with_classes();
    install_stash(&mut state);
    let point = Point { x: 3.0, y: 4.0 };

    state.call::<()>("stash", (&point,)).unwrap();

    assert_eq!(
        state.global::<*const Point>("stashed").unwrap_err(),
        BridgeError::Expired { type_name: "Point" }
    );
    assert!(state.global::<Point>("stashed").unwrap_err().is_expired());
}

#[test]
fn test_reference_is_valid_within_its_call() {
    let mut state = state_with_classes();
    state
        .load_function("stash_and_measure", |ctx| {
            let value = ctx.arg(0);
            let engine = ctx.engine_mut();
            engine.set_global("stashed", value)?;
            let stashed = engine.global("stashed");
            let point = Point::read(engine, &stashed)?;
            ctx.push_return(Value::Number(point.x + point.y));
            Ok(())
        })
        .unwrap();
    let point = Point { x: 3.0, y: 4.0 };

    let sum: f64 = state.call("stash_and_measure", (&point,)).unwrap();
    assert_eq!(sum, 7.0);
    assert!(state.global::<Point>("stashed").is_err());
}

#[test]
fn test_reference_expires_after_scope() {
    let mut state = state_with_classes();
    let point = Point { x: 1.0, y: 1.0 };

    state.scope(|scope| {
        scope.set_global("p", &point).unwrap();
        assert!(scope.global::<Point>("p").is_ok());
    });
    assert!(matches!(
        state.global::<Point>("p"),
        Err(BridgeError::Expired { .. })
    ));
}

#[test]
fn test_reference_outside_call_is_refused() {
    let mut state = state_with_classes();
    let point = Point { x: 0.0, y: 0.0 };
    let engine = state.engine_mut();
    assert!(matches!(
        scriptbind::push(engine, &point),
        Err(BridgeError::IncorrectPointerType { .. })
    ));
}

#[test]
fn test_callback_cannot_push_its_own_locals() {
    let mut state = state_with_classes();
    state
        .load_function("stash_local", |ctx| {
            let local = Box::new(Point { x: 7.0, y: 0.0 });
            let pushed = scriptbind::push(ctx.engine_mut(), &*local);
            drop(local);
            ctx.engine_mut().set_global("stashed", pushed?)
        })
        .unwrap();

    assert!(matches!(
        state.call::<()>("stash_local", ()),
        Err(BridgeError::IncorrectPointerType { .. })
    ));
    assert_eq!(state.engine().global("stashed"), Value::Nil);
}

#[test]
fn test_scope_engine_refuses_direct_reference_push() {
    let mut state = state_with_classes();
    state.scope(|scope| {
        let local = Box::new(Point { x: 1.0, y: 1.0 });
        assert!(matches!(
            scriptbind::push(scope.engine(), &*local),
            Err(BridgeError::IncorrectPointerType { .. })
        ));
        let mut other = Box::new(Point { x: 0.0, y: 0.0 });
        assert!(matches!(
            scriptbind::push(scope.engine(), &mut *other),
            Err(BridgeError::IncorrectPointerType { .. })
        ));
    });
}

#[test]
fn test_callback_forwards_local_through_nested_call() {
    let mut state = state_with_classes();
    install_stash(&mut state);
    state
        .load_function("measure_local", |ctx| {
            let local = Point { x: 3.0, y: 4.0 };
            let stash = ctx.engine().global("stash");
            scriptbind::call::<()>(ctx.engine_mut(), &stash, (&local,))?;

            let engine = ctx.engine_mut();
            let stashed = engine.global("stashed");
            match Point::read(engine, &stashed) {
                Err(err) if err.is_expired() => Ok(()),
                other => Err(BridgeError::runtime(format!(
                    "stashed local still readable: {other:?}"
                ))),
            }
        })
        .unwrap();

    state.call::<()>("measure_local", ()).unwrap();
}
