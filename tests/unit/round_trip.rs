use std::collections::{BTreeMap, HashMap};

use scriptbind::{BridgeError, ConversionError, Engine, Shared, State, Value, WeakRef, push, read};

use super::{Point, state_with_classes};

// =============================================================================
// Primitives and containers
// =============================================================================

#[test]
fn test_primitives_round_trip() {
    let mut engine = Engine::new();

    let v = push(&mut engine, -12i32).unwrap();
    assert_eq!(read::<i32>(&mut engine, &v).unwrap(), -12);

    let v = push(&mut engine, 1u64 << 63).unwrap();
    assert_eq!(read::<u64>(&mut engine, &v).unwrap(), 1u64 << 63);

    let v = push(&mut engine, 0.25f64).unwrap();
    assert_eq!(read::<f64>(&mut engine, &v).unwrap(), 0.25);

    let v = push(&mut engine, "hello".to_string()).unwrap();
    assert_eq!(read::<String>(&mut engine, &v).unwrap(), "hello");

    let v = push(&mut engine, 'λ').unwrap();
    assert_eq!(read::<char>(&mut engine, &v).unwrap(), 'λ');

    let v = push(&mut engine, Some(false)).unwrap();
    assert_eq!(read::<Option<bool>>(&mut engine, &v).unwrap(), Some(false));
}

#[test]
fn test_containers_round_trip() {
    let mut engine = Engine::new();

    let names = vec!["ada".to_string(), "grace".to_string()];
    let v = push(&mut engine, names.clone()).unwrap();
    assert_eq!(read::<Vec<String>>(&mut engine, &v).unwrap(), names);

    let mut scores = HashMap::new();
    scores.insert("ada".to_string(), 3);
    scores.insert("grace".to_string(), 5);
    let v = push(&mut engine, scores.clone()).unwrap();
    assert_eq!(read::<HashMap<String, i32>>(&mut engine, &v).unwrap(), scores);

    let mut ordered = BTreeMap::new();
    ordered.insert(1i64, vec![1.5f64]);
    ordered.insert(2i64, vec![]);
    let v = push(&mut engine, ordered.clone()).unwrap();
    assert_eq!(read::<BTreeMap<i64, Vec<f64>>>(&mut engine, &v).unwrap(), ordered);
}

#[test]
fn test_narrowing_read_fails() {
    let mut engine = Engine::new();
    let v = push(&mut engine, 70_000i64).unwrap();
    assert_eq!(
        read::<i16>(&mut engine, &v).unwrap_err(),
        BridgeError::InvalidStackContents(ConversionError::IntegerOverflow {
            value: 70_000,
            target_type: "i16",
        })
    );
}

// =============================================================================
// Multiple values
// =============================================================================

#[test]
fn test_tuple_results() {
    let mut state = State::new();
    state
        .set_function("swap", |a: i32, b: String| (b, a))
        .unwrap();

    let (s, n): (String, i32) = state.call("swap", (7, "seven")).unwrap();
    assert_eq!((s.as_str(), n), ("seven", 7));
}

#[test]
fn test_single_read_of_multiple_returns_takes_first() {
    let mut state = State::new();
    state
        .set_function("pair", || ("first", "second"))
        .unwrap();

    let first: String = state.call("pair", ()).unwrap();
    assert_eq!(first, "first");
}

#[test]
fn test_missing_results_read_as_nil() {
    let mut state = State::new();
    state.set_function("nothing", || ()).unwrap();

    let (a, b): (Option<i32>, Value) = state.call("nothing", ()).unwrap();
    assert_eq!(a, None);
    assert_eq!(b, Value::Nil);
}

#[test]
fn test_native_errors_reach_caller_unchanged() {
    let mut state = State::new();
    state
        .set_function("fail", || -> scriptbind::Result<i32> {
            Err(BridgeError::runtime("boom"))
        })
        .unwrap();
    state
        .load_function("relay", |ctx| {
            let fail = ctx.engine().global("fail");
            let results = ctx.engine_mut().call(&fail, vec![])?;
            ctx.extend_returns(results);
            Ok(())
        })
        .unwrap();

    assert_eq!(
        state.call::<i32>("relay", ()).unwrap_err(),
        BridgeError::Runtime("boom".to_string())
    );
    assert_eq!(state.engine().stack_len(), 0);
}

// =============================================================================
// Class values
// =============================================================================

#[test]
fn test_class_by_value_round_trip() {
    let mut state = state_with_classes();
    let point = Point { x: 3.0, y: 4.0 };

    state.set_global("p", point.clone()).unwrap();
    assert_eq!(state.global::<Point>("p").unwrap(), point);

    let copy: Point = state.call("Point", (1.0, 2.0)).unwrap();
    assert_eq!(copy, Point { x: 1.0, y: 2.0 });
}

#[test]
fn test_class_through_all_ownership_forms() {
    let mut state = state_with_classes();
    let shared = Shared::new(Point { x: 1.0, y: 1.0 });

    state.set_global("shared", shared.clone()).unwrap();
    let back = state.global::<Shared<Point>>("shared").unwrap();
    assert!(Shared::ptr_eq(&shared, &back));

    state.set_global("weak", Shared::downgrade(&shared)).unwrap();
    let weak = state.global::<WeakRef<Point>>("weak").unwrap();
    assert!(WeakRef::ptr_eq(&weak, &Shared::downgrade(&shared)));

    state
        .set_function("measure", |p: Point| (p.x * p.x + p.y * p.y).sqrt())
        .unwrap();
    let point = Point { x: 6.0, y: 8.0 };
    let length: f64 = state.call("measure", (&point,)).unwrap();
    assert_eq!(length, 10.0);
}

#[test]
fn test_const_method_on_borrowed_value() {
    let mut state = state_with_classes();
    state
        .load_function("length_of", |ctx| {
            let point = ctx.arg(0);
            let results = ctx.engine_mut().call_method(&point, "length", vec![])?;
            ctx.extend_returns(results);
            Ok(())
        })
        .unwrap();

    let point = Point { x: 5.0, y: 12.0 };
    let length: f64 = state.call("length_of", (&point,)).unwrap();
    assert_eq!(length, 13.0);
}

#[test]
fn test_unexported_class_cannot_be_pushed() {
    #[derive(Clone)]
    struct Secret;
    scriptbind::native_type!(Secret);

    let mut state = State::new();
    assert_eq!(
        state.set_global("secret", Secret).unwrap_err(),
        BridgeError::ClassNotRegistered { type_name: "Secret" }
    );
}
