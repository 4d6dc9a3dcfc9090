use std::cell::Cell;
use std::mem::offset_of;

use scriptbind::{BridgeError, Shared, State, Value, native_type};

use super::init_logging;

#[derive(Debug, Default)]
struct Named {
    name: String,
}
native_type!(Named);

#[derive(Debug)]
struct Health {
    hp: Cell<i32>,
}
native_type!(Health);

#[repr(C)]
#[derive(Debug)]
struct Monster {
    tag: u64,
    named: Named,
    health: Health,
}
native_type!(Monster);

impl Monster {
    fn new(name: &str, hp: i32) -> Self {
        Self {
            tag: 7,
            named: Named {
                name: name.to_string(),
            },
            health: Health { hp: Cell::new(hp) },
        }
    }
}

fn state_with_monsters() -> State {
    init_logging();
    let mut state = State::new();
    state
        .export::<Named>("Named")
        .const_method("name", |n: &Named| n.name.clone())
        .build()
        .unwrap();
    state
        .export::<Health>("Health")
        .method("damage", |h: &Health, amount: i32| {
            h.hp.set(h.hp.get() - amount);
            h.hp.get()
        })
        .const_method("hp", |h: &Health| h.hp.get())
        .build()
        .unwrap();
    state
        .export::<Monster>("Monster")
        .base::<Named, _>(|m: &Monster| &m.named)
        .unwrap()
        .base::<Health, _>(|m: &Monster| &m.health)
        .unwrap()
        .const_method("tag", |m: &Monster| m.tag)
        .build()
        .unwrap();
    state
}

// =============================================================================
// Multiple bases
// =============================================================================

#[test]
fn test_upcast_to_each_base_at_its_offset() {
    assert_ne!(offset_of!(Monster, named), 0);
    assert_ne!(offset_of!(Monster, health), 0);

    let mut state = state_with_monsters();
    let monster = Shared::new(Monster::new("orc", 30));
    state.set_global("monster", monster.clone()).unwrap();

    let named = state.global::<*const Named>("monster").unwrap();
    let health = state.global::<*const Health>("monster").unwrap();
    assert_eq!(named, &monster.named as *const Named);
    assert_eq!(health, &monster.health as *const Health);
    assert_ne!(named.cast::<()>(), health.cast::<()>());
}

#[test]
fn test_shared_base_keeps_derived_alive() {
    let mut state = state_with_monsters();
    let monster = Shared::new(Monster::new("troll", 50));
    let weak = Shared::downgrade(&monster);
    state.set_global("monster", monster).unwrap();

    let health = state.global::<Shared<Health>>("monster").unwrap();
    state.engine_mut().set_global("monster", Value::Nil).unwrap();
    state.collect();

    assert_eq!(health.hp.get(), 50);
    assert!(weak.upgrade().is_some());
    drop(health);
    assert!(weak.is_expired());
}

#[test]
fn test_inherited_methods_use_base_projection() {
    let mut state = state_with_monsters();
    let monster = Shared::new(Monster::new("goblin", 10));
    state.set_global("monster", monster.clone()).unwrap();
    let handle = state.engine().global("monster");
    let engine = state.engine_mut();

    assert_eq!(
        engine.call_method(&handle, "name", vec![]).unwrap(),
        vec![Value::string("goblin")]
    );
    assert_eq!(
        engine
            .call_method(&handle, "damage", vec![Value::Int(4)])
            .unwrap(),
        vec![Value::Int(6)]
    );
    assert_eq!(
        engine.call_method(&handle, "tag", vec![]).unwrap(),
        vec![Value::Int(7)]
    );
    assert_eq!(monster.health.hp.get(), 6);
}

#[test]
fn test_const_derived_handle_sees_only_const_base_methods() {
    let mut state = state_with_monsters();
    let monster = Monster::new("imp", 3);

    state.scope(|scope| {
        scope.set_global("imp", &monster).unwrap();
        let engine = scope.engine();
        let imp = engine.global("imp");

        assert_eq!(
            engine.call_method(&imp, "hp", vec![]).unwrap(),
            vec![Value::Int(3)]
        );
        assert!(engine.call_method(&imp, "damage", vec![Value::Int(1)]).is_err());
    });
    assert_eq!(monster.health.hp.get(), 3);
}

#[test]
fn test_unrelated_classes_do_not_upcast() {
    let mut state = state_with_monsters();
    state.set_global("named", Named::default()).unwrap();

    assert!(matches!(
        state.global::<*const Health>("named"),
        Err(BridgeError::NotRegistered { .. })
    ));
}

#[test]
fn test_unexported_target_is_not_registered() {
    struct Ghost;
    native_type!(Ghost);

    let mut state = state_with_monsters();
    state.set_global("named", Named::default()).unwrap();
    assert_eq!(
        state.global::<*const Ghost>("named").unwrap_err(),
        BridgeError::ClassNotRegistered { type_name: "Ghost" }
    );
}

// =============================================================================
// Diamonds
// =============================================================================

#[derive(Debug, Default)]
struct Root {
    id: u32,
}
native_type!(Root);

#[derive(Debug, Default)]
struct Left {
    root: Root,
}
native_type!(Left);

#[derive(Debug, Default)]
struct Right {
    root: Root,
}
native_type!(Right);

#[derive(Debug, Default)]
struct Diamond {
    left: Left,
    right: Right,
}
native_type!(Diamond);

#[test]
fn test_diamond_upcast_is_ambiguous() {
    let mut state = State::new();
    state
        .export::<Root>("Root")
        .const_method("id", |r: &Root| r.id)
        .build()
        .unwrap();
    state
        .export::<Left>("Left")
        .base::<Root, _>(|l: &Left| &l.root)
        .unwrap()
        .build()
        .unwrap();
    state
        .export::<Right>("Right")
        .base::<Root, _>(|r: &Right| &r.root)
        .unwrap()
        .build()
        .unwrap();
    state
        .export::<Diamond>("Diamond")
        .base::<Left, _>(|d: &Diamond| &d.left)
        .unwrap()
        .base::<Right, _>(|d: &Diamond| &d.right)
        .unwrap()
        .build()
        .unwrap();

    state.set_global("diamond", Diamond::default()).unwrap();

    assert_eq!(
        state.global::<*const Root>("diamond").unwrap_err(),
        BridgeError::AmbiguousUpcast {
            from: "Diamond",
            to: "Root",
            paths: 2,
        }
    );
    assert!(state.global::<*const Left>("diamond").is_ok());
    assert!(state.global::<*const Right>("diamond").is_ok());
}
