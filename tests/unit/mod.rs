mod classes;
mod lifecycle;
mod ownership;
mod round_trip;
mod upcast;

use std::cell::Cell;

use scriptbind::{State, native_type};

/// Install a test logger once per process.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}
native_type!(Point);

#[derive(Debug, Default)]
pub struct Counter {
    pub count: Cell<i32>,
}
native_type!(Counter);

/// A state with `Point` and `Counter` exported.
pub fn state_with_classes() -> State {
    init_logging();
    let mut state = State::new();
    state
        .export::<Point>("Point")
        .const_method("length", |p: &Point| (p.x * p.x + p.y * p.y).sqrt())
        .constructor(|x: f64, y: f64| Point { x, y })
        .build()
        .unwrap();
    state
        .export::<Counter>("Counter")
        .method("increment", |c: &Counter| {
            c.count.set(c.count.get() + 1);
            c.count.get()
        })
        .method("add", |c: &Counter, n: i32| c.count.set(c.count.get() + n))
        .const_method("get", |c: &Counter| c.count.get())
        .constructor(Counter::default)
        .build()
        .unwrap();
    state
}
