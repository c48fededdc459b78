//! Binding tree store nodes as records and as arrays.

mod common;

use std::rc::Rc;

use common::{Op, Outcome, RecordingOperations, json};
use mordant_core::memory::MemoryDatabase;
use mordant_core::{
    BindError, DefaultOperations, KEY, Mount, ResetOption, StoreError, Target, TreeOptions,
    Unbind, VALUE, Value, bind_tree_array, bind_tree_object,
};

fn bind_object(db: &MemoryDatabase, path: &str) -> (Target, Outcome, Unbind) {
    let target = Target::default();
    let outcome = Outcome::new();
    let unbind = bind_tree_object(
        &target,
        &db.node(path),
        Rc::new(DefaultOperations),
        outcome.resolve(),
        outcome.reject(),
        &TreeOptions::default(),
    );
    (target, outcome, unbind)
}

fn bind_array(db: &MemoryDatabase, path: &str, ops: Rc<RecordingOperations>) -> (Target, Outcome, Unbind) {
    let target = Target::default();
    let outcome = Outcome::new();
    let unbind = bind_tree_array(
        &target,
        &db.node(path),
        ops,
        outcome.resolve(),
        outcome.reject(),
        &TreeOptions::default(),
    );
    (target, outcome, unbind)
}

fn keys(value: &Value) -> Vec<String> {
    value
        .as_array()
        .unwrap()
        .iter()
        .map(|record| record.hidden(KEY).and_then(Value::as_str).unwrap().to_string())
        .collect()
}

/// `list` holding a, b and c with n = 1, 2, 3.
fn abc(db: &MemoryDatabase) {
    for (key, n) in [("a", 1), ("b", 2), ("c", 3)] {
        db.set(&format!("list/{key}"), Value::object([("n", Value::from(n))]));
    }
}

#[test]
fn object_resolves_with_hidden_key() {
    let db = MemoryDatabase::new();
    db.set("users/u1", json(r#"{"name": "ada"}"#));

    let (target, outcome, _unbind) = bind_object(&db, "users/u1");
    assert!(!outcome.is_settled());
    db.flush();

    assert_eq!(outcome.value(), json(r#"{"name": "ada"}"#));
    assert_eq!(target.get().hidden(KEY), Some(&Value::from("u1")));
}

#[test]
fn scalar_node_is_wrapped() {
    let db = MemoryDatabase::new();
    db.set("counter", Value::from(3));
    let (target, _outcome, _unbind) = bind_object(&db, "counter");
    db.flush();

    let record = target.get();
    assert_eq!(record.hidden(VALUE), Some(&Value::from(3)));
    assert_eq!(record.hidden(KEY), Some(&Value::from("counter")));
}

#[test]
fn scalar_node_becoming_object_drops_wrapped_value() {
    let db = MemoryDatabase::new();
    db.set("node", Value::from(3));
    let (target, _outcome, _unbind) = bind_object(&db, "node");
    db.flush();

    db.set("node", json(r#"{"a": 1}"#));
    db.flush();

    let record = target.get();
    assert_eq!(record, json(r#"{"a": 1}"#));
    assert_eq!(record.hidden(VALUE), None);
    assert_eq!(record.hidden(KEY), Some(&Value::from("node")));
}

#[test]
fn missing_node_resolves_null() {
    let db = MemoryDatabase::new();
    let (target, outcome, _unbind) = bind_object(&db, "nothing/here");
    db.flush();

    assert_eq!(outcome.value(), Value::Null);
    assert_eq!(target.get(), Value::Null);
}

#[test]
fn object_follows_later_values() {
    let db = MemoryDatabase::new();
    db.set("users/u1", json(r#"{"name": "ada"}"#));
    let (target, outcome, _unbind) = bind_object(&db, "users/u1");
    db.flush();

    db.set("users/u1/name", Value::from("grace"));
    db.flush();
    assert_eq!(target.get(), json(r#"{"name": "grace"}"#));

    db.remove("users/u1");
    db.flush();
    assert_eq!(target.get(), Value::Null);
    assert_eq!(outcome.count(), 1);
}

#[test]
fn array_lists_children_in_store_order() {
    let db = MemoryDatabase::new();
    db.set("list/y", json(r#"{"n": 2}"#));
    db.set("list/x", json(r#"{"n": 1}"#));

    let (target, outcome, _unbind) = bind_array(&db, "list", RecordingOperations::new());
    assert_eq!(target.get(), Value::array([]));
    db.flush();

    assert_eq!(outcome.value(), json(r#"[{"n": 2}, {"n": 1}]"#));
    assert_eq!(keys(&target.get()), ["y", "x"]);
}

#[test]
fn empty_node_resolves_empty_array() {
    let db = MemoryDatabase::new();
    let (target, outcome, _unbind) = bind_array(&db, "list", RecordingOperations::new());
    db.flush();

    assert_eq!(outcome.value(), Value::array([]));
    assert_eq!(target.get(), Value::array([]));
}

#[test]
fn array_applies_child_events_through_operations() {
    let db = MemoryDatabase::new();
    db.set("list/x", json(r#"{"n": 1}"#));
    db.set("list/y", json(r#"{"n": 2}"#));
    let ops = RecordingOperations::new();
    let (target, _outcome, _unbind) = bind_array(&db, "list", ops.clone());
    db.flush();
    ops.take();

    let key = db.push("list", json(r#"{"n": 3}"#));
    db.flush();
    assert_eq!(ops.take(), vec![Op::Add(2, json(r#"{"n": 3}"#))]);

    db.set("list/x/n", Value::from(5));
    db.flush();
    assert_eq!(ops.take(), vec![Op::Set("0".to_string(), json(r#"{"n": 5}"#))]);

    db.remove("list/y");
    db.flush();
    assert_eq!(ops.take(), vec![Op::Remove(1)]);

    assert_eq!(target.get(), json(r#"[{"n": 5}, {"n": 3}]"#));
    assert_eq!(keys(&target.get()), ["x".to_string(), key]);
}

#[test]
fn changed_child_from_scalar_to_object_drops_wrapped_value() {
    let db = MemoryDatabase::new();
    db.set("list/x", Value::from(3));
    let (target, _outcome, _unbind) = bind_array(&db, "list", RecordingOperations::new());
    db.flush();

    db.set("list/x", json(r#"{"a": 1}"#));
    db.flush();

    let list = target.get();
    assert_eq!(list, json(r#"[{"a": 1}]"#));
    let record = &list.as_array().unwrap()[0];
    assert_eq!(record.hidden(VALUE), None);
    assert_eq!(record.hidden(KEY), Some(&Value::from("x")));
}

#[test]
fn moves_reuse_the_existing_record() {
    let db = MemoryDatabase::new();
    abc(&db);
    let ops = RecordingOperations::new();
    let (target, _outcome, _unbind) = bind_array(&db, "list", ops.clone());
    db.flush();
    ops.take();

    db.move_child("list", "a", Some("c"));
    db.flush();
    assert_eq!(ops.take(), vec![Op::Remove(0), Op::Add(2, json(r#"{"n": 1}"#))]);
    assert_eq!(keys(&target.get()), ["b", "c", "a"]);

    db.move_child("list", "c", None);
    db.flush();
    assert_eq!(ops.take(), vec![Op::Remove(1), Op::Add(0, json(r#"{"n": 3}"#))]);
    assert_eq!(keys(&target.get()), ["c", "b", "a"]);
    assert_eq!(target.get(), json(r#"[{"n": 3}, {"n": 2}, {"n": 1}]"#));
}

#[test]
fn scalar_children_reorder_by_predecessor() {
    let db = MemoryDatabase::new();
    for (key, n) in [("k3", 3), ("k1", 1), ("k2", 2)] {
        db.set(&format!("numbers/{key}"), Value::from(n));
    }
    let (target, _outcome, _unbind) = bind_array(&db, "numbers", RecordingOperations::new());
    db.flush();

    let values = |value: &Value| -> Vec<i64> {
        value
            .as_array()
            .unwrap()
            .iter()
            .map(|record| record.hidden(VALUE).and_then(Value::as_i64).unwrap())
            .collect()
    };
    assert_eq!(values(&target.get()), [3, 1, 2]);

    db.move_child("numbers", "k3", Some("k2"));
    db.flush();
    assert_eq!(values(&target.get()), [1, 2, 3]);

    db.move_child("numbers", "k2", None);
    db.flush();
    assert_eq!(values(&target.get()), [2, 1, 3]);
}

#[test]
fn unbind_detaches_every_listener() {
    let db = MemoryDatabase::new();
    abc(&db);
    let (target, _outcome, unbind) = bind_array(&db, "list", RecordingOperations::new());
    db.flush();
    assert_eq!(db.stats("list").listens, 5);

    unbind.unbind(ResetOption::Empty);
    assert_eq!(db.stats("list").active(), 0);
    assert_eq!(target.get(), Value::array([]));

    db.push("list", json(r#"{"n": 4}"#));
    db.flush();
    assert_eq!(target.get(), Value::array([]));
}

#[test]
fn object_unbind_with_custom_reset() {
    let db = MemoryDatabase::new();
    db.set("users/u1", json(r#"{"name": "ada"}"#));
    let (target, _outcome, unbind) = bind_object(&db, "users/u1");
    db.flush();

    unbind.unbind(ResetOption::with(|| Value::from("signed out")));
    assert_eq!(target.get(), Value::from("signed out"));
    assert_eq!(db.stats("users/u1").active(), 0);
}

#[test]
fn subscription_error_rejects_once() {
    let db = MemoryDatabase::new();
    abc(&db);
    let (target, outcome, _unbind) = bind_array(&db, "list", RecordingOperations::new());

    db.fail("list", StoreError::permission_denied("list"));
    db.flush();

    assert_eq!(outcome.count(), 1);
    let BindError::Subscription { path, .. } = outcome.error();
    assert_eq!(path, "list");
    assert_eq!(target.get(), Value::array([]));
}

#[test]
fn wait_publishes_array_once_listed() {
    let db = MemoryDatabase::new();
    abc(&db);
    let target = Target::new(Value::from("old"));
    let ops = RecordingOperations::new();
    let outcome = Outcome::new();
    let options = TreeOptions {
        wait: true,
        ..TreeOptions::default()
    };
    let _unbind = bind_tree_array(
        &target,
        &db.node("list"),
        ops.clone(),
        outcome.resolve(),
        outcome.reject(),
        &options,
    );
    assert!(ops.take().is_empty());

    assert!(db.step());
    assert_eq!(target.get(), Value::from("old"));

    db.flush();
    let expected = json(r#"[{"n": 1}, {"n": 2}, {"n": 3}]"#);
    assert_eq!(ops.take(), vec![Op::Set(String::new(), expected.clone())]);
    assert_eq!(outcome.value(), expected);

    db.remove("list/b");
    db.flush();
    assert_eq!(ops.take(), vec![Op::Remove(1)]);
}

#[test]
fn mount_switches_between_tree_bindings() {
    let db = MemoryDatabase::new();
    abc(&db);
    db.set("users/u1", json(r#"{"name": "ada"}"#));
    let mut mount = Mount::new(Target::default(), Rc::new(DefaultOperations));

    mount.bind_tree_object(&db.node("users/u1"), |_| {}, |_| {}, &TreeOptions::default());
    db.flush();
    assert_eq!(mount.target().get(), json(r#"{"name": "ada"}"#));

    mount.bind_tree_array(&db.node("list"), |_| {}, |_| {}, &TreeOptions::default());
    assert_eq!(db.stats("users/u1").active(), 0);
    assert_eq!(mount.target().get(), Value::array([]));
    db.flush();
    assert_eq!(keys(&mount.target().get()), ["a", "b", "c"]);

    mount.unbind(ResetOption::Keep);
    assert!(!mount.is_bound());
    assert_eq!(keys(&mount.target().get()), ["a", "b", "c"]);
}
