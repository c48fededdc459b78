//! Dotted-path access into a [`Value`].
//!
//! Segments are separated by `.`; numeric segments index into arrays. The
//! empty path designates the value itself.

use log::trace;

use crate::value::{Object, Value};

/// Assigns `value` at `path`, creating intermediate objects for missing or
/// null segments.
///
/// Numeric segments grow arrays with nulls as needed. When an intermediate
/// segment holds a scalar the write is dropped. The final slot is replaced
/// as a whole, hidden properties included.
pub fn walk_set(target: &mut Value, path: &str, value: Value) {
    if path.is_empty() {
        *target = value;
        return;
    }

    let mut current = target;
    let mut segments = path.split('.').peekable();
    while let Some(segment) = segments.next() {
        let Some(slot) = slot_mut(current, segment) else {
            trace!("dropping write to {path}: {segment} cannot be created");
            return;
        };
        if segments.peek().is_none() {
            *slot = value;
            return;
        }
        current = slot;
    }
}

/// Returns the value at `path`, if every segment exists.
pub fn walk_get<'a>(target: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(target);
    }
    path.split('.').try_fold(target, |current, segment| match current {
        Value::Object(object) => object.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

pub(crate) fn walk_get_mut<'a>(target: &'a mut Value, path: &str) -> Option<&'a mut Value> {
    if path.is_empty() {
        return Some(target);
    }
    path.split('.').try_fold(target, |current, segment| match current {
        Value::Object(object) => object.get_mut(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get_mut(i)),
        _ => None,
    })
}

/// Appends `segment` to a dotted `base` path.
pub(crate) fn join(base: &str, segment: &str) -> String {
    if base.is_empty() {
        segment.to_string()
    } else {
        format!("{base}.{segment}")
    }
}

fn slot_mut<'a>(container: &'a mut Value, segment: &str) -> Option<&'a mut Value> {
    if container.is_null() {
        *container = Value::Object(Object::new());
    }
    match container {
        Value::Object(object) => {
            if !object.contains_key(segment) {
                object.insert(segment, Value::Null);
            }
            object.get_mut(segment)
        }
        Value::Array(items) => {
            let index: usize = segment.parse().ok()?;
            if items.len() <= index {
                items.resize(index + 1, Value::Null);
            }
            items.get_mut(index)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sets_nested_path_creating_objects() {
        let mut target = Value::Null;
        walk_set(&mut target, "a.b.c", Value::from(1));
        assert_eq!(
            target,
            Value::object([("a", Value::object([("b", Value::object([("c", Value::from(1))]))]))])
        );
    }

    #[test]
    fn replaces_null_intermediates() {
        let mut target = Value::object([("a", Value::Null)]);
        walk_set(&mut target, "a.b", Value::from("x"));
        assert_eq!(walk_get(&target, "a.b"), Some(&Value::from("x")));
    }

    #[test]
    fn numeric_segments_index_arrays() {
        let mut target = Value::array([Value::object([("n", Value::from(1))])]);
        walk_set(&mut target, "0.n", Value::from(2));
        walk_set(&mut target, "2", Value::from("end"));

        assert_eq!(
            target,
            Value::array([
                Value::object([("n", Value::from(2))]),
                Value::Null,
                Value::from("end"),
            ])
        );
    }

    #[test]
    fn scalar_intermediate_drops_write() {
        let mut target = Value::object([("a", Value::from(3))]);
        walk_set(&mut target, "a.b", Value::from(1));
        assert_eq!(target, Value::object([("a", Value::from(3))]));
    }

    #[test]
    fn empty_path_replaces_root() {
        let mut target = Value::object([("a", Value::from(1))]);
        walk_set(&mut target, "", Value::array([]));
        assert_eq!(target, Value::array([]));
    }

    #[test]
    fn replacing_object_drops_old_hidden_properties() {
        let mut old = Object::new();
        old.define_hidden("id", Value::from("a"));
        old.define_hidden(".value", Value::from(3));
        let mut target = Value::object([("item", Value::Object(old))]);

        let mut new = Object::new();
        new.insert("n", Value::from(1));
        new.define_hidden("id", Value::from("b"));
        walk_set(&mut target, "item", Value::Object(new));

        let item = walk_get(&target, "item").unwrap();
        assert_eq!(item, &Value::object([("n", Value::from(1))]));
        assert_eq!(item.hidden("id"), Some(&Value::from("b")));
        assert_eq!(item.hidden(".value"), None);
    }

    #[test]
    fn get_missing_path_is_none() {
        let target = Value::object([("a", Value::array([Value::from(1)]))]);
        assert_eq!(walk_get(&target, "a.0"), Some(&Value::from(1)));
        assert_eq!(walk_get(&target, "a.1"), None);
        assert_eq!(walk_get(&target, "a.x"), None);
        assert_eq!(walk_get(&target, "b.c"), None);
    }

    #[test]
    fn join_skips_empty_base() {
        assert_eq!(join("", "a"), "a");
        assert_eq!(join("a.b", "c"), "a.b.c");
    }
}
