//! Snapshot normalization and reference extraction.

use indexmap::IndexMap;

use crate::path::join;
use crate::source::{DocumentRef, DocumentSnapshot};
use crate::value::{Object, Value};

/// Name of the hidden property carrying a record's identifier.
pub const ID: &str = "id";

/// References found in a value, keyed by dotted path, in depth-first order.
pub type RefTable = IndexMap<String, DocumentRef>;

/// Default document serializer: the record data with a hidden `id`, or
/// `Null` when the record does not exist.
pub fn create_snapshot(snapshot: &DocumentSnapshot) -> Value {
    match snapshot.data() {
        None => Value::Null,
        Some(Value::Object(data)) => {
            let mut data = data.clone();
            data.define_hidden(ID, Value::from(snapshot.id()));
            Value::Object(data)
        }
        Some(data) => data.clone(),
    }
}

/// Replaces every reference in `value` with a placeholder and collects them.
///
/// The placeholder is the reference's path. When `bound` already holds the
/// same reference at that path and `previous` has a null or object there, the
/// live binding's resolved value is kept instead. Objects and arrays are
/// walked; every other kind of value is copied as is, along with hidden
/// properties.
pub fn extract_refs(value: &Value, previous: Option<&Value>, bound: &RefTable) -> (Value, RefTable) {
    let mut walk = Walk {
        bound,
        refs: RefTable::new(),
    };
    let data = walk.extract(value, previous, "");
    (data, walk.refs)
}

struct Walk<'a> {
    bound: &'a RefTable,
    refs: RefTable,
}

impl Walk<'_> {
    fn extract(&mut self, value: &Value, previous: Option<&Value>, path: &str) -> Value {
        match value {
            Value::Reference(reference) => {
                self.refs.insert(path.to_string(), reference.clone());
                let still_bound = self.bound.get(path) == Some(reference);
                match previous {
                    Some(kept @ (Value::Null | Value::Object(_))) if still_bound => kept.clone(),
                    _ => Value::from(reference.path()),
                }
            }
            Value::Object(object) => {
                let mut data = Object::new();
                for (key, field) in object.iter() {
                    let previous = previous.and_then(|p| p.get(key));
                    data.insert(key, self.extract(field, previous, &join(path, key)));
                }
                for (key, hidden) in object.hidden_entries() {
                    data.define_hidden(key.clone(), hidden.clone());
                }
                Value::Object(data)
            }
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| {
                        let previous = previous.and_then(Value::as_array).and_then(|p| p.get(i));
                        self.extract(item, previous, &join(path, &i.to_string()))
                    })
                    .collect(),
            ),
            other => other.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{DocumentListener, DocumentSource, Unsubscribe};
    use crate::value::Timestamp;

    struct Fixed(&'static str);

    impl DocumentSource for Fixed {
        fn path(&self) -> &str {
            self.0
        }

        fn listen(&self, _listener: DocumentListener) -> Unsubscribe {
            Unsubscribe::noop()
        }
    }

    fn reference(path: &'static str) -> Value {
        Value::Reference(DocumentRef::new(Fixed(path)))
    }

    #[test]
    fn snapshot_carries_hidden_id() {
        let snapshot = DocumentSnapshot::new("items/a", Some(Value::object([("n", Value::from(1))])));
        let value = create_snapshot(&snapshot);
        assert_eq!(value, Value::object([("n", Value::from(1))]));
        assert_eq!(value.hidden(ID), Some(&Value::from("a")));
    }

    #[test]
    fn missing_record_is_null() {
        assert_eq!(create_snapshot(&DocumentSnapshot::new("items/a", None)), Value::Null);
    }

    #[test]
    fn extracts_nested_references_in_order() {
        let value = Value::object([
            ("a", reference("docs/a")),
            (
                "nested",
                Value::object([("list", Value::array([Value::from(1), reference("docs/b")]))]),
            ),
        ]);

        let (data, refs) = extract_refs(&value, None, &RefTable::new());

        assert_eq!(
            data,
            Value::object([
                ("a", Value::from("docs/a")),
                (
                    "nested",
                    Value::object([("list", Value::array([Value::from(1), Value::from("docs/b")]))]),
                ),
            ])
        );
        let found: Vec<(&str, &str)> = refs.iter().map(|(k, r)| (k.as_str(), r.path())).collect();
        assert_eq!(found, vec![("a", "docs/a"), ("nested.list.1", "docs/b")]);
    }

    #[test]
    fn opaque_values_are_untouched() {
        let value = Value::object([
            ("at", Value::from(Timestamp::new(10, 0))),
            ("empty", Value::Object(Object::new())),
            ("none", Value::Null),
        ]);
        let (data, refs) = extract_refs(&value, None, &RefTable::new());
        assert_eq!(data, value);
        assert!(refs.is_empty());
    }

    fn table(entries: &[(&str, &'static str)]) -> RefTable {
        entries
            .iter()
            .map(|&(key, path)| (key.to_string(), DocumentRef::new(Fixed(path))))
            .collect()
    }

    #[test]
    fn keeps_values_resolved_by_live_bindings() {
        let value = Value::object([("a", reference("docs/a")), ("b", reference("docs/b"))]);
        let previous = Value::object([
            ("a", Value::object([("name", Value::from("resolved"))])),
            ("b", Value::from("docs/b")),
        ]);

        let (data, refs) = extract_refs(&value, Some(&previous), &table(&[("a", "docs/a"), ("b", "docs/b")]));

        assert_eq!(
            data,
            Value::object([
                ("a", Value::object([("name", Value::from("resolved"))])),
                ("b", Value::from("docs/b")),
            ])
        );
        assert_eq!(refs.len(), 2);
    }

    #[test]
    fn previous_values_without_matching_binding_become_paths() {
        let value = Value::object([("a", reference("docs/a")), ("b", reference("docs/c"))]);
        let previous = Value::object([("a", Value::Null), ("b", Value::object([("stale", Value::from(true))]))]);

        let (data, _) = extract_refs(&value, Some(&previous), &table(&[("b", "docs/b")]));

        assert_eq!(
            data,
            Value::object([("a", Value::from("docs/a")), ("b", Value::from("docs/c"))])
        );
    }

    #[test]
    fn copies_hidden_properties() {
        let snapshot = DocumentSnapshot::new("items/x", Some(Value::object([("r", reference("docs/a"))])));
        let (data, _) = extract_refs(&create_snapshot(&snapshot), None, &RefTable::new());
        assert_eq!(data.hidden(ID), Some(&Value::from("x")));
    }
}
