use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use log::trace;

use super::{ListenStats, Queue, Slot, Stats, split_parent};
use crate::error::StoreError;
use crate::source::{TreeEvent, TreeEventType, TreeListener, TreeSnapshot, TreeSource, Unsubscribe};
use crate::value::{Object, Value};

struct Registration {
    path: String,
    kind: TreeEventType,
    slot: Slot<Result<TreeEvent, StoreError>>,
}

/// A reorder of one child, reported as a move rather than as a change.
struct Moved<'a> {
    parent: &'a str,
    key: &'a str,
}

#[derive(Default)]
struct Inner {
    root: RefCell<Value>,
    listeners: RefCell<Vec<Rc<Registration>>>,
    stats: Stats,
    queue: Queue,
    next_key: Cell<u64>,
}

impl Inner {
    fn listen(self: &Rc<Self>, path: &str, kind: TreeEventType, listener: TreeListener) -> Unsubscribe {
        trace!("listening to {kind:?} at {path:?}");
        let registration = Rc::new(Registration {
            path: path.to_string(),
            kind,
            slot: Slot::new(listener),
        });
        self.listeners.borrow_mut().push(Rc::clone(&registration));
        self.stats.listened(path);

        let root = self.root.borrow().clone();
        match kind {
            TreeEventType::Value => {
                let event = TreeEvent::new(snapshot_at(&root, path), None);
                self.deliver(&registration, event);
            }
            TreeEventType::ChildAdded => {
                let mut previous_key = None;
                for (key, value) in children(&root, path) {
                    let event = TreeEvent::new(TreeSnapshot::new(key.clone(), Some(value)), previous_key);
                    self.deliver(&registration, event);
                    previous_key = Some(key);
                }
            }
            _ => {}
        }

        let store = Rc::downgrade(self);
        Unsubscribe::new(move || {
            registration.slot.detach();
            if let Some(store) = store.upgrade() {
                store
                    .listeners
                    .borrow_mut()
                    .retain(|r| !Rc::ptr_eq(r, &registration));
                store.stats.unsubscribed(&registration.path);
            }
        })
    }

    fn deliver(&self, registration: &Rc<Registration>, event: TreeEvent) {
        let registration = Rc::clone(registration);
        self.queue.push(move || registration.slot.deliver(Ok(event)));
    }

    fn mutate(&self, f: impl FnOnce(&mut Value)) {
        let before = self.root.borrow().clone();
        f(&mut *self.root.borrow_mut());
        let after = self.root.borrow().clone();
        self.notify(&before, &after, None);
    }

    /// Queues the events that describe going from `before` to `after`.
    fn notify(&self, before: &Value, after: &Value, moved: Option<Moved<'_>>) {
        let registrations: Vec<Rc<Registration>> = self.listeners.borrow().clone();
        for registration in registrations {
            let path = registration.path.as_str();
            match registration.kind {
                TreeEventType::Value => {
                    let reordered = moved
                        .as_ref()
                        .is_some_and(|m| is_ancestor_or_self(path, m.parent));
                    let value = node_at(after, path);
                    if reordered || node_at(before, path) != value {
                        let event = TreeEvent::new(snapshot_at(after, path), None);
                        self.deliver(&registration, event);
                    }
                }
                TreeEventType::ChildAdded => {
                    let old = children(before, path);
                    let mut previous_key = None;
                    for (key, value) in children(after, path) {
                        if !old.iter().any(|(k, _)| *k == key) {
                            let snapshot = TreeSnapshot::new(key.clone(), Some(value));
                            self.deliver(&registration, TreeEvent::new(snapshot, previous_key.clone()));
                        }
                        previous_key = Some(key);
                    }
                }
                TreeEventType::ChildRemoved => {
                    let new = children(after, path);
                    for (key, value) in children(before, path) {
                        if !new.iter().any(|(k, _)| *k == key) {
                            let snapshot = TreeSnapshot::new(key, Some(value));
                            self.deliver(&registration, TreeEvent::new(snapshot, None));
                        }
                    }
                }
                TreeEventType::ChildChanged => {
                    let old = children(before, path);
                    let mut previous_key = None;
                    for (key, value) in children(after, path) {
                        let changed = old.iter().any(|(k, v)| *k == key && *v != value);
                        if changed {
                            let snapshot = TreeSnapshot::new(key.clone(), Some(value));
                            self.deliver(&registration, TreeEvent::new(snapshot, previous_key.clone()));
                        }
                        previous_key = Some(key);
                    }
                }
                TreeEventType::ChildMoved => {
                    let Some(moved) = moved.as_ref().filter(|m| m.parent == path) else {
                        continue;
                    };
                    let siblings = children(after, path);
                    let Some(index) = siblings.iter().position(|(k, _)| k == moved.key) else {
                        continue;
                    };
                    let previous_key = index.checked_sub(1).map(|i| siblings[i].0.clone());
                    let snapshot = TreeSnapshot::new(moved.key, Some(siblings[index].1.clone()));
                    self.deliver(&registration, TreeEvent::new(snapshot, previous_key));
                }
            }
        }
    }
}

/// In-memory tree store.
///
/// Nodes live under slash-separated paths; the root is the empty path.
/// Children keep insertion order, which [`MemoryDatabase::move_child`]
/// changes. Writing `Null` or an empty object removes a node, and parents
/// left empty disappear with it.
#[derive(Clone, Default)]
pub struct MemoryDatabase {
    inner: Rc<Inner>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(&self, path: &str) -> MemoryNode {
        MemoryNode {
            store: Rc::downgrade(&self.inner),
            path: path.trim_matches('/').to_string(),
        }
    }

    pub fn get(&self, path: &str) -> Option<Value> {
        node_at(&self.inner.root.borrow(), path).cloned()
    }

    pub fn set(&self, path: &str, value: Value) {
        self.inner.mutate(|root| write(root, &segments(path), prune(value)));
    }

    /// Writes each field of `fields` as a child of `path`.
    pub fn update(&self, path: &str, fields: Value) {
        let Value::Object(fields) = fields else {
            return;
        };
        self.inner.mutate(|root| {
            for (key, value) in fields.iter() {
                let mut segments = segments(path);
                segments.push(key);
                write(root, &segments, prune(value.clone()));
            }
        });
    }

    /// Appends a child with a generated key, later keys sorting after earlier ones.
    pub fn push(&self, path: &str, value: Value) -> String {
        let n = self.inner.next_key.get() + 1;
        self.inner.next_key.set(n);
        let key = format!("-k{n:08}");
        let mut segments = segments(path);
        segments.push(&key);
        self.inner.mutate(|root| write(root, &segments, prune(value)));
        key
    }

    pub fn remove(&self, path: &str) {
        self.set(path, Value::Null);
    }

    /// Moves child `key` of `parent` right after sibling `after`, or first.
    pub fn move_child(&self, parent: &str, key: &str, after: Option<&str>) {
        let before = self.inner.root.borrow().clone();
        {
            let mut root = self.inner.root.borrow_mut();
            let Some(Value::Object(siblings)) = node_at_mut(&mut root, parent) else {
                return;
            };
            let Some(value) = siblings.remove(key) else {
                return;
            };
            let index = after
                .and_then(|after| siblings.keys().position(|k| k == after))
                .map_or(0, |i| i + 1);
            siblings.insert_at(index, key, value);
        }
        let after_root = self.inner.root.borrow().clone();
        let parent = parent.trim_matches('/');
        self.inner
            .notify(&before, &after_root, Some(Moved { parent, key }));
    }

    /// Fails every listener at `path`: they get `error` instead of any event
    /// still queued, and nothing after.
    pub fn fail(&self, path: &str, error: StoreError) {
        let path = path.trim_matches('/');
        let registrations: Vec<Rc<Registration>> = self
            .inner
            .listeners
            .borrow()
            .iter()
            .filter(|r| r.path == path)
            .cloned()
            .collect();
        for registration in registrations {
            if registration.slot.fail() {
                let error = error.clone();
                self.inner
                    .queue
                    .push(move || registration.slot.deliver_error(Err(error)));
            }
        }
    }

    /// Runs the oldest queued delivery. Returns false if none was queued.
    pub fn step(&self) -> bool {
        self.inner.queue.step()
    }

    pub fn flush(&self) -> usize {
        self.inner.queue.flush()
    }

    pub fn stats(&self, path: &str) -> ListenStats {
        self.inner.stats.get(path.trim_matches('/'))
    }
}

/// A node handle of a [`MemoryDatabase`].
#[derive(Clone)]
pub struct MemoryNode {
    store: Weak<Inner>,
    path: String,
}

impl MemoryNode {
    pub fn child(&self, key: &str) -> MemoryNode {
        let path = if self.path.is_empty() {
            key.to_string()
        } else {
            format!("{}/{key}", self.path)
        };
        MemoryNode {
            store: Weak::clone(&self.store),
            path,
        }
    }
}

impl TreeSource for MemoryNode {
    fn path(&self) -> &str {
        &self.path
    }

    fn listen(&self, event: TreeEventType, listener: TreeListener) -> Unsubscribe {
        match self.store.upgrade() {
            Some(store) => store.listen(&self.path, event, listener),
            None => Unsubscribe::noop(),
        }
    }
}

fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

fn is_ancestor_or_self(ancestor: &str, path: &str) -> bool {
    ancestor.is_empty() || path == ancestor || path.starts_with(&format!("{ancestor}/"))
}

/// The node at `path`, `None` when it does not exist.
fn node_at<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let node = segments(path)
        .into_iter()
        .try_fold(root, |node, segment| node.get(segment))?;
    (!node.is_null()).then_some(node)
}

fn node_at_mut<'a>(root: &'a mut Value, path: &str) -> Option<&'a mut Value> {
    segments(path)
        .into_iter()
        .try_fold(root, |node, segment| node.as_object_mut()?.get_mut(segment))
}

fn snapshot_at(root: &Value, path: &str) -> TreeSnapshot {
    let key = split_parent(path.trim_matches('/')).1;
    TreeSnapshot::new(key, node_at(root, path).cloned())
}

fn children(root: &Value, path: &str) -> Vec<(String, Value)> {
    match node_at(root, path) {
        Some(Value::Object(object)) => object
            .iter()
            .map(|(key, value)| (key.to_string(), value.clone()))
            .collect(),
        _ => Vec::new(),
    }
}

/// Drops null fields and empty objects; an empty result is `Null`.
fn prune(value: Value) -> Value {
    match value {
        Value::Object(object) => {
            let pruned: Object = object
                .iter()
                .map(|(key, value)| (key, prune(value.clone())))
                .filter(|(_, value)| !value.is_null())
                .collect();
            if pruned.is_empty() {
                Value::Null
            } else {
                Value::Object(pruned)
            }
        }
        other => other,
    }
}

fn write(node: &mut Value, segments: &[&str], value: Value) {
    let Some((first, rest)) = segments.split_first() else {
        *node = value;
        return;
    };
    if !matches!(node, Value::Object(_)) {
        if value.is_null() {
            return;
        }
        *node = Value::Object(Object::new());
    }
    let Value::Object(object) = node else {
        return;
    };
    if rest.is_empty() {
        if value.is_null() {
            object.remove(first);
        } else {
            object.insert(*first, value);
        }
    } else {
        if !object.contains_key(first) {
            object.insert(*first, Value::Null);
        }
        if let Some(child) = object.get_mut(first) {
            write(child, rest, value);
            if child.is_null() {
                object.remove(first);
            }
        }
    }
    if object.is_empty() {
        *node = Value::Null;
    }
}
