//! Binding nodes of the tree store, as a single record or as an ordered
//! array of child records.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use indexmap::IndexSet;
use log::{debug, trace};

use crate::binding::{Context, Detach, Unbind};
use crate::error::{BindError, StoreError};
use crate::ops::{Operations, Target};
use crate::options::{TreeOptions, TreeSerializer};
use crate::source::{TreeEvent, TreeEventType, TreeSnapshot, TreeSource, Unsubscribe};
use crate::value::{Object, Value};

/// Hidden property carrying a node's key.
pub const KEY: &str = ".key";
/// Hidden property carrying a scalar node's value.
pub const VALUE: &str = ".value";

/// Default tree serializer.
///
/// Objects get a hidden `.key`. Scalars are wrapped in an empty object with
/// hidden `.value` and `.key`. Missing nodes become `Null`.
pub fn create_record(snapshot: &TreeSnapshot) -> Value {
    match snapshot.val() {
        None | Some(Value::Null) => Value::Null,
        Some(Value::Object(object)) => {
            let mut record = object.clone();
            record.define_hidden(KEY, Value::from(snapshot.key()));
            Value::Object(record)
        }
        Some(Value::Array(items)) => Value::Array(items.clone()),
        Some(scalar) => {
            let mut record = Object::new();
            record.define_hidden(VALUE, scalar.clone());
            record.define_hidden(KEY, Value::from(snapshot.key()));
            Value::Object(record)
        }
    }
}

/// Shared listener bookkeeping of the tree bindings.
struct Listeners {
    unsubscribes: RefCell<Vec<Unsubscribe>>,
    detached: Cell<bool>,
}

impl Listeners {
    fn new() -> Self {
        Listeners {
            unsubscribes: RefCell::new(Vec::new()),
            detached: Cell::new(false),
        }
    }

    /// Keeps `unsubscribe`, or calls it right away if already detached.
    fn keep(&self, unsubscribe: Unsubscribe) {
        if self.detached.get() {
            unsubscribe.call();
        } else {
            self.unsubscribes.borrow_mut().push(unsubscribe);
        }
    }

    fn detach(&self) {
        if self.detached.replace(true) {
            return;
        }
        let unsubscribes = std::mem::take(&mut *self.unsubscribes.borrow_mut());
        for unsubscribe in unsubscribes {
            unsubscribe.call();
        }
    }
}

struct TreeObject {
    context: Rc<Context>,
    serialize: TreeSerializer,
    path: String,
    seen: Cell<bool>,
    listeners: Listeners,
}

impl TreeObject {
    fn on_event(&self, event: Result<TreeEvent, StoreError>) {
        if self.listeners.detached.get() {
            return;
        }
        match event {
            Ok(event) => {
                trace!("value of {} (exists: {})", self.path, event.snapshot.exists());
                self.context.surface.set("", (self.serialize)(&event.snapshot));
                if !self.seen.replace(true) {
                    self.context.ready();
                }
            }
            Err(error) => self.context.fail(&self.path, error),
        }
    }
}

impl Detach for TreeObject {
    fn detach(&self) {
        self.listeners.detach();
    }
}

/// Binds `node` into `target` as a single record.
///
/// Resolves with the first value pushed by the store.
pub fn bind_tree_object(
    target: &Target,
    node: &dyn TreeSource,
    ops: Rc<dyn Operations>,
    resolve: impl FnOnce(Value) + 'static,
    reject: impl FnOnce(BindError) + 'static,
    options: &TreeOptions,
) -> Unbind {
    debug!("binding tree node {} as object (wait: {})", node.path(), options.wait);
    let context = Context::new(target, ops, resolve, reject, options.wait.then_some(Value::Null));
    let binding = Rc::new(TreeObject {
        context: Rc::clone(&context),
        serialize: Rc::clone(&options.serialize),
        path: node.path().to_string(),
        seen: Cell::new(false),
        listeners: Listeners::new(),
    });
    let weak = Rc::downgrade(&binding);
    let unsubscribe = node.listen(
        TreeEventType::Value,
        Box::new(move |event| {
            if let Some(binding) = weak.upgrade() {
                binding.on_event(event);
            }
        }),
    );
    binding.listeners.keep(unsubscribe);
    Unbind::new(binding, context, Value::Null, node.path())
}

struct TreeArray {
    context: Rc<Context>,
    serialize: TreeSerializer,
    path: String,
    /// Child keys in container order.
    keys: RefCell<IndexSet<String>>,
    seen: Cell<bool>,
    listeners: Listeners,
}

impl TreeArray {
    fn on_event(&self, kind: TreeEventType, event: Result<TreeEvent, StoreError>) {
        if self.listeners.detached.get() {
            return;
        }
        let event = match event {
            Ok(event) => event,
            Err(error) => {
                self.context.fail(&self.path, error);
                return;
            }
        };
        trace!("{kind:?} for {} under {}", event.snapshot.key(), self.path);
        match kind {
            TreeEventType::ChildAdded => self.child_added(&event),
            TreeEventType::ChildRemoved => self.child_removed(&event),
            TreeEventType::ChildChanged => self.child_changed(&event),
            TreeEventType::ChildMoved => self.child_moved(&event),
            // Child events for the initial listing precede the first value.
            TreeEventType::Value => {
                if !self.seen.replace(true) {
                    self.context.ready();
                }
            }
        }
    }

    /// Index right after `previous_key`, or 0 when it is absent or unknown.
    fn insertion_index(&self, previous_key: Option<&str>) -> usize {
        previous_key
            .and_then(|key| self.keys.borrow().get_index_of(key))
            .map_or(0, |index| index + 1)
    }

    fn child_added(&self, event: &TreeEvent) {
        let key = event.snapshot.key();
        if self.keys.borrow().contains(key) {
            trace!("{key} already listed under {}, treating as a change", self.path);
            self.child_changed(event);
            return;
        }
        let index = self.insertion_index(event.previous_key.as_deref());
        self.keys.borrow_mut().shift_insert(index, key.to_string());
        self.context.surface.add("", index, (self.serialize)(&event.snapshot));
    }

    fn child_removed(&self, event: &TreeEvent) {
        let removed = self.keys.borrow_mut().shift_remove_full(event.snapshot.key());
        if let Some((index, _)) = removed {
            self.context.surface.remove("", index);
        }
    }

    fn child_changed(&self, event: &TreeEvent) {
        let index = self.keys.borrow().get_index_of(event.snapshot.key());
        if let Some(index) = index {
            self.context
                .surface
                .set(&index.to_string(), (self.serialize)(&event.snapshot));
        }
    }

    /// Moves the existing record after `previous_key`, without re-serializing it.
    fn child_moved(&self, event: &TreeEvent) {
        let key = event.snapshot.key();
        let Some((from, key)) = self.keys.borrow_mut().shift_remove_full(key) else {
            return;
        };
        let record = self.context.surface.remove("", from).unwrap_or_default();
        let to = self.insertion_index(event.previous_key.as_deref());
        self.keys.borrow_mut().shift_insert(to, key);
        self.context.surface.add("", to, record);
    }
}

impl Detach for TreeArray {
    fn detach(&self) {
        self.listeners.detach();
    }
}

/// Binds the children of `node` into `target` as an array, in the order the
/// store declares.
///
/// The target becomes `[]` right away unless `options.wait` is set. Readiness
/// resolves once the initial listing is complete.
pub fn bind_tree_array(
    target: &Target,
    node: &dyn TreeSource,
    ops: Rc<dyn Operations>,
    resolve: impl FnOnce(Value) + 'static,
    reject: impl FnOnce(BindError) + 'static,
    options: &TreeOptions,
) -> Unbind {
    debug!("binding tree node {} as array (wait: {})", node.path(), options.wait);
    let empty = Value::Array(Vec::new());
    let context = Context::new(target, ops, resolve, reject, options.wait.then(|| empty.clone()));
    if !options.wait {
        context.surface.set("", empty.clone());
    }
    let binding = Rc::new(TreeArray {
        context: Rc::clone(&context),
        serialize: Rc::clone(&options.serialize),
        path: node.path().to_string(),
        keys: RefCell::new(IndexSet::new()),
        seen: Cell::new(false),
        listeners: Listeners::new(),
    });
    // The value listener goes last so it fires after the initial children.
    for kind in [
        TreeEventType::ChildAdded,
        TreeEventType::ChildRemoved,
        TreeEventType::ChildChanged,
        TreeEventType::ChildMoved,
        TreeEventType::Value,
    ] {
        if binding.listeners.detached.get() {
            break;
        }
        let weak = Rc::downgrade(&binding);
        let unsubscribe = node.listen(
            kind,
            Box::new(move |event| {
                if let Some(binding) = weak.upgrade() {
                    binding.on_event(kind, event);
                }
            }),
        );
        binding.listeners.keep(unsubscribe);
    }
    Unbind::new(binding, context, empty, node.path())
}
