#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use mordant_core::{
    BindError, CollectionListener, CollectionSource, DocumentChange, DocumentListener,
    DocumentRef, DocumentSource, Operations, Unsubscribe, Value, walk_set,
};

/// A mutation performed through [`RecordingOperations`].
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    Set(String, Value),
    Add(usize, Value),
    Remove(usize),
}

/// Default mutations, recorded in call order.
#[derive(Default)]
pub struct RecordingOperations {
    calls: RefCell<Vec<Op>>,
}

impl RecordingOperations {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    /// Returns and clears the recorded calls.
    pub fn take(&self) -> Vec<Op> {
        std::mem::take(&mut *self.calls.borrow_mut())
    }
}

impl Operations for RecordingOperations {
    fn set(&self, target: &mut Value, path: &str, value: Value) {
        self.calls.borrow_mut().push(Op::Set(path.to_string(), value.clone()));
        walk_set(target, path, value);
    }

    fn add(&self, array: &mut Vec<Value>, index: usize, value: Value) {
        self.calls.borrow_mut().push(Op::Add(index, value.clone()));
        array.insert(index, value);
    }

    fn remove(&self, array: &mut Vec<Value>, index: usize) -> Value {
        self.calls.borrow_mut().push(Op::Remove(index));
        array.remove(index)
    }
}

/// Captures how a bind call settled.
#[derive(Clone, Default)]
pub struct Outcome(Rc<RefCell<Vec<Result<Value, BindError>>>>);

impl Outcome {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolve(&self) -> impl FnOnce(Value) + 'static {
        let outcome = self.clone();
        move |value| outcome.0.borrow_mut().push(Ok(value))
    }

    pub fn reject(&self) -> impl FnOnce(BindError) + 'static {
        let outcome = self.clone();
        move |error| outcome.0.borrow_mut().push(Err(error))
    }

    pub fn is_settled(&self) -> bool {
        !self.0.borrow().is_empty()
    }

    /// Number of times the bind call settled.
    pub fn count(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn value(&self) -> Value {
        match self.0.borrow().first() {
            Some(Ok(value)) => value.clone(),
            other => panic!("expected a resolved binding, got {other:?}"),
        }
    }

    pub fn error(&self) -> BindError {
        match self.0.borrow().first() {
            Some(Err(error)) => error.clone(),
            other => panic!("expected a rejected binding, got {other:?}"),
        }
    }
}

pub fn json(text: &str) -> Value {
    serde_json::from_str(text).unwrap()
}

/// Follows `key` down nested objects, returning the depth and the last value.
pub fn nesting(value: &Value, key: &str) -> (usize, Value) {
    let mut depth = 0;
    let mut current = value;
    while let Some(next) = current.get(key) {
        depth += 1;
        current = next;
    }
    (depth, current.clone())
}

/// A record that never answers.
pub struct Silent(pub &'static str);

impl DocumentSource for Silent {
    fn path(&self) -> &str {
        self.0
    }

    fn listen(&self, _listener: DocumentListener) -> Unsubscribe {
        Unsubscribe::noop()
    }
}

pub fn silent(path: &'static str) -> Value {
    Value::from(DocumentRef::new(Silent(path)))
}

/// A collection whose change batches are pushed by the test.
#[derive(Clone, Default)]
pub struct ScriptedCollection {
    listener: Rc<RefCell<Option<CollectionListener>>>,
    detached: Rc<Cell<bool>>,
}

impl ScriptedCollection {
    pub fn push(&self, changes: Vec<DocumentChange>) {
        let listener = self.listener.borrow_mut().take();
        if let Some(mut listener) = listener {
            listener(Ok(changes));
            if !self.detached.get() {
                *self.listener.borrow_mut() = Some(listener);
            }
        }
    }

    pub fn is_detached(&self) -> bool {
        self.detached.get()
    }
}

impl CollectionSource for ScriptedCollection {
    fn path(&self) -> &str {
        "scripted"
    }

    fn listen(&self, listener: CollectionListener) -> Unsubscribe {
        *self.listener.borrow_mut() = Some(listener);
        let (slot, detached) = (Rc::clone(&self.listener), Rc::clone(&self.detached));
        Unsubscribe::new(move || {
            detached.set(true);
            slot.borrow_mut().take();
        })
    }
}
