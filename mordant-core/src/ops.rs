use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::rc::Rc;

use crate::path::walk_set;
use crate::value::Value;

/// Caller-owned container that bindings mirror store data into.
///
/// Cloning yields another handle to the same container.
#[derive(Clone, Default)]
pub struct Target(Rc<RefCell<Value>>);

impl Target {
    pub fn new(value: Value) -> Self {
        Target(Rc::new(RefCell::new(value)))
    }

    /// Returns a copy of the current value.
    pub fn get(&self) -> Value {
        self.0.borrow().clone()
    }

    pub fn borrow(&self) -> Ref<'_, Value> {
        self.0.borrow()
    }

    pub(crate) fn borrow_mut(&self) -> RefMut<'_, Value> {
        self.0.borrow_mut()
    }
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Target").field(&*self.0.borrow()).finish()
    }
}

/// The only way bindings mutate a target.
///
/// Hosts override these to route writes through their own change tracking.
/// Paths passed to `set` are dotted and relative to the target root; the
/// empty path replaces the whole value.
pub trait Operations {
    fn set(&self, target: &mut Value, path: &str, value: Value) {
        walk_set(target, path, value);
    }

    fn add(&self, array: &mut Vec<Value>, index: usize, value: Value) {
        array.insert(index.min(array.len()), value);
    }

    /// Removes and returns the element at `index`, or `Null` if out of range.
    fn remove(&self, array: &mut Vec<Value>, index: usize) -> Value {
        if index < array.len() {
            array.remove(index)
        } else {
            Value::Null
        }
    }
}

/// Plain in-place mutation.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultOperations;

impl Operations for DefaultOperations {}
