//! Pieces shared by the document and tree binders.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use log::{debug, warn};

use crate::error::{BindError, StoreError};
use crate::ops::{DefaultOperations, Operations, Target};
use crate::options::ResetOption;
use crate::path::{join, walk_get, walk_get_mut};
use crate::value::Value;

pub(crate) type Ready = Box<dyn FnOnce()>;

/// Write access to a target on behalf of one binding tree.
///
/// While a staged value is present every write lands there instead of the
/// target; [`Surface::publish`] then moves it over with a single `set`.
pub(crate) struct Surface {
    target: Target,
    ops: Rc<dyn Operations>,
    staged: RefCell<Option<Value>>,
}

impl Surface {
    fn with_root<R>(&self, f: impl FnOnce(&dyn Operations, &mut Value) -> R) -> R {
        let mut staged = self.staged.borrow_mut();
        if let Some(value) = staged.as_mut() {
            return f(&DefaultOperations, value);
        }
        drop(staged);
        f(self.ops.as_ref(), &mut *self.target.borrow_mut())
    }

    pub(crate) fn set(&self, path: &str, value: Value) {
        self.with_root(|ops, root| ops.set(root, path, value));
    }

    /// Inserts into the array at `path`. No-op if there is no array there.
    pub(crate) fn add(&self, path: &str, index: usize, value: Value) {
        self.with_root(|ops, root| {
            if let Some(Value::Array(items)) = walk_get_mut(root, path) {
                ops.add(items, index, value);
            }
        });
    }

    pub(crate) fn remove(&self, path: &str, index: usize) -> Option<Value> {
        self.with_root(|ops, root| match walk_get_mut(root, path) {
            Some(Value::Array(items)) if index < items.len() => Some(ops.remove(items, index)),
            _ => None,
        })
    }

    /// Current value at `path`, staged or published.
    pub(crate) fn get(&self, path: &str) -> Option<Value> {
        if let Some(staged) = self.staged.borrow().as_ref() {
            return walk_get(staged, path).cloned();
        }
        walk_get(&self.target.borrow(), path).cloned()
    }

    fn publish(&self) {
        let staged = self.staged.borrow_mut().take();
        if let Some(value) = staged {
            self.ops.set(&mut self.target.borrow_mut(), "", value);
        }
    }

    fn reset(&self, value: Value) {
        self.staged.borrow_mut().take();
        self.ops.set(&mut self.target.borrow_mut(), "", value);
    }
}

/// The resolve/reject pair of one bind call. Settles at most once.
struct Settle {
    resolve: RefCell<Option<Box<dyn FnOnce(Value)>>>,
    reject: RefCell<Option<Box<dyn FnOnce(BindError)>>>,
}

impl Settle {
    fn resolve(&self, value: Value) {
        self.reject.borrow_mut().take();
        let resolve = self.resolve.borrow_mut().take();
        if let Some(resolve) = resolve {
            resolve(value);
        }
    }

    /// Hands the error back if already settled.
    fn reject(&self, error: BindError) -> Result<(), BindError> {
        self.resolve.borrow_mut().take();
        let reject = self.reject.borrow_mut().take();
        match reject {
            Some(reject) => {
                reject(error);
                Ok(())
            }
            None => Err(error),
        }
    }
}

/// State shared by every binding spawned from one bind call.
pub(crate) struct Context {
    pub(crate) surface: Surface,
    settle: Settle,
    live: Cell<bool>,
}

impl Context {
    /// `staged` is the initial off-target value when changes must wait for readiness.
    pub(crate) fn new(
        target: &Target,
        ops: Rc<dyn Operations>,
        resolve: impl FnOnce(Value) + 'static,
        reject: impl FnOnce(BindError) + 'static,
        staged: Option<Value>,
    ) -> Rc<Self> {
        Rc::new(Context {
            surface: Surface {
                target: target.clone(),
                ops,
                staged: RefCell::new(staged),
            },
            settle: Settle {
                resolve: RefCell::new(Some(Box::new(resolve))),
                reject: RefCell::new(Some(Box::new(reject))),
            },
            live: Cell::new(true),
        })
    }

    pub(crate) fn is_live(&self) -> bool {
        self.live.get()
    }

    /// Publishes staged data and resolves with the target's value.
    pub(crate) fn ready(&self) {
        if !self.is_live() {
            return;
        }
        self.surface.publish();
        let value = self.surface.target.get();
        self.settle.resolve(value);
    }

    /// A subscription failed: rejects if still pending, otherwise logs.
    pub(crate) fn fail(&self, path: &str, source: StoreError) {
        if !self.is_live() {
            return;
        }
        let error = BindError::Subscription {
            path: path.to_string(),
            source,
        };
        if let Err(error) = self.settle.reject(error) {
            warn!("ignoring error after binding settled: {error}");
        }
    }
}

/// Where a binding writes, resolved to a dotted path at write time.
#[derive(Clone)]
pub(crate) enum Location {
    Root,
    Field(Rc<Location>, String),
    /// A collection item, found by record id among the current ids.
    Item(Rc<RefCell<Vec<String>>>, String),
}

impl Location {
    pub(crate) fn field(parent: &Location, key: &str) -> Location {
        Location::Field(Rc::new(parent.clone()), key.to_string())
    }

    /// `None` if the location no longer exists.
    pub(crate) fn resolve(&self) -> Option<String> {
        match self {
            Location::Root => Some(String::new()),
            Location::Field(parent, key) => parent.resolve().map(|base| join(&base, key)),
            Location::Item(ids, id) => ids
                .borrow()
                .iter()
                .position(|i| i == id)
                .map(|index| index.to_string()),
        }
    }
}

/// Fires `done` once every holder released, plus one final `release`.
pub(crate) struct Countdown {
    pending: Cell<usize>,
    done: RefCell<Option<Ready>>,
}

impl Countdown {
    pub(crate) fn new(done: Ready) -> Rc<Self> {
        Rc::new(Countdown {
            pending: Cell::new(1),
            done: RefCell::new(Some(done)),
        })
    }

    pub(crate) fn hold(self: &Rc<Self>) -> Ready {
        self.pending.set(self.pending.get() + 1);
        let countdown = Rc::clone(self);
        Box::new(move || countdown.release())
    }

    pub(crate) fn release(&self) {
        let left = self.pending.get().saturating_sub(1);
        self.pending.set(left);
        if left == 0 {
            self.fire();
        }
    }

    /// Fires regardless of outstanding holders.
    pub(crate) fn fire(&self) {
        let done = self.done.borrow_mut().take();
        if let Some(done) = done {
            done();
        }
    }
}

/// A binding that can be torn down with its whole subtree.
pub(crate) trait Detach {
    fn detach(&self);
}

/// Handle to a live binding tree.
///
/// Dropping it detaches every subscription but leaves the target as is; call
/// [`Unbind::unbind`] to also reset the target.
#[must_use = "dropping an Unbind detaches the binding immediately"]
pub struct Unbind {
    root: Option<Rc<dyn Detach>>,
    context: Rc<Context>,
    empty: Value,
    path: String,
}

impl Unbind {
    pub(crate) fn new(root: Rc<dyn Detach>, context: Rc<Context>, empty: Value, path: &str) -> Self {
        Unbind {
            root: Some(root),
            context,
            empty,
            path: path.to_string(),
        }
    }

    /// Detaches every subscription, then resets the target per `reset`.
    pub fn unbind(mut self, reset: ResetOption) {
        self.detach();
        if let Some(value) = reset.resolve(&self.empty) {
            self.context.surface.reset(value);
        }
    }

    pub fn is_bound(&self) -> bool {
        self.root.is_some()
    }

    fn detach(&mut self) {
        if let Some(root) = self.root.take() {
            debug!("unbinding {}", self.path);
            self.context.live.set(false);
            root.detach();
        }
    }
}

impl Drop for Unbind {
    fn drop(&mut self) {
        self.detach();
    }
}

impl fmt::Debug for Unbind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unbind")
            .field("path", &self.path)
            .field("bound", &self.is_bound())
            .finish()
    }
}
