//! Binding records and collections of the document store, following the
//! references they hold.
//!
//! Each bound record is a `DocumentNode`. A node subscribes to its record,
//! writes the normalized data at its location and owns one child node per
//! reference found in that data, until the remaining depth reaches zero.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use indexmap::IndexMap;
use log::{debug, trace};

use crate::binding::{Context, Countdown, Detach, Location, Ready, Unbind};
use crate::error::{BindError, StoreError};
use crate::ops::{Operations, Target};
use crate::options::{DocumentOptions, DocumentSerializer};
use crate::refs::{RefTable, extract_refs};
use crate::source::{
    ChangeKind, CollectionSource, DocumentChange, DocumentRef, DocumentSnapshot, Unsubscribe,
};
use crate::value::Value;

struct RefChild {
    reference: DocumentRef,
    node: Rc<DocumentNode>,
}

struct DocumentNode {
    context: Rc<Context>,
    serialize: DocumentSerializer,
    location: Location,
    path: String,
    /// Levels of references still followed below this node.
    depth: usize,
    /// Reference bindings keyed by the field path relative to this node.
    children: RefCell<IndexMap<String, RefChild>>,
    ready: RefCell<Option<Rc<Countdown>>>,
    seen: Cell<bool>,
    unsubscribe: RefCell<Option<Unsubscribe>>,
    detached: Cell<bool>,
}

impl DocumentNode {
    fn new(
        context: Rc<Context>,
        serialize: DocumentSerializer,
        location: Location,
        path: &str,
        depth: usize,
        on_ready: Option<Ready>,
    ) -> Rc<Self> {
        Rc::new(DocumentNode {
            context,
            serialize,
            location,
            path: path.to_string(),
            depth,
            children: RefCell::new(IndexMap::new()),
            ready: RefCell::new(on_ready.map(Countdown::new)),
            seen: Cell::new(false),
            unsubscribe: RefCell::new(None),
            detached: Cell::new(false),
        })
    }

    fn listen(self: &Rc<Self>, document: &DocumentRef) {
        let node = Rc::downgrade(self);
        let unsubscribe = document.listen(Box::new(move |event| {
            if let Some(node) = node.upgrade() {
                node.on_event(event);
            }
        }));
        if self.detached.get() {
            unsubscribe.call();
        } else {
            *self.unsubscribe.borrow_mut() = Some(unsubscribe);
        }
    }

    fn on_event(self: &Rc<Self>, event: Result<DocumentSnapshot, StoreError>) {
        if self.detached.get() {
            return;
        }
        match event {
            Ok(snapshot) => self.on_snapshot(&snapshot),
            Err(error) => self.context.fail(&self.path, error),
        }
    }

    fn on_snapshot(self: &Rc<Self>, snapshot: &DocumentSnapshot) {
        trace!("snapshot of {} (exists: {})", snapshot.path(), snapshot.exists());
        let Some(base) = self.location.resolve() else {
            trace!("location of {} is gone, skipping snapshot", self.path);
            return;
        };
        if !snapshot.exists() {
            self.context.surface.set(&base, Value::Null);
            self.reconcile(RefTable::new());
            return;
        }
        let raw = (self.serialize)(snapshot);
        self.apply_at(&base, &raw);
    }

    /// Writes `raw` at `base`, keeping values already resolved there, and
    /// reconciles the references it holds.
    fn apply_at(self: &Rc<Self>, base: &str, raw: &Value) {
        let previous = self.context.surface.get(base);
        let (data, refs) = extract_refs(raw, previous.as_ref(), &self.bound_refs());
        self.context.surface.set(base, data);
        self.reconcile(refs);
    }

    /// References currently bound by child nodes, keyed like a `RefTable`.
    fn bound_refs(&self) -> RefTable {
        self.children
            .borrow()
            .iter()
            .map(|(key, child)| (key.clone(), child.reference.clone()))
            .collect()
    }

    /// Brings the child bindings in line with `refs`.
    ///
    /// Children whose reference is unchanged are kept. Replaced or vanished
    /// ones are detached before any new child subscribes.
    fn reconcile(self: &Rc<Self>, refs: RefTable) {
        let countdown = if self.seen.replace(true) {
            None
        } else {
            self.ready.borrow().clone()
        };

        let stale: Vec<(String, RefChild)> = {
            let mut children = self.children.borrow_mut();
            let keys: Vec<String> = children
                .iter()
                .filter(|(key, child)| refs.get(key.as_str()) != Some(&child.reference))
                .map(|(key, _)| key.clone())
                .collect();
            keys.into_iter()
                .filter_map(|key| children.shift_remove(&key).map(|child| (key, child)))
                .collect()
        };
        let mut abandoned = Vec::new();
        for (key, child) in stale {
            debug!("releasing {} bound at {}.{key}", child.reference.path(), self.path);
            abandoned.extend(child.node.retire());
        }

        if self.depth == 0 {
            if !refs.is_empty() {
                debug!(
                    "reference depth exhausted at {}, leaving {} reference(s) unresolved",
                    self.path,
                    refs.len()
                );
            }
        } else {
            for (key, reference) in refs {
                if self.detached.get() {
                    break;
                }
                if self.children.borrow().contains_key(&key) {
                    continue;
                }
                let node = DocumentNode::new(
                    Rc::clone(&self.context),
                    Rc::clone(&self.serialize),
                    Location::field(&self.location, &key),
                    reference.path(),
                    self.depth - 1,
                    countdown.as_ref().map(Countdown::hold),
                );
                self.children.borrow_mut().insert(
                    key,
                    RefChild {
                        reference: reference.clone(),
                        node: Rc::clone(&node),
                    },
                );
                node.listen(&reference);
            }
        }

        for pending in abandoned {
            pending.fire();
        }
        if let Some(countdown) = countdown {
            countdown.release();
        }
    }

    /// Detaches the node and hands back its readiness if still pending, so
    /// the caller can stop waiting for it.
    fn retire(&self) -> Option<Rc<Countdown>> {
        let pending = self.ready.borrow_mut().take();
        self.detach();
        pending
    }
}

impl Detach for DocumentNode {
    fn detach(&self) {
        if self.detached.replace(true) {
            return;
        }
        let children = std::mem::take(&mut *self.children.borrow_mut());
        for (_, child) in children {
            child.node.detach();
        }
        let unsubscribe = self.unsubscribe.borrow_mut().take();
        if let Some(unsubscribe) = unsubscribe {
            unsubscribe.call();
        }
    }
}

/// Binds `document` (and the records it references) into `target`.
///
/// `resolve` receives the target's value once the first snapshot and every
/// reference found in it, down to `options.max_ref_depth`, have produced a
/// value. `reject` receives the first subscription error if that happens
/// earlier.
pub fn bind_document(
    target: &Target,
    document: &DocumentRef,
    ops: Rc<dyn Operations>,
    resolve: impl FnOnce(Value) + 'static,
    reject: impl FnOnce(BindError) + 'static,
    options: &DocumentOptions,
) -> Unbind {
    debug!(
        "binding document {} (max_ref_depth: {}, wait: {})",
        document.path(),
        options.max_ref_depth,
        options.wait
    );
    let context = Context::new(target, ops, resolve, reject, options.wait.then_some(Value::Null));
    let on_ready: Ready = {
        let context = Rc::clone(&context);
        Box::new(move || context.ready())
    };
    let root = DocumentNode::new(
        Rc::clone(&context),
        Rc::clone(&options.serialize),
        Location::Root,
        document.path(),
        options.max_ref_depth,
        Some(on_ready),
    );
    root.listen(document);
    Unbind::new(root, context, Value::Null, document.path())
}

struct CollectionBinding {
    context: Rc<Context>,
    serialize: DocumentSerializer,
    path: String,
    depth: usize,
    /// Record ids in container order.
    ids: Rc<RefCell<Vec<String>>>,
    items: RefCell<HashMap<String, Rc<DocumentNode>>>,
    ready: RefCell<Option<Rc<Countdown>>>,
    unsubscribe: RefCell<Option<Unsubscribe>>,
    detached: Cell<bool>,
}

impl CollectionBinding {
    fn listen(self: &Rc<Self>, collection: &dyn CollectionSource) {
        let binding = Rc::downgrade(self);
        let unsubscribe = collection.listen(Box::new(move |event| {
            if let Some(binding) = binding.upgrade() {
                binding.on_event(event);
            }
        }));
        if self.detached.get() {
            unsubscribe.call();
        } else {
            *self.unsubscribe.borrow_mut() = Some(unsubscribe);
        }
    }

    fn on_event(self: &Rc<Self>, event: Result<Vec<DocumentChange>, StoreError>) {
        if self.detached.get() {
            return;
        }
        match event {
            Ok(changes) => self.on_changes(changes),
            Err(error) => self.context.fail(&self.path, error),
        }
    }

    fn on_changes(self: &Rc<Self>, changes: Vec<DocumentChange>) {
        trace!("{} change(s) in {}", changes.len(), self.path);
        let countdown = self.ready.borrow_mut().take();
        for change in changes {
            if self.detached.get() {
                break;
            }
            match (change.kind, change.old_index, change.new_index) {
                (ChangeKind::Added, _, Some(index)) => {
                    self.added(index, &change.doc, countdown.as_ref())
                }
                (ChangeKind::Removed, Some(index), _) => self.removed(index),
                (ChangeKind::Modified, Some(old_index), Some(new_index)) => {
                    self.modified(old_index, new_index, &change.doc)
                }
                (kind, old_index, new_index) => trace!(
                    "ignoring {kind:?} change of {} without indices ({old_index:?}, {new_index:?})",
                    change.doc.path()
                ),
            }
        }
        if let Some(countdown) = countdown {
            countdown.release();
        }
    }

    fn added(&self, index: usize, doc: &DocumentSnapshot, countdown: Option<&Rc<Countdown>>) {
        let raw = (self.serialize)(doc);
        let (data, refs) = extract_refs(&raw, None, &RefTable::new());
        let id = doc.id().to_string();
        let index = {
            let mut ids = self.ids.borrow_mut();
            let index = index.min(ids.len());
            ids.insert(index, id.clone());
            index
        };
        self.context.surface.add("", index, data);

        let node = DocumentNode::new(
            Rc::clone(&self.context),
            Rc::clone(&self.serialize),
            Location::Item(Rc::clone(&self.ids), id.clone()),
            doc.path(),
            self.depth,
            countdown.map(Countdown::hold),
        );
        let replaced = self.items.borrow_mut().insert(id, Rc::clone(&node));
        if let Some(replaced) = replaced {
            replaced.detach();
        }
        node.reconcile(refs);
    }

    fn removed(&self, index: usize) {
        let id = {
            let mut ids = self.ids.borrow_mut();
            if index >= ids.len() {
                return;
            }
            ids.remove(index)
        };
        let node = self.items.borrow_mut().remove(&id);
        let pending = node.and_then(|node| node.retire());
        self.context.surface.remove("", index);
        if let Some(pending) = pending {
            pending.fire();
        }
    }

    fn modified(&self, old_index: usize, new_index: usize, doc: &DocumentSnapshot) {
        let Some(id) = self.ids.borrow().get(old_index).cloned() else {
            return;
        };
        let Some(node) = self.items.borrow().get(&id).cloned() else {
            return;
        };
        let raw = (self.serialize)(doc);
        if old_index == new_index {
            node.apply_at(&old_index.to_string(), &raw);
            return;
        }

        let previous = self.context.surface.remove("", old_index);
        let new_index = {
            let mut ids = self.ids.borrow_mut();
            ids.remove(old_index);
            let new_index = new_index.min(ids.len());
            ids.insert(new_index, id);
            new_index
        };
        let (data, refs) = extract_refs(&raw, previous.as_ref(), &node.bound_refs());
        self.context.surface.add("", new_index, data);
        node.reconcile(refs);
    }
}

impl Detach for CollectionBinding {
    fn detach(&self) {
        if self.detached.replace(true) {
            return;
        }
        let items = std::mem::take(&mut *self.items.borrow_mut());
        for node in items.into_values() {
            node.detach();
        }
        let unsubscribe = self.unsubscribe.borrow_mut().take();
        if let Some(unsubscribe) = unsubscribe {
            unsubscribe.call();
        }
    }
}

/// Binds `collection` into `target` as an array of records.
///
/// The target becomes `[]` right away unless `options.wait` is set. Readiness
/// resolves after the first change batch and the references found in it.
pub fn bind_collection(
    target: &Target,
    collection: &dyn CollectionSource,
    ops: Rc<dyn Operations>,
    resolve: impl FnOnce(Value) + 'static,
    reject: impl FnOnce(BindError) + 'static,
    options: &DocumentOptions,
) -> Unbind {
    debug!(
        "binding collection {} (max_ref_depth: {}, wait: {})",
        collection.path(),
        options.max_ref_depth,
        options.wait
    );
    let empty = Value::Array(Vec::new());
    let context = Context::new(target, ops, resolve, reject, options.wait.then(|| empty.clone()));
    if !options.wait {
        context.surface.set("", empty.clone());
    }
    let on_ready: Ready = {
        let context = Rc::clone(&context);
        Box::new(move || context.ready())
    };
    let binding = Rc::new(CollectionBinding {
        context: Rc::clone(&context),
        serialize: Rc::clone(&options.serialize),
        path: collection.path().to_string(),
        depth: options.max_ref_depth,
        ids: Rc::new(RefCell::new(Vec::new())),
        items: RefCell::new(HashMap::new()),
        ready: RefCell::new(Some(Countdown::new(on_ready))),
        unsubscribe: RefCell::new(None),
        detached: Cell::new(false),
    });
    binding.listen(collection);
    Unbind::new(binding, context, empty, collection.path())
}
