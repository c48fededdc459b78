//! Contracts the engine consumes from store clients.
//!
//! Stores push snapshots to listeners and hand back an [`Unsubscribe`] that
//! detaches the listener. The engine calls every `Unsubscribe` it receives
//! exactly once.

use std::fmt;
use std::rc::Rc;

use crate::error::StoreError;
use crate::value::Value;

pub type DocumentListener = Box<dyn FnMut(Result<DocumentSnapshot, StoreError>)>;
pub type CollectionListener = Box<dyn FnMut(Result<Vec<DocumentChange>, StoreError>)>;
pub type TreeListener = Box<dyn FnMut(Result<TreeEvent, StoreError>)>;

/// Detaches a store listener when called.
#[must_use = "a listener stays attached until its Unsubscribe is called"]
pub struct Unsubscribe(Box<dyn FnOnce()>);

impl Unsubscribe {
    pub fn new(f: impl FnOnce() + 'static) -> Self {
        Unsubscribe(Box::new(f))
    }

    /// An `Unsubscribe` with nothing to detach.
    pub fn noop() -> Self {
        Unsubscribe(Box::new(|| {}))
    }

    pub fn call(self) {
        (self.0)()
    }
}

impl fmt::Debug for Unsubscribe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Unsubscribe")
    }
}

/// A single record of the document store.
pub trait DocumentSource {
    /// Store path of the record, e.g. `users/alice`.
    fn path(&self) -> &str;

    fn listen(&self, listener: DocumentListener) -> Unsubscribe;
}

/// A collection (or query) of the document store.
pub trait CollectionSource {
    fn path(&self) -> &str;

    fn listen(&self, listener: CollectionListener) -> Unsubscribe;
}

/// A node of the tree store.
pub trait TreeSource {
    fn path(&self) -> &str;

    fn listen(&self, event: TreeEventType, listener: TreeListener) -> Unsubscribe;
}

/// A typed handle to another record.
///
/// References are data: holding one does not subscribe to anything. Two
/// references are equal when they point at the same store path.
#[derive(Clone)]
pub struct DocumentRef(Rc<dyn DocumentSource>);

impl DocumentRef {
    pub fn new(source: impl DocumentSource + 'static) -> Self {
        DocumentRef(Rc::new(source))
    }

    pub fn path(&self) -> &str {
        self.0.path()
    }

    /// Last segment of the path.
    pub fn id(&self) -> &str {
        last_segment(self.path())
    }

    pub fn listen(&self, listener: DocumentListener) -> Unsubscribe {
        self.0.listen(listener)
    }
}

impl PartialEq for DocumentRef {
    fn eq(&self, other: &Self) -> bool {
        self.path() == other.path()
    }
}

impl fmt::Debug for DocumentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DocumentRef({})", self.path())
    }
}

/// Point-in-time state of one record.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentSnapshot {
    id: String,
    path: String,
    data: Option<Value>,
}

impl DocumentSnapshot {
    /// `data` is `None` when the record does not exist.
    pub fn new(path: impl Into<String>, data: Option<Value>) -> Self {
        let path = path.into();
        DocumentSnapshot {
            id: last_segment(&path).to_string(),
            path,
            data,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.data.is_some()
    }

    pub fn data(&self) -> Option<&Value> {
        self.data.as_ref()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

/// One entry of a collection change batch.
///
/// `old_index` is `None` for additions and `new_index` is `None` for removals.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentChange {
    pub kind: ChangeKind,
    pub old_index: Option<usize>,
    pub new_index: Option<usize>,
    pub doc: DocumentSnapshot,
}

impl DocumentChange {
    pub fn added(index: usize, doc: DocumentSnapshot) -> Self {
        DocumentChange {
            kind: ChangeKind::Added,
            old_index: None,
            new_index: Some(index),
            doc,
        }
    }

    pub fn modified(old_index: usize, new_index: usize, doc: DocumentSnapshot) -> Self {
        DocumentChange {
            kind: ChangeKind::Modified,
            old_index: Some(old_index),
            new_index: Some(new_index),
            doc,
        }
    }

    pub fn removed(index: usize, doc: DocumentSnapshot) -> Self {
        DocumentChange {
            kind: ChangeKind::Removed,
            old_index: Some(index),
            new_index: None,
            doc,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TreeEventType {
    Value,
    ChildAdded,
    ChildRemoved,
    ChildChanged,
    ChildMoved,
}

/// Point-in-time state of one tree node.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeSnapshot {
    key: String,
    value: Option<Value>,
}

impl TreeSnapshot {
    pub fn new(key: impl Into<String>, value: Option<Value>) -> Self {
        TreeSnapshot {
            key: key.into(),
            value,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// The node's value, `None` when the node does not exist.
    pub fn val(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    pub fn exists(&self) -> bool {
        self.value.is_some()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TreeEvent {
    pub snapshot: TreeSnapshot,
    /// Key of the sibling this node now follows, for child added and moved events.
    pub previous_key: Option<String>,
}

impl TreeEvent {
    pub fn new(snapshot: TreeSnapshot, previous_key: Option<String>) -> Self {
        TreeEvent {
            snapshot,
            previous_key,
        }
    }
}

pub(crate) fn last_segment(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}
