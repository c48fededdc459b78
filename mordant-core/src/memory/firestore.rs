use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::{Rc, Weak};

use log::{trace, warn};

use super::{ListenStats, Queue, Slot, Stats, split_parent};
use crate::error::StoreError;
use crate::source::{
    CollectionListener, CollectionSource, DocumentChange, DocumentListener, DocumentRef,
    DocumentSnapshot, DocumentSource, Unsubscribe,
};
use crate::value::{Object, Value};

type DocumentSlot = Slot<Result<DocumentSnapshot, StoreError>>;

/// A collection listener along with the documents it was last shown.
struct CollectionSlot {
    slot: Slot<Result<Vec<DocumentChange>, StoreError>>,
    view: RefCell<Option<Vec<DocumentSnapshot>>>,
}

impl CollectionSlot {
    fn deliver(&self, current: Vec<DocumentSnapshot>) {
        if !self.slot.is_open() {
            return;
        }
        let previous = self.view.borrow_mut().replace(current.clone());
        let changes = diff(previous.as_deref().unwrap_or_default(), &current);
        if previous.is_none() || !changes.is_empty() {
            self.slot.deliver(Ok(changes));
        }
    }
}

#[derive(Default)]
struct Inner {
    documents: RefCell<BTreeMap<String, Object>>,
    document_listeners: RefCell<Vec<(String, Rc<DocumentSlot>)>>,
    collection_listeners: RefCell<Vec<(String, Rc<CollectionSlot>)>>,
    stats: Stats,
    queue: Queue,
    next_id: Cell<u64>,
}

impl Inner {
    fn snapshot(&self, path: &str) -> DocumentSnapshot {
        let data = self.documents.borrow().get(path).cloned().map(Value::Object);
        DocumentSnapshot::new(path, data)
    }

    /// Documents directly under `collection`, ordered by id.
    fn collection_docs(&self, collection: &str) -> Vec<DocumentSnapshot> {
        self.documents
            .borrow()
            .iter()
            .filter(|(path, _)| split_parent(path).0 == collection)
            .map(|(path, data)| DocumentSnapshot::new(path.as_str(), Some(Value::Object(data.clone()))))
            .collect()
    }

    fn listen_document(self: &Rc<Self>, path: &str, listener: DocumentListener) -> Unsubscribe {
        trace!("listening to document {path}");
        let slot = Rc::new(Slot::new(listener));
        self.document_listeners
            .borrow_mut()
            .push((path.to_string(), Rc::clone(&slot)));
        self.stats.listened(path);

        let snapshot = self.snapshot(path);
        let delivery = Rc::clone(&slot);
        self.queue.push(move || delivery.deliver(Ok(snapshot)));

        let store = Rc::downgrade(self);
        let path = path.to_string();
        Unsubscribe::new(move || {
            slot.detach();
            if let Some(store) = store.upgrade() {
                store
                    .document_listeners
                    .borrow_mut()
                    .retain(|(_, s)| !Rc::ptr_eq(s, &slot));
                store.stats.unsubscribed(&path);
            }
        })
    }

    fn listen_collection(self: &Rc<Self>, path: &str, listener: CollectionListener) -> Unsubscribe {
        trace!("listening to collection {path}");
        let slot = Rc::new(CollectionSlot {
            slot: Slot::new(listener),
            view: RefCell::new(None),
        });
        self.collection_listeners
            .borrow_mut()
            .push((path.to_string(), Rc::clone(&slot)));
        self.stats.listened(path);

        let current = self.collection_docs(path);
        let delivery = Rc::clone(&slot);
        self.queue.push(move || delivery.deliver(current));

        let store = Rc::downgrade(self);
        let path = path.to_string();
        Unsubscribe::new(move || {
            slot.slot.detach();
            if let Some(store) = store.upgrade() {
                store
                    .collection_listeners
                    .borrow_mut()
                    .retain(|(_, s)| !Rc::ptr_eq(s, &slot));
                store.stats.unsubscribed(&path);
            }
        })
    }

    /// Queues deliveries for everything watching the document at `path`.
    fn notify(&self, path: &str) {
        let snapshot = self.snapshot(path);
        let documents: Vec<Rc<DocumentSlot>> = self
            .document_listeners
            .borrow()
            .iter()
            .filter(|(p, _)| p == path)
            .map(|(_, slot)| Rc::clone(slot))
            .collect();
        for slot in documents {
            let snapshot = snapshot.clone();
            self.queue.push(move || slot.deliver(Ok(snapshot)));
        }

        let collection = split_parent(path).0;
        let collections: Vec<Rc<CollectionSlot>> = self
            .collection_listeners
            .borrow()
            .iter()
            .filter(|(p, _)| p == collection)
            .map(|(_, slot)| Rc::clone(slot))
            .collect();
        if collections.is_empty() {
            return;
        }
        let current = self.collection_docs(collection);
        for slot in collections {
            let current = current.clone();
            self.queue.push(move || slot.deliver(current));
        }
    }
}

/// In-memory document store.
///
/// Records are objects keyed by slash-separated paths whose parent is their
/// collection. Collections list their records ordered by id.
#[derive(Clone, Default)]
pub struct MemoryFirestore {
    inner: Rc<Inner>,
}

impl MemoryFirestore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn doc(&self, path: &str) -> DocumentRef {
        DocumentRef::new(MemoryDocument {
            store: Rc::downgrade(&self.inner),
            path: path.to_string(),
        })
    }

    pub fn collection(&self, path: &str) -> MemoryCollection {
        MemoryCollection {
            store: Rc::downgrade(&self.inner),
            path: path.to_string(),
        }
    }

    pub fn get(&self, path: &str) -> Option<Value> {
        self.inner.documents.borrow().get(path).cloned().map(Value::Object)
    }

    /// Creates or overwrites a record. `data` must be an object.
    pub fn set(&self, path: &str, data: Value) {
        let Value::Object(data) = data else {
            warn!("ignoring non-object data for {path}");
            return;
        };
        self.inner.documents.borrow_mut().insert(path.to_string(), data);
        self.inner.notify(path);
    }

    /// Merges the fields of `fields` into an existing record.
    pub fn update(&self, path: &str, fields: Value) {
        let Value::Object(fields) = fields else {
            warn!("ignoring non-object update for {path}");
            return;
        };
        {
            let mut documents = self.inner.documents.borrow_mut();
            let Some(document) = documents.get_mut(path) else {
                warn!("ignoring update of missing record {path}");
                return;
            };
            for (key, value) in fields.iter() {
                document.insert(key, value.clone());
            }
        }
        self.inner.notify(path);
    }

    /// Adds a record with a generated id to `collection`.
    pub fn add(&self, collection: &str, data: Value) -> DocumentRef {
        let id = self.inner.next_id.get() + 1;
        self.inner.next_id.set(id);
        let path = format!("{collection}/auto{id:06}");
        self.set(&path, data);
        self.doc(&path)
    }

    pub fn delete(&self, path: &str) {
        if self.inner.documents.borrow_mut().remove(path).is_some() {
            self.inner.notify(path);
        }
    }

    /// Fails every listener of the document or collection at `path`: they
    /// get `error` instead of any snapshot still queued, and nothing after.
    pub fn fail(&self, path: &str, error: StoreError) {
        let documents: Vec<Rc<DocumentSlot>> = self
            .inner
            .document_listeners
            .borrow()
            .iter()
            .filter(|(p, _)| p == path)
            .map(|(_, slot)| Rc::clone(slot))
            .collect();
        for slot in documents {
            if slot.fail() {
                let error = error.clone();
                self.inner.queue.push(move || slot.deliver_error(Err(error)));
            }
        }

        let collections: Vec<Rc<CollectionSlot>> = self
            .inner
            .collection_listeners
            .borrow()
            .iter()
            .filter(|(p, _)| p == path)
            .map(|(_, slot)| Rc::clone(slot))
            .collect();
        for slot in collections {
            if slot.slot.fail() {
                let error = error.clone();
                self.inner.queue.push(move || slot.slot.deliver_error(Err(error)));
            }
        }
    }

    /// Runs the oldest queued delivery. Returns false if none was queued.
    pub fn step(&self) -> bool {
        self.inner.queue.step()
    }

    /// Runs every queued delivery. Returns how many ran.
    pub fn flush(&self) -> usize {
        self.inner.queue.flush()
    }

    pub fn stats(&self, path: &str) -> ListenStats {
        self.inner.stats.get(path)
    }
}

/// A record handle of a [`MemoryFirestore`].
pub struct MemoryDocument {
    store: Weak<Inner>,
    path: String,
}

impl DocumentSource for MemoryDocument {
    fn path(&self) -> &str {
        &self.path
    }

    fn listen(&self, listener: DocumentListener) -> Unsubscribe {
        match self.store.upgrade() {
            Some(store) => store.listen_document(&self.path, listener),
            None => Unsubscribe::noop(),
        }
    }
}

/// A collection handle of a [`MemoryFirestore`].
#[derive(Clone)]
pub struct MemoryCollection {
    store: Weak<Inner>,
    path: String,
}

impl MemoryCollection {
    pub fn doc(&self, id: &str) -> DocumentRef {
        DocumentRef::new(MemoryDocument {
            store: Weak::clone(&self.store),
            path: format!("{}/{id}", self.path),
        })
    }
}

impl CollectionSource for MemoryCollection {
    fn path(&self) -> &str {
        &self.path
    }

    fn listen(&self, listener: CollectionListener) -> Unsubscribe {
        match self.store.upgrade() {
            Some(store) => store.listen_collection(&self.path, listener),
            None => Unsubscribe::noop(),
        }
    }
}

/// Changes turning `previous` into `current`, with indices valid when
/// applied in order: removals first, then additions and modifications.
fn diff(previous: &[DocumentSnapshot], current: &[DocumentSnapshot]) -> Vec<DocumentChange> {
    let mut changes = Vec::new();
    let mut working: Vec<&DocumentSnapshot> = previous.iter().collect();

    let mut index = 0;
    while index < working.len() {
        let path = working[index].path();
        if current.iter().any(|doc| doc.path() == path) {
            index += 1;
        } else {
            changes.push(DocumentChange::removed(index, working.remove(index).clone()));
        }
    }

    for (new_index, doc) in current.iter().enumerate() {
        match working.iter().position(|old| old.path() == doc.path()) {
            None => {
                changes.push(DocumentChange::added(new_index, doc.clone()));
                working.insert(new_index, doc);
            }
            Some(old_index) => {
                if old_index != new_index || working[old_index].data() != doc.data() {
                    changes.push(DocumentChange::modified(old_index, new_index, doc.clone()));
                    working.remove(old_index);
                    working.insert(new_index, doc);
                }
            }
        }
    }
    changes
}
