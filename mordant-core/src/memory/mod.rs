//! In-memory stores implementing the source contracts.
//!
//! Useful for testing and as a reference implementation. Mutations never
//! call listeners directly: deliveries are queued and run by `flush`, the
//! way a real client delivers on a later turn of its event loop.

mod database;
mod firestore;

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

pub use database::{MemoryDatabase, MemoryNode};
pub use firestore::{MemoryCollection, MemoryDocument, MemoryFirestore};

/// Listener registrations made for one path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListenStats {
    pub listens: usize,
    pub unsubscribes: usize,
}

impl ListenStats {
    /// Listeners registered and not yet detached.
    pub fn active(&self) -> usize {
        self.listens.saturating_sub(self.unsubscribes)
    }
}

#[derive(Default)]
struct Queue {
    jobs: RefCell<VecDeque<Box<dyn FnOnce()>>>,
}

impl Queue {
    fn push(&self, job: impl FnOnce() + 'static) {
        self.jobs.borrow_mut().push_back(Box::new(job));
    }

    /// Runs the oldest queued delivery. Returns false if there was none.
    fn step(&self) -> bool {
        let job = self.jobs.borrow_mut().pop_front();
        match job {
            Some(job) => {
                job();
                true
            }
            None => false,
        }
    }

    /// Runs queued deliveries, including ones queued while flushing.
    fn flush(&self) -> usize {
        let mut delivered = 0;
        while self.step() {
            delivered += 1;
        }
        delivered
    }
}

/// A registered listener, shared by the store and its queued deliveries.
struct Slot<E> {
    attached: Cell<bool>,
    failed: Cell<bool>,
    listener: RefCell<Box<dyn FnMut(E)>>,
}

impl<E> Slot<E> {
    fn new(listener: Box<dyn FnMut(E)>) -> Self {
        Slot {
            attached: Cell::new(true),
            failed: Cell::new(false),
            listener: RefCell::new(listener),
        }
    }

    /// Attached and not failed.
    fn is_open(&self) -> bool {
        self.attached.get() && !self.failed.get()
    }

    fn deliver(&self, event: E) {
        if self.is_open() {
            (*self.listener.borrow_mut())(event);
        }
    }

    fn detach(&self) {
        self.attached.set(false);
    }

    /// Cuts off regular deliveries, including queued ones. Returns false if
    /// the slot had already failed.
    fn fail(&self) -> bool {
        !self.failed.replace(true)
    }

    fn deliver_error(&self, event: E) {
        if self.attached.get() {
            (*self.listener.borrow_mut())(event);
        }
    }
}

#[derive(Default)]
struct Stats {
    by_path: RefCell<HashMap<String, ListenStats>>,
}

impl Stats {
    fn listened(&self, path: &str) {
        self.by_path.borrow_mut().entry(path.to_string()).or_default().listens += 1;
    }

    fn unsubscribed(&self, path: &str) {
        self.by_path.borrow_mut().entry(path.to_string()).or_default().unsubscribes += 1;
    }

    fn get(&self, path: &str) -> ListenStats {
        self.by_path.borrow().get(path).copied().unwrap_or_default()
    }
}

/// Splits `path` into its parent and last segment.
fn split_parent(path: &str) -> (&str, &str) {
    path.rsplit_once('/').unwrap_or(("", path))
}
