//! Mordant mirrors live store data into caller-owned containers.
//!
//! Core concepts:
//! - **Value**: A dynamic field tree; objects carry hidden properties such as a record id
//! - **Target**: The container a binding writes into, only ever through [`Operations`]
//! - **Source**: A store subscription contract: [`DocumentSource`], [`CollectionSource`] or [`TreeSource`]
//! - **Reference**: A [`DocumentRef`] inside record data, followed to a bounded depth
//! - **Unbind**: The handle owning a binding tree; unbinding detaches every subscription
//!
//! # Example
//!
//! ```
//! use std::rc::Rc;
//! use mordant_core::memory::MemoryFirestore;
//! use mordant_core::{bind_document, DefaultOperations, DocumentOptions, ResetOption, Target, Value};
//!
//! let store = MemoryFirestore::new();
//! store.set("authors/ada", Value::object([("name", Value::from("Ada"))]));
//! store.set("books/notes", Value::object([("author", Value::from(store.doc("authors/ada")))]));
//!
//! let target = Target::default();
//! let unbind = bind_document(
//!     &target,
//!     &store.doc("books/notes"),
//!     Rc::new(DefaultOperations),
//!     |_| {},
//!     |error| panic!("{error}"),
//!     &DocumentOptions::default(),
//! );
//! store.flush();
//!
//! let book = target.get();
//! assert_eq!(book.get("author").and_then(|a| a.get("name")), Some(&Value::from("Ada")));
//!
//! unbind.unbind(ResetOption::Empty);
//! assert_eq!(target.get(), Value::Null);
//! ```

mod binding;
mod document;
mod error;
mod mount;
mod ops;
mod options;
mod path;
mod refs;
mod source;
mod tree;
mod value;

pub mod memory;

pub use binding::Unbind;
pub use document::{bind_collection, bind_document};
pub use error::{BindError, StoreError};
pub use mount::Mount;
pub use ops::{DefaultOperations, Operations, Target};
pub use options::{
    DEFAULT_MAX_REF_DEPTH, DocumentOptions, DocumentSerializer, ResetOption, TreeOptions,
    TreeSerializer,
};
pub use path::{walk_get, walk_set};
pub use refs::{ID, RefTable, create_snapshot, extract_refs};
pub use source::{
    ChangeKind, CollectionListener, CollectionSource, DocumentChange, DocumentListener,
    DocumentRef, DocumentSnapshot, DocumentSource, TreeEvent, TreeEventType, TreeListener,
    TreeSnapshot, TreeSource, Unsubscribe,
};
pub use tree::{KEY, VALUE, bind_tree_array, bind_tree_object, create_record};
pub use value::{GeoPoint, Object, Timestamp, Value};
