//! Per-bind options and the reset policy applied when a binding goes away.

use std::fmt;
use std::rc::Rc;

use serde::Deserialize;

use crate::refs::create_snapshot;
use crate::source::{DocumentSnapshot, TreeSnapshot};
use crate::tree::create_record;
use crate::value::Value;

pub const DEFAULT_MAX_REF_DEPTH: usize = 2;

pub type DocumentSerializer = Rc<dyn Fn(&DocumentSnapshot) -> Value>;
pub type TreeSerializer = Rc<dyn Fn(&TreeSnapshot) -> Value>;

/// What a container holds after its binding is removed.
#[derive(Clone, Default)]
pub enum ResetOption {
    /// Leave the last mirrored value in place.
    Keep,
    /// `[]` for collections and arrays, `Null` for documents and objects.
    #[default]
    Empty,
    /// Store the produced value.
    With(Rc<dyn Fn() -> Value>),
}

impl ResetOption {
    pub fn with(f: impl Fn() -> Value + 'static) -> Self {
        ResetOption::With(Rc::new(f))
    }

    /// Value to store for a container whose empty value is `empty`, or
    /// `None` to keep the current one.
    pub(crate) fn resolve(&self, empty: &Value) -> Option<Value> {
        match self {
            ResetOption::Keep => None,
            ResetOption::Empty => Some(empty.clone()),
            ResetOption::With(f) => Some(f()),
        }
    }
}

impl From<bool> for ResetOption {
    fn from(reset: bool) -> Self {
        if reset {
            ResetOption::Empty
        } else {
            ResetOption::Keep
        }
    }
}

impl fmt::Debug for ResetOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResetOption::Keep => f.write_str("Keep"),
            ResetOption::Empty => f.write_str("Empty"),
            ResetOption::With(_) => f.write_str("With(..)"),
        }
    }
}

/// Options for [`bind_document`](crate::bind_document) and
/// [`bind_collection`](crate::bind_collection).
///
/// Deserializable from configuration; `serialize` and function resets can
/// only be set in code.
#[derive(Clone, Deserialize)]
#[serde(from = "DocumentOptionsConfig")]
pub struct DocumentOptions {
    /// How many levels of references are followed below the bound record.
    pub max_ref_depth: usize,
    /// Applied by [`Mount`](crate::Mount) when a binding is replaced.
    pub reset: ResetOption,
    /// Stage every change off-target until ready, then publish at once.
    pub wait: bool,
    pub serialize: DocumentSerializer,
}

impl Default for DocumentOptions {
    fn default() -> Self {
        DocumentOptions {
            max_ref_depth: DEFAULT_MAX_REF_DEPTH,
            reset: ResetOption::default(),
            wait: false,
            serialize: Rc::new(create_snapshot),
        }
    }
}

impl fmt::Debug for DocumentOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentOptions")
            .field("max_ref_depth", &self.max_ref_depth)
            .field("reset", &self.reset)
            .field("wait", &self.wait)
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize)]
#[serde(default)]
struct DocumentOptionsConfig {
    max_ref_depth: usize,
    reset: bool,
    wait: bool,
}

impl Default for DocumentOptionsConfig {
    fn default() -> Self {
        DocumentOptionsConfig {
            max_ref_depth: DEFAULT_MAX_REF_DEPTH,
            reset: true,
            wait: false,
        }
    }
}

impl From<DocumentOptionsConfig> for DocumentOptions {
    fn from(config: DocumentOptionsConfig) -> Self {
        DocumentOptions {
            max_ref_depth: config.max_ref_depth,
            reset: config.reset.into(),
            wait: config.wait,
            ..DocumentOptions::default()
        }
    }
}

/// Options for [`bind_tree_object`](crate::bind_tree_object) and
/// [`bind_tree_array`](crate::bind_tree_array).
#[derive(Clone, Deserialize)]
#[serde(from = "TreeOptionsConfig")]
pub struct TreeOptions {
    pub reset: ResetOption,
    pub wait: bool,
    pub serialize: TreeSerializer,
}

impl Default for TreeOptions {
    fn default() -> Self {
        TreeOptions {
            reset: ResetOption::default(),
            wait: false,
            serialize: Rc::new(create_record),
        }
    }
}

impl fmt::Debug for TreeOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TreeOptions")
            .field("reset", &self.reset)
            .field("wait", &self.wait)
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize)]
#[serde(default)]
struct TreeOptionsConfig {
    reset: bool,
    wait: bool,
}

impl Default for TreeOptionsConfig {
    fn default() -> Self {
        TreeOptionsConfig {
            reset: true,
            wait: false,
        }
    }
}

impl From<TreeOptionsConfig> for TreeOptions {
    fn from(config: TreeOptionsConfig) -> Self {
        TreeOptions {
            reset: config.reset.into(),
            wait: config.wait,
            ..TreeOptions::default()
        }
    }
}
