//! A container slot that holds one binding at a time.

use std::fmt;
use std::rc::Rc;

use log::debug;

use crate::binding::Unbind;
use crate::document::{bind_collection, bind_document};
use crate::error::BindError;
use crate::ops::{Operations, Target};
use crate::options::{DocumentOptions, ResetOption, TreeOptions};
use crate::source::{CollectionSource, DocumentRef, TreeSource};
use crate::tree::{bind_tree_array, bind_tree_object};
use crate::value::Value;

/// A container that holds at most one binding at a time.
///
/// Binding again replaces the previous binding. The previous one is unbound
/// with the new options' `reset`, except that with `wait` and a non-function
/// reset the old value is kept until the new binding publishes.
pub struct Mount {
    target: Target,
    ops: Rc<dyn Operations>,
    current: Option<Unbind>,
}

impl Mount {
    pub fn new(target: Target, ops: Rc<dyn Operations>) -> Self {
        Mount {
            target,
            ops,
            current: None,
        }
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn is_bound(&self) -> bool {
        self.current.is_some()
    }

    pub fn bind_document(
        &mut self,
        document: &DocumentRef,
        resolve: impl FnOnce(Value) + 'static,
        reject: impl FnOnce(BindError) + 'static,
        options: &DocumentOptions,
    ) {
        self.release(&options.reset, options.wait);
        let unbind = bind_document(&self.target, document, Rc::clone(&self.ops), resolve, reject, options);
        self.current = Some(unbind);
    }

    pub fn bind_collection(
        &mut self,
        collection: &dyn CollectionSource,
        resolve: impl FnOnce(Value) + 'static,
        reject: impl FnOnce(BindError) + 'static,
        options: &DocumentOptions,
    ) {
        self.release(&options.reset, options.wait);
        let unbind = bind_collection(&self.target, collection, Rc::clone(&self.ops), resolve, reject, options);
        self.current = Some(unbind);
    }

    pub fn bind_tree_object(
        &mut self,
        node: &dyn TreeSource,
        resolve: impl FnOnce(Value) + 'static,
        reject: impl FnOnce(BindError) + 'static,
        options: &TreeOptions,
    ) {
        self.release(&options.reset, options.wait);
        let unbind = bind_tree_object(&self.target, node, Rc::clone(&self.ops), resolve, reject, options);
        self.current = Some(unbind);
    }

    pub fn bind_tree_array(
        &mut self,
        node: &dyn TreeSource,
        resolve: impl FnOnce(Value) + 'static,
        reject: impl FnOnce(BindError) + 'static,
        options: &TreeOptions,
    ) {
        self.release(&options.reset, options.wait);
        let unbind = bind_tree_array(&self.target, node, Rc::clone(&self.ops), resolve, reject, options);
        self.current = Some(unbind);
    }

    /// Unbinds the current binding, if any.
    pub fn unbind(&mut self, reset: ResetOption) {
        if let Some(current) = self.current.take() {
            current.unbind(reset);
        }
    }

    fn release(&mut self, reset: &ResetOption, wait: bool) {
        let Some(previous) = self.current.take() else {
            return;
        };
        let reset = match reset {
            ResetOption::With(_) => reset.clone(),
            _ if wait => ResetOption::Keep,
            _ => reset.clone(),
        };
        debug!("replacing binding of mounted target (reset: {reset:?})");
        previous.unbind(reset);
    }
}

impl fmt::Debug for Mount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mount")
            .field("target", &self.target)
            .field("current", &self.current)
            .finish_non_exhaustive()
    }
}
