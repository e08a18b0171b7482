//! 绑定注册表
//!
//! Sole owner of the callbacks exposed to script. The native engine only
//! holds non-owning references to them, so an entry must stay here for as
//! long as the engine can invoke it.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::error::{WebviewError, WebviewResult};
use crate::platform::NativeBinding;

#[derive(Default)]
pub struct BindingRegistry {
    entries: RwLock<HashMap<String, Arc<NativeBinding>>>,
}

impl BindingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `binding` under `name`.
    pub fn insert(&self, name: impl Into<String>, binding: Arc<NativeBinding>) -> WebviewResult<()> {
        let name = name.into();
        let mut entries = self.entries.write();
        if entries.contains_key(&name) {
            return Err(WebviewError::DuplicateBinding(name));
        }
        entries.insert(name, binding);
        Ok(())
    }

    /// Removes and returns the binding stored under `name`.
    pub fn remove(&self, name: &str) -> WebviewResult<Arc<NativeBinding>> {
        self.entries
            .write()
            .remove(name)
            .ok_or_else(|| WebviewError::BindingNotFound(name.to_string()))
    }

    pub fn get(&self, name: &str) -> Option<Arc<NativeBinding>> {
        self.entries.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.read().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Sorted snapshot of the bound names.
    ///
    /// Binding and unbinding from foreign threads is queued on the engine
    /// thread, so the snapshot does not reflect operations that have not
    /// run yet.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Empties the registry and hands the bindings to the caller, which
    /// decides when they may be released.
    pub fn clear(&self) -> Vec<Arc<NativeBinding>> {
        self.entries.write().drain().map(|(_, binding)| binding).collect()
    }
}
