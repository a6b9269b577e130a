//! Loaded-module and handle registries
//!
//! Two maps back every dispatch: plugin name to the shim module imported
//! for it, and opaque handle to the per-instance state that plugin calls
//! carry. Both are owned by the bridge and only touched while its
//! execution lock is held.

use crate::bootstrap::{self, InterpreterContext, SearchPaths};
use crate::errors::BridgeError;
use pyo3::prelude::*;
use pyo3::types::PyModule;
use sluice_logger as logger;
use sluice_pipeline::PluginHandle;
use std::collections::hash_map::Entry;
use std::collections::HashMap;

/// One imported shim module and the context it was imported in.
///
/// The plugin name lives only in the registry key; callers that need
/// it alongside the record already hold it.
pub(crate) struct ModuleRecord {
    category: String,
    context: InterpreterContext,
    module: Py<PyModule>,
}

impl ModuleRecord {
    pub(crate) fn new(context: InterpreterContext, module: Py<PyModule>) -> Self {
        ModuleRecord {
            category: String::new(),
            context,
            module,
        }
    }

    /// Configuration category most recently associated with this module
    pub(crate) fn category(&self) -> &str {
        &self.category
    }

    /// Overwrite the associated category; later loads win
    pub(crate) fn set_category(&mut self, category: &str) {
        self.category = category.to_string();
    }

    pub(crate) fn context(&self) -> &InterpreterContext {
        &self.context
    }

    pub(crate) fn module(&self) -> &Py<PyModule> {
        &self.module
    }
}

/// Per-instance record behind an issued plugin handle
pub(crate) struct HandleEntry {
    module_name: String,
    state: Py<PyAny>,
}

impl HandleEntry {
    pub(crate) fn new(module_name: String, state: Py<PyAny>) -> Self {
        HandleEntry { module_name, state }
    }

    pub(crate) fn module_name(&self) -> &str {
        &self.module_name
    }

    pub(crate) fn state(&self) -> &Py<PyAny> {
        &self.state
    }
}

/// Registry of loaded plugin modules and the handles issued against them
pub(crate) struct Registry {
    modules: HashMap<String, ModuleRecord>,
    handles: HashMap<PluginHandle, HandleEntry>,
    next_token: u64,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Registry {
            modules: HashMap::new(),
            handles: HashMap::new(),
            next_token: 0,
        }
    }

    /// Make sure a module is loaded for `plugin_name`, importing the shim
    /// only when no earlier load can be reused.
    ///
    /// Reuse is checked in two steps: a live handle already referencing the
    /// plugin, then a loaded module without handles (its instances may all
    /// have shut down). Only when both miss is the shim imported fresh.
    /// Returns whether a fresh import happened, so a caller that fails to
    /// register a handle afterwards knows to unload what it just loaded.
    pub(crate) fn load_or_reuse(
        &mut self,
        py: Python<'_>,
        paths: &SearchPaths,
        plugin_name: &str,
        runtime_just_initialized: bool,
    ) -> Result<bool, BridgeError> {
        if self.handle_references(plugin_name) {
            logger::debug(&format!(
                "plugin '{}' already loaded, initializing a new instance",
                plugin_name
            ));
            return Ok(false);
        }
        if self.modules.contains_key(plugin_name) {
            logger::debug(&format!(
                "reusing loaded module for plugin '{}'",
                plugin_name
            ));
            return Ok(false);
        }

        let start_time = std::time::Instant::now();
        let is_master = runtime_just_initialized && !self.has_master();
        let context = bootstrap::create_context(py, paths, plugin_name, is_master)?;
        let module = bootstrap::import_shim_module(py, paths, &context)?;
        logger::debug(&format!(
            "imported shim for plugin '{}' as '{}' in {:?}",
            plugin_name,
            context.namespace(),
            start_time.elapsed()
        ));

        self.modules
            .insert(plugin_name.to_string(), ModuleRecord::new(context, module));
        Ok(true)
    }

    pub(crate) fn module(&self, plugin_name: &str) -> Option<&ModuleRecord> {
        self.modules.get(plugin_name)
    }

    pub(crate) fn module_mut(&mut self, plugin_name: &str) -> Option<&mut ModuleRecord> {
        self.modules.get_mut(plugin_name)
    }

    /// Drop a module record, releasing the bridge's reference to the module
    pub(crate) fn remove_module(&mut self, plugin_name: &str) -> Option<ModuleRecord> {
        self.modules.remove(plugin_name)
    }

    /// Whether any issued handle still references `plugin_name`
    pub(crate) fn handle_references(&self, plugin_name: &str) -> bool {
        self.handles
            .values()
            .any(|entry| entry.module_name() == plugin_name)
    }

    fn has_master(&self) -> bool {
        self.modules
            .values()
            .any(|record| record.context().is_master())
    }

    /// Next unused handle token.
    ///
    /// Tokens start at 1 and never revisit a value still registered, so a
    /// released token can eventually be reissued but a live one cannot.
    pub(crate) fn next_handle(&mut self) -> PluginHandle {
        loop {
            self.next_token = self.next_token.wrapping_add(1);
            if let Some(handle) = PluginHandle::from_raw(self.next_token) {
                if !self.handles.contains_key(&handle) {
                    return handle;
                }
            }
        }
    }

    /// Record a handle, refusing to overwrite one already registered
    pub(crate) fn register_handle(
        &mut self,
        handle: PluginHandle,
        entry: HandleEntry,
    ) -> Result<(), BridgeError> {
        match self.handles.entry(handle) {
            Entry::Occupied(_) => Err(BridgeError::HandleCollision(handle)),
            Entry::Vacant(slot) => {
                slot.insert(entry);
                Ok(())
            }
        }
    }

    pub(crate) fn resolve(&self, handle: PluginHandle) -> Option<&HandleEntry> {
        self.handles.get(&handle)
    }

    /// Remove a handle, returning its entry so state drops under the caller
    pub(crate) fn release_handle(&mut self, handle: PluginHandle) -> Option<HandleEntry> {
        self.handles.remove(&handle)
    }

    /// Names of every loaded plugin module, sorted for stable output
    pub(crate) fn plugin_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.modules.keys().cloned().collect();
        names.sort();
        names
    }

    pub(crate) fn handle_count(&self) -> usize {
        self.handles.len()
    }
}
