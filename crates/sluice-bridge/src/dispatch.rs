//! Entry-point dispatch for hosted filter plugins
//!
//! The bridge exposes one method per plugin entry point. Every method
//! takes the process-wide execution lock, resolves the target module and
//! instance in the registry, marshals arguments, and calls into the
//! interpreter. Failures never propagate to the caller as errors: init
//! and info report absence, the streaming calls log and drop.

use crate::bootstrap::{self, RuntimeInit, SearchPaths};
use crate::errors::{format_python_error, BridgeError};
use crate::marshal::{self, OutputEmitter, OutputHandle};
use crate::registry::{HandleEntry, Registry};
use parking_lot::Mutex;
use pyo3::prelude::*;
use pyo3::types::PyDict;
use sluice_logger as logger;
use sluice_pipeline::{
    AssetTracker, ConfigCategory, OutputStream, OutputToken, PluginHandle, PluginMetadata,
    ReadingSet, FILTER_EVENT,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const SYMBOL_INFO: &str = "plugin_info";
pub const SYMBOL_INIT: &str = "plugin_init";
pub const SYMBOL_INGEST: &str = "plugin_ingest";
pub const SYMBOL_RECONFIGURE: &str = "plugin_reconfigure";
pub const SYMBOL_SHUTDOWN: &str = "plugin_shutdown";
pub const SYMBOL_START: &str = "plugin_start";

/// Operations the bridge dispatches for a filter plugin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryPoint {
    Info,
    Init,
    Ingest,
    Reconfigure,
    Shutdown,
}

// Serializes every interpreter-facing operation in the process. Calls
// from any thread and any bridge instance queue here, so interpreted
// code never runs concurrently with itself or with registry mutation.
static EXECUTION_LOCK: Mutex<()> = Mutex::new(());

struct BridgeState {
    registry: Registry,
}

/// Host-side bridge that loads filter plugins into the embedded
/// interpreter and dispatches their entry points.
///
/// All operations serialize on a process-wide execution lock, so plugin
/// code never runs concurrently. The output stream registered with
/// [`Bridge::init`] is invoked while that lock is held: a stream
/// callback must hand the batch off (queue it) rather than call back
/// into the bridge, or the call will deadlock.
pub struct Bridge {
    paths: SearchPaths,
    tracker: Option<Arc<dyn AssetTracker>>,
    state: Mutex<BridgeState>,
}

impl Bridge {
    pub fn new(paths: SearchPaths) -> Self {
        Bridge {
            paths,
            tracker: None,
            state: Mutex::new(BridgeState {
                registry: Registry::new(),
            }),
        }
    }

    /// Attach an asset tracker notified of every reading delivered to a plugin
    pub fn with_tracker(mut self, tracker: Arc<dyn AssetTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    pub fn search_paths(&self) -> &SearchPaths {
        &self.paths
    }

    /// Load (or reuse) the plugin named in `config` and create one instance.
    ///
    /// On success the new instance's handle is returned and the plugin's
    /// `plugin_init` has run with the configuration items as JSON text plus
    /// the output handle and emitter for forwarding batches downstream.
    /// On any failure the error is logged and no handle is issued.
    pub fn init(
        &self,
        config: &ConfigCategory,
        output: OutputToken,
        stream: OutputStream,
    ) -> Option<PluginHandle> {
        let start_time = Instant::now();
        let _execution = EXECUTION_LOCK.lock();
        let mut state = self.state.lock();
        match self.init_locked(&mut state.registry, config, output, stream) {
            Ok(handle) => {
                logger::debug(&format!(
                    "plugin_init for category '{}' took {} (handle {})",
                    config.name(),
                    format_duration(start_time.elapsed()),
                    handle
                ));
                Some(handle)
            }
            Err(err) => {
                log_call_failure(SYMBOL_INIT, &err);
                None
            }
        }
    }

    fn init_locked(
        &self,
        registry: &mut Registry,
        config: &ConfigCategory,
        output: OutputToken,
        stream: OutputStream,
    ) -> Result<PluginHandle, BridgeError> {
        let plugin_name = config
            .plugin_name()
            .ok_or(BridgeError::MissingPluginName)?
            .to_string();
        let config_json = config
            .items_to_json()
            .map_err(|e| BridgeError::Serialization(format!("{}", e)))?;

        let runtime = bootstrap::bootstrap_runtime()?;

        pyo3::Python::attach(|py| {
            let fresh = registry.load_or_reuse(
                py,
                &self.paths,
                &plugin_name,
                runtime == RuntimeInit::Initialized,
            )?;

            let record = registry
                .module_mut(&plugin_name)
                .ok_or_else(|| BridgeError::ModuleNotLoaded(plugin_name.clone()))?;
            record.set_category(config.name());
            let module = record.module().clone_ref(py);

            // Both wrappers are released when this call returns; the
            // interpreter side keeps them alive only if the plugin stored
            // them during plugin_init.
            let output_handle = Py::new(py, OutputHandle::new(output))?;
            let emitter = Py::new(py, OutputEmitter::new(stream))?;

            let result = module.bind(py).call_method1(
                SYMBOL_INIT,
                (config_json.as_str(), &output_handle, &emitter),
            );
            let instance_state = match result {
                Ok(value) if !value.is_none() => value,
                Ok(_) => {
                    return Err(BridgeError::Python(format!(
                        "plugin_init for '{}' returned no state",
                        plugin_name
                    )));
                }
                Err(err) => {
                    return Err(BridgeError::Python(format_python_error(
                        py,
                        &err,
                        &format!("plugin_init failed for '{}'", plugin_name),
                    )));
                }
            };

            let handle = registry.next_handle();
            let entry = HandleEntry::new(plugin_name.clone(), instance_state.unbind());
            if let Err(err) = registry.register_handle(handle, entry) {
                // A fresh load rolls back so a bad registration leaves no trace
                if fresh {
                    registry.remove_module(&plugin_name);
                }
                return Err(err);
            }
            logger::debug(&format!(
                "registered handle {} for plugin '{}'",
                handle, plugin_name
            ));
            Ok(handle)
        })
    }

    /// Feed a batch of readings through one plugin instance.
    ///
    /// The batch is consumed whether or not the call succeeds; a failed
    /// batch is dropped, not retried. Filtered output arrives through the
    /// stream registered at init time, on the plugin's schedule.
    pub fn ingest(&self, handle: PluginHandle, batch: ReadingSet) {
        let _execution = EXECUTION_LOCK.lock();
        let mut state = self.state.lock();
        if let Err(err) = self.ingest_locked(&mut state.registry, handle, &batch) {
            log_call_failure(SYMBOL_INGEST, &err);
        }
    }

    fn ingest_locked(
        &self,
        registry: &mut Registry,
        handle: PluginHandle,
        batch: &ReadingSet,
    ) -> Result<(), BridgeError> {
        let entry = registry
            .resolve(handle)
            .ok_or(BridgeError::UnknownHandle(handle))?;
        let plugin_name = entry.module_name().to_string();
        let record = registry
            .module(&plugin_name)
            .ok_or_else(|| BridgeError::ModuleNotLoaded(plugin_name.clone()))?;
        let category = record.category().to_string();

        pyo3::Python::attach(|py| {
            let module = record.module().bind(py);
            let ingest_fn = module.getattr(SYMBOL_INGEST).map_err(|_| {
                BridgeError::MissingEntryPoint(plugin_name.clone(), SYMBOL_INGEST.to_string())
            })?;
            if !ingest_fn.is_callable() {
                return Err(BridgeError::MissingEntryPoint(
                    plugin_name.clone(),
                    SYMBOL_INGEST.to_string(),
                ));
            }

            // Every delivered asset is tracked before the call; delivery
            // counts as filtering even if the plugin then fails.
            if let Some(tracker) = &self.tracker {
                for reading in batch.readings() {
                    tracker.track_asset(&category, &reading.asset, FILTER_EVENT);
                }
            }

            let py_batch = marshal::readings_to_py(py, batch)?;
            let call_start = Instant::now();
            ingest_fn
                .call1((entry.state().bind(py), &py_batch))
                .map_err(|err| {
                    BridgeError::Python(format_python_error(
                        py,
                        &err,
                        &format!("plugin_ingest failed for '{}'", plugin_name),
                    ))
                })?;
            logger::debug(&format!(
                "plugin_ingest for '{}' took {} ({} readings)",
                plugin_name,
                format_duration(call_start.elapsed()),
                batch.len()
            ));
            Ok(())
        })
    }

    /// Hand a plugin instance new configuration text.
    ///
    /// The instance keeps its identity: the state dict the handle points
    /// at is cleared and refilled with whatever `plugin_reconfigure`
    /// returned, so interpreter-side references to it stay valid. When
    /// the call does not produce a dict the existing state is kept.
    pub fn reconfigure(&self, handle: PluginHandle, config_json: &str) {
        let _execution = EXECUTION_LOCK.lock();
        let mut state = self.state.lock();
        if let Err(err) = self.reconfigure_locked(&mut state.registry, handle, config_json) {
            log_call_failure(SYMBOL_RECONFIGURE, &err);
        }
    }

    fn reconfigure_locked(
        &self,
        registry: &mut Registry,
        handle: PluginHandle,
        config_json: &str,
    ) -> Result<(), BridgeError> {
        let entry = registry
            .resolve(handle)
            .ok_or(BridgeError::UnknownHandle(handle))?;
        let plugin_name = entry.module_name().to_string();
        let record = registry
            .module(&plugin_name)
            .ok_or_else(|| BridgeError::ModuleNotLoaded(plugin_name.clone()))?;

        pyo3::Python::attach(|py| {
            let module = record.module().bind(py);
            let reconfigure_fn = module.getattr(SYMBOL_RECONFIGURE).map_err(|_| {
                BridgeError::MissingEntryPoint(plugin_name.clone(), SYMBOL_RECONFIGURE.to_string())
            })?;
            if !reconfigure_fn.is_callable() {
                return Err(BridgeError::MissingEntryPoint(
                    plugin_name.clone(),
                    SYMBOL_RECONFIGURE.to_string(),
                ));
            }

            let current_state = entry.state().bind(py);
            let replacement = reconfigure_fn
                .call1((current_state, config_json))
                .map_err(|err| {
                    BridgeError::Python(format_python_error(
                        py,
                        &err,
                        &format!("plugin_reconfigure failed for '{}'", plugin_name),
                    ))
                })?;

            match (current_state.cast::<PyDict>(), replacement.cast::<PyDict>()) {
                (Ok(state_dict), Ok(replacement_dict)) => {
                    // Stage the merge first: if reading the replacement
                    // fails the existing state is still intact, not
                    // cleared and half-filled.
                    let staged = PyDict::new(py);
                    staged.update(replacement_dict.as_mapping()).map_err(|err| {
                        BridgeError::Python(format_python_error(
                            py,
                            &err,
                            &format!(
                                "plugin_reconfigure result for '{}' could not be read; existing state kept",
                                plugin_name
                            ),
                        ))
                    })?;
                    state_dict.clear();
                    state_dict.update(staged.as_mapping())?;
                    logger::debug(&format!(
                        "plugin '{}' reconfigured in place (handle {})",
                        plugin_name, handle
                    ));
                    Ok(())
                }
                _ => Err(BridgeError::Python(format!(
                    "plugin_reconfigure for '{}' did not produce a dict state; existing state kept",
                    plugin_name
                ))),
            }
        })
    }

    /// Shut down one plugin instance and release its handle.
    ///
    /// `plugin_shutdown` is called when the module defines it; either way
    /// the handle is released and the instance state dropped. The module
    /// itself stays loaded for future inits of the same plugin.
    pub fn shutdown(&self, handle: PluginHandle) {
        let _execution = EXECUTION_LOCK.lock();
        let mut state = self.state.lock();
        let registry = &mut state.registry;
        let Some(entry) = registry.resolve(handle) else {
            log_call_failure(SYMBOL_SHUTDOWN, &BridgeError::UnknownHandle(handle));
            return;
        };
        let plugin_name = entry.module_name().to_string();

        pyo3::Python::attach(|py| {
            let instance_state = match registry.resolve(handle) {
                Some(entry) => entry.state().clone_ref(py),
                None => return,
            };
            if let Some(record) = registry.module(&plugin_name) {
                let module = record.module().bind(py);
                match module.getattr(SYMBOL_SHUTDOWN) {
                    Ok(shutdown_fn) if shutdown_fn.is_callable() => {
                        if let Err(err) = shutdown_fn.call1((instance_state.bind(py),)) {
                            logger::error(&format_python_error(
                                py,
                                &err,
                                &format!("plugin_shutdown failed for '{}'", plugin_name),
                            ));
                        }
                    }
                    _ => logger::debug(&format!(
                        "plugin '{}' defines no {}",
                        plugin_name, SYMBOL_SHUTDOWN
                    )),
                }
            }
            // The handle entry and its state reference drop while attached
            if registry.release_handle(handle).is_some() {
                logger::debug(&format!(
                    "released handle {} for plugin '{}'",
                    handle, plugin_name
                ));
            }
        });
    }

    /// Query plugin metadata, loading the plugin first if needed.
    ///
    /// The loaded module is kept, so a later init of the same plugin
    /// reuses it instead of importing again.
    pub fn info(&self, plugin_name: &str) -> Option<PluginMetadata> {
        let _execution = EXECUTION_LOCK.lock();
        let mut state = self.state.lock();
        match self.info_locked(&mut state.registry, plugin_name) {
            Ok(metadata) => Some(metadata),
            Err(err) => {
                log_call_failure(SYMBOL_INFO, &err);
                None
            }
        }
    }

    fn info_locked(
        &self,
        registry: &mut Registry,
        plugin_name: &str,
    ) -> Result<PluginMetadata, BridgeError> {
        let runtime = bootstrap::bootstrap_runtime()?;
        pyo3::Python::attach(|py| {
            registry.load_or_reuse(
                py,
                &self.paths,
                plugin_name,
                runtime == RuntimeInit::Initialized,
            )?;
            let record = registry
                .module(plugin_name)
                .ok_or_else(|| BridgeError::ModuleNotLoaded(plugin_name.to_string()))?;
            let module = record.module().bind(py);
            let info_fn = module.getattr(SYMBOL_INFO).map_err(|_| {
                BridgeError::MissingEntryPoint(plugin_name.to_string(), SYMBOL_INFO.to_string())
            })?;
            if !info_fn.is_callable() {
                return Err(BridgeError::MissingEntryPoint(
                    plugin_name.to_string(),
                    SYMBOL_INFO.to_string(),
                ));
            }
            let result = info_fn.call0().map_err(|err| {
                BridgeError::Python(format_python_error(
                    py,
                    &err,
                    &format!("plugin_info failed for '{}'", plugin_name),
                ))
            })?;
            marshal::metadata_from_py(py, &result)
        })
    }

    /// Map an entry-point name to the operation dispatched for it.
    ///
    /// `plugin_start` is recognized but not supported for filters, so
    /// asking for it is answered quietly. Any other unknown name is a
    /// wiring error on the host side and is logged as one.
    pub fn resolve_symbol(&self, plugin_name: &str, symbol: &str) -> Option<EntryPoint> {
        match symbol {
            SYMBOL_INFO => Some(EntryPoint::Info),
            SYMBOL_INIT => Some(EntryPoint::Init),
            SYMBOL_INGEST => Some(EntryPoint::Ingest),
            SYMBOL_RECONFIGURE => Some(EntryPoint::Reconfigure),
            SYMBOL_SHUTDOWN => Some(EntryPoint::Shutdown),
            SYMBOL_START => {
                logger::debug(&format!(
                    "{} is not supported for filter plugin '{}'",
                    SYMBOL_START, plugin_name
                ));
                None
            }
            other => {
                logger::fatal(&format!(
                    "cannot find symbol '{}' for plugin '{}'",
                    other, plugin_name
                ));
                None
            }
        }
    }

    /// Names of plugins with a loaded module, sorted
    pub fn loaded_plugins(&self) -> Vec<String> {
        self.state.lock().registry.plugin_names()
    }

    /// Number of live plugin instances
    pub fn active_handles(&self) -> usize {
        self.state.lock().registry.handle_count()
    }
}

/// A missing handle, module or entry point means the host wired the call
/// wrong; anything else is a failure inside the call itself.
fn log_call_failure(operation: &str, err: &BridgeError) {
    match err {
        BridgeError::UnknownHandle(_)
        | BridgeError::ModuleNotLoaded(_)
        | BridgeError::MissingEntryPoint(..) => {
            logger::fatal(&format!("{} aborted: {}", operation, err));
        }
        _ => logger::error(&format!("{} failed: {}", operation, err)),
    }
}

fn format_duration(duration: Duration) -> String {
    let total_ms = duration.as_millis();
    if total_ms < 1000 {
        format!("{}ms", total_ms)
    } else {
        format!("{:.2}s", duration.as_secs_f64())
    }
}
