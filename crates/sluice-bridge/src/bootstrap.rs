//! Embedded interpreter startup and per-plugin context setup
//!
//! This module owns everything that has to happen before a plugin call can be
//! dispatched: starting the shared Python runtime exactly once, pointing the
//! interpreter at the shim and plugin directories, and importing the shim
//! under a namespace unique to each plugin.

use crate::errors::{format_python_error, BridgeError};
use once_cell::sync::OnceCell;
use pyo3::prelude::*;
use pyo3::types::{PyList, PyModule};
use sluice_logger as logger;
use std::env;
use std::ffi::CString;
use std::path::{Path, PathBuf};

/// Environment variable overriding the shim script directory
pub const SHIM_DIR_ENV: &str = "SLUICE_SHIM_DIR";
/// Environment variable overriding the plugin module directory
pub const PLUGIN_DIR_ENV: &str = "SLUICE_PLUGIN_DIR";
/// Environment variable overriding the installation root
pub const ROOT_ENV: &str = "SLUICE_ROOT";

const DEFAULT_ROOT: &str = "/usr/local/sluice";
const PLUGIN_KIND: &str = "filter";

static RUNTIME: OnceCell<()> = OnceCell::new();

/// Whether a bootstrap call started the runtime or found it already running
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RuntimeInit {
    Initialized,
    Reused,
}

/// Directories the interpreter searches for the shim script and plugin modules
#[derive(Debug, Clone)]
pub struct SearchPaths {
    shim_dir: PathBuf,
    plugin_dir: PathBuf,
}

impl SearchPaths {
    pub fn new(shim_dir: impl Into<PathBuf>, plugin_dir: impl Into<PathBuf>) -> Self {
        SearchPaths {
            shim_dir: shim_dir.into(),
            plugin_dir: plugin_dir.into(),
        }
    }

    /// Resolve the search paths from the environment.
    ///
    /// `SLUICE_SHIM_DIR` and `SLUICE_PLUGIN_DIR` each override their
    /// directory directly; otherwise both are derived from `SLUICE_ROOT`
    /// (default `/usr/local/sluice`) using the installed layout
    /// `<root>/python/shim` and `<root>/python/plugins`.
    pub fn from_env() -> Self {
        let root = env::var(ROOT_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_ROOT));
        let shim_dir = env::var(SHIM_DIR_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| root.join("python").join("shim"));
        let plugin_dir = env::var(PLUGIN_DIR_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| root.join("python").join("plugins"));
        SearchPaths::new(shim_dir, plugin_dir)
    }

    pub fn shim_dir(&self) -> &Path {
        &self.shim_dir
    }

    pub fn plugin_dir(&self) -> &Path {
        &self.plugin_dir
    }
}

/// Per-plugin interpreter context recorded alongside the loaded module.
///
/// Contexts share the single embedded runtime; what distinguishes them is
/// the module namespace the shim was imported under and whether this
/// context's load was the one that started the runtime.
#[derive(Debug, Clone)]
pub(crate) struct InterpreterContext {
    namespace: String,
    is_master: bool,
}

impl InterpreterContext {
    pub(crate) fn new(namespace: String, is_master: bool) -> Self {
        InterpreterContext {
            namespace,
            is_master,
        }
    }

    pub(crate) fn namespace(&self) -> &str {
        &self.namespace
    }

    pub(crate) fn is_master(&self) -> bool {
        self.is_master
    }
}

/// Start the shared Python runtime if this process has not done so yet
///
/// This performs, on the first call only:
/// - Interpreter initialization
/// - Enabling bytecode generation for faster subsequent imports
/// - Routing Python `logging` output into the host log file
///
/// Every later call reports `RuntimeInit::Reused` without touching the
/// interpreter. A failed first call leaves the runtime unclaimed so a
/// later call can retry.
pub(crate) fn bootstrap_runtime() -> Result<RuntimeInit, BridgeError> {
    let mut started_here = false;
    RUNTIME.get_or_try_init(|| -> Result<(), BridgeError> {
        let start_time = std::time::Instant::now();
        pyo3::Python::initialize();
        logger::debug(&format!(
            "pyo3::Python::initialize took: {:?}",
            start_time.elapsed()
        ));

        // Enable Python bytecode generation for faster subsequent imports
        // This overrides PYTHONDONTWRITEBYTECODE if set in the environment
        pyo3::Python::attach(|py| {
            let sys = PyModule::import(py, "sys")
                .map_err(|e| BridgeError::Python(format!("Failed to import sys module: {}", e)))?;
            sys.setattr("dont_write_bytecode", false).map_err(|e| {
                BridgeError::Python(format!("Failed to enable bytecode generation: {}", e))
            })?;
            Ok::<(), BridgeError>(())
        })?;

        if let Err(e) = configure_python_logging() {
            logger::warn(&format!("Python logging configuration failed: {}", e));
        }

        started_here = true;
        Ok(())
    })?;

    Ok(if started_here {
        RuntimeInit::Initialized
    } else {
        RuntimeInit::Reused
    })
}

/// Route the Python `logging` root logger into the host log file
///
/// Python log lines land in the same file as Rust log lines with a
/// `[PYTHON]` marker; console echo follows the `--log-python` flag.
fn configure_python_logging() -> Result<(), BridgeError> {
    let Some(log_path) = logger::get_log_path() else {
        // Host logging not initialized (library embedding, tests)
        return Ok(());
    };
    let log_file = log_path.to_string_lossy().to_string();
    let log_level = logger::verbosity_to_python_level();
    let enable_console = logger::get_log_python();

    logger::debug(&format!(
        "Configuring Python logging with level={}, file={}, enable_console={}",
        log_level, log_file, enable_console
    ));

    pyo3::Python::attach(|py| {
        let logging = PyModule::import(py, "logging")
            .map_err(|e| BridgeError::Import("logging".to_string(), format!("{}", e)))?;
        let root = logging.call_method0("getLogger")?;
        root.call_method1("setLevel", (log_level.as_str(),))?;

        // Format to match the Rust logger: [YYYY-MM-DD HH:MM:SS] [PYTHON] LEVEL message
        let formatter = logging.call_method1(
            "Formatter",
            (
                "[%(asctime)s] [PYTHON] %(levelname)s %(message)s",
                "%Y-%m-%d %H:%M:%S",
            ),
        )?;

        let file_handler = logging.call_method1("FileHandler", (log_file.as_str(),))?;
        file_handler.call_method1("setFormatter", (&formatter,))?;
        root.call_method1("addHandler", (&file_handler,))?;

        if enable_console {
            let console_handler = logging.call_method0("StreamHandler")?;
            console_handler.call_method1("setFormatter", (&formatter,))?;
            root.call_method1("addHandler", (&console_handler,))?;
        }

        Ok::<(), BridgeError>(())
    })
}

/// File name of the shim script expected inside the shim directory
pub(crate) fn shim_file_name() -> String {
    format!("{}_shim.py", PLUGIN_KIND)
}

/// Module namespace the shim is imported under for a given plugin.
///
/// Each plugin gets its own namespace so two plugins never share shim
/// module globals. Characters outside `[A-Za-z0-9]` are mapped to `_`
/// to keep the result a valid module name.
pub(crate) fn shim_namespace(plugin_name: &str) -> String {
    let sanitized: String = plugin_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("{}_shim__{}", PLUGIN_KIND, sanitized)
}

/// Prepare the interpreter for loading a plugin and record its context
///
/// This appends the shim and plugin directories to `sys.path` (skipping
/// entries already present) and points `sys.argv` at the plugin name so
/// the shim knows which plugin module to import.
pub(crate) fn create_context(
    py: Python<'_>,
    paths: &SearchPaths,
    plugin_name: &str,
    is_master: bool,
) -> Result<InterpreterContext, BridgeError> {
    let sys = PyModule::import(py, "sys")
        .map_err(|e| BridgeError::Python(format!("Failed to import sys module: {}", e)))?;
    let sys_path = sys
        .getattr("path")?
        .cast::<PyList>()
        .map_err(|e| BridgeError::Python(format!("sys.path is not a list: {}", e)))?
        .clone();

    for dir in [paths.shim_dir(), paths.plugin_dir()] {
        let dir = dir.to_string_lossy().to_string();
        if !path_contains(&sys_path, &dir)? {
            sys_path.append(dir)?;
        }
    }

    // argv[0] is the conventional program-name slot; the shim reads argv[1]
    let argv = PyList::empty(py);
    argv.append("")?;
    argv.append(plugin_name)?;
    sys.setattr("argv", &argv)?;

    Ok(InterpreterContext::new(shim_namespace(plugin_name), is_master))
}

fn path_contains(sys_path: &Bound<'_, PyList>, dir: &str) -> Result<bool, BridgeError> {
    for entry in sys_path.iter() {
        if let Ok(existing) = entry.extract::<String>() {
            if existing == dir {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

/// Import the shim script under the context's namespace
///
/// Importing executes the shim top to bottom, which is where the shim
/// itself imports the plugin module named in `sys.argv`. Any exception
/// raised during that execution surfaces here as an import failure.
pub(crate) fn import_shim_module(
    py: Python<'_>,
    paths: &SearchPaths,
    context: &InterpreterContext,
) -> Result<Py<PyModule>, BridgeError> {
    let shim_path = paths.shim_dir().join(shim_file_name());
    if !shim_path.exists() {
        return Err(BridgeError::ShimNotFound(shim_path));
    }

    let code = std::fs::read_to_string(&shim_path)?;
    let code = CString::new(code)
        .map_err(|e| BridgeError::Python(format!("Shim script contains a NUL byte: {}", e)))?;
    let file_name = CString::new(shim_path.to_string_lossy().into_owned())
        .map_err(|e| BridgeError::Python(format!("Shim path contains a NUL byte: {}", e)))?;
    let module_name = CString::new(context.namespace().to_string())
        .map_err(|e| BridgeError::Python(format!("Invalid shim namespace: {}", e)))?;

    let module = PyModule::from_code(
        py,
        code.as_c_str(),
        file_name.as_c_str(),
        module_name.as_c_str(),
    )
    .map_err(|e| {
        logger::error(&format_python_error(
            py,
            &e,
            &format!("Failed to import shim as '{}'", context.namespace()),
        ));
        BridgeError::Import(context.namespace().to_string(), format!("{}", e))
    })?;

    Ok(module.unbind())
}
