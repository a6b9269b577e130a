use sluice_pipeline::PluginHandle;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during bridge operations
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Python error: {0}")]
    Python(String),

    #[error("Failed to import module '{0}': {1}")]
    Import(String, String),

    #[error("Shim script not found at: {0}")]
    ShimNotFound(PathBuf),

    #[error("Configuration has no 'plugin' item naming the plugin to load")]
    MissingPluginName,

    #[error("Failed to serialize/deserialize data: {0}")]
    Serialization(String),

    #[error("Failed to initialize Python interpreter: {0}")]
    Initialization(String),

    #[error("No module loaded for plugin '{0}'")]
    ModuleNotLoaded(String),

    #[error("Plugin '{0}' has no callable '{1}' entry point")]
    MissingEntryPoint(String, String),

    #[error("Unknown plugin handle: {0}")]
    UnknownHandle(PluginHandle),

    #[error("Handle {0} is already registered")]
    HandleCollision(PluginHandle),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Generic conversion from PyErr to BridgeError.
///
/// NOTE: This conversion loses the Python traceback information!
/// For user-facing errors where tracebacks are important (plugin failures,
/// shim import errors, etc.), use `format_python_error()` instead.
impl From<pyo3::PyErr> for BridgeError {
    fn from(err: pyo3::PyErr) -> Self {
        BridgeError::Python(format!("{}", err))
    }
}

/// Format a Python error with its traceback when one is attached.
///
/// The traceback is what plugin authors need to locate a failure inside
/// their own code, so every error surfaced from a plugin call goes
/// through here rather than the plain `From<PyErr>` conversion.
pub(crate) fn format_python_error(
    py: pyo3::Python<'_>,
    err: &pyo3::PyErr,
    context: &str,
) -> String {
    use pyo3::prelude::*;

    let mut message = format!("{}: {}", context, err);
    if let Some(traceback) = err.traceback(py) {
        if let Ok(formatted) = traceback.format() {
            message.push('\n');
            message.push_str(formatted.trim_end());
        }
    }
    message
}
