//! Opaque plugin-instance tokens and plugin metadata

use crate::readings::ReadingSet;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroU64;
use std::sync::Arc;

/// Opaque token identifying one running filter instance.
///
/// Minted by the bridge when `init` succeeds and valid until `shutdown`
/// is called with it. The token is not dereferenceable; the bridge's
/// registry is the only place that maps it back to real state, and a
/// stale token is rejected there by a registry-miss check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PluginHandle(NonZeroU64);

impl PluginHandle {
    /// Reconstruct a handle from its raw value. Returns `None` for
    /// zero, which is never a valid handle.
    pub fn from_raw(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(PluginHandle)
    }

    pub fn as_raw(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for PluginHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0.get())
    }
}

/// Opaque token the host associates with a filter's output side.
///
/// The bridge never interprets it; it is carried through the
/// interpreter boundary and handed back on every emission so the host
/// can route output batches to the right place.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutputToken(u64);

impl OutputToken {
    pub fn new(raw: u64) -> Self {
        OutputToken(raw)
    }

    pub fn as_raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for OutputToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Callback invoked by interpreted code to push filtered batches
/// downstream.
///
/// Called while the bridge's execution lock is held, so the callback
/// must not call back into the bridge; hosts queue the batch and feed
/// it onward after the entry point returns.
pub type OutputStream = Arc<dyn Fn(OutputToken, ReadingSet) + Send + Sync>;

/// Parsed result of a plugin's `plugin_info` entry point
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PluginMetadata {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub mode: String,
    #[serde(rename = "type", default)]
    pub plugin_type: String,
    #[serde(default)]
    pub interface: String,
    /// Default configuration block, kept as raw JSON
    #[serde(default)]
    pub config: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_zero_is_invalid() {
        assert!(PluginHandle::from_raw(0).is_none());
        assert!(PluginHandle::from_raw(1).is_some());
    }

    #[test]
    fn test_handle_display_is_hex() {
        let Some(handle) = PluginHandle::from_raw(255) else {
            assert!(false, "handle should be valid");
            return;
        };
        assert_eq!(handle.to_string(), "0xff");
        assert_eq!(handle.as_raw(), 255);
    }

    #[test]
    fn test_metadata_parses_info_shape() {
        let parsed: Result<PluginMetadata, _> = serde_json::from_str(
            r#"{
                "name": "scale",
                "version": "1.0.0",
                "mode": "none",
                "type": "filter",
                "interface": "1.0",
                "config": {"plugin": {"default": "scale"}}
            }"#,
        );

        let Ok(meta) = parsed else {
            assert!(false, "metadata should parse");
            return;
        };
        assert_eq!(meta.name, "scale");
        assert_eq!(meta.plugin_type, "filter");
        assert!(meta.config.get("plugin").is_some());
    }
}
