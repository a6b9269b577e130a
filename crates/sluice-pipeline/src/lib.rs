//! Boundary data model for the sluice filter host
//!
//! This crate defines the types that cross between the native pipeline
//! and the embedded filter runtime:
//! - readings (record batches) and their datapoint values
//! - flat configuration categories with a reserved plugin-name key
//! - opaque plugin handles and output-stream tokens
//! - plugin metadata returned by `plugin_info`
//! - the asset-usage tracking seam
//!
//! Nothing here touches the interpreter; `sluice-bridge` builds on top.

pub mod config;
pub mod errors;
pub mod plugin;
pub mod readings;
pub mod tracking;

pub use config::{ConfigCategory, PLUGIN_NAME_KEY};
pub use errors::PipelineError;
pub use plugin::{OutputStream, OutputToken, PluginHandle, PluginMetadata};
pub use readings::{DatapointValue, Reading, ReadingSet};
pub use tracking::{AssetEvent, AssetTracker, MemoryTracker, FILTER_EVENT};
