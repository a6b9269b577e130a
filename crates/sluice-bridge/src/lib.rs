//! Embedded interpreter bridge for sluice filter plugins
//!
//! This bridge gives the native pipeline a fixed call surface over
//! plugins written in Python:
//! 1. One shared interpreter runtime, started on first use
//! 2. A per-plugin shim module import, deduplicated across instances
//! 3. Opaque handles for plugin instances and dispatch of their
//!    `plugin_*` entry points
//!
//! Readings, configuration and metadata are marshalled at the boundary
//! so neither side holds references into the other beyond the instance
//! state a handle stands for.

pub mod errors;

mod bootstrap;
mod dispatch;
mod marshal;
mod registry;

pub use bootstrap::{SearchPaths, PLUGIN_DIR_ENV, ROOT_ENV, SHIM_DIR_ENV};
pub use dispatch::{
    Bridge, EntryPoint, SYMBOL_INFO, SYMBOL_INGEST, SYMBOL_INIT, SYMBOL_RECONFIGURE,
    SYMBOL_SHUTDOWN, SYMBOL_START,
};
pub use errors::BridgeError;
