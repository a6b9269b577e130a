//! Sluice library - expose modules for testing
//!
//! This library exposes core modules needed for testing and integration.

pub mod chain_config;
pub mod commands;
pub mod common;
pub mod errors;

pub use common::GlobalOpts;
pub use sluice_logger as logger;
