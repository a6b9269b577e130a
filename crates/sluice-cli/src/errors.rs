//! Centralized error types for the sluice CLI
//!
//! This module defines all error types used across the binary,
//! providing a unified error handling interface.

use std::io;
use thiserror::Error;

/// Errors that can occur while loading or resolving a chain definition
#[derive(Error, Debug)]
pub enum ChainError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to parse chain YAML: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Variable '{0}' not found in variables section")]
    VariableNotFound(String),

    #[error("Chain '{0}' not found in YAML")]
    ChainNotFound(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Readings error: {0}")]
    Readings(#[from] sluice_pipeline::PipelineError),
}

#[cfg(test)]
mod tests {
    use crate::errors::*;

    #[test]
    fn test_chain_error_display() {
        let err = ChainError::ChainNotFound("test-chain".to_string());
        assert_eq!(err.to_string(), "Chain 'test-chain' not found in YAML");
    }
}
