//! Error types for the boundary data model

use std::io;
use thiserror::Error;

/// Errors that can occur when loading or serializing boundary data
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
