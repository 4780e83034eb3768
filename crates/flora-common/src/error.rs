//! Error types shared across Flora crates

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for Flora common operations
pub type Result<T> = std::result::Result<T, FloraError>;

/// Main error type for Flora common utilities
#[derive(Error, Debug)]
pub enum FloraError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Input file not found: {}", .0.display())]
    InputMissing(PathBuf),

    #[error("Input file {} is empty", .0.display())]
    InputEmpty(PathBuf),

    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },
}
