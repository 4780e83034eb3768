//! Bridge error types

use thiserror::Error;

use crate::pipeline::StepId;

/// Result type alias for bridging operations
pub type BridgeResult<T> = std::result::Result<T, BridgeError>;

#[derive(Error, Debug)]
pub enum BridgeError {
    /// SQL query or connection error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A mutating statement kept failing after every retry
    #[error("Statement '{label}' failed after {attempts} attempts: {source}")]
    StatementFailed {
        label: String,
        attempts: u32,
        #[source]
        source: sqlx::Error,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    /// Missing or malformed cleaned input file
    #[error("Input error: {0}")]
    Input(String),

    #[error("Input file error: {0}")]
    InputFile(#[from] flora_common::FloraError),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid step selection '{input}': {reason}")]
    InvalidSelection { input: String, reason: String },

    /// A propagation loop hit its safety cap while rows were still changing
    #[error("{operation} did not converge within {passes} passes")]
    NotConverged { operation: &'static str, passes: u32 },

    #[error("Step {step} failed: {source}")]
    StepFailed {
        step: StepId,
        #[source]
        source: Box<BridgeError>,
    },

    #[error("Operator prompt failed: {0}")]
    Prompt(#[from] inquire::InquireError),
}

impl BridgeError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn input(message: impl Into<String>) -> Self {
        Self::Input(message.into())
    }

    pub fn invalid_selection(input: &str, reason: impl Into<String>) -> Self {
        Self::InvalidSelection {
            input: input.to_string(),
            reason: reason.into(),
        }
    }
}
