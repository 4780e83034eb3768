//! Flora Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared error handling, logging and input-file utilities for the Flora
//! taxonomic bridging workspace.
//!
//! - **Error Handling**: [`FloraError`] and the [`Result`] alias
//! - **Logging**: tracing subscriber setup shared by every binary
//! - **Fingerprints**: size + SHA-256 of the cleaned input files
//!
//! # Example
//!
//! ```no_run
//! use flora_common::fingerprint::InputFingerprint;
//!
//! fn describe(path: &str) -> flora_common::Result<()> {
//!     let fingerprint = InputFingerprint::of_file(path)?;
//!     println!("{} ({} bytes)", fingerprint.sha256, fingerprint.bytes);
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod fingerprint;
pub mod logging;

// Re-export commonly used types
pub use error::{FloraError, Result};
