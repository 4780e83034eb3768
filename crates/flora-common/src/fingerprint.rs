//! Fingerprints for the cleaned input files
//!
//! Every import run records which file it consumed. A fingerprint is the byte
//! size plus the SHA-256 digest, computed in one streaming pass.

use crate::error::{FloraError, Result};
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::{Path, PathBuf};

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Size and digest of an input file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputFingerprint {
    pub path: PathBuf,
    pub bytes: u64,
    pub sha256: String,
}

impl InputFingerprint {
    /// Fingerprint a file on disk
    ///
    /// Missing and zero-length files are rejected: neither can be a valid
    /// cleaned export.
    pub fn of_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(FloraError::InputMissing(path.to_path_buf()));
        }

        let mut file = std::fs::File::open(path)?;
        let (bytes, sha256) = digest_reader(&mut file)?;
        if bytes == 0 {
            return Err(FloraError::InputEmpty(path.to_path_buf()));
        }

        Ok(Self {
            path: path.to_path_buf(),
            bytes,
            sha256,
        })
    }

    /// Compare against a previously recorded digest
    pub fn verify(&self, expected: &str) -> Result<()> {
        if self.sha256.eq_ignore_ascii_case(expected) {
            Ok(())
        } else {
            Err(FloraError::ChecksumMismatch {
                expected: expected.to_string(),
                actual: self.sha256.clone(),
            })
        }
    }
}

/// Stream a reader through SHA-256, returning the byte count and hex digest
pub fn digest_reader<R: Read>(reader: &mut R) -> Result<(u64, String)> {
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];
    let mut total = 0u64;

    loop {
        let read = reader.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        total += read as u64;
        hasher.update(&buffer[..read]);
    }

    Ok((total, hex::encode(hasher.finalize())))
}
