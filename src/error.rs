// src/error.rs

//! Error taxonomy for the resolution and installation engine
//!
//! Every fallible operation in the crate returns [`Result`]. The variants
//! mirror the pipeline stages: feed parsing ([`Error::Format`]), lookup
//! ([`Error::NotFound`]), transport ([`Error::Network`]), integrity
//! ([`Error::HashMismatch`]) and unpacking ([`Error::Extraction`]).

use std::path::PathBuf;
use thiserror::Error;

use crate::ecosystem::Ecosystem;
use crate::hash::HashAlgorithm;

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Feed could not be decoded (bad separator, missing mandatory field,
    /// decompression failure)
    #[error("Format error: {0}")]
    Format(String),

    /// No record and no provider for the requested name
    #[error("Not found: {0}")]
    NotFound(String),

    /// Transient transport failure; safe to retry
    #[error("Network error: {0}")]
    Network(String),

    /// Artifact digest does not match the index
    #[error("{algorithm} mismatch for {}: expected {expected}, got {actual}", path.display())]
    HashMismatch {
        path: PathBuf,
        algorithm: HashAlgorithm,
        expected: String,
        actual: String,
    },

    /// Corrupt archive, unsupported entry, or unrecoverable write failure
    #[error("Extraction failed: {0}")]
    Extraction(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Path traversal attempt: {0}")]
    PathTraversal(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// The backend cannot perform the requested operation
    #[error("{operation} is not supported by the {ecosystem} backend")]
    Unsupported {
        ecosystem: Ecosystem,
        operation: &'static str,
    },

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// True for failures worth retrying without changing the request
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Format(format!("invalid JSON: {e}"))
    }
}

impl From<quick_xml::Error> for Error {
    fn from(e: quick_xml::Error) -> Self {
        Self::Format(format!("invalid XML: {e}"))
    }
}

impl From<zip::result::ZipError> for Error {
    fn from(e: zip::result::ZipError) -> Self {
        Self::Extraction(format!("zip: {e}"))
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Self::Config(e.to_string())
    }
}

impl From<crate::compression::CompressionError> for Error {
    fn from(e: crate::compression::CompressionError) -> Self {
        Self::Format(e.to_string())
    }
}
