//! Error Handling Module
//!
//! Defines the error taxonomy for corpus curation.
//! Uses thiserror for ergonomic error definitions.
//!
//! Only `PathNotFound` and catastrophic I/O failures abort a stage. Every other
//! variant describes a single file and is recorded in the stage report while the
//! pass continues.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for corpus curation
#[derive(Error, Debug)]
pub enum CurationError {
    /// Corpus or quarantine root is missing or not a directory
    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),

    /// File could not be decoded as an image
    #[error("Failed to decode image at '{0}': {1}")]
    Decode(PathBuf, String),

    /// Valid image that exceeds the decoder's allocation limits
    #[error("Image at '{0}' is too large to decode: {1}")]
    TooLarge(PathBuf, String),

    /// File decoded, but the container carried anomalies
    #[error("Soft corruption in '{0}': {1}")]
    SoftCorruption(PathBuf, String),

    /// Save, re-encode or rename failed
    #[error("Failed to write '{0}': {1}")]
    Write(PathBuf, String),

    /// No free disambiguated name was found within the attempt bound
    #[error("Could not find a free name for '{0}' after {1} attempts")]
    CollisionUnresolved(PathBuf, usize),

    /// The embedding model could not score a file
    #[error("Scoring failed for '{0}': {1}")]
    Scoring(PathBuf, String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl From<serde_json::Error> for CurationError {
    fn from(err: serde_json::Error) -> Self {
        CurationError::Serialization(err.to_string())
    }
}

impl CurationError {
    /// Coarse classification used in per-file problem records
    pub fn kind(&self) -> ProblemKind {
        match self {
            CurationError::PathNotFound(_) => ProblemKind::PathNotFound,
            CurationError::Decode(..) => ProblemKind::Decode,
            CurationError::TooLarge(..) => ProblemKind::TooLarge,
            CurationError::SoftCorruption(..) => ProblemKind::SoftCorruption,
            CurationError::Write(..) => ProblemKind::Write,
            CurationError::CollisionUnresolved(..) => ProblemKind::CollisionUnresolved,
            CurationError::Scoring(..) => ProblemKind::Scoring,
            CurationError::Io(_) => ProblemKind::Io,
            CurationError::Config(_)
            | CurationError::Serialization(_)
            | CurationError::InvalidInput(_) => ProblemKind::Other,
        }
    }
}

/// Convenience Result type for curation operations
pub type Result<T> = std::result::Result<T, CurationError>;

/// Serializable tag for a per-file problem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProblemKind {
    PathNotFound,
    NotAnImage,
    Decode,
    TooLarge,
    SoftCorruption,
    Write,
    Delete,
    CollisionUnresolved,
    Scoring,
    Io,
    Other,
}

/// A file a stage could not process cleanly, with the reason
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileProblem {
    pub path: PathBuf,
    pub kind: ProblemKind,
    pub reason: String,
}

impl FileProblem {
    pub fn new(path: impl Into<PathBuf>, kind: ProblemKind, reason: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind,
            reason: reason.into(),
        }
    }

    /// Build a problem record from an error, logging it on the way
    pub fn from_error(path: impl Into<PathBuf>, err: &CurationError) -> Self {
        let path = path.into();
        tracing::warn!("{}: {}", path.display(), err);
        Self {
            kind: err.kind(),
            reason: err.to_string(),
            path,
        }
    }
}

/// Extension trait for adding context to errors
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, msg: &str) -> Result<T>;

    /// Add context with a closure (lazy evaluation)
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: std::error::Error> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, msg: &str) -> Result<T> {
        self.map_err(|e| CurationError::InvalidInput(format!("{}: {}", msg, e)))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| CurationError::InvalidInput(format!("{}: {}", f(), e)))
    }
}

impl<T> ResultExt<T> for Option<T> {
    fn context(self, msg: &str) -> Result<T> {
        self.ok_or_else(|| CurationError::InvalidInput(msg.to_string()))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.ok_or_else(|| CurationError::InvalidInput(f()))
    }
}
