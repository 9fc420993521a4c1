//! Error types for the journal-memos application.
//!
//! This module defines custom error types that categorize different failures
//! that can occur while reading, appending, editing and deleting memos.
//! Malformed memo blocks are deliberately absent: they are skipped during
//! parsing and never surface as errors.

use std::io;

use thiserror::Error;

/// The main error type for the journal-memos application.
#[derive(Error, Debug)]
pub enum MemoError {
    /// Errors related to file I/O operations.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Errors related to serialization/deserialization operations.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Errors raised by the file system watcher.
    #[error("Watcher error: {0}")]
    Watcher(#[from] notify::Error),

    /// No block in the document matched the target memo, neither by offset
    /// nor by its created label, content and attachments.
    #[error("Memo not found: {id}")]
    MemoNotFound { id: String },

    /// The memo identifier is not of the form `path:offset`.
    #[error("Invalid memo id: {id}")]
    InvalidMemoId { id: String },

    /// A date key that is not a valid `yyyy-MM-dd` calendar date.
    #[error("Invalid date key: {key}")]
    InvalidDateKey { key: String },

    /// Invalid memo block structure.
    #[error("Invalid memo format: {message}")]
    InvalidFormat { message: String },

    /// Memo content was empty after normalization.
    #[error("Memo content is empty")]
    EmptyContent,

    /// A path segment that should be a folder already exists as a file.
    #[error("Path exists and is not a folder: {path}")]
    NotAFolder { path: String },

    /// file not found
    #[error("File not found: {file_path}")]
    FileNotFound { file_path: String },

    /// Refused to overwrite an existing file.
    #[error("File already exists: {file_path}")]
    FileAlreadyExists { file_path: String },

    /// Invalid glob or regex built from a path template.
    #[error("Invalid pattern: {message}")]
    InvalidPattern { message: String },

    /// Errors related to configuration.
    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    /// for mutex lock acquisition issues
    #[error("{message}")]
    LockAcquisitionFailed { message: String },

    #[error("{message}")]
    EditorError { message: String },

    /// Generic application error with a custom message.
    #[error("{message}")]
    ApplicationError { message: String },
}

impl From<globset::Error> for MemoError {
    fn from(err: globset::Error) -> Self {
        MemoError::InvalidPattern {
            message: err.to_string(),
        }
    }
}

impl From<regex::Error> for MemoError {
    fn from(err: regex::Error) -> Self {
        MemoError::InvalidPattern {
            message: err.to_string(),
        }
    }
}
