//! # Error Module
//!
//! Error types for the image cache engine.
//!
//! ## Design Principles
//! - **Never panic** on user data - return errors instead
//! - **Include context** - paths, file names, what went wrong
//! - **Errors never cross thread boundaries as panics** - worker threads
//!   convert every failure into an `(.., error)` result or an event

use std::path::PathBuf;
use thiserror::Error;

/// Top-level engine error
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Database error: {0}")]
    Db(#[from] DbError),

    #[error("Scan error: {0}")]
    Scan(#[from] ScanError),

    #[error("Watcher error: {0}")]
    Watch(#[from] WatchError),

    #[error("Failed to build decode worker pool: {0}")]
    Pool(String),
}

/// Errors that occur while decoding an image
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Unrecognized image format: {path}")]
    UnsupportedFormat { path: PathBuf },

    #[error("Failed to decode image {path}: {reason}")]
    DecodeFailed { path: PathBuf, reason: String },

    #[error("Image has zero dimensions: {path}")]
    EmptyImage { path: PathBuf },

    #[error("Failed to encode thumbnail for {path}: {reason}")]
    EncodeFailed { path: PathBuf, reason: String },

    #[error("Failed to open image file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors that occur inside the thumbnail database layer
#[derive(Error, Debug)]
pub enum DbError {
    #[error("Failed to open thumbnail database at {path}: {reason}")]
    OpenFailed { path: PathBuf, reason: String },

    #[error("Database is busy: {0}")]
    Busy(String),

    #[error("Database query failed: {0}")]
    QueryFailed(String),

    #[error("Migration to version {version} failed: {reason}")]
    MigrationFailed { version: i64, reason: String },

    #[error("Database worker is gone")]
    WorkerGone,
}

impl DbError {
    /// Whether this error is transient lock contention worth retrying.
    pub fn is_busy(&self) -> bool {
        matches!(self, DbError::Busy(_))
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(e: rusqlite::Error) -> Self {
        match &e {
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == rusqlite::ErrorCode::DatabaseBusy
                    || err.code == rusqlite::ErrorCode::DatabaseLocked =>
            {
                DbError::Busy(e.to_string())
            }
            _ => DbError::QueryFailed(e.to_string()),
        }
    }
}

/// Errors that occur during folder scanning
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Directory not found: {path}")]
    DirectoryNotFound { path: PathBuf },

    #[error("Not a directory: {path}")]
    NotADirectory { path: PathBuf },

    #[error("Failed to read directory {path}: {source}")]
    ReadDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors that occur while watching a folder
#[derive(Error, Debug)]
pub enum WatchError {
    #[error("Failed to initialize watcher: {0}")]
    InitFailed(String),

    #[error("Failed to watch {path}: {reason}")]
    WatchFailed { path: PathBuf, reason: String },
}

/// Convenience Result type alias
pub type Result<T> = std::result::Result<T, EngineError>;
