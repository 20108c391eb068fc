//! Error types for the access-log middleware
//!
//! Construction errors (directory, file) are returned to the caller, who must
//! not start serving without a working sink. Write and rotation errors stop the
//! background writer for good; they are reported loudly and surface again from
//! [`crate::AccessLog::flush`].

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Main error type for access-log operations
#[derive(Error, Debug)]
pub enum AccessLogError {
    /// The directory holding the log file could not be created
    #[error("cannot create log directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The log file could not be opened for appending
    #[error("cannot open log file {path}: {source}")]
    OpenFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Appending a line to the active log file failed
    #[error("cannot write access log {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Renaming the active file or reopening a fresh one failed
    #[error("failed to rotate access log {path}: {source}")]
    Rotate {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The sink no longer accepts lines (closed, or its writer stopped)
    #[error("access log sink is closed")]
    SinkClosed,

    /// The background writer thread could not be started
    #[error("cannot spawn access log writer: {0}")]
    Spawn(#[source] io::Error),

    /// The background writer thread panicked
    #[error("access log writer panicked")]
    WriterPanicked,

    /// JSON configuration could not be parsed
    #[error("invalid access log configuration: {0}")]
    Config(#[from] serde_json::Error),
}
