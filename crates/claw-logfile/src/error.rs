//! Error types for the file log sink.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while opening, rotating, or writing log files.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The directory holding a log file could not be created.
    #[error("failed to create directory {}: {source}", .path.display())]
    DirectoryCreate {
        /// Directory that could not be created.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A log file could not be created or opened for append.
    #[error("failed to open {}: {source}", .path.display())]
    FileOpen {
        /// File that could not be opened.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Rotation could not move the current file to its archive name.
    #[error("failed to rename {} to {}: {source}", .from.display(), .to.display())]
    FileRename {
        /// Current log file.
        from: PathBuf,
        /// Archive name that was refused.
        to: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Appending a line failed.
    #[error("failed to write {}: {source}", .path.display())]
    FileWrite {
        /// File being appended to.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The size of the current file could not be read.
    #[error("failed to stat {}: {source}", .path.display())]
    FileStat {
        /// File being inspected.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The writer has no usable handle (never opened, failed to open, or closed).
    #[error("log file not open: {}", .path.display())]
    NotOpen {
        /// Logical path of the writer.
        path: PathBuf,
    },

    /// One or more writers failed to open; the rest are usable.
    #[error("failed to open {} log file(s): {}", .failures.len(), summarize(.failures))]
    Open {
        /// Every individual open failure.
        failures: Vec<SinkError>,
    },

    /// Invalid sink configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A forked write task panicked or was cancelled.
    #[error("write task failed: {0}")]
    Task(String),
}

fn summarize(failures: &[SinkError]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl SinkError {
    /// Returns the underlying I/O error kind, if this error wraps one.
    #[must_use]
    pub fn io_kind(&self) -> Option<std::io::ErrorKind> {
        match self {
            Self::DirectoryCreate { source, .. }
            | Self::FileOpen { source, .. }
            | Self::FileRename { source, .. }
            | Self::FileWrite { source, .. }
            | Self::FileStat { source, .. } => Some(source.kind()),
            _ => None,
        }
    }
}

/// Result type alias for sink operations.
pub type Result<T> = std::result::Result<T, SinkError>;
