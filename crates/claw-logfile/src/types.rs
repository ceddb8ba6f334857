//! Core types for the file log sink.
//!
//! This module provides:
//! - [`LogLevel`] — Severity levels, each of which may get its own file
//! - [`LogRecord`] — A single record handed to the sink by the host
//! - [`WriterKey`] — Key of a writer inside a sink (a level or the aggregate file)

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::error::SinkError;

/// Log severity levels, ordered from most to least verbose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Most verbose, detailed debugging information
    Trace = 0,
    /// Debugging information
    Debug = 1,
    /// General information
    Info = 2,
    /// Warning conditions
    Warn = 3,
    /// Error conditions
    Error = 4,
}

impl LogLevel {
    /// All levels, most verbose first.
    pub const ALL: [Self; 5] = [
        Self::Trace,
        Self::Debug,
        Self::Info,
        Self::Warn,
        Self::Error,
    ];

    /// Returns the lowercase name, used as the settings key and default file stem.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    /// Returns the default file name for this level (`<name>.log`).
    #[must_use]
    pub fn file_name(&self) -> String {
        format!("{}.log", self.as_str())
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = SinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            other => Err(SinkError::Config(format!("unknown log level: {other}"))),
        }
    }
}

/// Identifies one writer of a sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriterKey {
    /// The file receiving records of a single level.
    Level(LogLevel),
    /// The file receiving every record regardless of level.
    Aggregate,
}

impl fmt::Display for WriterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Level(level) => write!(f, "{level}"),
            Self::Aggregate => f.write_str("aggregate"),
        }
    }
}

/// A log record delivered by the host logging facility.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    /// When the record was created
    pub timestamp: DateTime<Local>,
    /// Severity level, selects the per-level file
    pub level: LogLevel,
    /// The log message
    pub message: String,
    /// Additional structured fields
    #[serde(default)]
    pub fields: BTreeMap<String, serde_json::Value>,
}

impl LogRecord {
    /// Creates a record stamped with the current local time.
    #[must_use]
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: Local::now(),
            level,
            message: message.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Creates a new record builder.
    #[must_use]
    pub fn builder() -> LogRecordBuilder {
        LogRecordBuilder::default()
    }
}

/// Builder for constructing log records.
#[derive(Debug, Default)]
pub struct LogRecordBuilder {
    timestamp: Option<DateTime<Local>>,
    level: Option<LogLevel>,
    message: Option<String>,
    fields: BTreeMap<String, serde_json::Value>,
}

impl LogRecordBuilder {
    /// Sets the timestamp.
    #[must_use]
    pub const fn timestamp(mut self, timestamp: DateTime<Local>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Sets the log level.
    #[must_use]
    pub const fn level(mut self, level: LogLevel) -> Self {
        self.level = Some(level);
        self
    }

    /// Sets the message.
    #[must_use]
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Adds a structured field.
    #[must_use]
    pub fn field(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Builds the record.
    ///
    /// The timestamp defaults to now, the level to [`LogLevel::Info`] and the
    /// message to an empty string.
    #[must_use]
    pub fn build(self) -> LogRecord {
        LogRecord {
            timestamp: self.timestamp.unwrap_or_else(Local::now),
            level: self.level.unwrap_or(LogLevel::Info),
            message: self.message.unwrap_or_default(),
            fields: self.fields,
        }
    }
}
