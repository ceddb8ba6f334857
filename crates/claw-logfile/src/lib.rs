//! # claw-logfile
//!
//! File-backed log sink for Clawbernetes.
//!
//! Records are split across one file per severity level and, optionally, an
//! aggregate file receiving everything. Every file rotates on calendar
//! period, line count and byte size.
//!
//! This crate provides:
//!
//! - [`LogRecord`] / [`LogLevel`] — What the host hands to the sink
//! - [`RotationPolicy`] — Pure rotation decisions and archive naming
//! - [`RotatingFileWriter`] — One file with its counters and rotation
//! - [`FileSink`] — Per-record dispatch to level and aggregate writers
//! - [`SinkConfig`] — Settings resolution and defaults
//! - [`FileDriver`] — Factory the host registers under the name `file`
//!
//! Diagnostics about the sink itself are emitted through `tracing` under the
//! `claw_logfile` target. Hosts forwarding `tracing` events into a sink
//! should filter that target out.
//!
//! ## Example
//!
//! ```rust,no_run
//! use claw_logfile::{Driver, FileDriver, LogLevel, LogRecord, Settings};
//!
//! # async fn run() -> claw_logfile::Result<()> {
//! let mut settings = Settings::new();
//! settings.insert("output".into(), true.into());
//! settings.insert("maxsize".into(), "10MB".into());
//! settings.insert("slice".into(), "day".into());
//!
//! let sink = FileDriver::new("/var/log/app").connect(&settings)?;
//! sink.open()?;
//! sink.write(&LogRecord::new(LogLevel::Error, "disk full")).await?;
//! sink.close().await;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod driver;
pub mod error;
pub mod format;
pub mod policy;
pub mod sink;
pub mod types;
pub mod writer;

// Re-export main types
pub use config::{parse_size, Settings, SinkConfig};
pub use driver::{Driver, FileDriver, LogSink};
pub use error::{Result, SinkError};
pub use format::{LineFormatter, TextFormatter};
pub use policy::{Rotation, RotationCause, RotationLimits, RotationPeriod, RotationPolicy};
pub use sink::{FileSink, CLOSE_GRACE};
pub use types::{LogLevel, LogRecord, LogRecordBuilder, WriterKey};
pub use writer::RotatingFileWriter;
