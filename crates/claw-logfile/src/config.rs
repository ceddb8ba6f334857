//! Sink configuration and resolution from host settings.
//!
//! The host hands every sink a loosely typed settings map. This module turns
//! it into a validated [`SinkConfig`]:
//!
//! | key                 | meaning                                                 |
//! |---------------------|---------------------------------------------------------|
//! | `store`             | base directory for default file names                   |
//! | `<level>`           | path string, `true` for `<store>/<level>.log`, `false` to disable |
//! | `output`            | aggregate file: path string or `true` for `<store>/output.log` |
//! | `maxsize`, `weight` | byte limit, integer or size string such as `"100MB"`    |
//! | `maxline`, `height` | line limit                                              |
//! | `slice`             | calendar period (`year`, `month`, `day`, `hour`, `none`) |

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::error::{Result, SinkError};
use crate::policy::{RotationLimits, RotationPeriod};
use crate::types::{LogLevel, WriterKey};

/// Settings map as delivered by the host.
pub type Settings = HashMap<String, Value>;

/// Default base directory for log files.
pub const DEFAULT_STORE: &str = "store/logs";

/// Default byte limit (100 MiB).
pub const DEFAULT_MAX_BYTES: u64 = 100 * 1024 * 1024;

/// Default line limit.
pub const DEFAULT_MAX_LINES: u64 = 1_000_000;

/// File name of the aggregate file when `output` is `true`.
pub const DEFAULT_OUTPUT_FILE: &str = "output.log";

const MAX_SIZE_KEYS: [&str; 2] = ["maxsize", "weight"];
const MAX_LINE_KEYS: [&str; 2] = ["maxline", "height"];

/// Resolved configuration of a file sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkConfig {
    /// Base directory for default file names.
    pub store: PathBuf,
    /// Per-level files. Levels missing here get no file.
    pub level_files: BTreeMap<LogLevel, PathBuf>,
    /// Aggregate file receiving every record.
    pub output: Option<PathBuf>,
    /// Rotation thresholds shared by all files.
    pub limits: RotationLimits,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self::new(DEFAULT_STORE)
    }
}

impl SinkConfig {
    /// Creates a config with one default file per level under `store`.
    #[must_use]
    pub fn new(store: impl Into<PathBuf>) -> Self {
        let store = store.into();
        let level_files = LogLevel::ALL
            .iter()
            .map(|level| (*level, store.join(level.file_name())))
            .collect();
        Self {
            store,
            level_files,
            output: None,
            limits: RotationLimits {
                max_bytes: DEFAULT_MAX_BYTES,
                max_lines: DEFAULT_MAX_LINES,
                period: RotationPeriod::Day,
            },
        }
    }

    /// Sets the file for one level.
    #[must_use]
    pub fn with_level_file(mut self, level: LogLevel, path: impl Into<PathBuf>) -> Self {
        self.level_files.insert(level, path.into());
        self
    }

    /// Disables the file of one level.
    #[must_use]
    pub fn without_level(mut self, level: LogLevel) -> Self {
        self.level_files.remove(&level);
        self
    }

    /// Disables every per-level file.
    #[must_use]
    pub fn without_level_files(mut self) -> Self {
        self.level_files.clear();
        self
    }

    /// Sets the aggregate file.
    #[must_use]
    pub fn with_output(mut self, path: impl Into<PathBuf>) -> Self {
        self.output = Some(path.into());
        self
    }

    /// Sets the rotation limits.
    #[must_use]
    pub const fn with_limits(mut self, limits: RotationLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Returns every writer this config asks for.
    #[must_use]
    pub fn targets(&self) -> Vec<(WriterKey, PathBuf)> {
        self.level_files
            .iter()
            .map(|(level, path)| (WriterKey::Level(*level), path.clone()))
            .chain(self.output.iter().map(|p| (WriterKey::Aggregate, p.clone())))
            .collect()
    }

    /// Resolves a config from host settings.
    ///
    /// `default_store` is used when the settings carry no `store`.
    /// Non-positive size and line limits keep the defaults.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::Config`] for values of the wrong type or
    /// unparseable sizes.
    pub fn from_settings(settings: &Settings, default_store: &Path) -> Result<Self> {
        let store = match settings.get("store") {
            Some(Value::String(s)) if !s.is_empty() => PathBuf::from(s),
            None | Some(Value::Null | Value::String(_)) => default_store.to_path_buf(),
            Some(other) => return Err(type_error("store", "a string", other)),
        };

        let mut config = Self::new(&store);

        for level in LogLevel::ALL {
            let key = level.as_str();
            match settings.get(key) {
                Some(Value::String(s)) if !s.is_empty() => {
                    config.level_files.insert(level, PathBuf::from(s));
                }
                Some(Value::Bool(false)) => {
                    config.level_files.remove(&level);
                }
                None | Some(Value::Null | Value::Bool(true) | Value::String(_)) => {}
                Some(other) => return Err(type_error(key, "a path or boolean", other)),
            }
        }

        config.output = match settings.get("output") {
            Some(Value::String(s)) if !s.is_empty() => Some(PathBuf::from(s)),
            Some(Value::Bool(true)) => Some(store.join(DEFAULT_OUTPUT_FILE)),
            None | Some(Value::Null | Value::Bool(false) | Value::String(_)) => None,
            Some(other) => return Err(type_error("output", "a path or boolean", other)),
        };

        if let Some((key, value)) = first_present(settings, &MAX_SIZE_KEYS) {
            let size = match value {
                Value::String(s) => parse_size(s)?,
                Value::Number(_) => number(key, value)?,
                other => return Err(type_error(key, "a size", other)),
            };
            if size > 0 {
                config.limits.max_bytes = size;
            }
        }

        if let Some((key, value)) = first_present(settings, &MAX_LINE_KEYS) {
            let lines = number(key, value)?;
            if lines > 0 {
                config.limits.max_lines = lines;
            }
        }

        match settings.get("slice") {
            Some(Value::String(s)) if !s.is_empty() => {
                config.limits.period = RotationPeriod::parse(s);
            }
            None | Some(Value::Null | Value::String(_)) => {}
            Some(other) => return Err(type_error("slice", "a string", other)),
        }

        Ok(config)
    }
}

/// Parses a human size such as `512`, `64KB`, `1.5G` or `100 MiB`.
///
/// Units are base 1024 and case-insensitive.
///
/// # Errors
///
/// Returns [`SinkError::Config`] if the number or unit is invalid.
pub fn parse_size(input: &str) -> Result<u64> {
    let trimmed = input.trim();
    let split = trimmed
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(trimmed.len());
    let (digits, unit) = trimmed.split_at(split);

    let value: f64 = digits
        .parse()
        .map_err(|_| SinkError::Config(format!("invalid size: {input:?}")))?;

    let multiplier: u64 = match unit.trim().to_ascii_uppercase().as_str() {
        "" | "B" => 1,
        "K" | "KB" | "KIB" => 1 << 10,
        "M" | "MB" | "MIB" => 1 << 20,
        "G" | "GB" | "GIB" => 1 << 30,
        "T" | "TB" | "TIB" => 1 << 40,
        other => return Err(SinkError::Config(format!("unknown size unit: {other:?}"))),
    };

    let bytes = (value * multiplier as f64).round();
    if !bytes.is_finite() || bytes > u64::MAX as f64 {
        return Err(SinkError::Config(format!("size out of range: {input:?}")));
    }
    Ok(bytes as u64)
}

fn first_present<'a>(settings: &'a Settings, keys: &[&'static str]) -> Option<(&'static str, &'a Value)> {
    keys.iter()
        .find_map(|key| settings.get(*key).filter(|v| !v.is_null()).map(|v| (*key, v)))
}

fn number(key: &str, value: &Value) -> Result<u64> {
    match value {
        // Negative and fractional values read as 0 and keep the default.
        Value::Number(n) => Ok(n.as_u64().unwrap_or(0)),
        other => Err(type_error(key, "an integer", other)),
    }
}

fn type_error(key: &str, expected: &str, got: &Value) -> SinkError {
    SinkError::Config(format!("{key} must be {expected}, got {got}"))
}
