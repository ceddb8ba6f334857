//! Rotation decisions and archive naming.
//!
//! [`RotationPolicy`] is pure: given a writer's recorded state and the
//! current time it decides whether the file must be rotated before the next
//! append, and which suffix the archived file gets. Three checks exist and a
//! writer runs them in this order:
//!
//! 1. calendar period ([`RotationPolicy::check_period`])
//! 2. line count ([`RotationPolicy::check_lines`])
//! 3. byte size ([`RotationPolicy::check_size`])
//!
//! Period archives are named `base_<slice>.ext`, line and size archives
//! `base.<YYMMDD.HHMMSS>.ext`.

use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// Timestamp format used as suffix for line and size rotations.
pub const LIMIT_SUFFIX_FORMAT: &str = "%y%m%d.%H%M%S";

/// Calendar granularity for period rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RotationPeriod {
    /// No period rotation
    None,
    /// One file per year (`YY`)
    Year,
    /// One file per month (`YYMM`)
    Month,
    /// One file per day (`YYMMDD`)
    #[default]
    Day,
    /// One file per hour (`YYMMDDHH`)
    Hour,
}

impl RotationPeriod {
    /// Parses a period name, accepting short and pinyin aliases.
    ///
    /// Unknown names fall back to [`RotationPeriod::Day`].
    #[must_use]
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "none" | "off" => Self::None,
            "year" | "y" | "nian" => Self::Year,
            "month" | "m" | "yue" => Self::Month,
            "hour" | "h" | "shi" => Self::Hour,
            _ => Self::Day,
        }
    }

    /// Returns the `strftime` pattern identifying one slice, or `None` when disabled.
    #[must_use]
    pub const fn slice_format(&self) -> Option<&'static str> {
        match self {
            Self::None => None,
            Self::Year => Some("%y"),
            Self::Month => Some("%y%m"),
            Self::Day => Some("%y%m%d"),
            Self::Hour => Some("%y%m%d%H"),
        }
    }

    /// Formats `time` at this granularity.
    #[must_use]
    pub fn slice_of(&self, time: DateTime<Local>) -> Option<String> {
        self.slice_format()
            .map(|format| time.format(format).to_string())
    }
}

impl fmt::Display for RotationPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "none",
            Self::Year => "year",
            Self::Month => "month",
            Self::Day => "day",
            Self::Hour => "hour",
        };
        f.write_str(name)
    }
}

/// Rotation thresholds shared by every writer of a sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RotationLimits {
    /// Rotate once the file reaches this many bytes (0 = unlimited).
    pub max_bytes: u64,
    /// Rotate once the file holds this many lines (0 = unlimited).
    pub max_lines: u64,
    /// Calendar slice.
    pub period: RotationPeriod,
}

impl RotationLimits {
    /// Limits that never rotate.
    #[must_use]
    pub const fn unlimited() -> Self {
        Self {
            max_bytes: 0,
            max_lines: 0,
            period: RotationPeriod::None,
        }
    }

    /// Sets the byte limit.
    #[must_use]
    pub const fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    /// Sets the line limit.
    #[must_use]
    pub const fn with_max_lines(mut self, max_lines: u64) -> Self {
        self.max_lines = max_lines;
        self
    }

    /// Sets the calendar slice.
    #[must_use]
    pub const fn with_period(mut self, period: RotationPeriod) -> Self {
        self.period = period;
        self
    }

    /// Returns true if appended lines need to be counted.
    #[must_use]
    pub const fn tracks_lines(&self) -> bool {
        self.max_lines != 0
    }
}

/// What triggered a rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RotationCause {
    /// The calendar slice changed.
    Period,
    /// The line limit was reached.
    Lines,
    /// The byte limit was reached.
    Size,
}

impl RotationCause {
    /// Separator placed between the file stem and the suffix.
    #[must_use]
    pub const fn separator(&self) -> char {
        match self {
            Self::Period => '_',
            Self::Lines | Self::Size => '.',
        }
    }
}

/// A decision to rotate, with the suffix for the archived file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rotation {
    /// Why the file is rotated.
    pub cause: RotationCause,
    /// Suffix inserted before the extension.
    pub suffix: String,
}

impl Rotation {
    /// Computes the archive path for `path`.
    ///
    /// `dir/base.ext` becomes `dir/base_<suffix>.ext` for period rotation and
    /// `dir/base.<suffix>.ext` otherwise. A path without extension gets the
    /// suffix appended to its file name.
    #[must_use]
    pub fn archive_path(&self, path: &Path) -> PathBuf {
        let mut name = OsString::new();
        if let Some(stem) = path.file_stem() {
            name.push(stem);
        }
        name.push(self.cause.separator().to_string());
        name.push(&self.suffix);
        if let Some(ext) = path.extension() {
            name.push(".");
            name.push(ext);
        }
        path.with_file_name(name)
    }
}

/// Stateless rotation decisions for one set of limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationPolicy {
    limits: RotationLimits,
}

impl RotationPolicy {
    /// Creates a policy for the given limits.
    #[must_use]
    pub const fn new(limits: RotationLimits) -> Self {
        Self { limits }
    }

    /// Returns the limits.
    #[must_use]
    pub const fn limits(&self) -> &RotationLimits {
        &self.limits
    }

    /// Rotates when `start_time` and `now` fall in different calendar slices.
    ///
    /// The suffix is the slice of `start_time`, so the archive is named after
    /// the period it covers.
    #[must_use]
    pub fn check_period(
        &self,
        start_time: DateTime<Local>,
        now: DateTime<Local>,
    ) -> Option<Rotation> {
        let started = self.limits.period.slice_of(start_time)?;
        let current = self.limits.period.slice_of(now)?;
        (started != current).then(|| Rotation {
            cause: RotationCause::Period,
            suffix: started,
        })
    }

    /// Rotates when the file already holds `max_lines` lines or more.
    #[must_use]
    pub fn check_lines(&self, start_line: u64, now: DateTime<Local>) -> Option<Rotation> {
        (self.limits.max_lines != 0 && start_line >= self.limits.max_lines)
            .then(|| limit_rotation(RotationCause::Lines, now))
    }

    /// Rotates when the file is `max_bytes` long or longer.
    #[must_use]
    pub fn check_size(&self, size: u64, now: DateTime<Local>) -> Option<Rotation> {
        (self.limits.max_bytes != 0 && size >= self.limits.max_bytes)
            .then(|| limit_rotation(RotationCause::Size, now))
    }
}

fn limit_rotation(cause: RotationCause, now: DateTime<Local>) -> Rotation {
    Rotation {
        cause,
        suffix: now.format(LIMIT_SUFFIX_FORMAT).to_string(),
    }
}
