//! Turning records into text lines.

use std::fmt::Write as _;

use crate::types::LogRecord;

/// Produces the exact text line persisted for a record.
///
/// The returned line must not carry a trailing newline; writers add one.
pub trait LineFormatter: Send + Sync {
    /// Formats a record.
    fn format(&self, record: &LogRecord) -> String;
}

impl<F> LineFormatter for F
where
    F: Fn(&LogRecord) -> String + Send + Sync,
{
    fn format(&self, record: &LogRecord) -> String {
        self(record)
    }
}

/// Default formatter: `2023-04-14 10:00:00.000 [ERROR] message key=value`.
#[derive(Debug, Clone)]
pub struct TextFormatter {
    timestamp_format: String,
}

impl Default for TextFormatter {
    fn default() -> Self {
        Self {
            timestamp_format: "%Y-%m-%d %H:%M:%S%.3f".to_string(),
        }
    }
}

impl TextFormatter {
    /// Creates a formatter with the default timestamp layout.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses a custom `strftime` layout for timestamps.
    #[must_use]
    pub fn with_timestamp_format(mut self, format: impl Into<String>) -> Self {
        self.timestamp_format = format.into();
        self
    }
}

impl LineFormatter for TextFormatter {
    fn format(&self, record: &LogRecord) -> String {
        let mut line = format!(
            "{} [{}] {}",
            record.timestamp.format(&self.timestamp_format),
            record.level.as_str().to_ascii_uppercase(),
            record.message
        );
        for (key, value) in &record.fields {
            // Strings print bare, everything else as JSON.
            let _ = match value {
                serde_json::Value::String(s) => write!(line, " {key}={s}"),
                other => write!(line, " {key}={other}"),
            };
        }
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LogLevel;
    use chrono::{Local, TimeZone};

    fn record() -> LogRecord {
        LogRecord::builder()
            .timestamp(
                Local
                    .with_ymd_and_hms(2023, 4, 14, 10, 0, 0)
                    .earliest()
                    .expect("valid local time"),
            )
            .level(LogLevel::Error)
            .message("disk full")
            .build()
    }

    #[test]
    fn text_formatter_default_layout() {
        let line = TextFormatter::new().format(&record());
        assert_eq!(line, "2023-04-14 10:00:00.000 [ERROR] disk full");
    }

    #[test]
    fn text_formatter_appends_fields_sorted() {
        let mut rec = record();
        rec.fields.insert("free".into(), serde_json::json!(0));
        rec.fields.insert("device".into(), serde_json::json!("sda1"));
        let line = TextFormatter::new().format(&rec);
        assert!(line.ends_with("disk full device=sda1 free=0"));
    }

    #[test]
    fn text_formatter_custom_timestamp() {
        let line = TextFormatter::new()
            .with_timestamp_format("%H:%M")
            .format(&record());
        assert_eq!(line, "10:00 [ERROR] disk full");
    }

    #[test]
    fn closures_are_formatters() {
        let formatter = |r: &LogRecord| r.message.clone();
        assert_eq!(LineFormatter::format(&formatter, &record()), "disk full");
    }
}
