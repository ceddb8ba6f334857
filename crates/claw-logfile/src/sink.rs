//! The file sink: one writer per level plus an optional aggregate writer.
//!
//! Each [`FileSink::write`] formats the record once and forks at most two
//! blocking writes, one to the aggregate file and one to the file of the
//! record's level, then waits for both. Writers serialise their own callers,
//! so records for the same file stay ordered while different files proceed
//! in parallel.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::config::SinkConfig;
use crate::driver::LogSink;
use crate::error::{Result, SinkError};
use crate::format::{LineFormatter, TextFormatter};
use crate::types::{LogRecord, WriterKey};
use crate::writer::RotatingFileWriter;

/// Pause before closing so writes forked by the last `write` call can land.
///
/// Advisory only: nothing tracks whether those writes have finished.
pub const CLOSE_GRACE: Duration = Duration::from_micros(100);

type Writers = HashMap<WriterKey, Arc<RotatingFileWriter>>;

/// Log sink persisting records to per-level and aggregate files.
pub struct FileSink {
    config: SinkConfig,
    formatter: Arc<dyn LineFormatter>,
    /// `None` until opened and after close.
    writers: RwLock<Option<Writers>>,
}

impl FileSink {
    /// Creates an unopened sink using [`TextFormatter`].
    #[must_use]
    pub fn new(config: SinkConfig) -> Self {
        Self::with_formatter(config, TextFormatter::default())
    }

    /// Creates an unopened sink with a custom formatter.
    #[must_use]
    pub fn with_formatter(config: SinkConfig, formatter: impl LineFormatter + 'static) -> Self {
        Self {
            config,
            formatter: Arc::new(formatter),
            writers: RwLock::new(None),
        }
    }

    /// Opens a writer for every configured file.
    ///
    /// A failing file does not stop the others from opening. Its writer is
    /// still registered, so records routed to it fail with
    /// [`SinkError::NotOpen`] instead of vanishing. Reopening an open sink
    /// closes the previous writers first.
    ///
    /// This is blocking file I/O; see [`LogSink::open`].
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::Open`] listing every file that failed to open.
    pub fn open(&self) -> Result<()> {
        let limits = self.config.limits;
        let mut writers = Writers::new();
        let mut failures = Vec::new();

        for (key, path) in self.config.targets() {
            let writer = Arc::new(RotatingFileWriter::new(path, limits));
            if let Err(e) = writer.open() {
                warn!(target: "claw_logfile", %key, path = %writer.path().display(), error = %e, "failed to open log file");
                failures.push(e);
            }
            writers.insert(key, writer);
        }

        let previous = self.writers.write().replace(writers);
        if let Some(previous) = previous {
            previous.values().for_each(|w| w.close());
        }

        debug!(
            target: "claw_logfile",
            store = %self.config.store.display(),
            files = self.config.targets().len(),
            failed = failures.len(),
            "opened file sink"
        );

        if failures.is_empty() {
            Ok(())
        } else {
            Err(SinkError::Open { failures })
        }
    }

    /// Writes a record to the aggregate file and to its level file.
    ///
    /// Both writes run concurrently and are awaited together. Files that are
    /// not configured are skipped. If both fail, the aggregate file's error
    /// is returned.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::NotOpen`] if the sink is not open, otherwise the
    /// first error of the aggregate write, then of the level write.
    pub async fn write(&self, record: &LogRecord) -> Result<()> {
        let (aggregate, level) = {
            let guard = self.writers.read();
            let writers = guard.as_ref().ok_or_else(|| SinkError::NotOpen {
                path: self.config.store.clone(),
            })?;
            (
                writers.get(&WriterKey::Aggregate).cloned(),
                writers.get(&WriterKey::Level(record.level)).cloned(),
            )
        };

        let line: Arc<str> = Arc::from(self.formatter.format(record));
        let (aggregate_result, level_result) = tokio::join!(
            dispatch(aggregate, Arc::clone(&line)),
            dispatch(level, line)
        );

        aggregate_result?;
        level_result
    }

    /// Closes every writer after [`CLOSE_GRACE`]. Idempotent.
    pub async fn close(&self) {
        tokio::time::sleep(CLOSE_GRACE).await;

        let writers = self.writers.write().take();
        if let Some(writers) = writers {
            writers.values().for_each(|w| w.close());
            debug!(target: "claw_logfile", files = writers.len(), "closed file sink");
        }
    }

    /// Returns the writer registered under `key`, if the sink is open.
    #[must_use]
    pub fn writer(&self, key: WriterKey) -> Option<Arc<RotatingFileWriter>> {
        self.writers.read().as_ref()?.get(&key).cloned()
    }

    /// Returns true between a successful `open` and `close`.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.writers.read().is_some()
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &SinkConfig {
        &self.config
    }
}

impl std::fmt::Debug for FileSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSink")
            .field("config", &self.config)
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}

async fn dispatch(writer: Option<Arc<RotatingFileWriter>>, line: Arc<str>) -> Result<()> {
    let Some(writer) = writer else {
        return Ok(());
    };
    tokio::task::spawn_blocking(move || writer.write(&line))
        .await
        .map_err(|e| SinkError::Task(e.to_string()))?
}

impl LogSink for FileSink {
    fn open(&self) -> Result<()> {
        FileSink::open(self)
    }

    async fn write(&self, record: &LogRecord) -> Result<()> {
        FileSink::write(self, record).await
    }

    async fn close(&self) {
        FileSink::close(self).await;
    }
}
