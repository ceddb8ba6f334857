//! Host-facing traits and the `file` driver.
//!
//! A host logging facility registers drivers under a name and asks them for
//! sink instances, one per named configuration. Nothing here is global: the
//! host owns whatever registry it keeps and stores [`FileDriver`] values in
//! it.

use std::future::Future;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::{DEFAULT_STORE, Settings, SinkConfig};
use crate::error::{Result, SinkError};
use crate::format::LineFormatter;
use crate::sink::FileSink;
use crate::types::LogRecord;

/// The surface a sink exposes to the host.
pub trait LogSink: Send + Sync {
    /// Opens every output.
    ///
    /// Blocks on directory creation and on scanning existing files. Async
    /// hosts should call it through `tokio::task::spawn_blocking`.
    ///
    /// # Errors
    ///
    /// Returns an error if any output failed to open.
    fn open(&self) -> Result<()>;

    /// Persists one record.
    ///
    /// # Errors
    ///
    /// Returns the first error encountered; the record is not retried.
    fn write(&self, record: &LogRecord) -> impl Future<Output = Result<()>> + Send;

    /// Closes every output. Never fails and may be called repeatedly.
    fn close(&self) -> impl Future<Output = ()> + Send;
}

/// Builds sinks from host settings.
pub trait Driver: Send + Sync {
    /// The sink type produced.
    type Sink: LogSink;

    /// Name the host registers this driver under.
    fn name(&self) -> &'static str;

    /// Creates an unopened sink for one named configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the settings are invalid or required directories
    /// cannot be created.
    fn connect(&self, settings: &Settings) -> Result<Self::Sink>;
}

/// Driver producing [`FileSink`]s.
#[derive(Debug, Clone)]
pub struct FileDriver {
    store: PathBuf,
}

impl Default for FileDriver {
    fn default() -> Self {
        Self::new(DEFAULT_STORE)
    }
}

impl FileDriver {
    /// Name of this driver.
    pub const NAME: &'static str = "file";

    /// Creates a driver whose sinks default to `store` for file locations.
    #[must_use]
    pub fn new(store: impl Into<PathBuf>) -> Self {
        Self {
            store: store.into(),
        }
    }

    /// Returns the default store directory.
    #[must_use]
    pub fn store(&self) -> &Path {
        &self.store
    }

    /// Like [`Driver::connect`], with a custom line formatter.
    ///
    /// # Errors
    ///
    /// See [`Driver::connect`].
    pub fn connect_with_formatter(
        &self,
        settings: &Settings,
        formatter: impl LineFormatter + 'static,
    ) -> Result<FileSink> {
        let config = self.resolve(settings)?;
        Ok(FileSink::with_formatter(config, formatter))
    }

    fn resolve(&self, settings: &Settings) -> Result<SinkConfig> {
        let config = SinkConfig::from_settings(settings, &self.store)?;
        create_store(&config.store)?;
        debug!(
            target: "claw_logfile",
            store = %config.store.display(),
            levels = config.level_files.len(),
            aggregate = config.output.is_some(),
            "resolved file sink config"
        );
        Ok(config)
    }
}

impl Driver for FileDriver {
    type Sink = FileSink;

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn connect(&self, settings: &Settings) -> Result<FileSink> {
        Ok(FileSink::new(self.resolve(settings)?))
    }
}

/// Creates the store directory, owner-only on unix.
fn create_store(path: &Path) -> Result<()> {
    if path.is_dir() {
        return Ok(());
    }
    let mut builder = std::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder
        .create(path)
        .map_err(|source| SinkError::DirectoryCreate {
            path: path.to_path_buf(),
            source,
        })
}
