//! A single log file that rotates itself.
//!
//! [`RotatingFileWriter`] owns one logical path. Every write takes the
//! writer's lock, runs the [`RotationPolicy`] checks (period, lines, size),
//! rotates as many times as they demand, then appends the line. Rotation
//! closes the handle, moves the file to its archive name without replacing an
//! existing archive and opens a fresh file at the original path, all under
//! the same lock. A file removed from under an open writer is recreated on
//! the next write.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{Result, SinkError};
use crate::policy::{Rotation, RotationLimits, RotationPolicy};

/// Mutable state, only touched while holding the writer lock.
struct WriterState {
    /// Live append handle; `None` while unusable.
    handle: Option<File>,
    /// Lines in the file at open time plus lines appended since.
    start_line: u64,
    /// Time of the last (re)open.
    start_time: DateTime<Local>,
}

/// Append-only writer for one log file with rotation.
pub struct RotatingFileWriter {
    path: PathBuf,
    policy: RotationPolicy,
    state: Mutex<WriterState>,
}

impl RotatingFileWriter {
    /// Creates an unopened writer for `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, limits: RotationLimits) -> Self {
        Self {
            path: path.into(),
            policy: RotationPolicy::new(limits),
            state: Mutex::new(WriterState {
                handle: None,
                start_line: 0,
                start_time: Local::now(),
            }),
        }
    }

    /// Creates a writer and opens it immediately.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or file cannot be created or opened.
    pub fn create(path: impl Into<PathBuf>, limits: RotationLimits) -> Result<Self> {
        let writer = Self::new(path, limits);
        writer.open()?;
        Ok(writer)
    }

    /// Opens (or reopens) the file for append.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::DirectoryCreate`] if the parent directory is
    /// missing and cannot be created, or [`SinkError::FileOpen`] if the file
    /// cannot be opened or scanned.
    pub fn open(&self) -> Result<()> {
        self.open_at(Local::now())
    }

    /// Like [`open`](Self::open), recording `now` as the start time.
    ///
    /// # Errors
    ///
    /// See [`open`](Self::open).
    pub fn open_at(&self, now: DateTime<Local>) -> Result<()> {
        let mut state = self.state.lock();
        self.open_locked(&mut state, now)
    }

    /// Appends `line` followed by a newline, rotating first if required.
    ///
    /// # Errors
    ///
    /// Returns an error if a rotation fails (the line is then not written),
    /// if the writer is not open, or if the append fails.
    pub fn write(&self, line: &str) -> Result<()> {
        self.write_at(line, Local::now())
    }

    /// Like [`write`](Self::write), evaluating the rotation checks at `now`.
    ///
    /// # Errors
    ///
    /// See [`write`](Self::write).
    pub fn write_at(&self, line: &str, now: DateTime<Local>) -> Result<()> {
        let mut state = self.state.lock();
        if state.handle.is_none() {
            return Err(self.not_open());
        }
        self.reopen_if_missing(&mut state, now)?;

        if let Some(rotation) = self.policy.check_period(state.start_time, now) {
            self.rotate_locked(&mut state, &rotation, now)?;
        }
        if let Some(rotation) = self.policy.check_lines(state.start_line, now) {
            self.rotate_locked(&mut state, &rotation, now)?;
        }
        if self.policy.limits().max_bytes != 0 {
            let size = self.current_size()?;
            if let Some(rotation) = self.policy.check_size(size, now) {
                self.rotate_locked(&mut state, &rotation, now)?;
            }
        }

        let payload = format!("{line}\n");
        let handle = state.handle.as_mut().ok_or_else(|| self.not_open())?;
        handle
            .write_all(payload.as_bytes())
            .map_err(|source| SinkError::FileWrite {
                path: self.path.clone(),
                source,
            })?;

        if self.policy.limits().tracks_lines() {
            state.start_line += count_newlines(payload.as_bytes());
        }
        Ok(())
    }

    /// Rotates the file now, regardless of limits.
    ///
    /// Returns the archive path the old file was moved to.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::FileRename`] if the archive name is taken or the
    /// rename fails, or an open error if the fresh file cannot be opened.
    pub fn rotate(&self, rotation: &Rotation) -> Result<PathBuf> {
        let mut state = self.state.lock();
        if state.handle.is_none() {
            return Err(self.not_open());
        }
        self.rotate_locked(&mut state, rotation, Local::now())
    }

    /// Closes the handle. Idempotent; failures are only traced.
    pub fn close(&self) {
        let mut state = self.state.lock();
        if let Some(file) = state.handle.take() {
            if let Err(e) = file.sync_all() {
                warn!(target: "claw_logfile", path = %self.path.display(), error = %e, "sync on close failed");
            }
        }
    }

    /// Returns the logical path of this writer.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the tracked line count of the current file.
    ///
    /// Appends only advance the count while a line limit is configured.
    #[must_use]
    pub fn line_count(&self) -> u64 {
        self.state.lock().start_line
    }

    /// Returns when the current file was opened.
    #[must_use]
    pub fn started_at(&self) -> DateTime<Local> {
        self.state.lock().start_time
    }

    /// Returns true if the writer holds a usable handle.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state.lock().handle.is_some()
    }

    /// Returns the rotation limits.
    #[must_use]
    pub const fn limits(&self) -> &RotationLimits {
        self.policy.limits()
    }

    // ========== Internal Methods ==========

    fn open_locked(&self, state: &mut WriterState, now: DateTime<Local>) -> Result<()> {
        state.handle = None;

        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            if !dir.exists() {
                fs::create_dir_all(dir).map_err(|source| SinkError::DirectoryCreate {
                    path: dir.to_path_buf(),
                    source,
                })?;
            }
        }

        let file = open_append(&self.path).map_err(|source| self.open_error(source))?;
        let lines = scan_lines(&self.path).map_err(|source| self.open_error(source))?;

        state.handle = Some(file);
        state.start_line = lines;
        state.start_time = now;
        Ok(())
    }

    fn rotate_locked(
        &self,
        state: &mut WriterState,
        rotation: &Rotation,
        now: DateTime<Local>,
    ) -> Result<PathBuf> {
        let archive = rotation.archive_path(&self.path);
        drop(state.handle.take());

        if let Err(source) = move_no_clobber(&self.path, &archive) {
            // Keep appending to the same file; the next write retries the rotation.
            match open_append(&self.path) {
                Ok(file) => state.handle = Some(file),
                Err(e) => {
                    warn!(target: "claw_logfile", path = %self.path.display(), error = %e, "reopen after failed rotation failed");
                }
            }
            return Err(SinkError::FileRename {
                from: self.path.clone(),
                to: archive,
                source,
            });
        }

        debug!(
            target: "claw_logfile",
            path = %self.path.display(),
            archive = %archive.display(),
            cause = ?rotation.cause,
            "rotated log file"
        );
        self.open_locked(state, now)?;
        Ok(archive)
    }

    /// Recreates the file if it was removed behind the writer's back.
    fn reopen_if_missing(&self, state: &mut WriterState, now: DateTime<Local>) -> Result<()> {
        match fs::metadata(&self.path) {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!(target: "claw_logfile", path = %self.path.display(), "log file removed, recreating");
                self.open_locked(state, now)
            }
            Err(source) => Err(SinkError::FileStat {
                path: self.path.clone(),
                source,
            }),
        }
    }

    fn current_size(&self) -> Result<u64> {
        fs::metadata(&self.path)
            .map(|m| m.len())
            .map_err(|source| SinkError::FileStat {
                path: self.path.clone(),
                source,
            })
    }

    fn not_open(&self) -> SinkError {
        SinkError::NotOpen {
            path: self.path.clone(),
        }
    }

    fn open_error(&self, source: io::Error) -> SinkError {
        SinkError::FileOpen {
            path: self.path.clone(),
            source,
        }
    }
}

impl std::fmt::Debug for RotatingFileWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RotatingFileWriter")
            .field("path", &self.path)
            .field("limits", self.policy.limits())
            .finish_non_exhaustive()
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

/// Moves `from` to `to`, failing with `AlreadyExists` instead of replacing `to`.
fn move_no_clobber(from: &Path, to: &Path) -> io::Result<()> {
    match fs::hard_link(from, to) {
        Ok(()) => {}
        // No hard links on this filesystem: checked rename.
        Err(e) if e.kind() == io::ErrorKind::Unsupported => {
            if to.try_exists()? {
                return Err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    "archive file already exists",
                ));
            }
            return fs::rename(from, to);
        }
        Err(e) => return Err(e),
    }
    fs::remove_file(from).inspect_err(|_| {
        let _ = fs::remove_file(to);
    })
}

/// Counts `\n` bytes in the file. Runs once per open.
fn scan_lines(path: &Path) -> io::Result<u64> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut lines = 0;
    loop {
        let buf = reader.fill_buf()?;
        if buf.is_empty() {
            return Ok(lines);
        }
        lines += count_newlines(buf);
        let len = buf.len();
        reader.consume(len);
    }
}

fn count_newlines(bytes: &[u8]) -> u64 {
    bytes.iter().filter(|&&b| b == b'\n').count() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{RotationCause, RotationPeriod};
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn base_time() -> DateTime<Local> {
        Local
            .with_ymd_and_hms(2023, 4, 14, 10, 0, 0)
            .earliest()
            .expect("valid local time")
    }

    fn read_lines(path: &Path) -> Vec<String> {
        fs::read_to_string(path)
            .expect("read file")
            .lines()
            .map(str::to_string)
            .collect()
    }

    fn archives(dir: &Path, current: &Path) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = fs::read_dir(dir)
            .expect("read dir")
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p != current)
            .collect();
        files.sort();
        files
    }

    #[test]
    fn open_creates_missing_directories() {
        let dir = TempDir::new().expect("create temp dir");
        let path = dir.path().join("nested/logs/info.log");
        let writer = RotatingFileWriter::create(&path, RotationLimits::unlimited());
        assert!(writer.is_ok());
        assert!(path.exists());
    }

    #[test]
    fn open_counts_existing_lines() {
        let dir = TempDir::new().expect("create temp dir");
        let path = dir.path().join("info.log");
        fs::write(&path, "one\ntwo\nthree\n").expect("seed file");

        let writer = RotatingFileWriter::create(&path, RotationLimits::unlimited())
            .expect("open writer");
        assert_eq!(writer.line_count(), 3);
    }

    #[test]
    fn open_fails_when_directory_cannot_be_created() {
        let dir = TempDir::new().expect("create temp dir");
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, "not a directory").expect("seed file");

        let writer = RotatingFileWriter::new(blocker.join("sub/app.log"), RotationLimits::unlimited());
        let err = writer.open().expect_err("open must fail");
        assert!(matches!(err, SinkError::DirectoryCreate { .. }));
        assert!(!writer.is_open());
    }

    #[test]
    fn write_appends_lines() {
        let dir = TempDir::new().expect("create temp dir");
        let path = dir.path().join("info.log");
        let writer = RotatingFileWriter::create(&path, RotationLimits::unlimited())
            .expect("open writer");

        writer.write("first").expect("write");
        writer.write("second").expect("write");
        assert_eq!(read_lines(&path), vec!["first", "second"]);
    }

    #[test]
    fn write_before_open_fails() {
        let dir = TempDir::new().expect("create temp dir");
        let writer = RotatingFileWriter::new(dir.path().join("a.log"), RotationLimits::unlimited());
        assert!(matches!(writer.write("x"), Err(SinkError::NotOpen { .. })));
    }

    #[test]
    fn line_limit_rotates_after_n_lines() {
        let dir = TempDir::new().expect("create temp dir");
        let path = dir.path().join("info.log");
        let limits = RotationLimits::unlimited().with_max_lines(3);
        let writer = RotatingFileWriter::new(&path, limits);
        writer.open_at(base_time()).expect("open");

        for i in 0..7 {
            writer
                .write_at(&format!("line {i}"), base_time() + Duration::seconds(i))
                .expect("write");
        }

        let archived = archives(dir.path(), &path);
        assert_eq!(archived.len(), 2);
        assert_eq!(
            archived[0],
            dir.path().join(format!(
                "info.{}.log",
                (base_time() + Duration::seconds(3)).format("%y%m%d.%H%M%S")
            ))
        );
        assert_eq!(read_lines(&archived[0]), vec!["line 0", "line 1", "line 2"]);
        assert_eq!(read_lines(&archived[1]), vec!["line 3", "line 4", "line 5"]);
        assert_eq!(read_lines(&path), vec!["line 6"]);
        assert_eq!(writer.line_count(), 1);
    }

    #[test]
    fn multiline_records_count_every_newline() {
        let dir = TempDir::new().expect("create temp dir");
        let path = dir.path().join("info.log");
        let writer =
            RotatingFileWriter::create(&path, RotationLimits::unlimited().with_max_lines(100))
                .expect("open writer");

        writer.write("panic\n  at main.rs:1").expect("write");
        assert_eq!(writer.line_count(), 2);
    }

    #[test]
    fn size_limit_rotates_to_empty_file() {
        let dir = TempDir::new().expect("create temp dir");
        let path = dir.path().join("error.log");
        let limits = RotationLimits::unlimited().with_max_bytes(10);
        let writer = RotatingFileWriter::new(&path, limits);
        writer.open_at(base_time()).expect("open");

        writer.write_at("0123456789", base_time()).expect("write");
        assert_eq!(fs::metadata(&path).expect("stat").len(), 11);

        let later = base_time() + Duration::seconds(5);
        writer.write_at("next", later).expect("write");

        let archive = dir
            .path()
            .join(format!("error.{}.log", later.format("%y%m%d.%H%M%S")));
        assert_eq!(read_lines(&archive), vec!["0123456789"]);
        assert_eq!(read_lines(&path), vec!["next"]);
    }

    #[test]
    fn day_period_rotates_between_days_only() {
        let dir = TempDir::new().expect("create temp dir");
        let path = dir.path().join("error.log");
        let limits = RotationLimits::unlimited().with_period(RotationPeriod::Day);
        let writer = RotatingFileWriter::new(&path, limits);
        writer.open_at(base_time()).expect("open");

        writer.write_at("morning", base_time()).expect("write");
        writer
            .write_at("evening", base_time() + Duration::hours(8))
            .expect("write");
        assert!(archives(dir.path(), &path).is_empty());

        let tomorrow = base_time() + Duration::days(1);
        writer.write_at("tomorrow", tomorrow).expect("write");

        let archive = dir.path().join("error_230414.log");
        assert_eq!(read_lines(&archive), vec!["morning", "evening"]);
        assert_eq!(read_lines(&path), vec!["tomorrow"]);
        assert_eq!(writer.started_at(), tomorrow);
    }

    #[test]
    fn period_rotation_resets_size_check() {
        let dir = TempDir::new().expect("create temp dir");
        let path = dir.path().join("app.log");
        let limits = RotationLimits::unlimited()
            .with_period(RotationPeriod::Day)
            .with_max_bytes(4);
        let writer = RotatingFileWriter::new(&path, limits);
        writer.open_at(base_time()).expect("open");
        writer.write_at("abc", base_time()).expect("write");

        writer
            .write_at("next day", base_time() + Duration::days(1))
            .expect("write");

        assert!(dir.path().join("app_230414.log").exists());
        assert_eq!(read_lines(&path), vec!["next day"]);
    }

    #[test]
    fn rename_collision_keeps_record_out_and_writer_usable() {
        let dir = TempDir::new().expect("create temp dir");
        let path = dir.path().join("warn.log");
        let limits = RotationLimits::unlimited().with_period(RotationPeriod::Day);
        let writer = RotatingFileWriter::new(&path, limits);
        writer.open_at(base_time()).expect("open");
        writer.write_at("kept", base_time()).expect("write");

        let archive = dir.path().join("warn_230414.log");
        fs::write(&archive, "older archive\n").expect("seed archive");

        let tomorrow = base_time() + Duration::days(1);
        let err = writer.write_at("dropped", tomorrow).expect_err("collision");
        assert!(matches!(err, SinkError::FileRename { .. }));
        assert_eq!(err.io_kind(), Some(io::ErrorKind::AlreadyExists));
        assert_eq!(read_lines(&archive), vec!["older archive"]);
        assert_eq!(read_lines(&path), vec!["kept"]);
        assert!(writer.is_open());

        fs::remove_file(&archive).expect("clear collision");
        writer.write_at("retried", tomorrow).expect("write");
        assert_eq!(read_lines(&archive), vec!["kept"]);
        assert_eq!(read_lines(&path), vec!["retried"]);
    }

    #[test]
    fn removed_file_is_recreated_on_next_write() {
        let dir = TempDir::new().expect("create temp dir");
        let path = dir.path().join("info.log");
        let limits = RotationLimits::unlimited().with_max_bytes(1024).with_max_lines(10);
        let writer = RotatingFileWriter::create(&path, limits).expect("open writer");
        writer.write("before").expect("write");

        fs::remove_file(&path).expect("remove log file");
        writer.write("after").expect("write");
        writer.write("again").expect("write");

        assert_eq!(read_lines(&path), vec!["after", "again"]);
        assert_eq!(writer.line_count(), 2);
        assert!(writer.is_open());
    }

    #[test]
    fn removed_file_is_recreated_without_limits() {
        let dir = TempDir::new().expect("create temp dir");
        let path = dir.path().join("info.log");
        let writer = RotatingFileWriter::create(&path, RotationLimits::unlimited())
            .expect("open writer");

        fs::remove_file(&path).expect("remove log file");
        writer.write("kept").expect("write");
        assert_eq!(read_lines(&path), vec!["kept"]);
    }

    #[test]
    fn move_no_clobber_refuses_existing_target() {
        let dir = TempDir::new().expect("create temp dir");
        let from = dir.path().join("app.log");
        let to = dir.path().join("app_230414.log");
        fs::write(&from, "current\n").expect("seed current");
        fs::write(&to, "archived\n").expect("seed archive");

        let err = move_no_clobber(&from, &to).expect_err("target exists");
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
        assert_eq!(read_lines(&from), vec!["current"]);
        assert_eq!(read_lines(&to), vec!["archived"]);

        fs::remove_file(&to).expect("clear target");
        move_no_clobber(&from, &to).expect("move");
        assert!(!from.exists());
        assert_eq!(read_lines(&to), vec!["current"]);
    }

    #[test]
    fn manual_rotate_returns_archive_path() {
        let dir = TempDir::new().expect("create temp dir");
        let path = dir.path().join("info.log");
        let writer = RotatingFileWriter::create(&path, RotationLimits::unlimited())
            .expect("open writer");
        writer.write("before").expect("write");

        let rotation = Rotation {
            cause: RotationCause::Size,
            suffix: "manual".to_string(),
        };
        let archive = writer.rotate(&rotation).expect("rotate");
        assert_eq!(archive, dir.path().join("info.manual.log"));
        assert_eq!(read_lines(&archive), vec!["before"]);
        assert_eq!(fs::metadata(&path).expect("stat").len(), 0);
    }

    #[test]
    fn close_is_idempotent() {
        let dir = TempDir::new().expect("create temp dir");
        let writer = RotatingFileWriter::create(dir.path().join("a.log"), RotationLimits::unlimited())
            .expect("open writer");
        writer.close();
        writer.close();
        assert!(!writer.is_open());
        assert!(matches!(writer.write("late"), Err(SinkError::NotOpen { .. })));
    }

    #[test]
    fn concurrent_writers_keep_independent_counts() {
        let dir = TempDir::new().expect("create temp dir");
        let limits = RotationLimits::unlimited().with_max_lines(1_000_000);
        let a = Arc::new(
            RotatingFileWriter::create(dir.path().join("a.log"), limits).expect("open a"),
        );
        let b = Arc::new(
            RotatingFileWriter::create(dir.path().join("b.log"), limits).expect("open b"),
        );

        std::thread::scope(|s| {
            for t in 0..4 {
                let a = Arc::clone(&a);
                let b = Arc::clone(&b);
                s.spawn(move || {
                    for i in 0..50 {
                        if (i + t) % 3 == 0 {
                            b.write(&format!("b {t} {i}")).expect("write b");
                        } else {
                            a.write(&format!("a {t} {i}")).expect("write a");
                        }
                    }
                });
            }
        });

        let expected_b: u64 = (0..4)
            .map(|t| (0..50).filter(|i| (i + t) % 3 == 0).count() as u64)
            .sum();
        assert_eq!(b.line_count(), expected_b);
        assert_eq!(a.line_count(), 200 - expected_b);
        assert_eq!(read_lines(a.path()).len() as u64, a.line_count());
        assert_eq!(read_lines(b.path()).len() as u64, b.line_count());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn prop_line_archives_hold_exactly_n_lines(max in 1u64..6, writes in 1i64..30) {
            let dir = TempDir::new().expect("create temp dir");
            let path = dir.path().join("p.log");
            let writer = RotatingFileWriter::new(&path, RotationLimits::unlimited().with_max_lines(max));
            writer.open_at(base_time()).expect("open");

            for i in 0..writes {
                writer
                    .write_at(&format!("{i}"), base_time() + Duration::seconds(i))
                    .expect("write");
            }

            let archived = archives(dir.path(), &path);
            let writes = writes as u64;
            prop_assert_eq!(archived.len() as u64, (writes - 1) / max);
            for archive in &archived {
                prop_assert_eq!(read_lines(archive).len() as u64, max);
            }
            prop_assert_eq!(read_lines(&path).len() as u64, writes - (writes - 1) / max * max);
        }
    }
}
