//! The rotating file transport.
//!
//! [`RotatingFileTransport`] owns the active file of one file family and
//! decides, on every write, whether the file must rotate first. Writes are
//! serialized by a FIFO async mutex, so callers that arrive while the first
//! file is still opening wait their turn and are written in arrival order.
//!
//! Retention and archiving of retired files run as tracked background tasks.
//! A write returns once its own bytes are flushed, not when the rotation
//! side effects finish; [`RotatingFileTransport::wait_background`] awaits
//! those.

use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio_util::task::TaskTracker;

use crate::archive::{Archiver, archive_path};
use crate::audit::AuditFile;
use crate::clock::{Clock, SystemClock};
use crate::config::{FileSettings, TransportConfig};
use crate::error::{Result, RotateError};
use crate::events::{EventBus, EventStream, TransportEvent};
use crate::pattern::RotationKey;
use crate::query::{QueryOptions, query_family};
use crate::retention::{LiveFiles, RetentionManager, list_family};
use crate::size::should_rotate;

/// Lifecycle state of a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportState {
    /// No file is open yet.
    Closed,
    /// The first file is being opened.
    Opening,
    /// Writes go to the active file.
    Open,
    /// The active file is being replaced.
    Rotating,
    /// Opening a file failed too often; writes are refused.
    Failed,
    /// [`RotatingFileTransport::close`] was called.
    ShutDown,
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Closed => "closed",
            Self::Opening => "opening",
            Self::Open => "open",
            Self::Rotating => "rotating",
            Self::Failed => "failed",
            Self::ShutDown => "shut-down",
        };
        f.write_str(name)
    }
}

/// The file currently written to.
#[derive(Debug)]
struct ActiveFile {
    path: PathBuf,
    file: File,
    size: u64,
    key: RotationKey,
    seq: u32,
}

impl ActiveFile {
    async fn write(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.file.write_all(bytes).await?;
        self.file.flush().await?;
        self.size += bytes.len() as u64;
        Ok(())
    }
}

/// Where lines go.
pub enum Sink {
    /// A rotating file family described by the config.
    File,
    /// A caller-supplied writer. No rotation, retention or query.
    Stream(Box<dyn AsyncWrite + Send + Unpin>),
}

impl fmt::Debug for Sink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File => f.write_str("File"),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

enum Output {
    File(Option<ActiveFile>),
    Stream(Box<dyn AsyncWrite + Send + Unpin>),
}

/// Everything needed to manage a family off the write path.
struct Family {
    settings: FileSettings,
    audit: Option<Arc<AuditFile>>,
    retention: RetentionManager,
    archiver: Archiver,
    // Claimed before each open; read by retention after it lists the directory.
    live: Arc<LiveFiles>,
    // One maintenance pass at a time.
    maintenance: Mutex<()>,
}

impl Family {
    fn path_for(&self, key: &RotationKey, seq: u32) -> PathBuf {
        self.settings
            .dirname
            .join(self.settings.template.file_name(key, seq))
    }
}

#[derive(Debug)]
struct Status {
    state: TransportState,
    current: Option<PathBuf>,
    failure: Option<String>,
}

/// A transport that appends lines to a rotating file family.
pub struct RotatingFileTransport {
    config: TransportConfig,
    family: Option<Arc<Family>>,
    clock: Arc<dyn Clock>,
    events: EventBus,
    status: RwLock<Status>,
    output: Mutex<Output>,
    background: TaskTracker,
}

impl fmt::Debug for RotatingFileTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RotatingFileTransport")
            .field("config", &self.config)
            .field("status", &*self.status.read())
            .finish_non_exhaustive()
    }
}

impl RotatingFileTransport {
    /// Creates a file transport using the system clock.
    ///
    /// No file is opened until the first write.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: TransportConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Creates a file transport using `clock` for rotation decisions.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn with_clock(config: TransportConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        Self::with_sink(config, Sink::File, clock)
    }

    /// Creates a pass-through transport writing to `stream`.
    ///
    /// # Errors
    ///
    /// Returns an error if the config also names a file, a directory or a
    /// size limit.
    pub fn with_stream(
        config: TransportConfig,
        stream: Box<dyn AsyncWrite + Send + Unpin>,
    ) -> Result<Self> {
        Self::with_sink(config, Sink::Stream(stream), Arc::new(SystemClock))
    }

    /// Creates a transport for an explicit sink.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid for the sink.
    pub fn with_sink(config: TransportConfig, sink: Sink, clock: Arc<dyn Clock>) -> Result<Self> {
        let events = EventBus::new(config.event_buffer);

        let (family, output) = match sink {
            Sink::Stream(stream) => {
                config.check_stream_compatible()?;
                (None, Output::Stream(stream))
            }
            Sink::File => {
                let settings = config.file_settings()?;
                let audit = settings
                    .audit_path
                    .as_ref()
                    .map(|path| Arc::new(AuditFile::new(path)));
                let live = Arc::new(LiveFiles::new());
                let retention = RetentionManager::new(
                    settings.dirname.clone(),
                    settings.template.clone(),
                    config.retention,
                    audit.clone(),
                    Arc::clone(&live),
                    events.clone(),
                );
                let family = Family {
                    settings,
                    audit,
                    retention,
                    archiver: Archiver::new(events.clone()),
                    live,
                    maintenance: Mutex::new(()),
                };
                (Some(Arc::new(family)), Output::File(None))
            }
        };

        Ok(Self {
            config,
            family,
            clock,
            events,
            status: RwLock::new(Status {
                state: TransportState::Closed,
                current: None,
                failure: None,
            }),
            output: Mutex::new(output),
            background: TaskTracker::new(),
        })
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Returns the lifecycle state.
    #[must_use]
    pub fn state(&self) -> TransportState {
        self.status.read().state
    }

    /// Returns the path of the active file, if one is open.
    #[must_use]
    pub fn current_file(&self) -> Option<PathBuf> {
        self.status.read().current.clone()
    }

    /// Subscribes to lifecycle events.
    #[must_use]
    pub fn subscribe(&self) -> EventStream {
        self.events.subscribe()
    }

    /// Query options for the last 24 hours according to this transport's clock.
    #[must_use]
    pub fn query_options(&self) -> QueryOptions {
        QueryOptions::ending_at(self.clock.now())
    }

    /// Appends `line` followed by the configured line terminator.
    ///
    /// Rotates first if the active file's key has expired or the file has
    /// reached its size limit.
    ///
    /// # Errors
    ///
    /// Returns [`RotateError::Failed`] once the transport has given up on
    /// opening files, [`RotateError::ShutDown`] after [`close`](Self::close),
    /// and an I/O error if the write itself fails.
    pub async fn log(&self, line: &str) -> Result<()> {
        self.check_accepting()?;
        let mut output = self.output.lock().await;
        // The transport may have failed or closed while we queued.
        self.check_accepting()?;

        let mut bytes = Vec::with_capacity(line.len() + self.config.eol.len());
        bytes.extend_from_slice(line.as_bytes());
        bytes.extend_from_slice(self.config.eol.as_bytes());

        match &mut *output {
            Output::Stream(stream) => {
                stream.write_all(&bytes).await?;
                stream.flush().await?;
                Ok(())
            }
            Output::File(slot) => {
                let Some(family) = &self.family else {
                    return Err(RotateError::Config("transport has no file family".to_string()));
                };
                self.write_file(family, slot, &bytes).await
            }
        }
    }

    /// Serializes `record` as one JSON line and appends it.
    ///
    /// # Errors
    ///
    /// Same as [`log`](Self::log), plus serialization failures.
    pub async fn log_json(&self, record: &serde_json::Value) -> Result<()> {
        let line = serde_json::to_string(record)?;
        self.log(&line).await
    }

    async fn write_file(
        &self,
        family: &Arc<Family>,
        slot: &mut Option<ActiveFile>,
        bytes: &[u8],
    ) -> Result<()> {
        let now = self.clock.now();

        let needs_rotation = slot.as_ref().is_some_and(|active| {
            family
                .settings
                .template
                .pattern()
                .has_expired(&active.key, now, self.config.utc)
                || should_rotate(active.size, bytes.len() as u64, self.config.max_size)
        });

        if slot.is_none() {
            self.set_state(TransportState::Opening);
            let key = family.settings.template.resolve(now, self.config.utc);
            let seq = self.first_seq(family, &key).await;
            let active = self.open(family, key, seq, now).await?;
            self.install(slot, active);
            self.spawn_maintenance(family, None, now);
        } else if needs_rotation {
            self.set_state(TransportState::Rotating);
            self.rotate(family, slot, now).await?;
        }

        let Some(active) = slot.as_mut() else {
            return Err(RotateError::Failed("no active file".to_string()));
        };
        if let Err(e) = active.write(bytes).await {
            tracing::warn!(path = %active.path.display(), error = %e, "write failed, reopening on next log");
            *slot = None;
            self.status.write().current = None;
            self.set_state(TransportState::Closed);
            return Err(e.into());
        }
        Ok(())
    }

    async fn rotate(
        &self,
        family: &Arc<Family>,
        slot: &mut Option<ActiveFile>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let Some(mut old) = slot.take() else {
            return Ok(());
        };
        if let Err(e) = old.file.flush().await {
            self.events
                .error(format!("failed to flush {}: {e}", old.path.display()));
        }
        self.status.write().current = None;

        let key = family.settings.template.resolve(now, self.config.utc);
        let seq = if key == old.key {
            self.free_seq(family, &key, old.seq + 1).await
        } else {
            self.first_seq(family, &key).await
        };
        let old_path = old.path.clone();
        drop(old);

        let active = self.open(family, key, seq, now).await?;
        self.events.emit(TransportEvent::Rotate {
            old_path: old_path.clone(),
            new_path: active.path.clone(),
        });
        self.install(slot, active);
        self.spawn_maintenance(family, Some(old_path), now);
        Ok(())
    }

    fn install(&self, slot: &mut Option<ActiveFile>, active: ActiveFile) {
        let mut status = self.status.write();
        status.current = Some(active.path.clone());
        status.state = TransportState::Open;
        *slot = Some(active);
    }

    /// Highest existing sequence for `key` that still has room.
    async fn first_seq(&self, family: &Arc<Family>, key: &RotationKey) -> u32 {
        let listing = {
            let family = Arc::clone(family);
            tokio::task::spawn_blocking(move || {
                list_family(&family.settings.dirname, &family.settings.template, None)
            })
            .await
        };
        let highest = match listing {
            Ok(Ok(members)) => members
                .iter()
                .filter(|m| m.key == key.as_str())
                .map(|m| m.seq)
                .max()
                .unwrap_or(0),
            Ok(Err(e)) => {
                tracing::debug!(error = %e, "could not list family, starting at sequence 0");
                0
            }
            Err(e) => {
                tracing::debug!(error = %e, "family listing task failed");
                0
            }
        };
        self.free_seq(family, key, highest).await
    }

    /// First sequence at or after `seq` that is neither archived nor full.
    async fn free_seq(&self, family: &Family, key: &RotationKey, mut seq: u32) -> u32 {
        loop {
            let path = family.path_for(key, seq);
            if tokio::fs::try_exists(archive_path(&path))
                .await
                .unwrap_or(false)
            {
                seq += 1;
                continue;
            }
            match (self.config.max_size, tokio::fs::metadata(&path).await) {
                (Some(max), Ok(meta)) if meta.len() >= max.as_bytes() => seq += 1,
                _ => return seq,
            }
        }
    }

    /// Opens the file for `key`/`seq`, retrying before giving up for good.
    async fn open(
        &self,
        family: &Arc<Family>,
        key: RotationKey,
        seq: u32,
        now: DateTime<Utc>,
    ) -> Result<ActiveFile> {
        let path = family.path_for(&key, seq);
        // Claimed before the file can appear, so retention never sees it unprotected.
        family
            .live
            .claim(&path, family.audit.as_ref().map(|_| now));
        let mut attempt = 0u32;
        loop {
            match open_append(&path, self.config.create_directories).await {
                Ok((file, size, created)) => {
                    if created {
                        self.events
                            .emit(TransportEvent::NewFile { path: path.clone() });
                    } else {
                        family.live.unclaim_creation(&path);
                        tracing::debug!(path = %path.display(), size, "appending to existing log file");
                    }
                    return Ok(ActiveFile {
                        path,
                        file,
                        size,
                        key,
                        seq,
                    });
                }
                Err(e) if attempt < self.config.max_retries => {
                    attempt += 1;
                    tracing::warn!(path = %path.display(), error = %e, attempt, "failed to open log file, retrying");
                    tokio::time::sleep(Duration::from_millis(10 * u64::from(attempt))).await;
                }
                Err(e) => {
                    family.live.unclaim_creation(&path);
                    let message = format!("cannot open {}: {e}", path.display());
                    self.fail(&message);
                    return Err(RotateError::Failed(message));
                }
            }
        }
    }

    /// Archives the retired file, records new files in the audit and applies
    /// retention, off the write path.
    fn spawn_maintenance(
        &self,
        family: &Arc<Family>,
        retired: Option<PathBuf>,
        now: DateTime<Utc>,
    ) {
        let archive = self.config.zipped_archive;
        if retired.is_none() && family.audit.is_none() && !family.retention.policy().is_enabled()
        {
            return;
        }
        let family = Arc::clone(family);
        let events = self.events.clone();

        self.background.spawn(async move {
            let _turn = family.maintenance.lock().await;

            if let Some(retired) = retired.as_deref().filter(|_| archive) {
                // Failures are reported as events by the archiver.
                let _ = family.archiver.archive(retired).await;
            }

            let pass = {
                let family = Arc::clone(&family);
                tokio::task::spawn_blocking(move || {
                    family.retention.record_new_files();
                    family.retention.enforce(now)
                })
                .await
            };
            if let Err(e) = pass {
                events.error(format!("retention task failed: {e}"));
            }
        });
    }

    fn check_accepting(&self) -> Result<()> {
        let status = self.status.read();
        match status.state {
            TransportState::Failed => Err(RotateError::Failed(
                status.failure.clone().unwrap_or_default(),
            )),
            TransportState::ShutDown => Err(RotateError::ShutDown),
            _ => Ok(()),
        }
    }

    fn set_state(&self, state: TransportState) {
        self.status.write().state = state;
    }

    fn fail(&self, message: &str) {
        {
            let mut status = self.status.write();
            if status.state == TransportState::Failed {
                return;
            }
            status.state = TransportState::Failed;
            status.current = None;
            status.failure = Some(message.to_string());
        }
        self.events.emit(TransportEvent::Fatal {
            message: message.to_string(),
        });
    }

    /// Flushes the active file and stops accepting writes.
    ///
    /// Writes already queued finish first. Background archiving is not
    /// cancelled; use [`wait_background`](Self::wait_background) to await it.
    /// Closing twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the final flush fails. The transport is shut down
    /// regardless.
    pub async fn close(&self) -> Result<()> {
        let mut output = self.output.lock().await;
        if self.state() == TransportState::ShutDown {
            return Ok(());
        }

        let flushed = match &mut *output {
            Output::Stream(stream) => stream.flush().await,
            Output::File(slot) => match slot.take() {
                Some(mut active) => {
                    let flushed = active.file.flush().await;
                    match flushed {
                        Ok(()) => active.file.sync_data().await,
                        Err(e) => Err(e),
                    }
                }
                None => Ok(()),
            },
        };

        {
            let mut status = self.status.write();
            status.state = TransportState::ShutDown;
            status.current = None;
        }
        self.background.close();
        self.events.emit(TransportEvent::Closed);
        flushed.map_err(Into::into)
    }

    /// Waits for background archiving and retention scheduled so far.
    pub async fn wait_background(&self) {
        self.background.close();
        self.background.wait().await;
        if self.state() != TransportState::ShutDown {
            self.background.reopen();
        }
    }

    /// Queries the file family.
    ///
    /// # Errors
    ///
    /// Returns [`RotateError::QueryUnsupported`] for stream sinks,
    /// [`RotateError::InvalidQuery`] for an inverted window, or an I/O error
    /// if the directory exists but cannot be listed.
    pub async fn query(&self, options: QueryOptions) -> Result<Vec<serde_json::Value>> {
        let family = Arc::clone(self.family.as_ref().ok_or(RotateError::QueryUnsupported)?);
        tokio::task::spawn_blocking(move || {
            query_family(
                &family.settings.dirname,
                &family.settings.template,
                &options,
            )
        })
        .await
        .map_err(|e| RotateError::Io(std::io::Error::other(e)))?
    }
}

/// Opens `path` for appending without ever truncating it.
///
/// Returns the handle, the existing size, and whether the file was created.
async fn open_append(path: &Path, create_directories: bool) -> std::io::Result<(File, u64, bool)> {
    if let Some(parent) = path.parent().filter(|_| create_directories) {
        tokio::fs::create_dir_all(parent).await?;
    }

    match OpenOptions::new()
        .append(true)
        .create_new(true)
        .open(path)
        .await
    {
        Ok(file) => Ok((file, 0, true)),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            let file = OpenOptions::new().append(true).open(path).await?;
            let size = file.metadata().await?.len();
            Ok((file, size, false))
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::retention::RetentionPolicy;
    use crate::size::MaxSize;
    use chrono::TimeZone;
    use std::fs;
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2029, 1, day, hour, 32, 40)
            .single()
            .expect("valid timestamp")
    }

    fn config(dir: &TempDir) -> TransportConfig {
        TransportConfig::new("x.log")
            .with_dirname(dir.path())
            .with_date_pattern(".yyyy-MM-dd")
            .with_utc(true)
    }

    fn drain(stream: &mut EventStream) -> Vec<TransportEvent> {
        std::iter::from_fn(|| stream.try_next()).collect()
    }

    #[tokio::test]
    async fn first_write_opens_file() {
        let dir = TempDir::new().expect("create temp dir");
        let clock = Arc::new(ManualClock::new(at(1, 7)));
        let transport = RotatingFileTransport::with_clock(config(&dir), clock).expect("transport");
        let mut events = transport.subscribe();

        assert_eq!(transport.state(), TransportState::Closed);
        assert!(transport.current_file().is_none());

        transport.log("hello").await.expect("log");

        let path = dir.path().join("x.log.2029-01-01");
        assert_eq!(transport.state(), TransportState::Open);
        assert_eq!(transport.current_file(), Some(path.clone()));
        assert_eq!(fs::read_to_string(&path).expect("read"), "hello\n");
        assert_eq!(drain(&mut events), vec![TransportEvent::NewFile { path }]);
    }

    #[tokio::test]
    async fn existing_file_is_appended_not_truncated() {
        let dir = TempDir::new().expect("create temp dir");
        let path = dir.path().join("x.log.2029-01-01");
        fs::write(&path, "earlier\n").expect("write");

        let clock = Arc::new(ManualClock::new(at(1, 7)));
        let transport = RotatingFileTransport::with_clock(config(&dir), clock).expect("transport");
        let mut events = transport.subscribe();
        transport.log("later").await.expect("log");

        assert_eq!(fs::read_to_string(&path).expect("read"), "earlier\nlater\n");
        assert!(drain(&mut events).is_empty());
    }

    #[tokio::test]
    async fn expiry_rotates_to_new_key() {
        let dir = TempDir::new().expect("create temp dir");
        let clock = Arc::new(ManualClock::new(at(1, 7)));
        let transport =
            RotatingFileTransport::with_clock(config(&dir), clock.clone()).expect("transport");

        transport.log("one").await.expect("log");
        let mut events = transport.subscribe();

        clock.set(at(2, 0));
        transport.log("two").await.expect("log");

        let old_path = dir.path().join("x.log.2029-01-01");
        let new_path = dir.path().join("x.log.2029-01-02");
        assert_eq!(
            drain(&mut events),
            vec![
                TransportEvent::NewFile {
                    path: new_path.clone()
                },
                TransportEvent::Rotate {
                    old_path,
                    new_path: new_path.clone()
                },
            ]
        );
        assert_eq!(transport.current_file(), Some(new_path));
    }

    #[tokio::test]
    async fn size_limit_rotates_to_next_sequence() {
        let dir = TempDir::new().expect("create temp dir");
        let clock = Arc::new(ManualClock::new(at(1, 7)));
        let config = config(&dir).with_max_size(MaxSize::bytes(10));
        let transport = RotatingFileTransport::with_clock(config, clock).expect("transport");

        transport.log("0123456789").await.expect("log");
        transport.log("abc").await.expect("log");

        assert_eq!(
            fs::read_to_string(dir.path().join("x.log.2029-01-01")).expect("read"),
            "0123456789\n"
        );
        assert_eq!(
            fs::read_to_string(dir.path().join("x.log.2029-01-01.1")).expect("read"),
            "abc\n"
        );
    }

    #[tokio::test]
    async fn restart_resumes_after_full_files() {
        let dir = TempDir::new().expect("create temp dir");
        fs::write(dir.path().join("x.log.2029-01-01"), "0123456789\n").expect("write");
        fs::write(dir.path().join("x.log.2029-01-01.1"), "0123456789\n").expect("write");

        let clock = Arc::new(ManualClock::new(at(1, 7)));
        let config = config(&dir).with_max_size(MaxSize::bytes(10));
        let transport = RotatingFileTransport::with_clock(config, clock).expect("transport");
        transport.log("next").await.expect("log");

        assert_eq!(
            transport.current_file(),
            Some(dir.path().join("x.log.2029-01-01.2"))
        );
    }

    #[tokio::test]
    async fn missing_directory_fails_once() {
        let dir = TempDir::new().expect("create temp dir");
        let config = config(&dir)
            .with_dirname(dir.path().join("missing"))
            .with_max_retries(1);
        let transport = RotatingFileTransport::with_clock(config, Arc::new(ManualClock::new(at(1, 7))))
            .expect("transport");
        let mut events = transport.subscribe();

        assert!(matches!(
            transport.log("a").await,
            Err(RotateError::Failed(_))
        ));
        assert_eq!(transport.state(), TransportState::Failed);
        assert!(matches!(
            transport.log("b").await,
            Err(RotateError::Failed(_))
        ));

        let fatal = drain(&mut events)
            .into_iter()
            .filter(|e| matches!(e, TransportEvent::Fatal { .. }))
            .count();
        assert_eq!(fatal, 1);
    }

    #[tokio::test]
    async fn create_directories_opens_nested_path() {
        let dir = TempDir::new().expect("create temp dir");
        let nested = dir.path().join("a").join("b");
        let config = config(&dir)
            .with_dirname(&nested)
            .with_create_directories(true);
        let transport = RotatingFileTransport::with_clock(config, Arc::new(ManualClock::new(at(1, 7))))
            .expect("transport");

        transport.log("deep").await.expect("log");
        assert!(nested.join("x.log.2029-01-01").exists());
    }

    #[tokio::test]
    async fn close_flushes_and_refuses_writes() {
        let dir = TempDir::new().expect("create temp dir");
        let transport =
            RotatingFileTransport::with_clock(config(&dir), Arc::new(ManualClock::new(at(1, 7))))
                .expect("transport");
        transport.log("last").await.expect("log");

        let mut events = transport.subscribe();
        transport.close().await.expect("close");
        transport.close().await.expect("second close");

        assert_eq!(transport.state(), TransportState::ShutDown);
        assert!(matches!(transport.log("late").await, Err(RotateError::ShutDown)));
        assert_eq!(drain(&mut events), vec![TransportEvent::Closed]);
        assert_eq!(
            fs::read_to_string(dir.path().join("x.log.2029-01-01")).expect("read"),
            "last\n"
        );
    }

    #[tokio::test]
    async fn custom_eol_is_appended() {
        let dir = TempDir::new().expect("create temp dir");
        let config = config(&dir).with_eol("\r\n");
        let transport = RotatingFileTransport::with_clock(config, Arc::new(ManualClock::new(at(1, 7))))
            .expect("transport");
        transport.log("a").await.expect("log");
        assert_eq!(
            fs::read_to_string(dir.path().join("x.log.2029-01-01")).expect("read"),
            "a\r\n"
        );
    }

    #[tokio::test]
    async fn retention_runs_in_background() {
        let dir = TempDir::new().expect("create temp dir");
        let clock = Arc::new(ManualClock::new(at(1, 7)));
        let config = config(&dir).with_retention(RetentionPolicy::max_files(1));
        let transport =
            RotatingFileTransport::with_clock(config, clock.clone()).expect("transport");

        transport.log("one").await.expect("log");
        clock.set(at(2, 7));
        transport.log("two").await.expect("log");
        transport.wait_background().await;

        assert!(!dir.path().join("x.log.2029-01-01").exists());
        assert!(dir.path().join("x.log.2029-01-02").exists());
        transport.log("three").await.expect("log after wait");
    }

    #[tokio::test]
    async fn stream_sink_passes_lines_through() {
        let (writer, mut reader) = tokio::io::duplex(1024);
        let transport =
            RotatingFileTransport::with_stream(TransportConfig::default(), Box::new(writer))
                .expect("transport");

        transport.log("a").await.expect("log");
        transport.log("b").await.expect("log");
        transport.close().await.expect("close");
        drop(transport);

        let mut text = String::new();
        reader.read_to_string(&mut text).await.expect("read");
        assert_eq!(text, "a\nb\n");
    }

    #[tokio::test]
    async fn stream_sink_rejects_file_options_and_queries() {
        let (writer, _reader) = tokio::io::duplex(64);
        let err = RotatingFileTransport::with_stream(TransportConfig::new("x.log"), Box::new(writer));
        assert!(matches!(err, Err(RotateError::Config(_))));

        let (writer, _reader) = tokio::io::duplex(64);
        let transport =
            RotatingFileTransport::with_stream(TransportConfig::default(), Box::new(writer))
                .expect("transport");
        let result = transport.query(QueryOptions::default()).await;
        assert!(matches!(result, Err(RotateError::QueryUnsupported)));
    }

    #[test]
    fn invalid_config_fails_at_construction() {
        let config = TransportConfig::new("bad|name.log");
        assert!(matches!(
            RotatingFileTransport::new(config),
            Err(RotateError::InvalidPath(_))
        ));
    }
}
