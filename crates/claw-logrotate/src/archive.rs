//! Gzip archiving of rotated files.
//!
//! Compression runs on the blocking pool and never touches the write path.
//! The source is removed only after the archive is in place and decodes to
//! the same number of bytes.

use std::collections::HashSet;
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use parking_lot::Mutex;

use crate::error::{Result, RotateError};
use crate::events::{EventBus, TransportEvent};
use crate::pattern::GZIP_EXTENSION;

/// Returns `<path>.gz`.
#[must_use]
pub fn archive_path(path: &Path) -> PathBuf {
    with_suffix(path, GZIP_EXTENSION)
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// Compresses rotated files.
///
/// Cloning shares the in-flight set, so two clones never compress the same
/// source at once.
#[derive(Debug, Clone)]
pub struct Archiver {
    events: EventBus,
    in_flight: Arc<Mutex<HashSet<PathBuf>>>,
}

impl Archiver {
    /// Creates an archiver reporting on `events`.
    #[must_use]
    pub fn new(events: EventBus) -> Self {
        Self {
            events,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Compresses `source` to `<source>.gz` and removes `source`.
    ///
    /// Returns `Ok(None)` without doing anything if the source is gone, the
    /// archive already exists, or the same source is being archived.
    ///
    /// # Errors
    ///
    /// Returns an error if compression fails. The failure is also emitted as
    /// an [`TransportEvent::Error`] and the source is left in place.
    pub async fn archive(&self, source: &Path) -> Result<Option<PathBuf>> {
        let Some(_guard) = InFlight::claim(&self.in_flight, source) else {
            tracing::debug!(path = %source.display(), "archive already in progress");
            return Ok(None);
        };

        let target = archive_path(source);
        let job_source = source.to_path_buf();
        let job_target = target.clone();
        let outcome = tokio::task::spawn_blocking(move || compress(&job_source, &job_target))
            .await
            .map_err(|e| io::Error::other(format!("archive task failed: {e}")));

        match outcome.and_then(|r| r) {
            Ok(true) => {
                self.events.emit(TransportEvent::Archived {
                    path: target.clone(),
                });
                Ok(Some(target))
            }
            Ok(false) => Ok(None),
            Err(e) => {
                self.events
                    .error(format!("failed to archive {}: {e}", source.display()));
                Err(RotateError::Io(e))
            }
        }
    }
}

struct InFlight {
    set: Arc<Mutex<HashSet<PathBuf>>>,
    path: PathBuf,
}

impl InFlight {
    fn claim(set: &Arc<Mutex<HashSet<PathBuf>>>, path: &Path) -> Option<Self> {
        set.lock().insert(path.to_path_buf()).then(|| Self {
            set: Arc::clone(set),
            path: path.to_path_buf(),
        })
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.set.lock().remove(&self.path);
    }
}

/// Blocking compression. Returns false if there was nothing to do.
fn compress(source: &Path, target: &Path) -> io::Result<bool> {
    if target.exists() {
        tracing::debug!(path = %target.display(), "archive exists, skipping");
        return Ok(false);
    }
    let input = match File::open(source) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    };
    let source_len = input.metadata()?.len();

    let partial = with_suffix(target, ".partial");
    let result = write_archive(input, &partial).and_then(|()| {
        fs::rename(&partial, target)?;
        verify(target, source_len)
    });
    if let Err(e) = result {
        let _ = fs::remove_file(&partial);
        return Err(e);
    }

    fs::remove_file(source)?;
    Ok(true)
}

fn write_archive(input: File, partial: &Path) -> io::Result<()> {
    let output = File::create(partial)?;
    let mut encoder = GzEncoder::new(BufWriter::new(output), Compression::default());
    io::copy(&mut BufReader::new(input), &mut encoder)?;
    let mut writer = encoder.finish()?;
    writer.flush()?;
    writer.get_ref().sync_all()
}

fn verify(target: &Path, expected: u64) -> io::Result<()> {
    let mut decoder = GzDecoder::new(BufReader::new(File::open(target)?));
    let decoded = io::copy(&mut decoder, &mut io::sink())?;
    if decoded == expected {
        Ok(())
    } else {
        let _ = fs::remove_file(target);
        Err(io::Error::new(
            ErrorKind::InvalidData,
            format!("archive holds {decoded} bytes, expected {expected}"),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::TempDir;

    fn read_gz(path: &Path) -> String {
        let mut decoder = GzDecoder::new(File::open(path).expect("open archive"));
        let mut text = String::new();
        decoder.read_to_string(&mut text).expect("decode archive");
        text
    }

    #[test]
    fn archive_path_appends_extension() {
        assert_eq!(
            archive_path(Path::new("/logs/x.log.2029-01-01.1")),
            PathBuf::from("/logs/x.log.2029-01-01.1.gz")
        );
    }

    #[tokio::test]
    async fn archive_compresses_and_removes_source() {
        let dir = TempDir::new().expect("create temp dir");
        let source = dir.path().join("x.log.2029-01-01");
        fs::write(&source, "one\ntwo\n").expect("write");

        let events = EventBus::new(8);
        let mut stream = events.subscribe();
        let archiver = Archiver::new(events);

        let archived = archiver.archive(&source).await.expect("archive");
        let target = dir.path().join("x.log.2029-01-01.gz");
        assert_eq!(archived, Some(target.clone()));
        assert!(!source.exists());
        assert!(!dir.path().join("x.log.2029-01-01.gz.partial").exists());
        assert_eq!(read_gz(&target), "one\ntwo\n");
        assert_eq!(
            stream.try_next(),
            Some(TransportEvent::Archived { path: target })
        );
    }

    #[tokio::test]
    async fn archive_is_idempotent() {
        let dir = TempDir::new().expect("create temp dir");
        let source = dir.path().join("x.log.1");
        fs::write(&source, "line\n").expect("write");

        let events = EventBus::new(8);
        let mut stream = events.subscribe();
        let archiver = Archiver::new(events);

        assert!(archiver.archive(&source).await.expect("first").is_some());
        assert!(archiver.archive(&source).await.expect("second").is_none());

        assert!(matches!(stream.try_next(), Some(TransportEvent::Archived { .. })));
        assert_eq!(stream.try_next(), None);
    }

    #[tokio::test]
    async fn existing_archive_leaves_source_alone() {
        let dir = TempDir::new().expect("create temp dir");
        let source = dir.path().join("x.log.1");
        fs::write(&source, "new\n").expect("write");
        fs::write(dir.path().join("x.log.1.gz"), b"previous").expect("write");

        let archiver = Archiver::new(EventBus::default());
        assert!(archiver.archive(&source).await.expect("archive").is_none());
        assert!(source.exists());
        assert_eq!(
            fs::read(dir.path().join("x.log.1.gz")).expect("read"),
            b"previous"
        );
    }

    #[tokio::test]
    async fn missing_source_is_skipped() {
        let dir = TempDir::new().expect("create temp dir");
        let archiver = Archiver::new(EventBus::default());
        let result = archiver
            .archive(&dir.path().join("never-written.log"))
            .await
            .expect("archive");
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn concurrent_archives_compress_once() {
        let dir = TempDir::new().expect("create temp dir");
        let source = dir.path().join("x.log.1");
        fs::write(&source, "line\n".repeat(10_000)).expect("write");

        let events = EventBus::new(16);
        let mut stream = events.subscribe();
        let archiver = Archiver::new(events);

        let (a, b) = tokio::join!(archiver.archive(&source), archiver.archive(&source));
        let produced = [a.expect("first"), b.expect("second")]
            .into_iter()
            .flatten()
            .count();
        assert_eq!(produced, 1);

        assert!(matches!(stream.try_next(), Some(TransportEvent::Archived { .. })));
        assert_eq!(stream.try_next(), None);
    }

    #[tokio::test]
    async fn failure_reports_error_and_keeps_source() {
        let dir = TempDir::new().expect("create temp dir");
        // A directory in place of the retired file cannot be read.
        let source = dir.path().join("x.log.1");
        fs::create_dir(&source).expect("create dir");
        fs::write(source.join("inner"), "line\n").expect("write");

        let events = EventBus::new(8);
        let mut stream = events.subscribe();
        let archiver = Archiver::new(events);

        assert!(archiver.archive(&source).await.is_err());
        assert!(source.join("inner").exists());
        assert!(!dir.path().join("x.log.1.gz").exists());
        assert!(!dir.path().join("x.log.1.gz.partial").exists());
        assert!(matches!(stream.try_next(), Some(TransportEvent::Error { .. })));
        assert_eq!(stream.try_next(), None);
    }
}
