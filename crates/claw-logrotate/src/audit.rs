//! Persisted bookkeeping of the files a transport has created.
//!
//! The audit record remembers when each file of the family was created so
//! that retention orders files the same way across restarts, even when
//! modification times or names alone are ambiguous. It is never required:
//! a missing or unreadable record falls back to a directory listing.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// One file known to the audit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// File name (relative to the transport's directory).
    pub name: String,
    /// When the transport created the file.
    pub created: DateTime<Utc>,
}

/// Known files, keyed by file name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    #[serde(default)]
    files: Vec<AuditEntry>,
}

impl AuditRecord {
    /// Loads a record from `path`.
    ///
    /// A missing file yields an empty record.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        match fs::read(path) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Writes the record to `path`, replacing any previous version atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be serialized or written.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Records that `name` was created at `created`.
    ///
    /// An existing entry keeps its original creation time.
    pub fn record_created(&mut self, name: impl Into<String>, created: DateTime<Utc>) {
        let name = name.into();
        if self.files.iter().all(|e| e.name != name) {
            self.files.push(AuditEntry { name, created });
        }
    }

    /// Forgets `name`. Returns true if it was known.
    pub fn record_removed(&mut self, name: &str) -> bool {
        let before = self.files.len();
        self.files.retain(|e| e.name != name);
        self.files.len() != before
    }

    /// Returns the creation time recorded for `name`.
    #[must_use]
    pub fn created(&self, name: &str) -> Option<DateTime<Utc>> {
        self.files.iter().find(|e| e.name == name).map(|e| e.created)
    }

    /// Returns all known entries.
    #[must_use]
    pub fn entries(&self) -> &[AuditEntry] {
        &self.files
    }
}

/// Serialized access to an audit record on disk.
///
/// The controller records new files and retention records removals from
/// background tasks; every update is a locked load-modify-save.
#[derive(Debug)]
pub struct AuditFile {
    path: PathBuf,
    lock: Mutex<()>,
}

impl AuditFile {
    /// Creates a handle for the record at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Returns the record location.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the current record.
    ///
    /// # Errors
    ///
    /// Returns an error if the record exists but cannot be read.
    pub fn read(&self) -> Result<AuditRecord> {
        let _guard = self.lock.lock();
        AuditRecord::load(&self.path)
    }

    /// Applies `update` to the stored record and writes it back.
    ///
    /// An unreadable record is replaced by a fresh one.
    ///
    /// # Errors
    ///
    /// Returns an error if the updated record cannot be written.
    pub fn update(&self, update: impl FnOnce(&mut AuditRecord)) -> Result<()> {
        let _guard = self.lock.lock();
        let mut record = AuditRecord::load(&self.path).unwrap_or_else(|e| {
            tracing::warn!(path = %self.path.display(), error = %e, "discarding unreadable audit record");
            AuditRecord::default()
        });
        update(&mut record);
        record.save(&self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn load_missing_is_empty() {
        let dir = TempDir::new().expect("create temp dir");
        let record = AuditRecord::load(&dir.path().join(".missing-audit.json")).expect("load");
        assert!(record.entries().is_empty());
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = TempDir::new().expect("create temp dir");
        let path = dir.path().join(".abc-audit.json");
        let now = Utc::now();

        let mut record = AuditRecord::default();
        record.record_created("x.log.2029-01-01", now);
        record.save(&path).expect("save");

        let loaded = AuditRecord::load(&path).expect("load");
        assert_eq!(loaded.created("x.log.2029-01-01"), Some(now));
        assert!(!dir.path().join(".abc-audit.json.tmp").exists());
    }

    #[test]
    fn record_created_keeps_first_time() {
        let first = Utc::now();
        let later = first + chrono::Duration::hours(1);

        let mut record = AuditRecord::default();
        record.record_created("a", first);
        record.record_created("a", later);

        assert_eq!(record.entries().len(), 1);
        assert_eq!(record.created("a"), Some(first));
    }

    #[test]
    fn record_removed_forgets() {
        let mut record = AuditRecord::default();
        record.record_created("a", Utc::now());

        assert!(record.record_removed("a"));
        assert!(!record.record_removed("a"));
        assert!(record.created("a").is_none());
    }

    #[test]
    fn audit_file_updates_in_place() {
        let dir = TempDir::new().expect("create temp dir");
        let audit = AuditFile::new(dir.path().join(".x-audit.json"));
        let now = Utc::now();

        audit
            .update(|r| r.record_created("a", now))
            .expect("update");
        audit
            .update(|r| r.record_created("b", now))
            .expect("update");
        audit
            .update(|r| {
                r.record_removed("a");
            })
            .expect("update");

        let record = audit.read().expect("read");
        assert!(record.created("a").is_none());
        assert_eq!(record.created("b"), Some(now));
    }

    #[test]
    fn audit_file_replaces_corrupt_record() {
        let dir = TempDir::new().expect("create temp dir");
        let path = dir.path().join(".x-audit.json");
        fs::write(&path, b"{{{").expect("write");

        let audit = AuditFile::new(&path);
        audit
            .update(|r| r.record_created("a", Utc::now()))
            .expect("update");
        assert_eq!(audit.read().expect("read").entries().len(), 1);
    }

    #[test]
    fn load_corrupt_is_error() {
        let dir = TempDir::new().expect("create temp dir");
        let path = dir.path().join(".bad-audit.json");
        fs::write(&path, b"not json").expect("write");
        assert!(AuditRecord::load(&path).is_err());
    }
}
