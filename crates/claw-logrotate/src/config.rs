//! Transport configuration.
//!
//! [`TransportConfig`] carries every recognized option. It is validated
//! once, at construction of a transport, into a [`FileSettings`]; conflicting
//! options and invalid path characters fail there rather than on the first
//! write.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, RotateError};
use crate::events::DEFAULT_EVENT_BUFFER;
use crate::pattern::{DEFAULT_DATE_PATTERN, FilenameTemplate};
use crate::retention::RetentionPolicy;
use crate::size::MaxSize;

/// File name used when only a directory is configured.
pub const DEFAULT_FILENAME: &str = "claw-%DATE%.log";

/// Open retries before a transport gives up.
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// Configuration for a rotating transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TransportConfig {
    /// File name template. May contain `%DATE%` and a directory part.
    pub filename: Option<String>,
    /// Directory for the file family. Defaults to the directory of `filename`.
    pub dirname: Option<PathBuf>,
    /// Rotation pattern.
    pub date_pattern: String,
    /// Size at which the active file rotates. A value that does not parse
    /// means no limit.
    #[serde(deserialize_with = "crate::size::deserialize_max_size")]
    pub max_size: Option<MaxSize>,
    /// Retention by count and/or age.
    #[serde(flatten)]
    pub retention: RetentionPolicy,
    /// Gzip files once they are rotated out.
    pub zipped_archive: bool,
    /// Resolve calendar fields in UTC instead of local time.
    pub utc: bool,
    /// Create missing parent directories when opening a file.
    pub create_directories: bool,
    /// Keep an audit record of created files.
    pub audit: bool,
    /// Override for the audit record location.
    pub audit_file: Option<PathBuf>,
    /// Put the rotation key in front of the basename.
    pub prepend: bool,
    /// Line terminator appended to every record.
    pub eol: String,
    /// Open retries before entering the failed state.
    pub max_retries: u32,
    /// Capacity of the event channel.
    pub event_buffer: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            filename: None,
            dirname: None,
            date_pattern: DEFAULT_DATE_PATTERN.to_string(),
            max_size: None,
            retention: RetentionPolicy::default(),
            zipped_archive: false,
            utc: false,
            create_directories: false,
            audit: true,
            audit_file: None,
            prepend: false,
            eol: "\n".to_string(),
            max_retries: DEFAULT_MAX_RETRIES,
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

impl TransportConfig {
    /// Creates a config for the given file name template.
    #[must_use]
    pub fn new(filename: impl Into<String>) -> Self {
        Self {
            filename: Some(filename.into()),
            ..Default::default()
        }
    }

    /// Sets the directory.
    #[must_use]
    pub fn with_dirname(mut self, dirname: impl Into<PathBuf>) -> Self {
        self.dirname = Some(dirname.into());
        self
    }

    /// Sets the rotation pattern.
    #[must_use]
    pub fn with_date_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.date_pattern = pattern.into();
        self
    }

    /// Sets the size limit.
    #[must_use]
    pub const fn with_max_size(mut self, max_size: MaxSize) -> Self {
        self.max_size = Some(max_size);
        self
    }

    /// Sets the retention policy.
    #[must_use]
    pub const fn with_retention(mut self, retention: RetentionPolicy) -> Self {
        self.retention = retention;
        self
    }

    /// Enables gzip archiving of rotated files.
    #[must_use]
    pub const fn with_zipped_archive(mut self, enabled: bool) -> Self {
        self.zipped_archive = enabled;
        self
    }

    /// Selects UTC calendar fields.
    #[must_use]
    pub const fn with_utc(mut self, utc: bool) -> Self {
        self.utc = utc;
        self
    }

    /// Creates missing directories on open.
    #[must_use]
    pub const fn with_create_directories(mut self, enabled: bool) -> Self {
        self.create_directories = enabled;
        self
    }

    /// Enables or disables the audit record.
    #[must_use]
    pub const fn with_audit(mut self, enabled: bool) -> Self {
        self.audit = enabled;
        self
    }

    /// Overrides the audit record location.
    #[must_use]
    pub fn with_audit_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.audit_file = Some(path.into());
        self
    }

    /// Puts the rotation key in front of the basename.
    #[must_use]
    pub const fn with_prepend(mut self, prepend: bool) -> Self {
        self.prepend = prepend;
        self
    }

    /// Sets the line terminator.
    #[must_use]
    pub fn with_eol(mut self, eol: impl Into<String>) -> Self {
        self.eol = eol.into();
        self
    }

    /// Sets the number of open retries.
    #[must_use]
    pub const fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Returns a short stable hash of the configuration.
    ///
    /// Two transports with identical options share an audit record.
    #[must_use]
    pub fn config_hash(&self) -> String {
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        let hash = blake3::hash(&bytes);
        hash.to_hex().as_str()[..20].to_string()
    }

    /// Validates the file options.
    ///
    /// # Errors
    ///
    /// Returns an error for invalid characters, an empty basename, or a
    /// retention policy that keeps no files.
    pub fn file_settings(&self) -> Result<FileSettings> {
        let raw = self.filename.as_deref().unwrap_or(DEFAULT_FILENAME);
        let raw_path = Path::new(raw);
        let basename = raw_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| RotateError::Config(format!("filename has no file name: {raw}")))?;

        let dirname = match &self.dirname {
            Some(dir) => dir.clone(),
            None => match raw_path.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
                _ => PathBuf::from("."),
            },
        };

        if !is_valid_file_name(&basename) {
            return Err(RotateError::InvalidPath(format!(
                "file name contains an invalid character: {basename}"
            )));
        }
        let dir_text = dirname.to_string_lossy();
        if !is_valid_dir_name(&dir_text) {
            return Err(RotateError::InvalidPath(format!(
                "directory contains an invalid character: {dir_text}"
            )));
        }
        if self.retention.max_files == Some(0) {
            return Err(RotateError::Config("max files must be at least 1".to_string()));
        }

        let template = FilenameTemplate::new(basename, &self.date_pattern, self.prepend)?;
        let audit_path = if self.audit {
            Some(self.audit_file.clone().unwrap_or_else(|| {
                dirname.join(format!(".{}-audit.json", self.config_hash()))
            }))
        } else {
            None
        };

        Ok(FileSettings {
            dirname,
            template,
            audit_path,
        })
    }

    /// Checks that the config can be combined with a stream sink.
    ///
    /// # Errors
    ///
    /// Returns an error if any file-only option is set.
    pub fn check_stream_compatible(&self) -> Result<()> {
        let conflicts: Vec<&str> = [
            ("filename", self.filename.is_some()),
            ("dirname", self.dirname.is_some()),
            ("maxSize", self.max_size.is_some()),
        ]
        .into_iter()
        .filter_map(|(name, set)| set.then_some(name))
        .collect();

        if conflicts.is_empty() {
            Ok(())
        } else {
            Err(RotateError::Config(format!(
                "cannot set {} and stream together",
                conflicts.join(", ")
            )))
        }
    }
}

/// Validated file options.
#[derive(Debug, Clone)]
pub struct FileSettings {
    /// Directory holding the family.
    pub dirname: PathBuf,
    /// Template for member names.
    pub template: FilenameTemplate,
    /// Where the audit record lives, if enabled.
    pub audit_path: Option<PathBuf>,
}

fn is_valid_file_name(name: &str) -> bool {
    !name.is_empty()
        && !name
            .chars()
            .any(|c| c.is_control() || matches!(c, '"' | '<' | '>' | '|' | ':' | '*' | '?' | '\\' | '/'))
}

fn is_valid_dir_name(name: &str) -> bool {
    !name
        .chars()
        .any(|c| c.is_control() || matches!(c, '"' | '<' | '>' | '|'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn config_defaults() {
        let config = TransportConfig::default();
        assert_eq!(config.date_pattern, "YYYY-MM-DD");
        assert_eq!(config.eol, "\n");
        assert_eq!(config.max_retries, 2);
        assert!(config.audit);
        assert!(!config.zipped_archive);
        assert!(config.max_size.is_none());
    }

    #[test]
    fn config_builder() {
        let config = TransportConfig::new("app-%DATE%.log")
            .with_dirname("/var/log/app")
            .with_date_pattern("YYYY-MM-DD-HH")
            .with_max_size(MaxSize::bytes(1024))
            .with_retention(RetentionPolicy::max_files(3))
            .with_zipped_archive(true)
            .with_utc(true);

        assert_eq!(config.filename.as_deref(), Some("app-%DATE%.log"));
        assert_eq!(config.dirname, Some(PathBuf::from("/var/log/app")));
        assert_eq!(config.max_size, Some(MaxSize::bytes(1024)));
        assert_eq!(config.retention.max_files, Some(3));
        assert!(config.zipped_archive);
        assert!(config.utc);
    }

    #[test]
    fn file_settings_splits_directory_from_filename() {
        let config = TransportConfig::new("/var/log/app/x.log");
        let settings = config.file_settings().expect("valid");
        assert_eq!(settings.dirname, PathBuf::from("/var/log/app"));
        assert_eq!(settings.template.basename(), "x.log");
    }

    #[test]
    fn file_settings_defaults_to_current_directory() {
        let settings = TransportConfig::new("x.log").file_settings().expect("valid");
        assert_eq!(settings.dirname, PathBuf::from("."));
    }

    #[test]
    fn file_settings_names_audit_file_after_hash() {
        let config = TransportConfig::new("x.log").with_dirname("/tmp/logs");
        let settings = config.file_settings().expect("valid");
        let expected = PathBuf::from("/tmp/logs").join(format!(".{}-audit.json", config.config_hash()));
        assert_eq!(settings.audit_path, Some(expected));

        let without = config.with_audit(false).file_settings().expect("valid");
        assert!(without.audit_path.is_none());
    }

    #[test_case("bad|name.log" ; "pipe")]
    #[test_case("bad*name.log" ; "star")]
    #[test_case("bad?name.log" ; "question mark")]
    #[test_case("bad:name.log" ; "colon")]
    #[test_case("bad\u{7}name.log" ; "control character")]
    fn file_settings_rejects_invalid_file_names(name: &str) {
        let config = TransportConfig::new(name).with_dirname("/tmp");
        assert!(matches!(config.file_settings(), Err(RotateError::InvalidPath(_))));
    }

    #[test]
    fn file_settings_rejects_invalid_dirname() {
        let config = TransportConfig::new("x.log").with_dirname("/tmp/<bad>");
        assert!(matches!(config.file_settings(), Err(RotateError::InvalidPath(_))));
    }

    #[test]
    fn file_settings_rejects_zero_max_files() {
        let config = TransportConfig::new("x.log").with_retention(RetentionPolicy::max_files(0));
        assert!(matches!(config.file_settings(), Err(RotateError::Config(_))));
    }

    #[test]
    fn stream_conflicts_are_reported() {
        assert!(TransportConfig::default().check_stream_compatible().is_ok());

        let err = TransportConfig::new("x.log").check_stream_compatible();
        assert!(matches!(err, Err(RotateError::Config(msg)) if msg.contains("filename")));

        let err = TransportConfig {
            max_size: Some(MaxSize::bytes(10)),
            ..Default::default()
        }
        .check_stream_compatible();
        assert!(matches!(err, Err(RotateError::Config(msg)) if msg.contains("maxSize")));
    }

    #[test]
    fn config_hash_is_stable_and_distinct() {
        let a = TransportConfig::new("a.log");
        let b = TransportConfig::new("b.log");
        assert_eq!(a.config_hash(), a.clone().config_hash());
        assert_ne!(a.config_hash(), b.config_hash());
        assert_eq!(a.config_hash().len(), 20);
    }

    #[test]
    fn config_deserializes_from_json() {
        let json = r#"{
            "filename": "app-%DATE%.log",
            "dirname": "logs",
            "datePattern": "YYYY-MM-DD-HH",
            "maxSize": "20m",
            "maxFiles": 14,
            "zippedArchive": true
        }"#;
        let config: TransportConfig = serde_json::from_str(json).expect("parse");
        assert_eq!(config.date_pattern, "YYYY-MM-DD-HH");
        assert_eq!(config.max_size, Some(MaxSize::bytes(20 * 1024 * 1024)));
        assert_eq!(config.retention.max_files, Some(14));
        assert!(config.zipped_archive);
        assert!(config.audit);
    }

    #[test]
    fn unrecognized_max_size_is_no_limit() {
        let config: TransportConfig =
            serde_json::from_str(r#"{"filename": "x.log", "maxSize": "20MB"}"#).expect("parse");
        assert_eq!(config.filename.as_deref(), Some("x.log"));
        assert_eq!(config.max_size, None);
    }
}
