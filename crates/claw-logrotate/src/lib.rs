//! # claw-logrotate
//!
//! Rotating log file transport for Clawbernetes services.
//!
//! A host logging framework hands this crate already-formatted lines. The
//! transport decides which file each line belongs in, rotates on a calendar
//! boundary or a size limit, prunes or archives old files, and answers
//! queries over the files it manages.
//!
//! This crate provides:
//!
//! - [`RotatingFileTransport`] - The rotation controller (write, close, query)
//! - [`TransportConfig`] - Recognized options, loadable from JSON
//! - [`DatePattern`] / [`FilenameTemplate`] - Rotation keys and file names
//! - [`MaxSize`] - Size limits with `k`/`m`/`g` units
//! - [`RetentionPolicy`] - Count and age based retention
//! - [`Archiver`] - Gzip compression of rotated files
//! - [`QueryOptions`] - Time window, paging and projection for queries
//! - [`TransportEvent`] / [`EventStream`] - Lifecycle notifications
//! - [`TransportRegistry`] - Optional name-based construction
//!
//! ## Example
//!
//! ```rust,no_run
//! use claw_logrotate::{MaxSize, RetentionPolicy, RotatingFileTransport, TransportConfig};
//!
//! # async fn run() -> claw_logrotate::Result<()> {
//! let config = TransportConfig::new("app-%DATE%.log")
//!     .with_dirname("/var/log/app")
//!     .with_max_size(MaxSize::bytes(20 * 1024 * 1024))
//!     .with_retention(RetentionPolicy::max_files(14))
//!     .with_zipped_archive(true);
//!
//! let transport = RotatingFileTransport::new(config)?;
//! transport.log(r#"{"level":"info","message":"started"}"#).await?;
//! transport.close().await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod archive;
pub mod audit;
pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod pattern;
pub mod query;
pub mod registry;
pub mod retention;
pub mod size;
pub mod transport;

// Re-export main types
pub use archive::{Archiver, archive_path};
pub use audit::{AuditEntry, AuditFile, AuditRecord};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{DEFAULT_FILENAME, DEFAULT_MAX_RETRIES, FileSettings, TransportConfig};
pub use error::{Result, RotateError};
pub use events::{EventBus, EventStream, TransportEvent};
pub use pattern::{
    DATE_PLACEHOLDER, DEFAULT_DATE_PATTERN, DatePattern, FilenameTemplate, Granularity,
    MemberName, RotationKey,
};
pub use query::{DEFAULT_ROWS, Order, QueryOptions, query_family};
pub use registry::{DAILY_ROTATE_FILE, TransportFactory, TransportRegistry};
pub use retention::{FamilyMember, LiveFiles, RetentionManager, RetentionPolicy, list_family, plan, prune};
pub use size::{MaxSize, should_rotate};
pub use transport::{RotatingFileTransport, Sink, TransportState};
