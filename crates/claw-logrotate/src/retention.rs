//! Retention of rotated files.
//!
//! This module provides:
//! - [`RetentionPolicy`] - Keep at most N files, and/or files younger than N days
//! - [`list_family`] - Scan a directory for the members of a file family
//! - [`plan`] - Decide which members to remove (pure)
//! - [`prune`] - Remove planned members, reporting failures as events
//! - [`LiveFiles`] - Files the writer is about to create or is writing
//! - [`RetentionManager`] - The three steps above bound to one transport
//!
//! A plain file and its `.gz` counterpart count as one logical file and are
//! always removed together.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::audit::{AuditFile, AuditRecord};
use crate::error::Result;
use crate::events::{EventBus, TransportEvent};
use crate::pattern::{FilenameTemplate, GZIP_EXTENSION};

/// How many rotated files to keep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "RawPolicy")]
pub struct RetentionPolicy {
    /// Keep at most this many logical files, the active one included.
    pub max_files: Option<usize>,
    /// Remove files older than this many days.
    pub max_age_days: Option<u32>,
}

impl RetentionPolicy {
    /// Keep at most `count` files.
    #[must_use]
    pub const fn max_files(count: usize) -> Self {
        Self {
            max_files: Some(count),
            max_age_days: None,
        }
    }

    /// Keep files for `days` days.
    #[must_use]
    pub const fn max_age_days(days: u32) -> Self {
        Self {
            max_files: None,
            max_age_days: Some(days),
        }
    }

    /// Adds an age limit to the policy.
    #[must_use]
    pub const fn with_max_age_days(mut self, days: u32) -> Self {
        self.max_age_days = Some(days);
        self
    }

    /// Parses the `maxFiles` option: `"10"` is a count, `"14d"` an age in days.
    #[must_use]
    pub fn parse_max_files(input: &str) -> Option<Self> {
        let input = input.trim();
        match input.strip_suffix(['d', 'D']) {
            Some(days) => days.trim().parse().ok().map(Self::max_age_days),
            None => input.parse().ok().map(Self::max_files),
        }
    }

    /// Returns true if the policy removes anything at all.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.max_files.is_some() || self.max_age_days.is_some()
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPolicy {
    #[serde(default)]
    max_files: Option<RawCount>,
    #[serde(default)]
    max_age_days: Option<u32>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawCount {
    Count(usize),
    Text(String),
}

impl TryFrom<RawPolicy> for RetentionPolicy {
    type Error = String;

    fn try_from(raw: RawPolicy) -> std::result::Result<Self, Self::Error> {
        let mut policy = match raw.max_files {
            None => Self::default(),
            Some(RawCount::Count(count)) => Self::max_files(count),
            Some(RawCount::Text(text)) => Self::parse_max_files(&text)
                .ok_or_else(|| format!("unrecognized maxFiles: {text}"))?,
        };
        if raw.max_age_days.is_some() {
            policy.max_age_days = raw.max_age_days;
        }
        Ok(policy)
    }
}

/// A file on disk that belongs to a transport's family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FamilyMember {
    /// Full path.
    pub path: PathBuf,
    /// File name.
    pub name: String,
    /// Rotation key embedded in the name.
    pub key: String,
    /// Last modification time.
    pub modified: DateTime<Utc>,
    /// Creation time from the audit record, when known.
    pub created: Option<DateTime<Utc>>,
    /// Overflow sequence (0 if none).
    pub seq: u32,
    /// Whether this is a `.gz` archive.
    pub compressed: bool,
}

impl FamilyMember {
    /// Name of the uncompressed file this member stands for.
    #[must_use]
    pub fn base_name(&self) -> &str {
        if self.compressed {
            self.name
                .get(..self.name.len() - GZIP_EXTENSION.len())
                .unwrap_or(&self.name)
        } else {
            &self.name
        }
    }

    /// Creation time when `use_created` is set and known, else mtime.
    fn time(&self, use_created: bool) -> DateTime<Utc> {
        match self.created {
            Some(created) if use_created => created,
            _ => self.modified,
        }
    }
}

/// Lists the members of `template`'s family in `dir`, sorted by name.
///
/// A missing directory is an empty family.
///
/// # Errors
///
/// Returns an error if the directory exists but cannot be read.
pub fn list_family(
    dir: &Path,
    template: &FilenameTemplate,
    audit: Option<&AuditRecord>,
) -> Result<Vec<FamilyMember>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut members = Vec::new();
    for entry in entries {
        let Ok(entry) = entry else { continue };
        let name = entry.file_name().to_string_lossy().into_owned();
        let Some(parsed) = template.parse_member(&name) else {
            continue;
        };
        // Removed between the listing and the stat.
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        if !metadata.is_file() {
            continue;
        }
        let modified = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());

        let mut member = FamilyMember {
            path: entry.path(),
            name,
            key: parsed.key,
            modified,
            created: None,
            seq: parsed.seq,
            compressed: parsed.compressed,
        };
        member.created = audit.and_then(|record| record.created(member.base_name()));
        members.push(member);
    }

    members.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(members)
}

struct LogicalFile<'a> {
    base: &'a str,
    plain_time: Option<DateTime<Utc>>,
    archive_time: Option<DateTime<Utc>>,
    seq: u32,
    members: Vec<&'a FamilyMember>,
}

impl<'a> LogicalFile<'a> {
    fn new(member: &'a FamilyMember) -> Self {
        Self {
            base: member.base_name(),
            plain_time: None,
            archive_time: None,
            seq: member.seq,
            members: Vec::new(),
        }
    }

    fn add(&mut self, member: &'a FamilyMember, use_created: bool) {
        let time = member.time(use_created);
        // Compressing touches the archive, so the plain file's time wins.
        let slot = if member.compressed && !use_created {
            &mut self.archive_time
        } else {
            &mut self.plain_time
        };
        *slot = Some(slot.map_or(time, |t| t.min(time)));
        self.members.push(member);
    }

    fn time(&self) -> DateTime<Utc> {
        self.plain_time
            .or(self.archive_time)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    fn cmp_age(&self, other: &Self) -> Ordering {
        self.time()
            .cmp(&other.time())
            .then(self.seq.cmp(&other.seq))
            .then(self.base.cmp(other.base))
    }
}

/// Decides which members `policy` removes, oldest first.
///
/// Members are grouped with their compressed counterparts. The group
/// containing `protected` (the active file) is counted but never removed.
///
/// Creation times order the family only when every member has one;
/// otherwise all members are ordered by modification time.
#[must_use]
pub fn plan(
    members: &[FamilyMember],
    policy: &RetentionPolicy,
    now: DateTime<Utc>,
    protected: Option<&Path>,
) -> Vec<FamilyMember> {
    if !policy.is_enabled() {
        return Vec::new();
    }

    let use_created = members.iter().all(|m| m.created.is_some());
    let mut groups: BTreeMap<&str, LogicalFile<'_>> = BTreeMap::new();
    for member in members {
        groups
            .entry(member.base_name())
            .or_insert_with(|| LogicalFile::new(member))
            .add(member, use_created);
    }

    let mut ordered: Vec<LogicalFile<'_>> = groups.into_values().collect();
    ordered.sort_by(LogicalFile::cmp_age);

    let protected_name = protected
        .and_then(Path::file_name)
        .map(|n| n.to_string_lossy().into_owned());
    let is_protected = |group: &LogicalFile<'_>| protected_name.as_deref() == Some(group.base);

    let mut remove = vec![false; ordered.len()];

    if let Some(max_files) = policy.max_files {
        let mut excess = ordered.len().saturating_sub(max_files);
        for (index, group) in ordered.iter().enumerate() {
            if excess == 0 {
                break;
            }
            if !is_protected(group) {
                remove[index] = true;
                excess -= 1;
            }
        }
    }

    if let Some(days) = policy.max_age_days {
        let limit = TimeDelta::days(i64::from(days));
        for (index, group) in ordered.iter().enumerate() {
            if !is_protected(group) && now.signed_duration_since(group.time()) > limit {
                remove[index] = true;
            }
        }
    }

    ordered
        .iter()
        .zip(remove)
        .filter(|(_, removed)| *removed)
        .flat_map(|(group, _)| group.members.iter().map(|m| (*m).clone()))
        .collect()
}

/// Removes the planned members.
///
/// A member that is already gone counts as removed. Any other failure is
/// reported on `events` and the member is left out of the result.
pub fn prune(planned: Vec<FamilyMember>, events: &EventBus) -> Vec<FamilyMember> {
    let mut removed = Vec::with_capacity(planned.len());
    for member in planned {
        match fs::remove_file(&member.path) {
            Ok(()) => {
                events.emit(TransportEvent::FileRemoved {
                    path: member.path.clone(),
                });
                removed.push(member);
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!(path = %member.path.display(), "retention target already removed");
                removed.push(member);
            }
            Err(e) => {
                events.error(format!("failed to remove {}: {e}", member.path.display()));
            }
        }
    }
    removed
}

/// Files the writer has claimed but retention may not yet see in the audit
/// record.
///
/// The writer claims a path before creating it. A retention pass reads the
/// claims after listing the directory, so every file it listed is either
/// recorded in the audit, still pending here, or no longer active.
#[derive(Debug, Default)]
pub struct LiveFiles {
    inner: Mutex<LiveInner>,
}

#[derive(Debug, Default)]
struct LiveInner {
    active: Option<PathBuf>,
    pending: BTreeMap<String, DateTime<Utc>>,
}

impl LiveFiles {
    /// Creates an empty set of claims.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `path` as the active file before it is opened.
    ///
    /// With `created`, the creation time is held until
    /// [`RetentionManager::record_new_files`] moves it into the audit record.
    pub fn claim(&self, path: &Path, created: Option<DateTime<Utc>>) {
        let mut inner = self.inner.lock();
        inner.active = Some(path.to_path_buf());
        if let (Some(created), Some(name)) = (created, path.file_name()) {
            inner
                .pending
                .entry(name.to_string_lossy().into_owned())
                .or_insert(created);
        }
    }

    /// Drops the pending creation time of `path`, which already existed or
    /// could not be created.
    pub fn unclaim_creation(&self, path: &Path) {
        if let Some(name) = path.file_name() {
            self.inner.lock().pending.remove(&*name.to_string_lossy());
        }
    }

    fn snapshot(&self) -> (Option<PathBuf>, BTreeMap<String, DateTime<Utc>>) {
        let inner = self.inner.lock();
        (inner.active.clone(), inner.pending.clone())
    }

    fn take_pending(&self) -> BTreeMap<String, DateTime<Utc>> {
        std::mem::take(&mut self.inner.lock().pending)
    }

    fn restore_pending(&self, entries: BTreeMap<String, DateTime<Utc>>) {
        let mut inner = self.inner.lock();
        for (name, created) in entries {
            inner.pending.entry(name).or_insert(created);
        }
    }
}

/// Applies a retention policy to one transport's family.
#[derive(Debug)]
pub struct RetentionManager {
    dir: PathBuf,
    template: FilenameTemplate,
    policy: RetentionPolicy,
    audit: Option<Arc<AuditFile>>,
    live: Arc<LiveFiles>,
    events: EventBus,
}

impl RetentionManager {
    /// Creates a manager for the family of `template` in `dir`.
    #[must_use]
    pub fn new(
        dir: impl Into<PathBuf>,
        template: FilenameTemplate,
        policy: RetentionPolicy,
        audit: Option<Arc<AuditFile>>,
        live: Arc<LiveFiles>,
        events: EventBus,
    ) -> Self {
        Self {
            dir: dir.into(),
            template,
            policy,
            audit,
            live,
            events,
        }
    }

    /// Returns the policy in effect.
    #[must_use]
    pub const fn policy(&self) -> &RetentionPolicy {
        &self.policy
    }

    /// Moves pending creation times into the audit record. Blocking.
    ///
    /// On failure the times stay pending and an error event is emitted.
    pub fn record_new_files(&self) {
        let Some(audit) = &self.audit else {
            return;
        };
        let pending = self.live.take_pending();
        if pending.is_empty() {
            return;
        }
        let update = audit.update(|record| {
            for (name, created) in &pending {
                record.record_created(name.clone(), *created);
            }
        });
        if let Err(e) = update {
            self.events
                .error(format!("failed to update audit record: {e}"));
            self.live.restore_pending(pending);
        }
    }

    /// Lists, plans and prunes in one pass. Blocking.
    ///
    /// The active file is never removed. Failures never escape: they are
    /// reported as events and the pass removes what it can.
    pub fn enforce(&self, now: DateTime<Utc>) -> Vec<FamilyMember> {
        if !self.policy.is_enabled() {
            return Vec::new();
        }

        let record = self.audit.as_ref().and_then(|audit| match audit.read() {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!(path = %audit.path().display(), error = %e, "ignoring unreadable audit record");
                None
            }
        });

        let mut members = match list_family(&self.dir, &self.template, record.as_ref()) {
            Ok(members) => members,
            Err(e) => {
                self.events
                    .error(format!("failed to list {}: {e}", self.dir.display()));
                return Vec::new();
            }
        };

        // Read after listing: anything listed and still live is claimed by now.
        let (active, pending) = self.live.snapshot();
        for member in members.iter_mut().filter(|m| m.created.is_none()) {
            member.created = pending.get(member.base_name()).copied();
        }

        let planned = plan(&members, &self.policy, now, active.as_deref());
        if planned.is_empty() {
            return Vec::new();
        }
        tracing::debug!(dir = %self.dir.display(), count = planned.len(), "pruning log files");

        let removed = prune(planned, &self.events);
        if let Some(audit) = &self.audit {
            let update = audit.update(|record| {
                for member in &removed {
                    record.record_removed(member.base_name());
                }
            });
            if let Err(e) = update {
                self.events
                    .error(format!("failed to update audit record: {e}"));
            }
        }
        removed
    }
}
