//! Retroactive queries over a file family.
//!
//! Every member of the family (plain or gzip) is scanned line by line; lines
//! that parse as JSON objects with a `timestamp` inside the window are
//! candidates. Pagination keeps only the best `start + rows` candidates in a
//! bounded heap, so memory does not grow with the size of the family while
//! the result is still a stable slice of the globally time-sorted matches.

use std::cmp::Ordering;
use std::collections::{BTreeSet, BinaryHeap};
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader, ErrorKind};
use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, TimeDelta, Utc};
use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Result, RotateError};
use crate::pattern::{FilenameTemplate, GZIP_EXTENSION};
use crate::retention::list_family;

/// Rows returned when none are requested.
pub const DEFAULT_ROWS: usize = 10;

/// Result order by timestamp.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Order {
    /// Oldest first.
    Asc,
    /// Newest first.
    #[default]
    Desc,
}

impl fmt::Display for Order {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Asc => write!(f, "asc"),
            Self::Desc => write!(f, "desc"),
        }
    }
}

impl FromStr for Order {
    type Err = RotateError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "asc" => Ok(Self::Asc),
            "desc" => Ok(Self::Desc),
            _ => Err(RotateError::InvalidQuery(format!("unknown order: {s}"))),
        }
    }
}

/// Options for a single query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryOptions {
    /// Earliest timestamp included.
    pub from: DateTime<Utc>,
    /// Latest timestamp included.
    pub until: DateTime<Utc>,
    /// Maximum number of records returned.
    pub rows: usize,
    /// Matches skipped before the first returned record.
    pub start: usize,
    /// Sort order.
    pub order: Order,
    /// Keys to keep in each record; all keys when `None`.
    pub fields: Option<Vec<String>>,
    /// Exact `level` value to match.
    pub level: Option<String>,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self::ending_at(Utc::now())
    }
}

impl QueryOptions {
    /// The last 24 hours before `until`, newest ten records first.
    #[must_use]
    pub fn ending_at(until: DateTime<Utc>) -> Self {
        Self {
            from: until - TimeDelta::hours(24),
            until,
            rows: DEFAULT_ROWS,
            start: 0,
            order: Order::Desc,
            fields: None,
            level: None,
        }
    }

    /// Sets the start of the window.
    #[must_use]
    pub const fn with_from(mut self, from: DateTime<Utc>) -> Self {
        self.from = from;
        self
    }

    /// Sets the end of the window.
    #[must_use]
    pub const fn with_until(mut self, until: DateTime<Utc>) -> Self {
        self.until = until;
        self
    }

    /// Sets the row limit.
    #[must_use]
    pub const fn with_rows(mut self, rows: usize) -> Self {
        self.rows = rows;
        self
    }

    /// Sets the offset.
    #[must_use]
    pub const fn with_start(mut self, start: usize) -> Self {
        self.start = start;
        self
    }

    /// Sets the order.
    #[must_use]
    pub const fn with_order(mut self, order: Order) -> Self {
        self.order = order;
        self
    }

    /// Restricts records to the given keys.
    #[must_use]
    pub fn with_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    /// Matches only records with this level.
    #[must_use]
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = Some(level.into());
        self
    }

    /// Checks that the window is not inverted.
    ///
    /// # Errors
    ///
    /// Returns [`RotateError::InvalidQuery`] if `from` is after `until`.
    pub fn validate(&self) -> Result<()> {
        if self.from > self.until {
            return Err(RotateError::InvalidQuery(format!(
                "from ({}) is after until ({})",
                self.from.to_rfc3339(),
                self.until.to_rfc3339()
            )));
        }
        Ok(())
    }

    fn matches(&self, record: &Map<String, Value>) -> Option<DateTime<Utc>> {
        let time = record.get("timestamp").and_then(parse_timestamp)?;
        if time < self.from || time > self.until {
            return None;
        }
        match &self.level {
            Some(level) if record.get("level").and_then(Value::as_str) != Some(level.as_str()) => {
                None
            }
            _ => Some(time),
        }
    }

    fn project(&self, record: Map<String, Value>) -> Value {
        let Some(fields) = &self.fields else {
            return Value::Object(record);
        };
        let mut record = record;
        let projected = fields
            .iter()
            .filter_map(|key| record.remove(key).map(|value| (key.clone(), value)))
            .collect();
        Value::Object(projected)
    }
}

fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(text) => DateTime::parse_from_rfc3339(text)
            .ok()
            .map(|t| t.with_timezone(&Utc)),
        Value::Number(n) => n.as_i64().and_then(DateTime::from_timestamp_millis),
        _ => None,
    }
}

struct Candidate {
    time: DateTime<Utc>,
    seq: u64,
    order: Order,
    record: Map<String, Value>,
}

impl Ord for Candidate {
    // Greater means later in the result, so the heap top is evicted first.
    fn cmp(&self, other: &Self) -> Ordering {
        let by_time = match self.order {
            Order::Asc => self.time.cmp(&other.time),
            Order::Desc => other.time.cmp(&self.time),
        };
        by_time.then(self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

/// Keeps the first `capacity` candidates in result order.
struct TopK {
    capacity: usize,
    heap: BinaryHeap<Candidate>,
}

impl TopK {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            heap: BinaryHeap::with_capacity(capacity.min(1024)),
        }
    }

    fn offer(&mut self, candidate: Candidate) {
        if self.heap.len() < self.capacity {
            self.heap.push(candidate);
        } else if self.heap.peek().is_some_and(|worst| candidate < *worst) {
            self.heap.pop();
            self.heap.push(candidate);
        }
    }

    fn into_sorted(self) -> Vec<Candidate> {
        self.heap.into_sorted_vec()
    }
}

/// Queries the family of `template` in `dir`. Blocking.
///
/// A missing directory or an empty family yields no records. Files that
/// vanish mid-scan and lines that are not JSON objects are skipped.
///
/// # Errors
///
/// Returns an error if the options are invalid or the directory exists but
/// cannot be listed.
pub fn query_family(
    dir: &Path,
    template: &FilenameTemplate,
    options: &QueryOptions,
) -> Result<Vec<Value>> {
    options.validate()?;

    let capacity = options.start.saturating_add(options.rows);
    if options.rows == 0 {
        return Ok(Vec::new());
    }

    let members = list_family(dir, template, None)?;
    // A plain file whose archive already exists is mid-compression; its
    // records are read from the archive.
    let archived: BTreeSet<&str> = members
        .iter()
        .filter(|m| m.compressed)
        .filter_map(|m| m.name.strip_suffix(GZIP_EXTENSION))
        .collect();
    let mut top = TopK::new(capacity);
    let mut seq = 0u64;

    for member in &members {
        if !member.compressed && archived.contains(member.name.as_str()) {
            continue;
        }
        let file = match File::open(&member.path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => continue,
            Err(e) => {
                tracing::warn!(path = %member.path.display(), error = %e, "skipping unreadable log file");
                continue;
            }
        };
        let reader: Box<dyn BufRead> = if member.compressed {
            Box::new(BufReader::new(GzDecoder::new(file)))
        } else {
            Box::new(BufReader::new(file))
        };

        scan(reader, &member.path, options, |time, record| {
            top.offer(Candidate {
                time,
                seq,
                order: options.order,
                record,
            });
            seq += 1;
        });
    }

    Ok(top
        .into_sorted()
        .into_iter()
        .skip(options.start)
        .take(options.rows)
        .map(|candidate| options.project(candidate.record))
        .collect())
}

fn scan(
    mut reader: Box<dyn BufRead>,
    path: &Path,
    options: &QueryOptions,
    mut accept: impl FnMut(DateTime<Utc>, Map<String, Value>),
) {
    let mut line = Vec::new();
    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "stopped reading log file");
                break;
            }
        }

        let text = line.trim_ascii();
        if text.is_empty() {
            continue;
        }
        let Ok(Value::Object(record)) = serde_json::from_slice::<Value>(text) else {
            continue;
        };
        if let Some(time) = options.matches(&record) {
            accept(time, record);
        }
    }
}
