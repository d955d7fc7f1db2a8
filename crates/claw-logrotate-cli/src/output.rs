//! Output formatting for CLI commands.
//!
//! Supports table (human-readable) and JSON output formats.

use std::io::Write;
use std::path::PathBuf;

use serde::Serialize;
use serde_json::Value;

use claw_logrotate::{TransportEvent, TransportState};

use crate::cli::Format;
use crate::error::CliError;

/// Output formatter that handles both table and JSON output.
#[derive(Debug, Clone)]
pub struct OutputFormat {
    format: Format,
}

impl OutputFormat {
    /// Create a new output formatter.
    #[must_use]
    pub const fn new(format: Format) -> Self {
        Self { format }
    }

    /// Get the current format.
    #[must_use]
    pub const fn format(&self) -> Format {
        self.format
    }

    /// Check if JSON format is selected.
    #[must_use]
    pub const fn is_json(&self) -> bool {
        matches!(self.format, Format::Json)
    }

    /// Write a serializable value to the output.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or writing fails.
    pub fn write<W, T>(&self, writer: &mut W, value: &T) -> Result<(), CliError>
    where
        W: Write,
        T: Serialize + TableDisplay,
    {
        match self.format {
            Format::Json => {
                serde_json::to_writer_pretty(&mut *writer, value)
                    .map_err(|e| CliError::Format(format!("JSON serialization failed: {e}")))?;
                writeln!(writer)?;
            }
            Format::Table => {
                value.write_table(writer)?;
            }
        }
        Ok(())
    }

    /// Write a serializable value to a string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_string<T>(&self, value: &T) -> Result<String, CliError>
    where
        T: Serialize + TableDisplay,
    {
        let mut buf = Vec::new();
        self.write(&mut buf, value)?;
        String::from_utf8(buf).map_err(|e| CliError::Format(format!("UTF-8 error: {e}")))
    }
}

impl Default for OutputFormat {
    fn default() -> Self {
        Self::new(Format::Table)
    }
}

/// Trait for types that can be displayed as a table.
pub trait TableDisplay {
    /// Write the value as a human-readable table.
    ///
    /// # Errors
    ///
    /// Returns an error if writing fails.
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError>;
}

/// Result of a write session.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WriteSummary {
    /// Lines written.
    pub lines: usize,
    /// Bytes written, line endings included.
    pub bytes: u64,
    /// File that was active when the session ended.
    pub current_file: Option<PathBuf>,
    /// Final transport state.
    pub state: String,
    /// Files created.
    pub files_created: usize,
    /// Rotations performed.
    pub rotations: usize,
    /// Files removed by retention.
    pub files_removed: usize,
    /// Files compressed.
    pub archived: usize,
    /// Error and fatal event messages.
    pub errors: Vec<String>,
}

impl WriteSummary {
    /// Creates an empty summary for a transport in `state`.
    #[must_use]
    pub fn new(state: TransportState) -> Self {
        Self {
            state: state.to_string(),
            ..Self::default()
        }
    }

    /// Counts a lifecycle event.
    pub fn record(&mut self, event: &TransportEvent) {
        match event {
            TransportEvent::NewFile { .. } => self.files_created += 1,
            TransportEvent::Rotate { .. } => self.rotations += 1,
            TransportEvent::FileRemoved { .. } => self.files_removed += 1,
            TransportEvent::Archived { .. } => self.archived += 1,
            TransportEvent::Error { message } | TransportEvent::Fatal { message } => {
                self.errors.push(message.clone());
            }
            TransportEvent::Closed => {}
        }
    }
}

impl TableDisplay for WriteSummary {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        writeln!(writer, "Write Summary")?;
        writeln!(writer, "══════════════════════════════════")?;
        writeln!(writer, "Lines:            {}", self.lines)?;
        writeln!(writer, "Bytes:            {}", self.bytes)?;
        writeln!(writer, "State:            {}", self.state)?;
        if let Some(path) = &self.current_file {
            writeln!(writer, "Current File:     {}", path.display())?;
        }
        writeln!(writer)?;
        writeln!(writer, "Files")?;
        writeln!(writer, "  Created:        {}", self.files_created)?;
        writeln!(writer, "  Rotations:      {}", self.rotations)?;
        writeln!(writer, "  Removed:        {}", self.files_removed)?;
        writeln!(writer, "  Archived:       {}", self.archived)?;
        if !self.errors.is_empty() {
            writeln!(writer)?;
            writeln!(writer, "Errors")?;
            for error in &self.errors {
                writeln!(writer, "  {error}")?;
            }
        }
        Ok(())
    }
}

/// Records returned by a query.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct QueryResult {
    /// Matching records in result order.
    pub records: Vec<Value>,
}

impl TableDisplay for QueryResult {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        if self.records.is_empty() {
            writeln!(writer, "No matching records")?;
            return Ok(());
        }

        writeln!(writer, "{:<30}  {:<8}  MESSAGE", "TIMESTAMP", "LEVEL")?;
        writeln!(writer, "{}", "─".repeat(80))?;

        for record in &self.records {
            let timestamp = field(record, "timestamp");
            let level = field(record, "level");
            let message = match record.get("message") {
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                // Projected away; show what is left.
                None => record.to_string(),
            };
            writeln!(
                writer,
                "{:<30}  {:<8}  {}",
                truncate(&timestamp, 30),
                truncate(&level, 8),
                message
            )?;
        }

        writeln!(writer)?;
        writeln!(writer, "Total: {} record(s)", self.records.len())?;
        Ok(())
    }
}

fn field(record: &Value, key: &str) -> String {
    match record.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => "-".to_string(),
    }
}

/// Truncate a string to a maximum number of characters.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else if max_len > 3 {
        let head: String = s.chars().take(max_len - 3).collect();
        format!("{head}...")
    } else {
        s.chars().take(max_len).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn output_format_default_is_table() {
        let fmt = OutputFormat::default();
        assert_eq!(fmt.format(), Format::Table);
        assert!(!fmt.is_json());
    }

    #[test]
    fn output_format_json() {
        let fmt = OutputFormat::new(Format::Json);
        assert_eq!(fmt.format(), Format::Json);
        assert!(fmt.is_json());
    }

    #[test]
    fn write_summary_counts_events() {
        let mut summary = WriteSummary::new(TransportState::Open);
        summary.record(&TransportEvent::NewFile {
            path: PathBuf::from("a.log"),
        });
        summary.record(&TransportEvent::Rotate {
            old_path: PathBuf::from("a.log"),
            new_path: PathBuf::from("a.log.1"),
        });
        summary.record(&TransportEvent::Archived {
            path: PathBuf::from("a.log.gz"),
        });
        summary.record(&TransportEvent::Error {
            message: "disk full".to_string(),
        });
        summary.record(&TransportEvent::Closed);

        assert_eq!(summary.files_created, 1);
        assert_eq!(summary.rotations, 1);
        assert_eq!(summary.archived, 1);
        assert_eq!(summary.files_removed, 0);
        assert_eq!(summary.errors, vec!["disk full"]);
    }

    #[test]
    fn write_summary_table_output() {
        let summary = WriteSummary {
            lines: 3,
            bytes: 42,
            current_file: Some(PathBuf::from("logs/app-2029-01-01.log")),
            state: "open".to_string(),
            rotations: 2,
            ..WriteSummary::default()
        };

        let fmt = OutputFormat::new(Format::Table);
        let output = fmt.to_string(&summary).expect("should format");

        assert!(output.contains("Write Summary"));
        assert!(output.contains("Lines:            3"));
        assert!(output.contains("logs/app-2029-01-01.log"));
        assert!(output.contains("Rotations:      2"));
        assert!(!output.contains("Errors"));
    }

    #[test]
    fn write_summary_json_output() {
        let summary = WriteSummary {
            lines: 1,
            state: "shut-down".to_string(),
            ..WriteSummary::default()
        };

        let fmt = OutputFormat::new(Format::Json);
        let output = fmt.to_string(&summary).expect("should format");
        let parsed: Value = serde_json::from_str(&output).expect("valid json");

        assert_eq!(parsed["lines"], 1);
        assert_eq!(parsed["state"], "shut-down");
        assert_eq!(parsed["current_file"], Value::Null);
    }

    #[test]
    fn query_result_empty() {
        let fmt = OutputFormat::new(Format::Table);
        let output = fmt.to_string(&QueryResult::default()).expect("should format");
        assert!(output.contains("No matching records"));
    }

    #[test]
    fn query_result_table_output() {
        let result = QueryResult {
            records: vec![
                json!({"timestamp": "2029-01-01T00:00:00Z", "level": "info", "message": "hello"}),
                json!({"level": "warn"}),
            ],
        };

        let fmt = OutputFormat::new(Format::Table);
        let output = fmt.to_string(&result).expect("should format");

        assert!(output.contains("TIMESTAMP"));
        assert!(output.contains("hello"));
        assert!(output.contains("{\"level\":\"warn\"}"));
        assert!(output.contains("Total: 2 record(s)"));
    }

    #[test]
    fn query_result_json_is_array() {
        let result = QueryResult {
            records: vec![json!({"message": "a"}), json!({"message": "b"})],
        };

        let fmt = OutputFormat::new(Format::Json);
        let mut buf = Vec::new();
        fmt.write(&mut buf, &result).expect("should write");

        let output = String::from_utf8(buf).expect("valid utf8");
        let parsed: Value = serde_json::from_str(&output).expect("valid json");
        assert_eq!(parsed, json!([{"message": "a"}, {"message": "b"}]));
    }

    #[test]
    fn truncate_short_string() {
        assert_eq!(truncate("hello", 10), "hello");
    }

    #[test]
    fn truncate_long_string() {
        assert_eq!(truncate("hello world", 8), "hello...");
    }

    #[test]
    fn truncate_counts_characters() {
        assert_eq!(truncate("héllo wörld", 8), "héllo...");
        assert_eq!(truncate("héllo", 3), "hél");
    }
}
