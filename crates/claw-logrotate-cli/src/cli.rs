//! Command-line argument parsing with clap.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand, ValueEnum};

use claw_logrotate::{MaxSize, Order, RetentionPolicy, TransportConfig};

use crate::error::CliError;

/// Rotating log files from the command line.
#[derive(Parser, Debug, Clone)]
#[command(name = "claw-logrotate")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output format.
    #[arg(short, long, value_enum, default_value_t = Format::Table)]
    pub format: Format,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Output format options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Format {
    /// Human-readable table format.
    #[default]
    Table,
    /// JSON output for scripting.
    Json,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Append stdin lines to a rotating file family.
    Write(WriteArgs),

    /// Query JSON records from a file family.
    Query(QueryArgs),
}

/// Options naming a file family.
#[derive(Args, Debug, Clone, Default)]
pub struct FamilyArgs {
    /// JSON file with transport options. Flags override its values.
    #[arg(short, long, env = "CLAW_LOGROTATE_CONFIG")]
    pub config: Option<PathBuf>,

    /// File name template; may contain %DATE%.
    #[arg(long, env = "CLAW_LOGROTATE_FILENAME")]
    pub filename: Option<String>,

    /// Directory holding the family.
    #[arg(short, long, env = "CLAW_LOGROTATE_DIRNAME")]
    pub dirname: Option<PathBuf>,

    /// Rotation pattern, e.g. YYYY-MM-DD-HH.
    #[arg(long)]
    pub date_pattern: Option<String>,

    /// Use UTC instead of local calendar fields.
    #[arg(long)]
    pub utc: bool,

    /// Put the rotation key in front of the file name.
    #[arg(long)]
    pub prepend: bool,
}

impl FamilyArgs {
    /// Builds a transport config from the config file and flags.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be read or parsed.
    pub fn to_config(&self) -> Result<TransportConfig, CliError> {
        let mut config = match &self.config {
            Some(path) => {
                let text = std::fs::read_to_string(path)?;
                serde_json::from_str(&text).map_err(|e| {
                    CliError::Config(format!("{}: {e}", path.display()))
                })?
            }
            None => TransportConfig::default(),
        };

        if let Some(filename) = &self.filename {
            config.filename = Some(filename.clone());
        }
        if let Some(dirname) = &self.dirname {
            config.dirname = Some(dirname.clone());
        }
        if let Some(pattern) = &self.date_pattern {
            config.date_pattern.clone_from(pattern);
        }
        config.utc |= self.utc;
        config.prepend |= self.prepend;
        Ok(config)
    }
}

/// Arguments for the write command.
#[derive(Args, Debug, Clone)]
pub struct WriteArgs {
    /// The file family to write.
    #[command(flatten)]
    pub family: FamilyArgs,

    /// Rotate once a file reaches this size (bytes, or k/m/g).
    #[arg(long, value_parser = parse_max_size)]
    pub max_size: Option<MaxSize>,

    /// Files to keep: a count ("10") or an age in days ("14d").
    #[arg(long, value_parser = parse_max_files)]
    pub max_files: Option<RetentionPolicy>,

    /// Gzip files once they are rotated out.
    #[arg(short, long)]
    pub zip: bool,

    /// Create missing directories.
    #[arg(long)]
    pub create_directories: bool,

    /// Do not keep an audit record.
    #[arg(long)]
    pub no_audit: bool,
}

impl WriteArgs {
    /// Builds the transport config for this write.
    ///
    /// # Errors
    ///
    /// Returns an error if the family options cannot be loaded.
    pub fn to_config(&self) -> Result<TransportConfig, CliError> {
        let mut config = self.family.to_config()?;
        if let Some(max_size) = self.max_size {
            config.max_size = Some(max_size);
        }
        if let Some(policy) = self.max_files {
            config.retention = policy;
        }
        config.zipped_archive |= self.zip;
        config.create_directories |= self.create_directories;
        if self.no_audit {
            config.audit = false;
        }
        Ok(config)
    }
}

/// Sort order argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OrderArg {
    /// Oldest first.
    Asc,
    /// Newest first.
    #[default]
    Desc,
}

impl From<OrderArg> for Order {
    fn from(order: OrderArg) -> Self {
        match order {
            OrderArg::Asc => Self::Asc,
            OrderArg::Desc => Self::Desc,
        }
    }
}

/// Arguments for the query command.
#[derive(Args, Debug, Clone)]
pub struct QueryArgs {
    /// The file family to query.
    #[command(flatten)]
    pub family: FamilyArgs,

    /// Earliest timestamp (RFC 3339). Defaults to 24 hours before --until.
    #[arg(long, value_parser = parse_time)]
    pub from: Option<DateTime<Utc>>,

    /// Latest timestamp (RFC 3339). Defaults to now.
    #[arg(long, value_parser = parse_time)]
    pub until: Option<DateTime<Utc>>,

    /// Maximum records to return.
    #[arg(short, long, default_value_t = claw_logrotate::DEFAULT_ROWS)]
    pub rows: usize,

    /// Matches to skip.
    #[arg(long, default_value_t = 0)]
    pub start: usize,

    /// Sort order.
    #[arg(long, value_enum, default_value_t = OrderArg::Desc)]
    pub order: OrderArg,

    /// Only records with this level.
    #[arg(short, long)]
    pub level: Option<String>,

    /// Keys to keep (comma-separated).
    #[arg(long, value_delimiter = ',')]
    pub fields: Vec<String>,
}

fn parse_max_size(s: &str) -> Result<MaxSize, String> {
    MaxSize::parse(s).ok_or_else(|| format!("invalid size: {s}"))
}

fn parse_max_files(s: &str) -> Result<RetentionPolicy, String> {
    RetentionPolicy::parse_max_files(s).ok_or_else(|| format!("invalid retention: {s}"))
}

fn parse_time(s: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| format!("invalid timestamp {s}: {e}"))
}
