//! Query command implementation.

use std::io::Write;

use claw_logrotate::{QueryOptions, RotatingFileTransport, TransportConfig};

use crate::cli::QueryArgs;
use crate::error::CliError;
use crate::output::{OutputFormat, QueryResult};

/// Reads JSON records back from a file family.
pub struct QueryCommand<'a> {
    config: &'a TransportConfig,
}

impl<'a> QueryCommand<'a> {
    /// Create a new query command.
    #[must_use]
    pub const fn new(config: &'a TransportConfig) -> Self {
        Self { config }
    }

    /// Execute the query command.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration or the time window is invalid,
    /// or the directory cannot be read.
    pub async fn execute<W: Write>(
        &self,
        out: &mut W,
        format: &OutputFormat,
        args: &QueryArgs,
    ) -> Result<(), CliError> {
        let transport = RotatingFileTransport::new(self.config.clone())?;
        let options = query_options(transport.query_options(), args);
        tracing::debug!(
            from = %options.from,
            until = %options.until,
            rows = options.rows,
            "querying file family"
        );

        let records = transport.query(options).await?;
        format.write(out, &QueryResult { records })
    }
}

/// Applies the command-line arguments on top of the default window.
fn query_options(defaults: QueryOptions, args: &QueryArgs) -> QueryOptions {
    let mut options = match args.until {
        Some(until) => QueryOptions::ending_at(until),
        None => defaults,
    };
    if let Some(from) = args.from {
        options = options.with_from(from);
    }
    options = options
        .with_rows(args.rows)
        .with_start(args.start)
        .with_order(args.order.into());
    if !args.fields.is_empty() {
        options = options.with_fields(args.fields.iter().cloned());
    }
    if let Some(level) = &args.level {
        options = options.with_level(level.clone());
    }
    options
}
