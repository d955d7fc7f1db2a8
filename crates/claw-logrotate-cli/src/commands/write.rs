//! Write command implementation.

use std::io::Write;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use claw_logrotate::{RotatingFileTransport, TransportConfig};

use crate::error::CliError;
use crate::output::{OutputFormat, WriteSummary};

/// Appends input lines to a rotating file family.
pub struct WriteCommand<'a> {
    config: &'a TransportConfig,
}

impl<'a> WriteCommand<'a> {
    /// Create a new write command.
    #[must_use]
    pub const fn new(config: &'a TransportConfig) -> Self {
        Self { config }
    }

    /// Execute the write command.
    ///
    /// Every line of `input` is logged in order. The transport is closed and
    /// its background archiving awaited before the summary is written.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, a line cannot be
    /// written, or the summary cannot be output.
    pub async fn execute<R, W>(
        &self,
        input: R,
        out: &mut W,
        format: &OutputFormat,
    ) -> Result<(), CliError>
    where
        R: AsyncBufRead + Unpin,
        W: Write,
    {
        let transport = RotatingFileTransport::new(self.config.clone())?;
        let mut events = transport.subscribe();
        let eol_len = self.config.eol.len() as u64;

        let mut lines = input.lines();
        let mut written = 0usize;
        let mut bytes = 0u64;
        let mut current_file = None;
        let result = loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if let Err(e) = transport.log(&line).await {
                        break Err(CliError::from(e));
                    }
                    written += 1;
                    bytes += line.len() as u64 + eol_len;
                    current_file = transport.current_file();
                }
                Ok(None) => break Ok(()),
                Err(e) => break Err(CliError::from(e)),
            }
        };

        let state = transport.state();
        let closed = transport.close().await;
        transport.wait_background().await;
        result?;
        closed?;
        tracing::debug!(lines = written, bytes, "input exhausted");

        let mut summary = WriteSummary::new(state);
        summary.lines = written;
        summary.bytes = bytes;
        summary.current_file = current_file;
        while let Some(event) = events.try_next() {
            summary.record(&event);
        }

        format.write(out, &summary)
    }
}
