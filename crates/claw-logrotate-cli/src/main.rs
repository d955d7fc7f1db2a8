//! claw-logrotate binary entrypoint.
//!
//! This is the main entry point for the `claw-logrotate` command-line tool.

use std::io;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use claw_logrotate_cli::cli::{Cli, Commands};
use claw_logrotate_cli::commands::{QueryCommand, WriteCommand};
use claw_logrotate_cli::output::OutputFormat;

fn main() -> ExitCode {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    // Parse CLI arguments
    let cli = Cli::parse();

    // Run async runtime
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), claw_logrotate_cli::CliError> {
    let format = OutputFormat::new(cli.format);

    match cli.command {
        Commands::Write(args) => {
            let config = args.to_config()?;
            let cmd = WriteCommand::new(&config);
            let stdin = tokio::io::BufReader::new(tokio::io::stdin());
            let mut stdout = io::stdout().lock();
            cmd.execute(stdin, &mut stdout, &format).await?;
        }
        Commands::Query(args) => {
            let config = args.family.to_config()?;
            let cmd = QueryCommand::new(&config);
            let mut stdout = io::stdout().lock();
            cmd.execute(&mut stdout, &format, &args).await?;
        }
    }

    Ok(())
}
