//! # claw-logrotate-cli
//!
//! Command-line front end for [`claw_logrotate`].
//!
//! Provides commands for:
//! - Piping lines into a rotating file family (`write`)
//! - Querying JSON records back out of a family (`query`)
//!
//! Both commands build a [`claw_logrotate::TransportConfig`] from an optional
//! JSON config file and flags, so a family written by a service can be
//! inspected with the same options the service uses.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod commands;
pub mod error;
pub mod output;

pub use cli::{Cli, Commands, FamilyArgs, Format, QueryArgs, WriteArgs};
pub use error::CliError;
pub use output::OutputFormat;
