//! CLI command implementations.
//!
//! Each submodule implements a specific CLI command:
//! - [`write`] - Append lines to a rotating file family
//! - [`query`] - Read JSON records back from a file family

pub mod query;
pub mod write;

pub use query::QueryCommand;
pub use write::WriteCommand;
