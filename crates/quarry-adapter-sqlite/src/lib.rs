//! SQLite backend for quarry.
//!
//! Registers the `sqlite` source kind and the `sqlite-sql` /
//! `sqlite-execute-sql` tool kinds. Statements use `$name` placeholders,
//! rewritten to `?1..?n` before preparation.

pub mod config;
pub mod source;
pub mod statement;

pub use config::SqliteConfig;
pub use source::{SqliteSource, SqliteSourceFactory};

use quarry_core::ConfigError;
use quarry_runtime::{ExecuteSqlToolFactory, Registry, StatementToolFactory};

pub const SQL_TOOL_KIND: &str = "sqlite-sql";
pub const EXECUTE_SQL_TOOL_KIND: &str = "sqlite-execute-sql";

/// Install the SQLite kinds into `registry`.
pub fn register(registry: &mut Registry) -> Result<(), ConfigError> {
    registry.install_source(source::KIND, SqliteSourceFactory)?;
    registry.install_tool(SQL_TOOL_KIND, StatementToolFactory)?;
    registry.install_tool(EXECUTE_SQL_TOOL_KIND, ExecuteSqlToolFactory)?;
    Ok(())
}
