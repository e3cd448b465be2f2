//! Postgres backend for quarry.
//!
//! Registers the `postgres` source kind and the `postgres-sql` /
//! `postgres-execute-sql` tool kinds. Statements use `$name` placeholders,
//! rewritten to `$1..$n` before preparation.

pub mod config;
pub mod source;
pub mod statement;

pub use config::PostgresConfig;
pub use source::{PgPoolFactory, PostgresSource, PostgresSourceFactory};

use quarry_core::ConfigError;
use quarry_runtime::{ExecuteSqlToolFactory, Registry, StatementToolFactory};

pub const SQL_TOOL_KIND: &str = "postgres-sql";
pub const EXECUTE_SQL_TOOL_KIND: &str = "postgres-execute-sql";

/// Install the Postgres kinds into `registry`.
pub fn register(registry: &mut Registry) -> Result<(), ConfigError> {
    registry.install_source(source::KIND, PostgresSourceFactory)?;
    registry.install_tool(SQL_TOOL_KIND, StatementToolFactory)?;
    registry.install_tool(EXECUTE_SQL_TOOL_KIND, ExecuteSqlToolFactory)?;
    Ok(())
}
