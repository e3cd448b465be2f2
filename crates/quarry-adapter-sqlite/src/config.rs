//! `sqlite` source configuration.

use quarry_core::ConfigError;
use serde::Deserialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::str::FromStr;

pub const IN_MEMORY: &str = ":memory:";

fn default_database() -> String {
    IN_MEMORY.to_string()
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SqliteConfig {
    pub kind: String,

    /// Database file path, or `:memory:`.
    #[serde(default = "default_database")]
    pub database: String,

    #[serde(default)]
    pub read_only: bool,

    /// Ignored for in-memory databases, which always use one connection.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl SqliteConfig {
    pub fn is_in_memory(&self) -> bool {
        self.database == IN_MEMORY
    }

    pub fn validate(&self, name: &str) -> Result<(), ConfigError> {
        if self.database.trim().is_empty() {
            return Err(ConfigError::invalid(name, "database must not be empty"));
        }
        if self.max_connections == 0 {
            return Err(ConfigError::invalid(name, "maxConnections must be at least 1"));
        }
        if self.read_only && self.is_in_memory() {
            return Err(ConfigError::invalid(
                name,
                "readOnly cannot be used with an in-memory database",
            ));
        }
        Ok(())
    }

    pub fn connect_options(&self, name: &str) -> Result<SqliteConnectOptions, ConfigError> {
        if self.is_in_memory() {
            return SqliteConnectOptions::from_str("sqlite::memory:")
                .map_err(|e| ConfigError::invalid(name, e.to_string()));
        }
        Ok(SqliteConnectOptions::new()
            .filename(&self.database)
            .create_if_missing(!self.read_only)
            .read_only(self.read_only))
    }

    /// Every connection to `:memory:` opens a fresh database, so an in-memory
    /// pool holds exactly one connection for its whole life.
    pub fn pool_options(&self) -> SqlitePoolOptions {
        if self.is_in_memory() {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(self.max_connections)
        }
    }
}
