//! The `sqlite` source kind.

use crate::config::SqliteConfig;
use crate::statement::SqliteSession;
use async_trait::async_trait;
use quarry_core::{BackendError, ClientCredential, ConfigError};
use quarry_runtime::{Source, SourceFactory, StatementConnection, StatementSource};
use sqlx::SqlitePool;
use std::sync::Arc;

pub const KIND: &str = "sqlite";

pub struct SqliteStatements {
    pool: SqlitePool,
}

#[async_trait]
impl StatementSource for SqliteStatements {
    async fn connect(
        &self,
        _credential: Option<&ClientCredential>,
    ) -> Result<Arc<dyn StatementConnection>, BackendError> {
        Ok(Arc::new(SqliteSession::new(self.pool.clone())))
    }
}

pub struct SqliteSource {
    name: String,
    statements: Arc<SqliteStatements>,
}

impl SqliteSource {
    pub async fn connect(name: &str, config: &SqliteConfig) -> Result<Self, ConfigError> {
        config.validate(name)?;
        let pool = config
            .pool_options()
            .connect_with(config.connect_options(name)?)
            .await
            .map_err(|e| ConfigError::SourceInit {
                name: name.to_string(),
                source: BackendError::connect(e),
            })?;
        tracing::debug!(
            source = %name,
            database = %config.database,
            read_only = config.read_only,
            "opened sqlite pool"
        );
        Ok(Self {
            name: name.to_string(),
            statements: Arc::new(SqliteStatements { pool }),
        })
    }
}

#[async_trait]
impl Source for SqliteSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &str {
        KIND
    }

    fn statements(&self) -> Option<Arc<dyn StatementSource>> {
        Some(self.statements.clone())
    }

    async fn close(&self) {
        self.statements.pool.close().await;
    }
}

pub struct SqliteSourceFactory;

#[async_trait]
impl SourceFactory for SqliteSourceFactory {
    async fn build(
        &self,
        name: &str,
        entry: serde_yaml::Value,
    ) -> Result<Arc<dyn Source>, ConfigError> {
        let config: SqliteConfig = quarry_core::decode_entry(name, entry)?;
        Ok(Arc::new(SqliteSource::connect(name, &config).await?))
    }
}
