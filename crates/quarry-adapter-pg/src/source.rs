//! The `postgres` source kind.

use crate::config::PostgresConfig;
use crate::statement::PgSession;
use async_trait::async_trait;
use quarry_core::{BackendError, ClientCredential, ConfigError};
use quarry_runtime::{
    ClientCache, ClientFactory, Source, SourceFactory, StatementConnection, StatementSource,
};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;
use std::sync::Arc;

pub const KIND: &str = "postgres";

/// Opens one pool per caller credential, using the credential as password.
pub struct PgPoolFactory {
    options: PgConnectOptions,
    max_connections: u32,
}

#[async_trait]
impl ClientFactory for PgPoolFactory {
    type Client = PgPool;

    async fn create(&self, credential: &ClientCredential) -> Result<PgPool, BackendError> {
        let options = self.options.clone().password(credential.expose());
        PgPoolOptions::new()
            .max_connections(self.max_connections)
            .connect_with(options)
            .await
            .map_err(BackendError::client_construction)
    }

    async fn close(&self, client: Arc<PgPool>) {
        client.close().await;
    }
}

enum PgPools {
    Shared(PgPool),
    PerCaller(Arc<ClientCache<PgPoolFactory>>),
}

pub struct PgStatements {
    pools: PgPools,
}

#[async_trait]
impl StatementSource for PgStatements {
    fn requires_client_credential(&self) -> bool {
        matches!(self.pools, PgPools::PerCaller(_))
    }

    async fn connect(
        &self,
        credential: Option<&ClientCredential>,
    ) -> Result<Arc<dyn StatementConnection>, BackendError> {
        let pool = match &self.pools {
            PgPools::Shared(pool) => pool.clone(),
            PgPools::PerCaller(cache) => {
                let credential = credential.ok_or(BackendError::MissingCredential)?;
                PgPool::clone(&*cache.get_or_create(credential).await?)
            }
        };
        Ok(Arc::new(PgSession::new(pool)))
    }
}

pub struct PostgresSource {
    name: String,
    statements: Arc<PgStatements>,
}

impl PostgresSource {
    /// Connect a shared pool, or set up the per-caller pool cache.
    pub async fn connect(name: &str, config: &PostgresConfig) -> Result<Self, ConfigError> {
        config.validate(name)?;
        let options = config.connect_options(name)?;

        let pools = if config.use_client_credentials {
            tracing::info!(
                source = %name,
                ttl_secs = config.client_ttl_secs,
                "postgres source uses per-caller credentials"
            );
            PgPools::PerCaller(ClientCache::with_sweeper(
                PgPoolFactory {
                    options,
                    max_connections: config.max_connections,
                },
                config.client_ttl(),
                config.client_sweep_interval(),
            ))
        } else {
            let pool = PgPoolOptions::new()
                .max_connections(config.max_connections)
                .connect_with(options)
                .await
                .map_err(|e| ConfigError::SourceInit {
                    name: name.to_string(),
                    source: BackendError::connect(e),
                })?;
            PgPools::Shared(pool)
        };

        Ok(Self {
            name: name.to_string(),
            statements: Arc::new(PgStatements { pools }),
        })
    }
}

#[async_trait]
impl Source for PostgresSource {
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
        match &self.statements.pools {
            PgPools::Shared(pool) => pool.close().await,
            PgPools::PerCaller(cache) => cache.shutdown().await,
        }
    }
}

pub struct PostgresSourceFactory;

#[async_trait]
impl SourceFactory for PostgresSourceFactory {
    async fn build(
        &self,
        name: &str,
        entry: serde_yaml::Value,
    ) -> Result<Arc<dyn Source>, ConfigError> {
        let config: PostgresConfig = quarry_core::decode_entry(name, entry)?;
        Ok(Arc::new(PostgresSource::connect(name, &config).await?))
    }
}
