//! Per-credential client cache.
//!
//! Some backends need a distinct client per caller credential. Building one is
//! expensive, so clients are cached by credential for a fixed lifetime:
//!
//! - [`ClientCache::get_or_create`] returns a live client, building one at
//!   most once per credential per lifetime even under concurrent first use.
//!   Expired entries are never handed out; they are rebuilt on access.
//! - An optional sweeper task closes and evicts expired entries on a fixed
//!   interval. It stops when the cache is shut down or dropped.

use async_trait::async_trait;
use quarry_core::{BackendError, ClientCredential};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// How long a client stays valid after creation.
pub const DEFAULT_CLIENT_TTL: Duration = Duration::from_secs(55 * 60);

/// How often the sweeper looks for expired clients.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Creates and closes the clients held by a [`ClientCache`].
#[async_trait]
pub trait ClientFactory: Send + Sync + 'static {
    type Client: Send + Sync + 'static;

    async fn create(&self, credential: &ClientCredential) -> Result<Self::Client, BackendError>;

    /// Release a client that left the cache.
    async fn close(&self, _client: Arc<Self::Client>) {}
}

struct CachedClient<C> {
    client: Arc<C>,
    expires_at: Instant,
}

impl<C> CachedClient<C> {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

struct Sweeper {
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

pub struct ClientCache<F: ClientFactory> {
    factory: F,
    ttl: Duration,
    entries: RwLock<HashMap<ClientCredential, CachedClient<F::Client>>>,
    sweeper: Mutex<Option<Sweeper>>,
}

impl<F: ClientFactory> ClientCache<F> {
    /// A cache without a background sweeper. Expired entries are still
    /// replaced on access and can be evicted with [`ClientCache::sweep`].
    pub fn new(factory: F, ttl: Duration) -> Arc<Self> {
        Arc::new(Self {
            factory,
            ttl,
            entries: RwLock::new(HashMap::new()),
            sweeper: Mutex::new(None),
        })
    }

    /// A cache whose expired entries are swept every `interval`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn with_sweeper(factory: F, ttl: Duration, interval: Duration) -> Arc<Self> {
        let cache = Self::new(factory, ttl);
        let sweeper = spawn_sweeper(Arc::downgrade(&cache), interval);
        *cache.sweeper.lock().unwrap_or_else(PoisonError::into_inner) = Some(sweeper);
        cache
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Live client for `credential`, creating one if needed.
    pub async fn get_or_create(
        &self,
        credential: &ClientCredential,
    ) -> Result<Arc<F::Client>, BackendError> {
        {
            let entries = self.entries.read().await;
            if let Some(entry) = entries.get(credential) {
                if entry.is_live(Instant::now()) {
                    return Ok(entry.client.clone());
                }
            }
        }

        let mut entries = self.entries.write().await;
        // Another task may have filled the slot while we waited for the write lock.
        if let Some(entry) = entries.get(credential) {
            if entry.is_live(Instant::now()) {
                return Ok(entry.client.clone());
            }
        }

        let client = Arc::new(self.factory.create(credential).await?);
        let replaced = entries.insert(
            credential.clone(),
            CachedClient {
                client: client.clone(),
                expires_at: Instant::now() + self.ttl,
            },
        );
        drop(entries);
        tracing::debug!(ttl_secs = self.ttl.as_secs(), "created client for credential");

        if let Some(old) = replaced {
            self.factory.close(old.client).await;
        }
        Ok(client)
    }

    /// Close and remove every expired entry. Returns how many were evicted.
    pub async fn sweep(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<_> = {
            let mut entries = self.entries.write().await;
            let keys: Vec<_> = entries
                .iter()
                .filter(|(_, entry)| !entry.is_live(now))
                .map(|(key, _)| key.clone())
                .collect();
            keys.into_iter()
                .filter_map(|key| entries.remove(&key))
                .collect()
        };

        let evicted = expired.len();
        for entry in expired {
            self.factory.close(entry.client).await;
        }
        evicted
    }

    /// Number of cached entries, live or not yet swept.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Stop the sweeper and close every cached client.
    pub async fn shutdown(&self) {
        let sweeper = self
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(mut sweeper) = sweeper {
            sweeper.cancel.cancel();
            if let Some(handle) = sweeper.handle.take() {
                if let Err(err) = handle.await {
                    tracing::warn!(error = %err, "client cache sweeper ended abnormally");
                }
            }
        }

        let drained: Vec<_> = self.entries.write().await.drain().collect();
        for (_, entry) in drained {
            self.factory.close(entry.client).await;
        }
    }
}

fn spawn_sweeper<F: ClientFactory>(cache: Weak<ClientCache<F>>, interval: Duration) -> Sweeper {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    let Some(cache) = cache.upgrade() else { break };
                    let evicted = cache.sweep().await;
                    if evicted > 0 {
                        tracing::debug!(evicted, "evicted expired clients");
                    }
                }
            }
        }
    });
    Sweeper {
        cancel,
        handle: Some(handle),
    }
}
