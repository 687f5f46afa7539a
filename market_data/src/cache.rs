use async_trait::async_trait;
use log::{info, warn};
use parking_lot::Mutex;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::{CacheBackend, CacheConfig};
use crate::error::Result;

/// Time-boxed key/value store for cleaned price data.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    async fn invalidate(&self, key: &str) -> Result<()>;

    fn backend(&self) -> &'static str;
}

/// In-process cache. Expired entries are dropped on read and on every write.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, (Instant, String)>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some((expires_at, _)) if *expires_at <= Instant::now() => {
                entries.remove(key);
                Ok(None)
            }
            Some((_, value)) => Ok(Some(value.clone())),
            None => Ok(None),
        }
    }

    /// Also drops every expired entry, so keys that are never read again
    /// do not accumulate.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        entries.retain(|_, (expires_at, _)| *expires_at > now);
        entries.insert(key.to_string(), (now + ttl, value.to_string()));
        Ok(())
    }

    async fn invalidate(&self, key: &str) -> Result<()> {
        self.entries.lock().remove(key);
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

pub struct RedisCache {
    connection: MultiplexedConnection,
}

impl RedisCache {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = Client::open(url)?;
        let connection = client.get_multiplexed_async_connection().await?;
        Ok(Self { connection })
    }
}

#[async_trait]
impl CacheStore for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut con = self.connection.clone();
        let value: Option<String> = con.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut con = self.connection.clone();
        // SETEX rejects a zero expiry
        let seconds = ttl.as_secs().max(1);
        let _: () = redis::cmd("SETEX")
            .arg(key)
            .arg(seconds)
            .arg(value)
            .query_async(&mut con)
            .await?;
        Ok(())
    }

    async fn invalidate(&self, key: &str) -> Result<()> {
        let mut con = self.connection.clone();
        let _: () = con.del(key).await?;
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}

/// Builds the configured cache. A Redis backend that cannot be reached falls
/// back to the in-process cache.
pub async fn build_cache(config: &CacheConfig) -> Option<Arc<dyn CacheStore>> {
    if !config.enabled {
        info!("Data cache disabled");
        return None;
    }

    match config.backend {
        CacheBackend::Memory => Some(Arc::new(MemoryCache::new())),
        CacheBackend::Redis => match RedisCache::connect(&config.redis_url).await {
            Ok(cache) => {
                info!("Redis connection successful");
                Some(Arc::new(cache))
            }
            Err(e) => {
                warn!("Redis connection failed: {e}");
                warn!("Continuing with in-process caching");
                Some(Arc::new(MemoryCache::new()))
            }
        },
    }
}
