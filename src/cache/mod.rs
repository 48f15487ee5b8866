//! Cache layer
//!
//! Read-through caching for hot lookups. The cache is in-process (moka) or
//! switched off entirely by configuration; callers never need to know which.
//!
//! Keys in use:
//! - `book:{id}` cached book detail
//! - `author:{id}` cached author detail
//! - `perms:{user_id}` resolved principal of a user
//!
//! ```rust,ignore
//! use inkwell::cache::{create_cache, CacheLayer};
//! use inkwell::config::CacheConfig;
//!
//! let cache = create_cache(&CacheConfig::default());
//! cache.set("book:1", &book, cache.default_ttl()).await?;
//! ```

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::config::CacheConfig;

pub use memory::MemoryCache;

/// Cache layer trait
///
/// The methods are generic, so this trait cannot be used as `dyn CacheLayer`.
/// The `Cache` enum provides runtime selection instead.
#[async_trait]
pub trait CacheLayer: Send + Sync {
    async fn get<T: DeserializeOwned + Send>(&self, key: &str) -> Result<Option<T>>;

    async fn set<T: Serialize + Send + Sync>(&self, key: &str, value: &T, ttl: Duration) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Delete every key matching a glob pattern
    async fn delete_pattern(&self, pattern: &str) -> Result<()>;

    async fn clear(&self) -> Result<()>;
}

#[derive(Debug)]
pub enum Cache {
    /// In-memory cache using moka
    Memory(MemoryCache),
    /// Every lookup misses and every write is dropped
    Disabled,
}

impl Cache {
    /// TTL applied when a caller has no better choice
    pub fn default_ttl(&self) -> Duration {
        match self {
            Cache::Memory(cache) => cache.default_ttl(),
            Cache::Disabled => Duration::ZERO,
        }
    }
}

#[async_trait]
impl CacheLayer for Cache {
    async fn get<T: DeserializeOwned + Send>(&self, key: &str) -> Result<Option<T>> {
        match self {
            Cache::Memory(cache) => cache.get(key).await,
            Cache::Disabled => Ok(None),
        }
    }

    async fn set<T: Serialize + Send + Sync>(&self, key: &str, value: &T, ttl: Duration) -> Result<()> {
        match self {
            Cache::Memory(cache) => cache.set(key, value, ttl).await,
            Cache::Disabled => Ok(()),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        match self {
            Cache::Memory(cache) => cache.delete(key).await,
            Cache::Disabled => Ok(()),
        }
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<()> {
        match self {
            Cache::Memory(cache) => cache.delete_pattern(pattern).await,
            Cache::Disabled => Ok(()),
        }
    }

    async fn clear(&self) -> Result<()> {
        match self {
            Cache::Memory(cache) => cache.clear().await,
            Cache::Disabled => Ok(()),
        }
    }
}

/// Create the cache described by `config`
pub fn create_cache(config: &CacheConfig) -> Arc<Cache> {
    if !config.enabled {
        tracing::info!("Cache disabled by configuration");
        return Arc::new(Cache::Disabled);
    }

    let ttl = Duration::from_secs(config.ttl_seconds);
    Arc::new(Cache::Memory(MemoryCache::with_capacity_and_ttl(
        config.max_capacity,
        ttl,
    )))
}
