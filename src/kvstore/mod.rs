mod dummy;
mod lru;
mod redis;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

pub use self::dummy::DummyStore;
pub use self::lru::LruStore;
pub use self::redis::RedisStore;

const DUMMY_KVSTORE_TYPE: &str = "dummy";
const REDIS_KVSTORE_TYPE: &str = "redis";
const CACHE_KVSTORE_TYPE: &str = "cache";

#[derive(Error, Debug)]
pub enum KvStoreError {
    #[error("Key {0} does not exist")]
    KeyNotFound(String),

    #[error("kvstore {0} does not exist")]
    UnknownBackend(String),

    #[error("Invalid kvstore configuration: {0}")]
    InvalidConfig(String),

    #[error("Redis error: {0}")]
    Redis(#[from] bb8_redis::redis::RedisError),

    #[error("Connection pool error: {0}")]
    Pool(String),
}

/// A key/value store holding serialized artifact descriptors.
///
/// `get` returns `None` for a miss, so a stored empty string stays
/// distinguishable from an absent key.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, KvStoreError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), KvStoreError>;

    async fn exists(&self, key: &str) -> bool;

    async fn delete(&self, key: &str) -> Result<(), KvStoreError>;

    async fn close(&self) -> Result<(), KvStoreError>;
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct KvStoreConfig {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    #[serde(default = "default_max_entries")]
    pub max_entries: i64,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    #[serde(default = "default_redis_host")]
    pub host: String,
    #[serde(default = "default_redis_port")]
    pub port: u16,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub db: i64,
    /// Seconds, 0 keeps keys forever.
    #[serde(default)]
    pub expiration: u64,
    #[serde(default)]
    pub prefix: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: default_redis_host(),
            port: default_redis_port(),
            password: String::new(),
            db: 0,
            expiration: 0,
            prefix: String::new(),
        }
    }
}

impl RedisConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct CacheConfig {
    /// Seconds, 0 keeps entries until evicted.
    #[serde(default)]
    pub expiration: u64,
    /// Seconds between two purges of expired entries, 0 disables the purge.
    #[serde(default)]
    pub cleanup_interval: u64,
}

fn default_max_entries() -> i64 {
    -1
}

fn default_redis_host() -> String {
    "127.0.0.1".to_string()
}

fn default_redis_port() -> u16 {
    6379
}

/// Builds the store selected by `cfg`. No configuration means no caching.
pub fn new_kvstore(cfg: Option<&KvStoreConfig>) -> Result<Arc<dyn KvStore>, KvStoreError> {
    let Some(cfg) = cfg else {
        log::info!("KVStore configured with type dummy");
        return Ok(Arc::new(DummyStore));
    };

    let kind = cfg.kind.as_deref().unwrap_or(DUMMY_KVSTORE_TYPE);

    let store: Arc<dyn KvStore> = match kind {
        DUMMY_KVSTORE_TYPE => Arc::new(DummyStore),
        CACHE_KVSTORE_TYPE => Arc::new(LruStore::from_config(cfg)),
        REDIS_KVSTORE_TYPE => Arc::new(RedisStore::from_config(&cfg.redis)?),
        other => return Err(KvStoreError::UnknownBackend(other.to_string())),
    };

    log::info!("KVStore configured with type {}", kind);

    Ok(store)
}
