use std::time::Duration;

use async_trait::async_trait;
use bb8_redis::bb8::{Pool, PooledConnection};
use bb8_redis::redis;
use bb8_redis::RedisConnectionManager;

use super::{KvStore, KvStoreError, RedisConfig};

const MAX_IDLE: u32 = 3;
const MAX_CONNECTIONS: u32 = 16;
const IDLE_TIMEOUT: Duration = Duration::from_secs(240);
const CONNECTION_TIMEOUT: Duration = Duration::from_secs(5);

/// Redis backed store.
///
/// Connections come from a small pool and are checked with `PING` before
/// reuse. Read failures degrade to a miss, write failures are returned.
pub struct RedisStore {
    pool: Pool<RedisConnectionManager>,
    prefix: String,
    expiration: Option<u64>,
}

impl RedisStore {
    pub fn from_config(cfg: &RedisConfig) -> Result<Self, KvStoreError> {
        let manager = RedisConnectionManager::new(connection_url(cfg)?.as_str())?;

        // Connections are opened lazily so a cache outage does not prevent startup.
        let pool = Pool::builder()
            .max_size(MAX_CONNECTIONS)
            .min_idle(Some(MAX_IDLE))
            .idle_timeout(Some(IDLE_TIMEOUT))
            .connection_timeout(CONNECTION_TIMEOUT)
            .test_on_check_out(true)
            .build_unchecked(manager);

        Ok(Self {
            pool,
            prefix: cfg.prefix.clone(),
            expiration: (cfg.expiration > 0).then_some(cfg.expiration),
        })
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    async fn connection(&self) -> Result<PooledConnection<'_, RedisConnectionManager>, KvStoreError> {
        self.pool
            .get()
            .await
            .map_err(|e| KvStoreError::Pool(e.to_string()))
    }

    async fn try_get(&self, key: &str) -> Result<Option<String>, KvStoreError> {
        let mut conn = self.connection().await?;
        let reply: redis::Value = redis::cmd("GET")
            .arg(self.key(key))
            .query_async(&mut *conn)
            .await?;
        decode_value(&reply)
    }

    async fn try_exists(&self, key: &str) -> Result<bool, KvStoreError> {
        let mut conn = self.connection().await?;
        let exists: bool = redis::cmd("EXISTS")
            .arg(self.key(key))
            .query_async(&mut *conn)
            .await?;
        Ok(exists)
    }
}

/// A `GET` reply: nil is a miss, anything but a string is an error.
fn decode_value(reply: &redis::Value) -> Result<Option<String>, KvStoreError> {
    Ok(redis::from_redis_value(reply)?)
}

/// Reads degrade to the default value (a miss) instead of failing.
fn or_miss<T: Default>(command: &str, key: &str, result: Result<T, KvStoreError>) -> T {
    result.unwrap_or_else(|e| {
        log::warn!("Redis {} {} failed, treating as a miss: {}", command, key, e);
        T::default()
    })
}

/// Builds `redis://[:password@]host:port/db`.
fn connection_url(cfg: &RedisConfig) -> Result<url::Url, KvStoreError> {
    let mut u = url::Url::parse(&format!("redis://{}/{}", cfg.addr(), cfg.db))
        .map_err(|e| KvStoreError::InvalidConfig(e.to_string()))?;

    if !cfg.password.is_empty() {
        u.set_password(Some(&cfg.password))
            .map_err(|_| KvStoreError::InvalidConfig("password cannot be set on redis url".to_string()))?;
    }

    Ok(u)
}

#[async_trait]
impl KvStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, KvStoreError> {
        Ok(or_miss("GET", key, self.try_get(key).await))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), KvStoreError> {
        let mut conn = self.connection().await?;

        let mut cmd = redis::cmd("SET");
        cmd.arg(self.key(key)).arg(value);
        if let Some(seconds) = self.expiration {
            cmd.arg("EX").arg(seconds);
        }

        let _: () = cmd.query_async(&mut *conn).await?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> bool {
        or_miss("EXISTS", key, self.try_exists(key).await)
    }

    async fn delete(&self, key: &str) -> Result<(), KvStoreError> {
        let mut conn = self.connection().await?;
        let _: i64 = redis::cmd("DEL")
            .arg(self.key(key))
            .query_async(&mut *conn)
            .await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), KvStoreError> {
        // Idle connections are dropped with the pool; nothing to flush.
        Ok(())
    }
}
