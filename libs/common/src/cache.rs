//! Redis access for the remote key channel
//!
//! Operators publish key overrides into Redis with their own tooling; the
//! access service only reads them back. Nothing here is on the critical path
//! for a scan: callers wrap reads in their own timeout and fall back locally.

use anyhow::{Context, Result};
use redis::{AsyncCommands, Client, aio::MultiplexedConnection};
use tracing::{debug, info};

/// Configuration for the Redis connection
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Redis connection URL (e.g., "redis://localhost:6379")
    pub url: String,
}

impl RedisConfig {
    /// # Environment Variables
    /// - `REDIS_URL`: Redis connection URL (default: "redis://localhost:6379")
    pub fn from_env() -> Self {
        RedisConfig {
            url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
        }
    }
}

/// Cloneable handle on a Redis server
///
/// Opening the handle does not connect, so a Redis outage at startup does not
/// prevent the service from booting. Each call dials a multiplexed connection.
#[derive(Clone)]
pub struct RedisStore {
    client: Client,
}

impl RedisStore {
    pub fn open(config: &RedisConfig) -> Result<Self> {
        let client = Client::open(config.url.as_str())
            .with_context(|| format!("invalid Redis URL {:?}", config.url))?;
        info!("Redis key channel configured at {}", config.url);
        Ok(RedisStore { client })
    }

    async fn connect(&self) -> Result<MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .context("Redis connection failed")
    }

    /// Read a string value, `None` when the key is unset
    pub async fn read(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.connect().await?;
        let value: Option<String> = conn.get(key).await?;
        debug!("Redis read {} ({})", key, if value.is_some() { "hit" } else { "miss" });
        Ok(value)
    }

    /// Round-trip a PING
    pub async fn ping(&self) -> Result<bool> {
        let mut conn = self.connect().await?;
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(pong == "PONG")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_url_is_rejected() {
        let config = RedisConfig {
            url: "not a url".to_string(),
        };
        assert!(RedisStore::open(&config).is_err());
    }

    #[tokio::test]
    async fn test_unreachable_server_errors_instead_of_hanging() {
        // Port 1 is never a Redis server
        let store = RedisStore::open(&RedisConfig {
            url: "redis://127.0.0.1:1".to_string(),
        })
        .unwrap();
        assert!(store.read("access:token_key:current").await.is_err());
    }

    #[tokio::test]
    #[ignore = "requires a running Redis"]
    async fn test_read_published_value() -> Result<()> {
        let config = RedisConfig::from_env();
        let store = RedisStore::open(&config)?;
        assert!(store.ping().await?);

        let key = "access:test:key";
        let mut conn = Client::open(config.url.as_str())?
            .get_multiplexed_async_connection()
            .await?;
        let _: () = conn.set_ex(key, "1:AAAA", 5).await?;
        assert_eq!(store.read(key).await?, Some("1:AAAA".to_string()));

        let _: u64 = conn.del(key).await?;
        assert_eq!(store.read(key).await?, None);
        Ok(())
    }
}
