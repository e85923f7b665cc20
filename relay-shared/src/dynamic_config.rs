//! Lazy, short-TTL cache over operator-tunable settings (RAG `top_k`, similarity
//! floor, default generation temperature, ...).
//!
//! These values live in a `settings` table so an operator can change them without a
//! redeploy, but a database round trip per chat invocation would be wasteful — each
//! key is cached for [`DynamicConfig::DEFAULT_TTL`] and refreshed lazily on next read
//! past expiry, not on a background timer.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache;
use sqlx::PgPool;

use crate::error::RelayResult;

/// Backing store the cache refreshes from on miss/expiry.
#[async_trait]
pub trait SettingsSource: Send + Sync {
    async fn load(&self, key: &str) -> RelayResult<Option<serde_json::Value>>;
}

/// Reads the `settings` table directly. Writes go through whatever administers the
/// table (a migration seed, an admin endpoint); this side only ever selects.
pub struct PostgresSettingsSource {
    pool: PgPool,
}

impl PostgresSettingsSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SettingsSource for PostgresSettingsSource {
    async fn load(&self, key: &str) -> RelayResult<Option<serde_json::Value>> {
        let row: Option<(serde_json::Value,)> =
            sqlx::query_as("SELECT value FROM settings WHERE key = $1")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(value,)| value))
    }
}

pub struct DynamicConfig {
    cache: Cache<String, serde_json::Value>,
    source: Arc<dyn SettingsSource>,
}

impl DynamicConfig {
    pub const DEFAULT_TTL: Duration = Duration::from_secs(5);

    pub fn new(source: Arc<dyn SettingsSource>) -> Self {
        Self::with_ttl(source, Self::DEFAULT_TTL)
    }

    pub fn with_ttl(source: Arc<dyn SettingsSource>, ttl: Duration) -> Self {
        Self {
            cache: Cache::builder().time_to_live(ttl).build(),
            source,
        }
    }

    /// Returns the cached value, or `fallback` if the setting has never been set.
    pub async fn get_or(&self, key: &str, fallback: serde_json::Value) -> RelayResult<serde_json::Value> {
        if let Some(value) = self.cache.get(key).await {
            return Ok(value);
        }

        let loaded = self.source.load(key).await?.unwrap_or(fallback);
        self.cache.insert(key.to_string(), loaded.clone()).await;
        Ok(loaded)
    }

    pub async fn get_u64_or(&self, key: &str, fallback: u64) -> RelayResult<u64> {
        let value = self.get_or(key, serde_json::json!(fallback)).await?;
        Ok(value.as_u64().unwrap_or(fallback))
    }

    pub async fn get_f64_or(&self, key: &str, fallback: f64) -> RelayResult<f64> {
        let value = self.get_or(key, serde_json::json!(fallback)).await?;
        Ok(value.as_f64().unwrap_or(fallback))
    }

    pub async fn invalidate(&self, key: &str) {
        self.cache.invalidate(key).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingSource {
        calls: AtomicU32,
        value: serde_json::Value,
    }

    #[async_trait]
    impl SettingsSource for CountingSource {
        async fn load(&self, _key: &str) -> RelayResult<Option<serde_json::Value>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Some(self.value.clone()))
        }
    }

    #[tokio::test]
    async fn repeated_reads_within_ttl_hit_one_load() {
        let source = Arc::new(CountingSource {
            calls: AtomicU32::new(0),
            value: serde_json::json!(8),
        });
        let config = DynamicConfig::with_ttl(source.clone(), Duration::from_secs(60));

        for _ in 0..5 {
            let v = config.get_u64_or("rag_top_k", 4).await.unwrap();
            assert_eq!(v, 8);
        }
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn missing_setting_falls_back() {
        struct EmptySource;
        #[async_trait]
        impl SettingsSource for EmptySource {
            async fn load(&self, _key: &str) -> RelayResult<Option<serde_json::Value>> {
                Ok(None)
            }
        }
        let config = DynamicConfig::new(Arc::new(EmptySource));
        assert_eq!(config.get_u64_or("missing", 42).await.unwrap(), 42);
    }

    #[tokio::test]
    async fn invalidate_forces_reload() {
        let source = Arc::new(CountingSource {
            calls: AtomicU32::new(0),
            value: serde_json::json!(1),
        });
        let config = DynamicConfig::with_ttl(source.clone(), Duration::from_secs(60));
        config.get_u64_or("k", 0).await.unwrap();
        config.invalidate("k").await;
        config.get_u64_or("k", 0).await.unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }
}
