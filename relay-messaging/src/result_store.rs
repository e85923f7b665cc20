//! Terminal-result storage keyed by invocation id, with a TTL so results don't
//! accumulate forever. Redis-backed in production (`SETEX`), in-memory for tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use uuid::Uuid;

use relay_shared::error::{RelayError, RelayResult};

#[async_trait::async_trait]
pub trait ResultStore: Send + Sync {
    async fn store_result(
        &self,
        invocation_id: Uuid,
        value: serde_json::Value,
        ttl: Duration,
    ) -> RelayResult<()>;
    async fn get_result(&self, invocation_id: Uuid) -> RelayResult<Option<serde_json::Value>>;
}

pub struct RedisResultStore {
    client: redis::Client,
}

impl RedisResultStore {
    pub fn new(redis_url: &str) -> RelayResult<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| RelayError::fatal(format!("invalid redis url: {e}")))?;
        Ok(Self { client })
    }

    fn key(invocation_id: Uuid) -> String {
        format!("relay:result:{invocation_id}")
    }
}

#[async_trait::async_trait]
impl ResultStore for RedisResultStore {
    async fn store_result(
        &self,
        invocation_id: Uuid,
        value: serde_json::Value,
        ttl: Duration,
    ) -> RelayResult<()> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| RelayError::transient(format!("redis connect: {e}")))?;
        let payload = serde_json::to_string(&value)?;
        redis::cmd("SETEX")
            .arg(Self::key(invocation_id))
            .arg(ttl.as_secs())
            .arg(payload)
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| RelayError::transient(format!("redis setex: {e}")))?;
        Ok(())
    }

    async fn get_result(&self, invocation_id: Uuid) -> RelayResult<Option<serde_json::Value>> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| RelayError::transient(format!("redis connect: {e}")))?;
        let raw: Option<String> = redis::cmd("GET")
            .arg(Self::key(invocation_id))
            .query_async(&mut conn)
            .await
            .map_err(|e| RelayError::transient(format!("redis get: {e}")))?;
        match raw {
            Some(s) => Ok(Some(serde_json::from_str(&s)?)),
            None => Ok(None),
        }
    }
}

#[derive(Default)]
pub struct InMemoryResultStore {
    entries: Mutex<HashMap<Uuid, (serde_json::Value, Instant, Duration)>>,
}

impl InMemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl ResultStore for InMemoryResultStore {
    async fn store_result(
        &self,
        invocation_id: Uuid,
        value: serde_json::Value,
        ttl: Duration,
    ) -> RelayResult<()> {
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        entries.insert(invocation_id, (value, Instant::now(), ttl));
        Ok(())
    }

    async fn get_result(&self, invocation_id: Uuid) -> RelayResult<Option<serde_json::Value>> {
        let entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        match entries.get(&invocation_id) {
            Some((value, stored_at, ttl)) if stored_at.elapsed() < *ttl => Ok(Some(value.clone())),
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stored_result_is_retrievable_within_ttl() {
        let store = InMemoryResultStore::new();
        let id = Uuid::new_v4();
        store
            .store_result(id, serde_json::json!({"ok": true}), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(
            store.get_result(id).await.unwrap(),
            Some(serde_json::json!({"ok": true}))
        );
    }

    #[tokio::test]
    async fn result_expires_after_ttl() {
        let store = InMemoryResultStore::new();
        let id = Uuid::new_v4();
        store
            .store_result(id, serde_json::json!(1), Duration::from_millis(10))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(store.get_result(id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn unknown_invocation_returns_none() {
        let store = InMemoryResultStore::new();
        assert_eq!(store.get_result(Uuid::new_v4()).await.unwrap(), None);
    }
}
