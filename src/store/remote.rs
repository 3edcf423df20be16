use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Client;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;
use tracing::instrument;

use super::check_payload;
use super::check_ttl;
use super::classify;
use super::CacheStore;
use super::NEGATIVE_MARKER;
use crate::error::Result;
use crate::types::Lookup;

/// Networked backend for multi-instance deployments.
///
/// The connection manager multiplexes all requests over a single connection and reconnects on failure. It is cheap
/// to clone, so every operation works on its own clone.
#[derive(Clone)]
pub struct RedisStore {
    name: String,
    conn: ConnectionManager,
}

impl RedisStore {
    /// Connect and make sure the server answers.
    ///
    /// ```ignore
    /// let store = RedisStore::connect("redis://localhost:6379/0").await?;
    /// ```
    pub async fn connect(url: &str) -> Result<Self> {
        let client = Client::open(url)?;
        let mut conn = ConnectionManager::new(client).await?;
        redis::cmd("PING").query_async::<()>(&mut conn).await?;
        debug!("Connected to redis at {url}");
        Ok(Self {
            name: format!("redis({url})"),
            conn,
        })
    }

    async fn put(&self, key: &str, raw: &[u8], ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(raw)
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore").field("name", &self.name).finish()
    }
}

// Sub-millisecond TTLs round up rather than down to zero, which redis would refuse. Callers check against MAX_TTL
// first.
fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[async_trait]
impl CacheStore for RedisStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &str) -> Result<Lookup> {
        let mut conn = self.conn.clone();
        let raw = redis::cmd("GET")
            .arg(key)
            .query_async::<Option<Vec<u8>>>(&mut conn)
            .await?;
        Ok(classify(raw))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()> {
        check_ttl(ttl)?;
        check_payload(key, &value)?;
        self.put(key, &value, ttl).await
    }

    async fn set_negative(&self, key: &str, ttl: Duration) -> Result<()> {
        check_ttl(ttl)?;
        self.put(key, NEGATIVE_MARKER, ttl).await
    }

    #[instrument(level = "trace", skip(self))]
    async fn multi_get(&self, keys: &[String]) -> Result<HashMap<String, Vec<u8>>> {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }
        let mut conn = self.conn.clone();
        // MGET replies with one slot per requested key, in request order.
        let values = redis::cmd("MGET")
            .arg(keys)
            .query_async::<Vec<Option<Vec<u8>>>>(&mut conn)
            .await?;

        Ok(keys
            .iter()
            .zip(values)
            .filter_map(|(key, raw)| match classify(raw) {
                Lookup::Hit(raw) => Some((key.clone(), raw)),
                _ => None,
            })
            .collect())
    }

    #[instrument(level = "trace", skip(self, entries), fields(count = entries.len()))]
    async fn multi_set(&self, entries: Vec<(String, Vec<u8>)>, ttl: Duration) -> Result<()> {
        check_ttl(ttl)?;
        for (key, value) in &entries {
            check_payload(key, value)?;
        }
        if entries.is_empty() {
            return Ok(());
        }

        let ttl = ttl_millis(ttl);
        let mut pipe = redis::pipe();
        pipe.atomic();
        for (key, value) in &entries {
            pipe.cmd("SET").arg(key).arg(value).arg("PX").arg(ttl).ignore();
        }
        let mut conn = self.conn.clone();
        pipe.query_async::<()>(&mut conn).await?;
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        redis::cmd("DEL").arg(key).query_async::<()>(&mut conn).await?;
        Ok(())
    }
}
