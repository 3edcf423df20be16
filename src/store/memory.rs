use async_trait::async_trait;
use fieldx::fxstruct;
use moka::future::Cache;
use moka::policy::EvictionPolicy;
use moka::Expiry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;
use tracing::instrument;

use super::check_payload;
use super::check_ttl;
use super::classify;
use super::CacheStore;
use super::NEGATIVE_MARKER;
use crate::error::Result;
use crate::types::Lookup;

#[derive(Clone)]
struct Slot {
    raw: Arc<[u8]>,
    ttl: Duration,
}

// Every write carries its own TTL; an overwrite restarts the clock.
struct SlotExpiry;

impl Expiry<String, Slot> for SlotExpiry {
    fn expire_after_create(&self, _key: &String, slot: &Slot, _created_at: Instant) -> Option<Duration> {
        Some(slot.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        slot: &Slot,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(slot.ttl)
    }
}

/// In-process backend over [moka](https://crates.io/crates/moka). Good for single-instance deployments and tests.
///
/// ```ignore
/// let store = MemoryStore::builder().name("admin").max_capacity(50_000).build()?;
/// ```
#[fxstruct(sync, no_new, default(off), builder)]
pub struct MemoryStore {
    /// Store name. Most useful for debugging and logging.
    #[fieldx(get(off), builder(into), default(String::from("memory")))]
    name: String,

    #[fieldx(get(copy), default(100_000))]
    max_capacity: u64,

    #[fieldx(vis(pub(crate)), lazy, get(clone), builder(off))]
    cache: Arc<Cache<String, Slot>>,
}

impl MemoryStore {
    fn build_cache(&self) -> Arc<Cache<String, Slot>> {
        Arc::new(
            Cache::builder()
                .name(&self.name)
                .max_capacity(self.max_capacity())
                .eviction_policy(EvictionPolicy::tiny_lfu())
                .expire_after(SlotExpiry)
                .build(),
        )
    }

    async fn put(&self, key: &str, raw: Arc<[u8]>, ttl: Duration) {
        self.cache().insert(key.to_string(), Slot { raw, ttl }).await;
    }

    /// Number of live entries. Moka counts lazily, so this is an estimate.
    pub fn entry_count(&self) -> u64 {
        self.cache().entry_count()
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("name", &self.name)
            .field("max_capacity", &self.max_capacity)
            .finish()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &str) -> Result<Lookup> {
        Ok(classify(self.cache().get(key).await.map(|slot| slot.raw.to_vec())))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()> {
        check_ttl(ttl)?;
        check_payload(key, &value)?;
        self.put(key, value.into(), ttl).await;
        Ok(())
    }

    async fn set_negative(&self, key: &str, ttl: Duration) -> Result<()> {
        check_ttl(ttl)?;
        self.put(key, NEGATIVE_MARKER.into(), ttl).await;
        Ok(())
    }

    #[instrument(level = "trace", skip(self))]
    async fn multi_get(&self, keys: &[String]) -> Result<HashMap<String, Vec<u8>>> {
        let cache = self.cache();
        let mut found = HashMap::with_capacity(keys.len());
        for key in keys {
            if let Some(slot) = cache.get(key).await {
                if let Lookup::Hit(raw) = classify(Some(slot.raw.to_vec())) {
                    found.insert(key.clone(), raw);
                }
            }
        }
        Ok(found)
    }

    #[instrument(level = "trace", skip(self, entries), fields(count = entries.len()))]
    async fn multi_set(&self, entries: Vec<(String, Vec<u8>)>, ttl: Duration) -> Result<()> {
        check_ttl(ttl)?;
        // Validate the whole batch first so that a bad entry doesn't leave it half-written.
        for (key, value) in &entries {
            check_payload(key, value)?;
        }
        for (key, value) in entries {
            self.put(&key, value.into(), ttl).await;
        }
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<()> {
        self.cache().invalidate(key).await;
        Ok(())
    }
}
