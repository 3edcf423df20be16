use fieldx::fxstruct;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeSet;
use std::collections::HashMap;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use tracing::instrument;
use tracing::warn;

use crate::coalescer::Coalescer;
use crate::error::Error;
use crate::error::Result;
use crate::key::KeyCodec;
use crate::store::CacheStore;
use crate::traits::Entity;
use crate::traits::EntityStore;
use crate::types::Lookup;
use crate::types::DEFAULT_NEGATIVE_TTL;
use crate::types::DEFAULT_POSITIVE_TTL;

/// Cache-aside accessor of one entity type.
///
/// Reads go to the cache store first. A miss is resolved by fetching from the entity store, with concurrent misses
/// of the same id collapsed into a single fetch; the outcome is written back either as the encoded entity or, when
/// there is no such row, as a negative marker which keeps subsequent lookups of the id off the store until it
/// expires.
///
/// ```ignore
/// let store: Arc<dyn CacheStore> = Arc::new(MemoryStore::builder().build()?);
/// let users = ReadThroughCache::builder()
///     .entity_store(user_store)
///     .cache_store(store)
///     .positive_ttl(Duration::from_secs(300))
///     .negative_ttl(Duration::from_secs(600))
///     .build()?;
///
/// match users.get(42).await {
///     Ok(user) => println!("{user:?}"),
///     Err(err) if err.is_confirmed_absent() => println!("no such user"),
///     Err(err) => return Err(err),
/// }
/// ```
#[fxstruct(sync, no_new, default(off), fallible(off, error(Error)), builder)]
pub struct ReadThroughCache<S>
where
    S: EntityStore,
{
    #[fieldx(get(clone), builder(required, into))]
    entity_store: Arc<S>,

    #[fieldx(get(clone), builder(required, into))]
    cache_store: Arc<dyn CacheStore>,

    /// Lifetime of cached entities.
    #[fieldx(get(copy), default(DEFAULT_POSITIVE_TTL))]
    positive_ttl: Duration,

    /// Lifetime of "no such row" markers.
    #[fieldx(get(copy), default(DEFAULT_NEGATIVE_TTL))]
    negative_ttl: Duration,

    /// Upper bound of every individual cache or store call.
    #[fieldx(optional, get(copy))]
    op_timeout: Duration,

    #[fieldx(lazy, fallible, get(clone), builder(off))]
    keys: Arc<KeyCodec>,

    #[fieldx(lazy, get(clone), builder(off))]
    flights: Arc<Coalescer<S::Entity, Error>>,
}

// Everything a coalesced fetch needs, detached from the cache so that the fetch can outlive its caller.
struct Origin<S>
where
    S: EntityStore,
{
    entity_store: Arc<S>,
    cache_store:  Arc<dyn CacheStore>,
    positive_ttl: Duration,
    negative_ttl: Duration,
    op_timeout:   Option<Duration>,
}

impl<S> Origin<S>
where
    S: EntityStore,
{
    async fn load(self, key: String, id: u64) -> Result<S::Entity> {
        let row = bounded(self.op_timeout, async {
            self.entity_store.fetch_one(id).await.map_err(Error::store)
        })
        .await?;

        match row {
            Some(entity) => {
                let raw = encode(&key, &entity)?;
                bounded(self.op_timeout, self.cache_store.set(&key, raw, self.positive_ttl)).await?;
                debug!("[{key}] fetched and cached");
                Ok(entity)
            }
            None => {
                bounded(self.op_timeout, self.cache_store.set_negative(&key, self.negative_ttl)).await?;
                debug!("[{key}] no such row, negative marker set");
                Err(absent::<S::Entity>(id))
            }
        }
    }
}

impl<S> ReadThroughCache<S>
where
    S: EntityStore,
{
    /// Shortcut for a cache with default TTLs.
    pub fn new(entity_store: Arc<S>, cache_store: Arc<dyn CacheStore>) -> Result<Self> {
        Self::builder()
            .entity_store(entity_store)
            .cache_store(cache_store)
            .build()
            .map_err(|err| Error::Config(err.to_string()))
    }

    fn build_keys(&self) -> Result<Arc<KeyCodec>> {
        Ok(Arc::new(KeyCodec::of::<S::Entity>()?))
    }

    fn build_flights(&self) -> Arc<Coalescer<S::Entity, Error>> {
        Arc::new(Coalescer::new())
    }

    fn origin(&self) -> Origin<S> {
        Origin {
            entity_store: self.entity_store(),
            cache_store:  self.cache_store(),
            positive_ttl: self.positive_ttl(),
            negative_ttl: self.negative_ttl(),
            op_timeout:   self.op_timeout(),
        }
    }

    #[inline]
    async fn bounded<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        bounded(self.op_timeout(), fut).await
    }

    #[inline]
    pub fn namespace(&self) -> &'static str {
        <S::Entity as Entity>::NAMESPACE
    }

    /// The cache key of an id.
    pub fn key_of(&self, id: u64) -> Result<String> {
        Ok(self.keys()?.key(id))
    }

    /// Number of ids with a store fetch in flight.
    pub fn in_flight(&self) -> usize {
        self.flights().in_flight()
    }

    /// Read-through lookup of a single entity.
    ///
    /// Returns [`Error::ConfirmedAbsent`] when the store has no such row, whether it has just been asked or a
    /// negative marker says so. Cache failures are reported as they are, the store is never consulted instead.
    #[instrument(level = "trace", skip(self))]
    pub async fn get(&self, id: u64) -> Result<S::Entity> {
        check_id(id)?;
        let key = self.keys()?.key(id);

        match self.bounded(self.cache_store().get(&key)).await? {
            Lookup::Hit(raw) => return decode(&key, &raw),
            Lookup::Negative => {
                debug!("[{key}] negative marker hit");
                return Err(absent::<S::Entity>(id));
            }
            Lookup::Miss => (),
        }

        let origin = self.origin();
        let load_key = key.clone();
        let flight = self.flights().run(&key, move || origin.load(load_key, id)).await;
        if flight.shared {
            debug!("[{key}] served by a shared fetch");
        }
        flight.result
    }

    /// Read-through lookup of many entities at once.
    ///
    /// Ids without a row are left out of the result. Batches are not coalesced; the store is asked once for all ids
    /// that are neither cached nor known to be absent.
    #[instrument(level = "trace", skip(self))]
    pub async fn multi_get(&self, ids: &[u64]) -> Result<HashMap<u64, S::Entity>> {
        if ids.is_empty() {
            return Err(Error::invalid_argument("at least one id is required"));
        }
        for id in ids {
            check_id(*id)?;
        }

        let keys = self.keys()?;
        let cache_store = self.cache_store();
        let ids = ids.iter().copied().collect::<BTreeSet<_>>().into_iter().collect::<Vec<_>>();
        let cache_keys = keys.keys(&ids);

        let cached = self.bounded(cache_store.multi_get(&cache_keys)).await?;

        let mut found = HashMap::with_capacity(ids.len());
        let mut missed = Vec::new();
        for (id, key) in ids.iter().zip(cache_keys.iter()) {
            match cached.get(key) {
                Some(raw) => {
                    found.insert(*id, decode(key, raw)?);
                }
                None => missed.push((*id, key)),
            }
        }

        if missed.is_empty() {
            return Ok(found);
        }

        // The bulk read doesn't report negative markers. Probe each missed key to tell known-absent ids from real
        // misses.
        let mut real_missed = Vec::with_capacity(missed.len());
        for (id, key) in missed {
            match self.bounded(cache_store.get(key)).await? {
                Lookup::Negative => (),
                // Populated since the bulk read.
                Lookup::Hit(raw) => {
                    found.insert(id, decode(key, &raw)?);
                }
                Lookup::Miss => real_missed.push(id),
            }
        }

        if real_missed.is_empty() {
            return Ok(found);
        }

        debug!(
            "[{}] fetching {} of {} ids from the store",
            keys.namespace(),
            real_missed.len(),
            ids.len()
        );
        let entity_store = self.entity_store();
        let rows = self
            .bounded(async { entity_store.fetch_many(&real_missed).await.map_err(Error::store) })
            .await?;

        let wanted = real_missed.iter().copied().collect::<HashSet<_>>();
        let mut batch = Vec::with_capacity(rows.len());
        for row in rows {
            let id = row.id();
            if !wanted.contains(&id) {
                continue;
            }
            let key = keys.key(id);
            let raw = encode(&key, &row)?;
            batch.push((key, raw));
            found.insert(id, row);
        }

        if !batch.is_empty() {
            self.bounded(cache_store.multi_set(batch, self.positive_ttl())).await?;
        }

        for id in real_missed.into_iter().filter(|id| !found.contains_key(id)) {
            let key = keys.key(id);
            if let Err(err) = self.bounded(cache_store.set_negative(&key, self.negative_ttl())).await {
                warn!("[{key}] failed to set negative marker: {err}");
            }
        }

        Ok(found)
    }

    /// Cache an entity under `id`, which must be the entity's own id.
    #[instrument(level = "trace", skip(self, value))]
    pub async fn set(&self, id: u64, value: &S::Entity, ttl: Duration) -> Result<()> {
        check_id(id)?;
        if value.id() != id {
            return Err(Error::invalid_argument(format!(
                "cannot cache {} #{} under id {id}",
                self.namespace(),
                value.id()
            )));
        }
        let key = self.keys()?.key(id);
        let raw = encode(&key, value)?;
        self.bounded(self.cache_store().set(&key, raw, ttl)).await
    }

    /// Cache a batch of entities under their own ids.
    #[instrument(level = "trace", skip(self, values), fields(count = values.len()))]
    pub async fn multi_set(&self, values: &[S::Entity], ttl: Duration) -> Result<()> {
        if values.is_empty() {
            return Ok(());
        }
        let keys = self.keys()?;
        let mut batch = Vec::with_capacity(values.len());
        for value in values {
            check_id(value.id())?;
            let key = keys.key(value.id());
            let raw = encode(&key, value)?;
            batch.push((key, raw));
        }
        self.bounded(self.cache_store().multi_set(batch, ttl)).await
    }

    /// Drop whatever is cached for `id`, negative marker included.
    #[instrument(level = "trace", skip(self))]
    pub async fn del(&self, id: u64) -> Result<()> {
        check_id(id)?;
        let key = self.keys()?.key(id);
        self.bounded(self.cache_store().del(&key)).await
    }

    /// Mark `id` as known to be absent from the store.
    #[instrument(level = "trace", skip(self))]
    pub async fn set_negative(&self, id: u64) -> Result<()> {
        check_id(id)?;
        let key = self.keys()?.key(id);
        self.bounded(self.cache_store().set_negative(&key, self.negative_ttl())).await
    }
}

impl<S> std::fmt::Debug for ReadThroughCache<S>
where
    S: EntityStore,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadThroughCache")
            .field("namespace", &self.namespace())
            .field("cache_store", &self.cache_store())
            .field("positive_ttl", &self.positive_ttl())
            .field("negative_ttl", &self.negative_ttl())
            .finish()
    }
}

async fn bounded<T>(limit: Option<Duration>, fut: impl Future<Output = Result<T>>) -> Result<T> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| Error::Timeout(limit))?,
        None => fut.await,
    }
}

#[inline]
fn check_id(id: u64) -> Result<()> {
    if id == 0 {
        return Err(Error::invalid_argument("id cannot be 0"));
    }
    Ok(())
}

#[inline]
fn absent<E: Entity>(id: u64) -> Error {
    Error::ConfirmedAbsent {
        namespace: E::NAMESPACE,
        id,
    }
}

fn encode<V: Serialize>(key: &str, value: &V) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|err| Error::encoding(key, err))
}

fn decode<V: DeserializeOwned>(key: &str, raw: &[u8]) -> Result<V> {
    serde_json::from_slice(raw).map_err(|err| Error::encoding(key, err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Api;
    use crate::store::MemoryStore;
    use crate::test::TestStore;

    fn cache_of(store: &Arc<TestStore<Api>>) -> (ReadThroughCache<TestStore<Api>>, Arc<dyn CacheStore>) {
        let cache_store: Arc<dyn CacheStore> = Arc::new(MemoryStore::builder().build().unwrap());
        let cache = ReadThroughCache::new(Arc::clone(store), Arc::clone(&cache_store)).unwrap();
        (cache, cache_store)
    }

    #[tokio::test]
    async fn zero_id_touches_nothing() {
        let store = Arc::new(TestStore::<Api>::new());
        let (cache, _) = cache_of(&store);
        assert!(matches!(cache.get(0).await, Err(Error::InvalidArgument(_))));
        assert!(matches!(cache.multi_get(&[1, 0]).await, Err(Error::InvalidArgument(_))));
        assert!(matches!(cache.multi_get(&[]).await, Err(Error::InvalidArgument(_))));
        assert!(matches!(cache.set_negative(0).await, Err(Error::InvalidArgument(_))));
        assert_eq!(store.fetch_one_count(), 0);
        assert_eq!(store.fetch_many_count(), 0);
    }

    #[tokio::test]
    async fn negative_marker_short_circuits() {
        let store = Arc::new(TestStore::<Api>::new());
        let (cache, cache_store) = cache_of(&store);
        cache.set_negative(5).await.unwrap();
        assert_eq!(cache_store.get("api:5").await.unwrap(), Lookup::Negative);
        assert!(cache.get(5).await.unwrap_err().is_confirmed_absent());
        assert_eq!(store.fetch_one_count(), 0);
    }

    #[tokio::test]
    async fn corrupted_entry_is_an_encoding_error() {
        let store = Arc::new(TestStore::<Api>::new());
        let (cache, cache_store) = cache_of(&store);
        cache_store
            .set("api:3", b"not json".to_vec(), Duration::from_secs(60))
            .await
            .unwrap();
        assert!(matches!(cache.get(3).await, Err(Error::Encoding { .. })));
        assert_eq!(store.fetch_one_count(), 0);
    }

    #[tokio::test]
    async fn set_rejects_foreign_id() {
        let store = Arc::new(TestStore::<Api>::new());
        let (cache, cache_store) = cache_of(&store);
        let api = Api::new(2, "h", "t");
        assert!(matches!(
            cache.set(1, &api, Duration::from_secs(60)).await,
            Err(Error::InvalidArgument(_))
        ));
        assert_eq!(cache_store.get("api:1").await.unwrap(), Lookup::Miss);
        cache.set(2, &api, Duration::from_secs(60)).await.unwrap();
        assert_eq!(cache.get(2).await.unwrap(), api);
    }

    #[tokio::test]
    async fn slow_store_times_out() {
        let store = Arc::new(TestStore::<Api>::new());
        store.insert(Api::new(1, "h", "t"));
        store.set_latency(Duration::from_millis(200));
        let cache_store: Arc<dyn CacheStore> = Arc::new(MemoryStore::builder().build().unwrap());
        let cache = ReadThroughCache::<TestStore<Api>>::builder()
            .entity_store(Arc::clone(&store))
            .cache_store(cache_store)
            .op_timeout(Duration::from_millis(20))
            .build()
            .unwrap();
        assert!(matches!(cache.get(1).await, Err(Error::Timeout(_))));
    }
}
