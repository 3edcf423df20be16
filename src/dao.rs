//! Data access object on top of an [`EntityStore`] with an optional read-through cache.
//!
//! Reads by id go through the cache when there is one. Writes go straight to the store and then drop whatever the
//! cache holds for the affected ids. Failing to drop a cache entry is only logged: the entry expires on its own and
//! the write itself has already happened.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use tracing::instrument;
use tracing::warn;

use crate::cache::ReadThroughCache;
use crate::error::Error;
use crate::error::Result;
use crate::traits::Entity;
use crate::traits::EntityStore;
use crate::types::IdOrder;
use crate::types::PageRequest;

pub struct Dao<S>
where
    S: EntityStore,
{
    store: Arc<S>,
    cache: Option<Arc<ReadThroughCache<S>>>,
}

impl<S> Dao<S>
where
    S: EntityStore,
{
    /// Without a cache every read goes to the store.
    pub fn new(store: Arc<S>, cache: Option<Arc<ReadThroughCache<S>>>) -> Self {
        Self { store, cache }
    }

    pub fn store(&self) -> Arc<S> {
        Arc::clone(&self.store)
    }

    pub fn cache(&self) -> Option<Arc<ReadThroughCache<S>>> {
        self.cache.clone()
    }

    async fn invalidate(&self, id: u64) {
        if let Some(ref cache) = self.cache {
            if let Err(err) = cache.del(id).await {
                warn!("[{}] failed to invalidate #{id}: {err}", S::Entity::NAMESPACE);
            }
        }
    }

    /// Insert a new row and return its id, also written back into `entity`.
    #[instrument(level = "trace", skip(self, entity))]
    pub async fn create(&self, entity: &mut S::Entity) -> Result<u64> {
        self.store.create(entity).await.map_err(Error::store)
    }

    #[instrument(level = "trace", skip(self, tx, entity))]
    pub async fn create_by_tx(&self, tx: &mut S::Tx, entity: &mut S::Entity) -> Result<u64> {
        self.store.create_in(tx, entity).await.map_err(Error::store)
    }

    #[instrument(level = "trace", skip(self))]
    pub async fn delete_by_id(&self, id: u64) -> Result<()> {
        check_id(id)?;
        self.store.delete(&[id]).await.map_err(Error::store)?;
        self.invalidate(id).await;
        Ok(())
    }

    #[instrument(level = "trace", skip(self))]
    pub async fn delete_by_ids(&self, ids: &[u64]) -> Result<()> {
        if ids.is_empty() {
            return Err(Error::invalid_argument("at least one id is required"));
        }
        for id in ids {
            check_id(*id)?;
        }
        self.store.delete(ids).await.map_err(Error::store)?;
        for id in ids {
            self.invalidate(*id).await;
        }
        Ok(())
    }

    /// Deletes within `tx`. The cache entry is dropped right away, before the transaction is committed.
    #[instrument(level = "trace", skip(self, tx))]
    pub async fn delete_by_tx(&self, tx: &mut S::Tx, id: u64) -> Result<()> {
        check_id(id)?;
        self.store.delete_in(tx, id).await.map_err(Error::store)?;
        self.invalidate(id).await;
        Ok(())
    }

    /// The cache entry is dropped even if the update fails: the row might have been changed anyway.
    #[instrument(level = "trace", skip(self, entity), fields(id = entity.id()))]
    pub async fn update_by_id(&self, entity: &S::Entity) -> Result<()> {
        let id = entity.id();
        check_id(id)?;
        let outcome = self.store.update(entity).await.map_err(Error::store);
        self.invalidate(id).await;
        outcome
    }

    #[instrument(level = "trace", skip(self, tx, entity), fields(id = entity.id()))]
    pub async fn update_by_tx(&self, tx: &mut S::Tx, entity: &S::Entity) -> Result<()> {
        let id = entity.id();
        check_id(id)?;
        let outcome = self.store.update_in(tx, entity).await.map_err(Error::store);
        self.invalidate(id).await;
        outcome
    }

    /// Returns [`Error::ConfirmedAbsent`] when there is no such row, with or without a cache.
    #[instrument(level = "trace", skip(self))]
    pub async fn get_by_id(&self, id: u64) -> Result<S::Entity> {
        check_id(id)?;
        match self.cache {
            Some(ref cache) => cache.get(id).await,
            None => self
                .store
                .fetch_one(id)
                .await
                .map_err(Error::store)?
                .ok_or(Error::ConfirmedAbsent {
                    namespace: S::Entity::NAMESPACE,
                    id,
                }),
        }
    }

    /// Rows of the ids that exist, in the order of `ids`.
    #[instrument(level = "trace", skip(self))]
    pub async fn get_by_ids(&self, ids: &[u64]) -> Result<Vec<S::Entity>> {
        let mut found: HashMap<u64, S::Entity> = match self.cache {
            Some(ref cache) => cache.multi_get(ids).await?,
            None => {
                if ids.is_empty() {
                    return Err(Error::invalid_argument("at least one id is required"));
                }
                for id in ids {
                    check_id(*id)?;
                }
                self.store
                    .fetch_many(ids)
                    .await
                    .map_err(Error::store)?
                    .into_iter()
                    .map(|row| (row.id(), row))
                    .collect()
            }
        };

        let rows = ids.iter().filter_map(|id| found.remove(id)).collect::<Vec<_>>();
        debug!("[{}] {} of {} ids found", S::Entity::NAMESPACE, rows.len(), ids.len());
        Ok(rows)
    }

    /// First row matching `condition`. Never cached.
    #[instrument(level = "trace", skip(self))]
    pub async fn get_by_condition(&self, condition: &S::Condition) -> Result<Option<S::Entity>> {
        self.store.fetch_by_condition(condition).await.map_err(Error::store)
    }

    /// Page of up to `limit` rows with ids below `last_id`. Never cached.
    #[instrument(level = "trace", skip(self))]
    pub async fn get_by_last_id(&self, last_id: u64, limit: usize, order: IdOrder) -> Result<Vec<S::Entity>> {
        if limit == 0 {
            return Err(Error::invalid_argument("limit cannot be 0"));
        }
        self.store
            .fetch_before(last_id, limit, order)
            .await
            .map_err(Error::store)
    }

    /// A page of rows matching `condition` along with the total number of matching rows. Never cached.
    ///
    /// With [`PageRequest::without_count()`] the counting query is skipped and the total is 0. Otherwise a zero total
    /// returns right away, without asking for the page.
    #[instrument(level = "trace", skip(self))]
    pub async fn get_by_columns(
        &self,
        condition: &S::Condition,
        page: &PageRequest,
    ) -> Result<(Vec<S::Entity>, u64)> {
        if page.size == 0 {
            return Err(Error::invalid_argument("page size cannot be 0"));
        }

        let mut total = 0;
        if !page.skip_count {
            total = self.store.count(condition).await.map_err(Error::store)?;
            if total == 0 {
                return Ok((Vec::new(), 0));
            }
        }

        let rows = self.store.fetch_page(condition, page).await.map_err(Error::store)?;
        Ok((rows, total))
    }

    pub async fn begin(&self) -> Result<S::Tx> {
        self.store.begin().await.map_err(Error::store)
    }

    pub async fn commit(&self, tx: S::Tx) -> Result<()> {
        self.store.commit(tx).await.map_err(Error::store)
    }
}

impl<S> std::fmt::Debug for Dao<S>
where
    S: EntityStore,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dao")
            .field("namespace", &S::Entity::NAMESPACE)
            .field("cache", &self.cache)
            .finish()
    }
}

#[inline]
fn check_id(id: u64) -> Result<()> {
    if id == 0 {
        return Err(Error::invalid_argument("id cannot be 0"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::User;
    use crate::store::CacheStore;
    use crate::store::MemoryStore;
    use crate::test::TestStore;
    use crate::types::Lookup;

    fn dao() -> (Dao<TestStore<User>>, Arc<TestStore<User>>, Arc<dyn CacheStore>) {
        let store = Arc::new(TestStore::<User>::new());
        let cache_store: Arc<dyn CacheStore> = Arc::new(MemoryStore::builder().build().unwrap());
        let cache = ReadThroughCache::new(Arc::clone(&store), Arc::clone(&cache_store)).unwrap();
        (Dao::new(Arc::clone(&store), Some(Arc::new(cache))), store, cache_store)
    }

    #[tokio::test]
    async fn failed_update_still_invalidates() {
        let (dao, store, cache_store) = dao();
        store.insert(User::new(1, "ann", "ann@example.com"));
        dao.get_by_id(1).await.unwrap();
        assert!(cache_store.get("user:1").await.unwrap().is_hit());

        store.set_unavailable(true);
        assert!(dao.update_by_id(&User::new(1, "bob", "bob@example.com")).await.is_err());
        assert_eq!(cache_store.get("user:1").await.unwrap(), Lookup::Miss);
    }

    #[tokio::test]
    async fn failed_delete_keeps_the_entry() {
        let (dao, store, cache_store) = dao();
        store.insert(User::new(1, "ann", "ann@example.com"));
        dao.get_by_id(1).await.unwrap();

        store.set_unavailable(true);
        assert!(matches!(dao.delete_by_id(1).await, Err(Error::StoreUnavailable(_))));
        assert!(cache_store.get("user:1").await.unwrap().is_hit());
    }

    #[tokio::test]
    async fn create_leaves_negative_marker_alone() {
        let (dao, _store, cache_store) = dao();
        // Nobody has asked for #1 yet, so there is nothing to go stale.
        assert!(dao.get_by_id(1).await.unwrap_err().is_confirmed_absent());
        let mut user = User::new(0, "ann", "ann@example.com");
        assert_eq!(dao.create(&mut user).await.unwrap(), 1);
        assert_eq!(cache_store.get("user:1").await.unwrap(), Lookup::Negative);
    }

    #[tokio::test]
    async fn get_by_ids_keeps_request_order() {
        let (dao, store, _) = dao();
        for id in 1..=3 {
            store.insert(User::new(id, "u", "u@example.com"));
        }
        let rows = dao.get_by_ids(&[3, 9, 1]).await.unwrap();
        assert_eq!(rows.iter().map(|u| u.model.id).collect::<Vec<_>>(), vec![3, 1]);
    }

    #[tokio::test]
    async fn zero_limit_is_rejected() {
        let (dao, _, _) = dao();
        assert!(matches!(
            dao.get_by_last_id(10, 0, IdOrder::Desc).await,
            Err(Error::InvalidArgument(_))
        ));
    }
}
