use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::error::Error as StdError;
use std::fmt::Debug;

use crate::types::IdOrder;
use crate::types::PageRequest;

/// A record kept in a relational table and identified by a non-zero unsigned id.
pub trait Entity: Serialize + DeserializeOwned + Debug + Clone + Send + Sync + 'static {
    /// Cache key namespace of the entity type. Must be unique among entity types sharing one cache store and must not
    /// contain a colon.
    const NAMESPACE: &'static str;

    fn id(&self) -> u64;

    /// Used by stores to write back the id assigned on insert.
    fn set_id(&mut self, id: u64);
}

// For types that are in charge of reading/writing records of the backing store.
#[async_trait]
pub trait EntityStore: Sized + Send + Sync + 'static {
    type Entity: Entity;
    /// Whatever the store understands as a query condition. Opaque for the cache layer.
    type Condition: Debug + Send + Sync;
    /// Transaction handle.
    type Tx: Send;
    type Error: StdError + Send + Sync + 'static;

    /// `Ok(None)` means there is no such row. Any error is treated as the store being unavailable.
    async fn fetch_one(&self, id: u64) -> Result<Option<Self::Entity>, Self::Error>;
    /// Returns whatever subset of `ids` exists. Partial absence is not an error.
    async fn fetch_many(&self, ids: &[u64]) -> Result<Vec<Self::Entity>, Self::Error>;
    async fn fetch_by_condition(&self, condition: &Self::Condition) -> Result<Option<Self::Entity>, Self::Error>;
    /// Page of rows with ids strictly below `last_id`.
    async fn fetch_before(&self, last_id: u64, limit: usize, order: IdOrder)
        -> Result<Vec<Self::Entity>, Self::Error>;

    /// Number of rows matching `condition`.
    async fn count(&self, condition: &Self::Condition) -> Result<u64, Self::Error>;
    /// Rows matching `condition`, sorted by id and sliced as `page` says.
    async fn fetch_page(&self, condition: &Self::Condition, page: &PageRequest)
        -> Result<Vec<Self::Entity>, Self::Error>;

    /// Insert and write the assigned id back into `entity`.
    async fn create(&self, entity: &mut Self::Entity) -> Result<u64, Self::Error>;
    async fn update(&self, entity: &Self::Entity) -> Result<(), Self::Error>;
    /// Soft-delete.
    async fn delete(&self, ids: &[u64]) -> Result<(), Self::Error>;

    async fn begin(&self) -> Result<Self::Tx, Self::Error>;
    async fn commit(&self, tx: Self::Tx) -> Result<(), Self::Error>;
    async fn create_in(&self, tx: &mut Self::Tx, entity: &mut Self::Entity) -> Result<u64, Self::Error>;
    async fn update_in(&self, tx: &mut Self::Tx, entity: &Self::Entity) -> Result<(), Self::Error>;
    async fn delete_in(&self, tx: &mut Self::Tx, id: u64) -> Result<(), Self::Error>;
}
