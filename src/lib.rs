//! # rt-cache
//!
//! Read-through (cache-aside) caching for key-indexed record stores, with per-key request coalescing and negative
//! caching.
//!
//! # The Basics
//!
//! The crate is meant for data access layers where:
//!
//! - records live in a relational table (or anything alike) and are identified by a non-zero integer id;
//! - the same ids are read far more often than they are written;
//! - bursts of concurrent reads of one id, including ids that don't exist, must not turn into bursts of queries.
//!
//! The cache operates on the following principles:
//!
//! - A read first asks the cache store. A miss is resolved by the backing store and the outcome is written back.
//! - Concurrent misses of the same id share a single backing store fetch. The fetch runs in its own task, so a reader
//!   giving up does not cancel it for the others.
//! - "No such row" is cached too, as a negative marker with its own TTL.
//! - Batched reads ask the cache for everything at once and the backing store only for the real misses.
//! - Writes never populate the cache. A [`Dao`](dao::Dao) drops the affected entries after every update or delete.
//! - The cache store is pluggable: an in-process [moka](https://crates.io/crates/moka) backend and a redis backend
//!   are bundled, both storing exactly the same bytes.
//!
//! # Entity Store
//!
//! The backing store is abstracted by the [`EntityStore`] trait. Its associated types define the entity, the query
//! condition, the transaction handle and the error types; the cache treats all of them opaquely except for the
//! entity, which must be serde-serializable and know its id and cache namespace (see [`Entity`]).
//!
//! ```ignore
//! let config = CacheConfig::from_env()?;
//! let cache = match config.connect().await? {
//!     Some(cache_store) => Some(Arc::new(config.read_through(Arc::clone(&users), cache_store)?)),
//!     None => None,
//! };
//! let dao = Dao::new(users, cache);
//!
//! let user = dao.get_by_id(42).await?;
//! ```

pub mod cache;
pub mod coalescer;
pub mod config;
pub mod dao;
pub mod error;
pub mod key;
pub mod model;
pub mod store;
pub mod traits;
pub mod types;

#[doc(inline)]
pub use cache::ReadThroughCache;
#[doc(inline)]
pub use error::Error;
#[doc(inline)]
pub use traits::Entity;
#[doc(inline)]
pub use traits::EntityStore;

pub mod prelude {
    pub use crate::cache::ReadThroughCache;
    pub use crate::config::CacheConfig;
    pub use crate::config::CacheKind;
    pub use crate::dao::Dao;
    pub use crate::error::Error;
    pub use crate::store::CacheStore;
    pub use crate::store::MemoryStore;
    pub use crate::store::RedisStore;
    pub use crate::traits::Entity;
    pub use crate::traits::EntityStore;
    pub use crate::types::*;
}
