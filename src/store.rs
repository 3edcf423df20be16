//! Byte-level key/value stores the read-through cache is backed by.
//!
//! Both backends keep the very same bytes for the same operations: the encoded payload for positive entries and
//! [`NEGATIVE_MARKER`] for negative ones. Reads of either backend are classified by one function, so switching backends
//! changes nothing but the place where the bytes live.

pub mod memory;
pub mod remote;

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt::Debug;
use std::time::Duration;

use crate::error::Error;
use crate::error::Result;
use crate::types::Lookup;

#[doc(inline)]
pub use memory::MemoryStore;
#[doc(inline)]
pub use remote::RedisStore;

/// Stored in place of a value for keys known to be absent from the backing store. A JSON document can never consist
/// of a bare asterisk.
pub const NEGATIVE_MARKER: &[u8] = b"*";

/// Longest TTL any backend accepts. Redis refuses expiry times past the signed 64-bit millisecond range.
pub const MAX_TTL: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);

#[async_trait]
pub trait CacheStore: Debug + Send + Sync + 'static {
    /// Backend name, for logging.
    fn name(&self) -> &str;

    async fn get(&self, key: &str) -> Result<Lookup>;

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()>;

    async fn set_negative(&self, key: &str, ttl: Duration) -> Result<()>;

    /// Positively cached entries only. Negative markers and absent keys are silently omitted; use
    /// [`get()`](Self::get) to tell one from the other.
    async fn multi_get(&self, keys: &[String]) -> Result<HashMap<String, Vec<u8>>>;

    async fn multi_set(&self, entries: Vec<(String, Vec<u8>)>, ttl: Duration) -> Result<()>;

    /// Deleting an absent key is not an error.
    async fn del(&self, key: &str) -> Result<()>;
}

#[inline]
pub(crate) fn classify(raw: Option<Vec<u8>>) -> Lookup {
    match raw {
        None => Lookup::Miss,
        Some(raw) if raw == NEGATIVE_MARKER => Lookup::Negative,
        Some(raw) => Lookup::Hit(raw),
    }
}

pub(crate) fn check_ttl(ttl: Duration) -> Result<()> {
    if ttl.is_zero() {
        return Err(Error::invalid_argument("cache TTL must be positive"));
    }
    if ttl > MAX_TTL {
        return Err(Error::invalid_argument(format!(
            "cache TTL {ttl:?} exceeds the limit of {MAX_TTL:?}"
        )));
    }
    Ok(())
}

pub(crate) fn check_payload(key: &str, value: &[u8]) -> Result<()> {
    if value.is_empty() {
        return Err(Error::invalid_argument(format!("empty payload for '{key}'")));
    }
    if value == NEGATIVE_MARKER {
        return Err(Error::invalid_argument(format!(
            "payload for '{key}' is indistinguishable from the negative marker"
        )));
    }
    Ok(())
}
