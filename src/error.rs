use std::error::Error as StdError;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Shareable error source. Coalesced fetches hand one result out to every waiter, hence `Arc`.
pub type SharedError = Arc<dyn StdError + Send + Sync + 'static>;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The entity is known not to exist: either the store has just said so or a negative marker is cached.
    #[error("{namespace} #{id} does not exist")]
    ConfirmedAbsent { namespace: &'static str, id: u64 },

    #[error("store unavailable: {0}")]
    StoreUnavailable(#[source] SharedError),

    #[error("cache unavailable: {0}")]
    CacheUnavailable(#[source] SharedError),

    #[error("failed to encode or decode cached value of '{key}': {source}")]
    Encoding {
        key:    String,
        #[source]
        source: Arc<serde_json::Error>,
    },

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("in-flight fetch of '{0}' was abandoned")]
    Abandoned(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    pub fn invalid_argument<S: ToString>(msg: S) -> Self {
        Self::InvalidArgument(msg.to_string())
    }

    pub fn store<E>(err: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::StoreUnavailable(Arc::new(err))
    }

    pub fn cache<E>(err: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::CacheUnavailable(Arc::new(err))
    }

    pub(crate) fn encoding(key: &str, source: serde_json::Error) -> Self {
        Self::Encoding {
            key:    key.to_string(),
            source: Arc::new(source),
        }
    }

    #[inline]
    pub fn is_confirmed_absent(&self) -> bool {
        matches!(self, Self::ConfirmedAbsent { .. })
    }

    /// Infrastructure failures the caller may want to retry with its own policy.
    #[inline]
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            Self::StoreUnavailable(_) | Self::CacheUnavailable(_) | Self::Timeout(_) | Self::Abandoned(_)
        )
    }
}

impl From<redis::RedisError> for Error {
    fn from(err: redis::RedisError) -> Self {
        Self::cache(err)
    }
}

impl From<crate::coalescer::Abandoned> for Error {
    fn from(abandoned: crate::coalescer::Abandoned) -> Self {
        Self::Abandoned(abandoned.key)
    }
}
