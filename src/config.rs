//! Cache configuration, either deserialized as part of an application config or read from `RTCACHE_*` environment
//! variables.
//!
//! | Variable | Meaning | Default |
//! | -------- | ------- | ------- |
//! | `RTCACHE_KIND` | `none`, `memory` or `redis` | `memory` |
//! | `RTCACHE_REDIS_URL` | server URL, required for `redis` | |
//! | `RTCACHE_POSITIVE_TTL` | seconds an entity stays cached | 300 |
//! | `RTCACHE_NEGATIVE_TTL` | seconds a "no such row" marker stays cached | 600 |
//! | `RTCACHE_MEMORY_CAPACITY` | entry limit of the in-process cache | 100000 |
//! | `RTCACHE_OP_TIMEOUT_MS` | bound of every cache and store call, none if unset | |

use serde::Deserialize;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::cache::ReadThroughCache;
use crate::error::Error;
use crate::error::Result;
use crate::store::CacheStore;
use crate::store::MemoryStore;
use crate::store::MAX_TTL;
use crate::store::RedisStore;
use crate::traits::EntityStore;
use crate::types::DEFAULT_NEGATIVE_TTL;
use crate::types::DEFAULT_POSITIVE_TTL;

pub const ENV_PREFIX: &str = "RTCACHE_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheKind {
    /// No caching at all, reads go straight to the store.
    None,
    #[default]
    Memory,
    Redis,
}

impl FromStr for CacheKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "none" | "off" | "" => Ok(Self::None),
            "memory" | "local" => Ok(Self::Memory),
            "redis" => Ok(Self::Redis),
            other => Err(Error::Config(format!("unknown cache kind '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub kind:            CacheKind,
    pub redis_url:       Option<String>,
    /// Seconds.
    pub positive_ttl:    u64,
    /// Seconds.
    pub negative_ttl:    u64,
    pub memory_capacity: u64,
    pub op_timeout_ms:   Option<u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            kind:            CacheKind::default(),
            redis_url:       None,
            positive_ttl:    DEFAULT_POSITIVE_TTL.as_secs(),
            negative_ttl:    DEFAULT_NEGATIVE_TTL.as_secs(),
            memory_capacity: 100_000,
            op_timeout_ms:   None,
        }
    }
}

impl CacheConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|name| std::env::var(format!("{ENV_PREFIX}{name}")).ok())
    }

    /// Like [`from_env()`](Self::from_env) with variable lookup delegated to `var`, which receives names without
    /// the prefix.
    pub fn from_vars<F>(var: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(kind) = var("KIND") {
            config.kind = kind.parse()?;
        }
        config.redis_url = var("REDIS_URL").filter(|url| !url.is_empty());
        if let Some(ttl) = parse_var(&var, "POSITIVE_TTL")? {
            config.positive_ttl = ttl;
        }
        if let Some(ttl) = parse_var(&var, "NEGATIVE_TTL")? {
            config.negative_ttl = ttl;
        }
        if let Some(capacity) = parse_var(&var, "MEMORY_CAPACITY")? {
            config.memory_capacity = capacity;
        }
        config.op_timeout_ms = parse_var(&var, "OP_TIMEOUT_MS")?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.positive_ttl == 0 || self.negative_ttl == 0 {
            return Err(Error::Config("cache TTLs must be positive".into()));
        }
        if self.positive_ttl > MAX_TTL.as_secs() || self.negative_ttl > MAX_TTL.as_secs() {
            return Err(Error::Config(format!("cache TTLs cannot exceed {}s", MAX_TTL.as_secs())));
        }
        if self.op_timeout_ms == Some(0) {
            return Err(Error::Config("operation timeout must be positive".into()));
        }
        if self.kind == CacheKind::Redis && self.redis_url.is_none() {
            return Err(Error::Config(format!("{ENV_PREFIX}REDIS_URL is required for the redis cache")));
        }
        Ok(())
    }

    #[inline]
    pub fn positive_ttl(&self) -> Duration {
        Duration::from_secs(self.positive_ttl)
    }

    #[inline]
    pub fn negative_ttl(&self) -> Duration {
        Duration::from_secs(self.negative_ttl)
    }

    #[inline]
    pub fn op_timeout(&self) -> Option<Duration> {
        self.op_timeout_ms.map(Duration::from_millis)
    }

    /// Instantiate the configured backend. `None` stands for the no-cache mode.
    pub async fn connect(&self) -> Result<Option<Arc<dyn CacheStore>>> {
        self.validate()?;
        let store: Arc<dyn CacheStore> = match self.kind {
            CacheKind::None => return Ok(None),
            CacheKind::Memory => Arc::new(
                MemoryStore::builder()
                    .max_capacity(self.memory_capacity)
                    .build()
                    .map_err(|err| Error::Config(err.to_string()))?,
            ),
            CacheKind::Redis => {
                let url = self
                    .redis_url
                    .as_deref()
                    .ok_or_else(|| Error::Config("redis URL is missing".into()))?;
                Arc::new(RedisStore::connect(url).await?)
            }
        };
        debug!("connected '{}' cache store", store.name());
        Ok(Some(store))
    }

    /// A read-through cache of `entity_store` over `cache_store` with the configured TTLs and timeout.
    pub fn read_through<S>(&self, entity_store: Arc<S>, cache_store: Arc<dyn CacheStore>) -> Result<ReadThroughCache<S>>
    where
        S: EntityStore,
    {
        self.validate()?;
        let mut builder = ReadThroughCache::<S>::builder()
            .entity_store(entity_store)
            .cache_store(cache_store)
            .positive_ttl(self.positive_ttl())
            .negative_ttl(self.negative_ttl());
        if let Some(op_timeout) = self.op_timeout() {
            builder = builder.op_timeout(op_timeout);
        }
        builder.build().map_err(|err| Error::Config(err.to_string()))
    }
}

fn parse_var<F, T>(var: &F, name: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match var(name) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|err| Error::Config(format!("{ENV_PREFIX}{name}='{raw}': {err}"))),
    }
}
