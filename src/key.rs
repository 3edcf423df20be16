use std::borrow::Cow;
use std::fmt::Display;

use crate::error::Error;
use crate::error::Result;
use crate::traits::Entity;

/// Maps entity ids to cache keys of the form `<namespace>:<id>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyCodec {
    namespace: Cow<'static, str>,
}

impl KeyCodec {
    pub fn new<S: Into<Cow<'static, str>>>(namespace: S) -> Result<Self> {
        let namespace = namespace.into();
        if namespace.is_empty() {
            return Err(Error::invalid_argument("cache namespace cannot be empty"));
        }
        if namespace.contains(':') {
            return Err(Error::invalid_argument(format!(
                "cache namespace '{namespace}' must not contain ':'"
            )));
        }
        Ok(Self { namespace })
    }

    /// Codec of the entity type's own namespace.
    pub fn of<E: Entity>() -> Result<Self> {
        Self::new(E::NAMESPACE)
    }

    #[inline]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    #[inline]
    pub fn key(&self, id: u64) -> String {
        format!("{}:{id}", self.namespace)
    }

    pub fn keys(&self, ids: &[u64]) -> Vec<String> {
        ids.iter().map(|id| self.key(*id)).collect()
    }

    /// Reverse of [`key()`](Self::key). Keys of other namespaces give `None`.
    pub fn id_of(&self, key: &str) -> Option<u64> {
        key.strip_prefix(self.namespace.as_ref())?
            .strip_prefix(':')?
            .parse()
            .ok()
    }
}

impl Display for KeyCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:*", self.namespace)
    }
}
