use std::fmt::Debug;
use std::time::Duration;

/// Default lifetime of a cached entity.
pub const DEFAULT_POSITIVE_TTL: Duration = Duration::from_secs(5 * 60);
/// Default lifetime of a "no such row" marker.
pub const DEFAULT_NEGATIVE_TTL: Duration = Duration::from_secs(10 * 60);

/// Outcome of a single-key cache lookup.
#[derive(Clone, PartialEq, Eq)]
pub enum Lookup {
    /// Encoded payload of a positively cached value.
    Hit(Vec<u8>),
    /// The key carries a negative marker: the entity is known to be absent from the store.
    Negative,
    /// Nothing cached under the key.
    Miss,
}

impl Lookup {
    #[inline]
    pub fn is_hit(&self) -> bool {
        matches!(self, Self::Hit(_))
    }

    #[inline]
    pub fn is_negative(&self) -> bool {
        matches!(self, Self::Negative)
    }

    #[inline]
    pub fn is_miss(&self) -> bool {
        matches!(self, Self::Miss)
    }
}

impl Debug for Lookup {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Hit(raw) => fmt.debug_tuple("Lookup::Hit").field(&raw.len()).finish(),
            Self::Negative => fmt.write_str("Lookup::Negative"),
            Self::Miss => fmt.write_str("Lookup::Miss"),
        }
    }
}

/// Result of a coalesced call.
#[derive(Debug, Clone)]
pub struct Flight<T, E> {
    pub result: Result<T, E>,
    /// `true` for callers that joined a generation started by somebody else.
    pub shared: bool,
}

impl<T, E> Flight<T, E> {
    pub fn into_result(self) -> Result<T, E> {
        self.result
    }
}

/// Sort direction of id-paged queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdOrder {
    Asc,
    #[default]
    Desc,
}

/// One page of a column query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    /// Zero-based.
    pub page:       usize,
    pub size:       usize,
    pub order:      IdOrder,
    /// Don't count matching rows; the total is reported as 0 then.
    pub skip_count: bool,
}

impl PageRequest {
    pub fn new(page: usize, size: usize) -> Self {
        Self {
            page,
            size,
            order: IdOrder::default(),
            skip_count: false,
        }
    }

    pub fn order(mut self, order: IdOrder) -> Self {
        self.order = order;
        self
    }

    pub fn without_count(mut self) -> Self {
        self.skip_count = true;
        self
    }

    /// Number of rows preceding the page.
    #[inline]
    pub fn offset(&self) -> usize {
        self.page.saturating_mul(self.size)
    }
}
