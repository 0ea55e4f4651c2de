//! In-process user cache.
//!
//! Caches user records by id so hot read paths (`/api/v1/auth/me`) skip the
//! storage round trip. Entries are invalidated on writes that change the
//! cached fields. The cache is also a health dependency: the aggregator
//! pings it alongside storage.

use quick_cache::sync::Cache;

use crate::storage::UserRecord;

/// Default number of cached user records.
const DEFAULT_CAPACITY: usize = 10_000;

/// Bounded cache of user records keyed by user id.
pub struct UserCache {
    inner: Cache<u64, UserRecord>,
}

impl UserCache {
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Cache::new(capacity),
        }
    }

    #[must_use]
    pub fn get(&self, user_id: u64) -> Option<UserRecord> {
        self.inner.get(&user_id)
    }

    pub fn insert(&self, user: UserRecord) {
        self.inner.insert(user.id, user);
    }

    pub fn invalidate(&self, user_id: u64) {
        self.inner.remove(&user_id);
    }

    /// Connectivity check for the health aggregator.
    ///
    /// The in-process cache has nothing to reach, so this only exists to
    /// satisfy the dependency-probe seam a networked cache would need.
    pub fn ping(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

impl Default for UserCache {
    fn default() -> Self {
        Self::new()
    }
}
