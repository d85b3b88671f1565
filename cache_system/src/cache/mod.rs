//! The [`Cache`] trait and its sole production implementation, [`driver::CacheDriver`].

pub mod driver;
#[cfg(test)]
pub mod test_util;

use async_trait::async_trait;
use std::fmt::Debug;

/// Outcome of a [`Cache::get_with_status`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheGetStatus {
    /// Value was already cached.
    Hit,
    /// Value was not cached and had to be loaded.
    Miss,
    /// Value was not cached, but a load for the same key was already in flight; this call
    /// collapsed onto it (single-flight).
    MissAlreadyLoading,
}

/// Outcome of a [`Cache::peek_with_status`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePeekStatus {
    /// Value was already cached.
    Hit,
    /// A load for this key is in flight; this call observed its eventual result without
    /// starting a new one.
    MissAlreadyLoading,
}

/// A cache that loads missing values on demand and collapses concurrent misses for the same
/// key into a single load (single-flight).
#[async_trait]
pub trait Cache: Debug + Send + Sync + 'static {
    /// Key type.
    type K: Send + 'static;
    /// Value type.
    type V: Send + 'static;
    /// Extra data passed to [`Self::get_with_status`] / [`Self::get`].
    type GetExtra: Send + 'static;
    /// Extra data passed to [`Self::peek_with_status`] / [`Self::peek`].
    type PeekExtra: Send + 'static;

    /// Get the value for `k`, loading it if necessary, reporting whether this call observed
    /// a hit, a fresh miss, or a miss that was already loading.
    async fn get_with_status(&self, k: Self::K, extra: Self::GetExtra) -> (Self::V, CacheGetStatus);

    /// Get the value for `k`, loading it if necessary.
    async fn get(&self, k: Self::K, extra: Self::GetExtra) -> Self::V {
        self.get_with_status(k, extra).await.0
    }

    /// Look at the value for `k` without starting a new load if it is not cached and not
    /// already loading.
    async fn peek_with_status(
        &self,
        k: Self::K,
        extra: Self::PeekExtra,
    ) -> Option<(Self::V, CachePeekStatus)>;

    /// Look at the value for `k` without starting a new load.
    async fn peek(&self, k: Self::K, extra: Self::PeekExtra) -> Option<Self::V> {
        self.peek_with_status(k, extra).await.map(|(v, _)| v)
    }

    /// Side-load a value, overwriting any cached value and completing any in-flight load for
    /// the same key with this value instead of the loader's result.
    async fn set(&self, k: Self::K, v: Self::V);
}
