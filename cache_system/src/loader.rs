//! How to produce a value for a key that is not yet cached.

use async_trait::async_trait;
use std::fmt::Debug;

/// Produces a value for a cache miss.
///
/// Implementations are expected to be idempotent with respect to `k`: the driver only calls
/// [`Loader::load`] once per concurrent wave of misses for a given key (see
/// [`crate::cache::driver::CacheDriver`]).
#[async_trait]
pub trait Loader: Debug + Send + Sync + 'static {
    /// Cache key type.
    type K;

    /// Cache value type.
    type V;

    /// Extra, per-request data passed through to the loader (e.g. the raw query text),
    /// not part of the key and not retained in the cache.
    type Extra;

    /// Load the value for `k`.
    async fn load(&self, k: Self::K, extra: Self::Extra) -> Self::V;
}
