//! Shared test harness for [`Cache`] implementations.

use super::{Cache, CacheGetStatus, CachePeekStatus};
use crate::loader::Loader;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;

/// A [`Loader`] that records every call it receives and returns a pre-programmed value.
#[derive(Debug)]
pub struct TestLoader {
    calls: Mutex<Vec<(u8, bool)>>,
}

impl TestLoader {
    /// Construct an empty recorder.
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Number of times [`Loader::load`] was actually invoked.
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

impl Default for TestLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Loader for TestLoader {
    type K = u8;
    type V = String;
    type Extra = bool;

    async fn load(&self, k: Self::K, extra: Self::Extra) -> Self::V {
        self.calls.lock().push((k, extra));
        format!("value-{k}-{extra}")
    }
}

/// Binds a concrete [`Cache`] implementation to the [`TestLoader`] fixture so
/// [`run_test_generic`] can exercise any driver the same way.
pub trait TestAdapter: Send + Sync {
    /// Extra type passed to `get`.
    type GetExtra: Send + 'static;
    /// Extra type passed to `peek`.
    type PeekExtra: Send + 'static;
    /// The cache under test.
    type Cache: Cache<K = u8, V = String, GetExtra = Self::GetExtra, PeekExtra = Self::PeekExtra>;

    /// Build a cache wired up to `loader`.
    fn construct(&self, loader: Arc<TestLoader>) -> Arc<Self::Cache>;

    /// Produce a `GetExtra` value carrying `inner`.
    fn get_extra(&self, inner: bool) -> Self::GetExtra;

    /// Produce a `PeekExtra` value.
    fn peek_extra(&self) -> Self::PeekExtra;
}

/// Generic behavioral test suite, run against any [`TestAdapter`].
pub async fn run_test_generic<A: TestAdapter>(adapter: A) {
    let loader = Arc::new(TestLoader::new());
    let cache = adapter.construct(Arc::clone(&loader));

    // first access is a miss and actually loads
    let (v, status) = cache.get_with_status(1, adapter.get_extra(true)).await;
    assert_eq!(v, "value-1-true");
    assert_eq!(status, CacheGetStatus::Miss);
    assert_eq!(loader.call_count(), 1);

    // second access for the same key is a hit, no further load
    let (v, status) = cache.get_with_status(1, adapter.get_extra(false)).await;
    assert_eq!(v, "value-1-true");
    assert_eq!(status, CacheGetStatus::Hit);
    assert_eq!(loader.call_count(), 1);

    // peek on a cached key returns it without loading
    let peeked = cache.peek_with_status(1, adapter.peek_extra()).await;
    assert_eq!(peeked, Some(("value-1-true".to_string(), CachePeekStatus::Hit)));

    // peek on an unknown, non-loading key returns nothing
    assert!(cache.peek_with_status(2, adapter.peek_extra()).await.is_none());

    // side-loading overwrites the cache
    cache.set(1, "side-loaded".to_string()).await;
    let (v, status) = cache.get_with_status(1, adapter.get_extra(true)).await;
    assert_eq!(v, "side-loaded");
    assert_eq!(status, CacheGetStatus::Hit);
    assert_eq!(loader.call_count(), 1);
}
