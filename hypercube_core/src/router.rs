//! The per-request pipeline: gate → canonicalize → signature → cache lookup → fetch-and-fill.

use async_trait::async_trait;
use cache_system::backend::CacheBackend;
use cache_system::cache::{Cache, CacheGetStatus};
use cache_system::{loader::Loader, CacheDriver};
use snafu::ResultExt;
use std::sync::Arc;

use crate::backing_store::{BackingStore, Rowset};
use crate::cache_index::{CacheIndex, Lookup};
use crate::canonicalizer;
use crate::cube_store::ColumnarEngine;
use crate::error::{self, RouterError};
use crate::signature::CacheKey;
use crate::sql_gate;

/// A trivial in-memory [`CacheBackend`] that never holds confirmed values itself: the
/// materialization gate only ever needs to collapse concurrent *misses*, the authoritative
/// "is this cached" answer always comes from [`CacheIndex`]. Always reports a miss so that
/// every [`Cache::get`] call runs the loader, whose body re-checks `CacheIndex` under the
/// gate before deciding whether to fetch.
#[derive(Debug, Default)]
struct AlwaysMissBackend;

impl CacheBackend for AlwaysMissBackend {
    type K = CacheKey;
    type V = Result<Rowset, RouterError>;

    fn get(&mut self, _k: &Self::K) -> Option<Self::V> {
        None
    }

    fn set(&mut self, _k: Self::K, _v: Self::V) {}

    fn remove(&mut self, _k: &Self::K) -> Option<Self::V> {
        None
    }

    fn clear(&mut self) {}

    fn len(&self) -> usize {
        0
    }
}

/// Bundles the collaborators a materialization needs, captured by the
/// [`MaterializationLoader`] so the per-signature gate can call back into them.
#[derive(Debug)]
struct MaterializationLoader {
    backing_store: Arc<dyn BackingStore>,
    engine: Arc<dyn ColumnarEngine>,
    index: Arc<CacheIndex>,
}

/// What the materialization loader needs per call: the canonicalized query text to fetch if
/// this call turns out to own the miss.
type LoaderExtra = String;

/// The result of one materialization attempt: either the freshly fetched/materialized rowset,
/// or an error that must not leave any partial cache state behind.
type LoaderResult = Result<Rowset, RouterError>;

#[async_trait]
impl Loader for MaterializationLoader {
    type K = CacheKey;
    type V = LoaderResult;
    type Extra = LoaderExtra;

    async fn load(&self, key: Self::K, canonical_query: Self::Extra) -> Self::V {
        // Re-check under the gate: a peer may have materialized this key while we were
        // queued for the lock.
        if let Lookup::Hit(entry) = self.index.lookup(&key, self.engine.as_ref()).await {
            return self
                .engine
                .read(entry.cube_name())
                .await
                .context(error::CubeStoreSnafu);
        }

        let rowset = self
            .backing_store
            .fetch(&canonical_query)
            .await
            .context(error::BackingStoreSnafu)?;

        let cube_name = key.cube_name();
        let stats = self
            .engine
            .materialize(&cube_name, rowset.clone())
            .await
            .context(error::CubeStoreSnafu)?;

        self.index.insert(key, stats);
        Ok(rowset)
    }
}

/// Implements the full six-step per-request pipeline of the design, and is the sole client of
/// [`CacheIndex`] and [`ColumnarEngine`] for read traffic.
#[derive(Debug)]
pub struct QueryRouter {
    backing_store: Arc<dyn BackingStore>,
    engine: Arc<dyn ColumnarEngine>,
    index: Arc<CacheIndex>,
    gate: CacheDriver<CacheKey, LoaderResult, LoaderExtra>,
}

impl QueryRouter {
    /// Construct a router over the given collaborators.
    pub fn new(
        backing_store: Arc<dyn BackingStore>,
        engine: Arc<dyn ColumnarEngine>,
        index: Arc<CacheIndex>,
    ) -> Self {
        let loader: Arc<dyn Loader<K = CacheKey, V = LoaderResult, Extra = LoaderExtra>> =
            Arc::new(MaterializationLoader {
                backing_store: Arc::clone(&backing_store),
                engine: Arc::clone(&engine),
                index: Arc::clone(&index),
            });
        let gate = CacheDriver::new(loader, Box::new(AlwaysMissBackend::default()));

        Self {
            backing_store,
            engine,
            index,
            gate,
        }
    }

    /// Run the full pipeline for one raw, client-supplied query.
    ///
    /// Step 4 (no `GROUP BY`) bypasses the cache entirely: the backing store is queried
    /// directly and nothing is materialized.
    pub async fn query(&self, raw_sql: &str) -> Result<Rowset, RouterError> {
        sql_gate::admit(raw_sql).map_err(|e| RouterError::Admission {
            reason: e.to_string(),
        })?;

        let normalized = canonicalizer::normalize(raw_sql);
        let canonical = canonicalizer::rewrite(&normalized);

        let Some(grouping) = canonicalizer::grouping_signature(&canonical) else {
            return self
                .backing_store
                .fetch(&canonical)
                .await
                .context(error::BackingStoreSnafu);
        };

        let (metrics, filter) = canonicalizer::metric_fingerprint_inputs(&canonical);
        let key = CacheKey::new(grouping, &metrics, filter.as_deref());

        self.gate.get(key, canonical).await
    }

    /// Current cache statistics, for the `/metrics` HTTP surface.
    pub fn cache_stats(&self) -> crate::cache_index::CacheStats {
        self.index.stats()
    }

    /// Expose the index for the invalidator and snapshot save/load.
    pub fn cache_index(&self) -> &Arc<CacheIndex> {
        &self.index
    }

    /// Expose the engine for snapshot save/load.
    pub fn engine(&self) -> &Arc<dyn ColumnarEngine> {
        &self.engine
    }
}

/// Distinguishes a fresh materialization from a wait that collapsed onto an in-flight one.
pub type MaterializationStatus = CacheGetStatus;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backing_store::BackingStoreError;
    use crate::cube_store::{CubeStoreError, MaterializeStats};
    use iox_time::{MockProvider, Time};
    use std::collections::HashMap as StdHashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Mutex as AsyncMutex;

    #[derive(Debug)]
    struct FakeBackingStore {
        fetch_count: AtomicUsize,
        rows: Rowset,
    }

    #[async_trait]
    impl BackingStore for FakeBackingStore {
        async fn fetch(&self, _sql: &str) -> Result<Rowset, BackingStoreError> {
            self.fetch_count.fetch_add(1, Ordering::SeqCst);
            // simulate non-trivial work so concurrent callers actually overlap
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(self.rows.clone())
        }
    }

    #[derive(Debug, Default)]
    struct FakeEngine {
        cubes: AsyncMutex<StdHashMap<String, Rowset>>,
    }

    #[async_trait]
    impl ColumnarEngine for FakeEngine {
        async fn materialize(&self, cube_name: &str, rowset: Rowset) -> Result<MaterializeStats, CubeStoreError> {
            let mut cubes = self.cubes.lock().await;
            if cubes.contains_key(cube_name) {
                return Err(CubeStoreError::AlreadyExists {
                    name: cube_name.to_string(),
                });
            }
            let row_count = rowset.len();
            let byte_size = rowset.rows.iter().flatten().map(|c| c.len()).sum();
            cubes.insert(cube_name.to_string(), rowset);
            Ok(MaterializeStats { row_count, byte_size })
        }

        async fn read(&self, cube_name: &str) -> Result<Rowset, CubeStoreError> {
            self.cubes
                .lock()
                .await
                .get(cube_name)
                .cloned()
                .ok_or_else(|| CubeStoreError::NotFound {
                    name: cube_name.to_string(),
                })
        }

        async fn drop(&self, cube_name: &str) -> Result<(), CubeStoreError> {
            self.cubes.lock().await.remove(cube_name);
            Ok(())
        }

        async fn drop_all(&self) -> Result<(), CubeStoreError> {
            self.cubes.lock().await.clear();
            Ok(())
        }

        async fn snapshot_save(&self, _cube_names: &[String]) -> Result<(), CubeStoreError> {
            Ok(())
        }

        async fn snapshot_load(&self) -> Vec<String> {
            Vec::new()
        }
    }

    fn rows() -> Rowset {
        Rowset {
            columns: vec!["p1".to_string(), "sum".to_string()],
            rows: vec![vec!["1".to_string(), "2".to_string()]],
        }
    }

    fn make_router(backing: FakeBackingStore) -> QueryRouter {
        let provider = Arc::new(MockProvider::new(Time::from_timestamp_millis(0)));
        let index = Arc::new(CacheIndex::new(provider, Duration::from_secs(900)));
        let engine = Arc::new(FakeEngine::default());
        QueryRouter::new(Arc::new(backing), engine, index)
    }

    #[tokio::test]
    async fn no_group_by_bypasses_cache() {
        let router = make_router(FakeBackingStore {
            fetch_count: AtomicUsize::new(0),
            rows: rows(),
        });

        router.query("SELECT * FROM t LIMIT 1").await.unwrap();
        assert_eq!(router.cache_stats().tables_cached, 0);
    }

    #[tokio::test]
    async fn cold_miss_then_hit_same_signature() {
        let router = make_router(FakeBackingStore {
            fetch_count: AtomicUsize::new(0),
            rows: rows(),
        });

        let r1 = router
            .query("SELECT p1, SUM(count) FROM t GROUP BY p1")
            .await
            .unwrap();
        let r2 = router
            .query("SELECT p1, SUM(count) FROM t GROUP BY p1")
            .await
            .unwrap();

        assert_eq!(r1, r2);
        assert_eq!(router.cache_stats().hits, 1);
        assert_eq!(router.cache_stats().tables_cached, 1);
    }

    #[tokio::test]
    async fn dimension_order_is_a_hit() {
        let router = make_router(FakeBackingStore {
            fetch_count: AtomicUsize::new(0),
            rows: rows(),
        });

        router
            .query("SELECT p1, p2, SUM(count) FROM t GROUP BY p1, p2")
            .await
            .unwrap();
        router
            .query("SELECT p2, p1, SUM(count) FROM t GROUP BY p2, p1")
            .await
            .unwrap();

        assert_eq!(router.cache_stats().hits, 1);
        assert_eq!(router.cache_stats().tables_cached, 1);
    }

    #[tokio::test]
    async fn admission_reject_never_reaches_backing_store() {
        let router = make_router(FakeBackingStore {
            fetch_count: AtomicUsize::new(0),
            rows: rows(),
        });

        let err = router.query("DELETE FROM t").await.unwrap_err();
        assert_eq!(err.class(), error::ErrorClass::Client);
    }

    #[tokio::test]
    async fn single_flight_collapses_concurrent_misses() {
        let provider = Arc::new(MockProvider::new(Time::from_timestamp_millis(0)));
        let index = Arc::new(CacheIndex::new(provider, Duration::from_secs(900)));
        let engine: Arc<dyn ColumnarEngine> = Arc::new(FakeEngine::default());
        let backing = Arc::new(FakeBackingStore {
            fetch_count: AtomicUsize::new(0),
            rows: rows(),
        });
        let router = Arc::new(QueryRouter::new(
            Arc::clone(&backing) as Arc<dyn BackingStore>,
            engine,
            index,
        ));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let router = Arc::clone(&router);
            handles.push(tokio::spawn(async move {
                router
                    .query("SELECT p1, SUM(count) FROM t GROUP BY p1")
                    .await
                    .unwrap()
            }));
        }

        let mut results = Vec::new();
        for h in handles {
            results.push(h.await.unwrap());
        }

        assert!(results.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(backing.fetch_count.load(Ordering::SeqCst), 1);
    }
}
