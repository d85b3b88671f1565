//! The signature → [`CacheEntry`] mapping, TTL enforcement, and hit/miss counters.

use hashbrown::HashMap;
use iox_time::{Time, TimeProvider};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::cube_store::{CacheEntry, ColumnarEngine, MaterializeStats};
use crate::signature::CacheKey;

/// Outcome of [`CacheIndex::lookup`].
#[derive(Debug, Clone)]
pub enum Lookup {
    /// A live, unexpired entry was found.
    Hit(CacheEntry),
    /// No live entry: either never materialized, or found expired and evicted by this call.
    Miss,
}

/// Point-in-time counters, exposed via the `/metrics` HTTP surface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Total cache hits observed by [`CacheIndex::lookup`].
    pub hits: u64,
    /// Total cache misses observed by [`CacheIndex::lookup`] (including expiries).
    pub misses: u64,
    /// Number of live entries right now.
    pub tables_cached: usize,
    /// Sum of every live entry's best-effort byte size.
    pub bytes_cached: usize,
}

/// The signature → [`CacheEntry`] map.
///
/// Guarded by a single [`parking_lot::RwLock`]: `lookup`/`insert` for distinct keys may run
/// concurrently under a read lock (expiring/removing a single key still needs a short write
/// lock, which does not block lookups for other keys beyond that brief critical section);
/// [`CacheIndex::flush_all`] takes the lock exclusively for its duration, so it never
/// interleaves with an in-flight lookup.
#[derive(Debug)]
pub struct CacheIndex {
    time_provider: Arc<dyn TimeProvider>,
    default_ttl: Duration,
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheIndex {
    /// Construct an empty index with the given default TTL (spec default: 900s).
    pub fn new(time_provider: Arc<dyn TimeProvider>, default_ttl: Duration) -> Self {
        Self {
            time_provider,
            default_ttl,
            entries: RwLock::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Look up `key`. On a true hit, updates `last_hit_at` and the hit counter. On an expired
    /// entry, evicts it (dropping its cube via `engine`) and returns [`Lookup::Miss`] — expired
    /// entries are never observable to readers.
    pub async fn lookup(&self, key: &CacheKey, engine: &dyn ColumnarEngine) -> Lookup {
        let now = self.time_provider.now();

        let evicted = {
            let mut entries = self.entries.write();
            match entries.get_mut(key) {
                Some(entry) if !entry.is_expired(now) => {
                    entry.record_hit(now);
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Lookup::Hit(entry.clone());
                }
                Some(_) => entries.remove(key),
                None => None,
            }
        };

        if let Some(entry) = evicted {
            // expired: drop its cube before reporting the miss, so it's never observable.
            engine.drop(entry.cube_name()).await.ok();
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        Lookup::Miss
    }

    /// Bind `key` to a newly materialized cube, recording the engine's reported `stats`.
    ///
    /// The caller must already have materialized the cube in the `ColumnarEngine` before
    /// calling this — `insert` only records the metadata.
    pub fn insert(&self, key: CacheKey, stats: MaterializeStats) {
        let now = self.time_provider.now();
        let entry = CacheEntry::new(key.clone(), now, self.default_ttl, stats);
        self.entries.write().insert(key, entry);
    }

    /// Remove every entry and instruct `engine` to drop every cube. Atomic with respect to
    /// `lookup`: a lookup beginning after this returns never observes a pre-flush entry.
    pub async fn flush_all(&self, engine: &dyn ColumnarEngine) {
        let mut entries = self.entries.write();
        entries.clear();
        drop(entries);
        engine.drop_all().await.ok();
    }

    /// All live (not necessarily unexpired — expiry is lazy) cache keys.
    pub fn keys(&self) -> Vec<CacheKey> {
        self.entries.read().keys().cloned().collect()
    }

    /// All live entries, for snapshotting.
    pub fn entries(&self) -> Vec<CacheEntry> {
        self.entries.read().values().cloned().collect()
    }

    /// Re-insert a restored entry during startup snapshot load, without going through the
    /// normal materialize path (the cube already exists on disk/in the live store).
    pub fn restore(&self, entry: CacheEntry) {
        self.entries.write().insert(entry.key().clone(), entry);
    }

    /// Point-in-time statistics.
    pub fn stats(&self) -> CacheStats {
        let entries = self.entries.read();
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            tables_cached: entries.len(),
            bytes_cached: entries.values().map(CacheEntry::byte_size).sum(),
        }
    }
}
