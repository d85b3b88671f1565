//! The [`ColumnarEngine`] contract consumed by [`crate::cache_index::CacheIndex`] and
//! [`crate::router::QueryRouter`], plus the [`CacheEntry`] metadata the index tracks per cube.

use async_trait::async_trait;
use snafu::Snafu;
use std::fmt::Debug;
use std::time::Duration;

use crate::backing_store::Rowset;
use crate::signature::CacheKey;
use iox_time::Time;

/// Errors a [`ColumnarEngine`] implementation can surface.
///
/// Like [`crate::backing_store::BackingStoreError`], driver errors are rendered to a message
/// rather than boxed, so this type stays `Clone` across the single-flight gate.
#[derive(Debug, Snafu, Clone, PartialEq, Eq)]
pub enum CubeStoreError {
    /// `materialize` was called for a cube name that already exists.
    #[snafu(display("cube {name} already exists"))]
    AlreadyExists {
        /// The colliding cube name.
        name: String,
    },

    /// `read`/`drop` was called for a cube name that does not exist.
    #[snafu(display("cube {name} does not exist"))]
    NotFound {
        /// The missing cube name.
        name: String,
    },

    /// The engine failed for a reason opaque to the cache layer (I/O, OOM, etc).
    #[snafu(display("columnar engine error: {message}"))]
    Engine {
        /// Underlying engine error, rendered.
        message: String,
    },
}

/// The embedded, in-process analytical engine the cache materializes cubes into.
///
/// Consumed, not implemented, by the cache index and router — see `hypercube_engine` for the
/// DuckDB-backed production implementation. All operations are treated as non-suspending DDL
/// from the router's point of view, but implementations run on an engine the design treats as
/// single-writer: callers are expected to serialize concurrent DDL (see
/// [`crate::router::QueryRouter`]).
#[async_trait]
pub trait ColumnarEngine: Debug + Send + Sync + 'static {
    /// Create a new named cube from `rowset`. Fails if `cube_name` already exists. Returns
    /// best-effort row count and on-disk/in-memory byte size for the new cube.
    async fn materialize(&self, cube_name: &str, rowset: Rowset) -> Result<MaterializeStats, CubeStoreError>;

    /// Read back a materialized cube in full.
    async fn read(&self, cube_name: &str) -> Result<Rowset, CubeStoreError>;

    /// Drop a single cube. A no-op (not an error) if it does not exist.
    async fn drop(&self, cube_name: &str) -> Result<(), CubeStoreError>;

    /// Drop every cube with the reserved prefix.
    async fn drop_all(&self) -> Result<(), CubeStoreError>;

    /// Copy the named cubes into the on-disk snapshot, replacing any prior cubes of the same
    /// name there. Must leave the in-memory store unchanged.
    async fn snapshot_save(&self, cube_names: &[String]) -> Result<(), CubeStoreError>;

    /// If a snapshot file exists, attach it, copy every reserved-prefixed cube it holds into
    /// the live store, detach, and return the names that were restored. Best-effort: any
    /// individual cube that fails to restore is dropped from the live store, not surfaced as
    /// an error, to preserve the index-store bijection invariant.
    async fn snapshot_load(&self) -> Vec<String>;
}

/// Best-effort size statistics a [`ColumnarEngine`] reports back for one materialized cube.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaterializeStats {
    /// Number of rows in the materialized cube.
    pub row_count: usize,
    /// Approximate size of the materialized cube, in bytes. Best-effort: engines that can't
    /// cheaply measure this (e.g. without a dedicated storage-size query) may estimate from
    /// the rendered cell data.
    pub byte_size: usize,
}

/// Cache entry metadata tracked by the [`crate::cache_index::CacheIndex`] for one live cube.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    key: CacheKey,
    cube_name: String,
    created_at: Time,
    last_hit_at: Time,
    ttl: Duration,
    hits: u64,
    row_count: usize,
    byte_size: usize,
}

impl CacheEntry {
    /// Construct a freshly materialized entry.
    pub fn new(key: CacheKey, created_at: Time, ttl: Duration, stats: MaterializeStats) -> Self {
        let cube_name = key.cube_name();
        Self {
            key,
            cube_name,
            created_at,
            last_hit_at: created_at,
            ttl,
            hits: 0,
            row_count: stats.row_count,
            byte_size: stats.byte_size,
        }
    }

    /// The key this entry is bound to.
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// The deterministic cube name, derived from `key`, stable across restarts.
    pub fn cube_name(&self) -> &str {
        &self.cube_name
    }

    /// Monotonic timestamp of materialization.
    pub fn created_at(&self) -> Time {
        self.created_at
    }

    /// Timestamp of the most recent hit.
    pub fn last_hit_at(&self) -> Time {
        self.last_hit_at
    }

    /// Number of cache hits served by this entry.
    pub fn hits(&self) -> u64 {
        self.hits
    }

    /// Best-effort row count, as reported by the columnar engine at materialization time.
    pub fn row_count(&self) -> usize {
        self.row_count
    }

    /// Best-effort byte size, as reported by the columnar engine at materialization time.
    pub fn byte_size(&self) -> usize {
        self.byte_size
    }

    /// `true` if `now - created_at > ttl`.
    pub fn is_expired(&self, now: Time) -> bool {
        match now.checked_duration_since(self.created_at) {
            Some(age) => age > self.ttl,
            None => false,
        }
    }

    pub(crate) fn record_hit(&mut self, now: Time) {
        self.last_hit_at = now;
        self.hits += 1;
    }
}
