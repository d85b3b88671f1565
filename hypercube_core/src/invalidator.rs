//! Periodic probe of a scalar query; flushes the whole cache when its value changes.

use backoff::{Backoff, BackoffConfig};
use observability_deps::tracing::{info, warn};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

use crate::backing_store::BackingStore;
use crate::cache_index::CacheIndex;
use crate::cube_store::ColumnarEngine;

/// Configuration for the [`Invalidator`]. Runs only when `query` is non-empty and
/// `check_interval` is positive, per the design.
#[derive(Debug, Clone)]
pub struct InvalidatorConfig {
    /// Scalar probe query run against the backing store every tick.
    pub query: String,
    /// Time between ticks.
    pub check_interval: Duration,
}

impl InvalidatorConfig {
    /// `true` if this configuration actually runs a probe loop.
    pub fn is_enabled(&self) -> bool {
        !self.query.trim().is_empty() && !self.check_interval.is_zero()
    }
}

/// Number of times a failing probe is retried, with backoff, before the tick is abandoned in
/// favor of the next scheduled interval. `backoff::Backoff::retry_with_backoff` retries
/// unboundedly, which would stall the ticker indefinitely on a persistently broken probe query,
/// so the invalidator drives its own bounded loop instead.
const PROBE_RETRIES: u32 = 3;

/// Runs [`InvalidatorConfig::query`] on a fixed interval; flushes the entire cache whenever
/// its value changes from the previous tick. The first tick only records a baseline — it
/// never discards an already-warm cache just because no prior value existed yet.
#[derive(Debug)]
pub struct Invalidator {
    config: InvalidatorConfig,
    backing_store: Arc<dyn BackingStore>,
    index: Arc<CacheIndex>,
    engine: Arc<dyn ColumnarEngine>,
    last_value: Mutex<Option<String>>,
}

impl Invalidator {
    /// Construct an invalidator. Callers should check [`InvalidatorConfig::is_enabled`]
    /// before spawning [`Invalidator::run`].
    pub fn new(
        config: InvalidatorConfig,
        backing_store: Arc<dyn BackingStore>,
        index: Arc<CacheIndex>,
        engine: Arc<dyn ColumnarEngine>,
    ) -> Self {
        Self {
            config,
            backing_store,
            index,
            engine,
            last_value: Mutex::new(None),
        }
    }

    /// Run the probe loop until `shutdown` resolves. Intended to be spawned as an independent
    /// task; never returns an error — every probe failure is logged and the task continues.
    pub async fn run(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        if !self.config.is_enabled() {
            return;
        }

        let mut ticker = tokio::time::interval(self.config.check_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }

    /// Execute exactly one probe-and-maybe-flush cycle. Exposed directly for tests, which
    /// drive ticks without a background task.
    pub async fn tick(&self) {
        let mut backoff = Backoff::new(&BackoffConfig::default());
        let mut value = None;
        for attempt in 0..=PROBE_RETRIES {
            match self.backing_store.fetch_scalar(&self.config.query).await {
                Ok(v) => {
                    value = Some(v);
                    break;
                }
                Err(e) if attempt < PROBE_RETRIES => {
                    let delay = backoff.next();
                    warn!(error=%e, attempt, delay_ms = delay.as_millis() as u64, "invalidator probe failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    warn!(error=%e, "invalidator probe exhausted retries, skipping to next interval");
                }
            }
        }

        let value = match value {
            Some(v) => v,
            None => return,
        };

        let mut last_value = self.last_value.lock();
        match last_value.replace(value.clone()) {
            None => {
                info!(value, "invalidator recorded first baseline, not flushing");
            }
            Some(previous) if previous == value => {
                // unchanged: nothing to do.
            }
            Some(previous) => {
                drop(last_value);
                info!(previous, current = value, "invalidator detected change, flushing cache");
                self.index.flush_all(self.engine.as_ref()).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backing_store::{BackingStoreError, Rowset};
    use crate::cube_store::{CubeStoreError, MaterializeStats};
    use async_trait::async_trait;
    use iox_time::{MockProvider, Time};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct ScriptedBackingStore {
        values: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl BackingStore for ScriptedBackingStore {
        async fn fetch(&self, _sql: &str) -> Result<Rowset, BackingStoreError> {
            unreachable!("invalidator only calls fetch_scalar")
        }

        async fn fetch_scalar(&self, _sql: &str) -> Result<String, BackingStoreError> {
            let mut values = self.values.lock();
            if values.is_empty() {
                panic!("scripted backing store ran out of values");
            }
            Ok(values.remove(0))
        }
    }

    #[derive(Debug, Default)]
    struct CountingEngine {
        drop_all_calls: AtomicUsize,
    }

    #[async_trait]
    impl ColumnarEngine for CountingEngine {
        async fn materialize(&self, _n: &str, _r: Rowset) -> Result<MaterializeStats, CubeStoreError> {
            Ok(MaterializeStats::default())
        }
        async fn read(&self, _n: &str) -> Result<Rowset, CubeStoreError> {
            Ok(Rowset::default())
        }
        async fn drop(&self, _n: &str) -> Result<(), CubeStoreError> {
            Ok(())
        }
        async fn drop_all(&self) -> Result<(), CubeStoreError> {
            self.drop_all_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn snapshot_save(&self, _n: &[String]) -> Result<(), CubeStoreError> {
            Ok(())
        }
        async fn snapshot_load(&self) -> Vec<String> {
            Vec::new()
        }
    }

    fn invalidator(values: Vec<&str>) -> (Invalidator, Arc<CountingEngine>) {
        let backing = Arc::new(ScriptedBackingStore {
            values: Mutex::new(values.into_iter().map(String::from).collect()),
        });
        let provider = Arc::new(MockProvider::new(Time::from_timestamp_millis(0)));
        let index = Arc::new(CacheIndex::new(provider, Duration::from_secs(900)));
        let engine = Arc::new(CountingEngine::default());
        let config = InvalidatorConfig {
            query: "SELECT MAX(updated_at) FROM public.facts_agg".to_string(),
            check_interval: Duration::from_secs(30),
        };
        (
            Invalidator::new(config, backing, index, Arc::clone(&engine) as Arc<dyn ColumnarEngine>),
            engine,
        )
    }

    #[tokio::test]
    async fn first_tick_only_records_baseline() {
        let (inv, engine) = invalidator(vec!["2024-01-01"]);
        inv.tick().await;
        assert_eq!(engine.drop_all_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unchanged_value_does_not_flush() {
        let (inv, engine) = invalidator(vec!["2024-01-01", "2024-01-01"]);
        inv.tick().await;
        inv.tick().await;
        assert_eq!(engine.drop_all_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn changed_value_flushes_once() {
        let (inv, engine) = invalidator(vec!["2024-01-01", "2024-01-02"]);
        inv.tick().await;
        inv.tick().await;
        assert_eq!(engine.drop_all_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn disabled_without_query_or_interval() {
        let enabled = InvalidatorConfig {
            query: "SELECT 1".to_string(),
            check_interval: Duration::from_secs(1),
        };
        assert!(enabled.is_enabled());

        let no_query = InvalidatorConfig {
            query: String::new(),
            check_interval: Duration::from_secs(1),
        };
        assert!(!no_query.is_enabled());

        let no_interval = InvalidatorConfig {
            query: "SELECT 1".to_string(),
            check_interval: Duration::ZERO,
        };
        assert!(!no_interval.is_enabled());
    }
}
