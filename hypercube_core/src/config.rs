//! Runtime configuration: a YAML file's worth of settings, overridable from the environment
//! and command line the way `clap_blocks` configs are laid out in the wider workspace.

use clap::Parser;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::invalidator::InvalidatorConfig;

fn default_cache_ttl_seconds() -> u64 {
    900
}

/// `backing_store.*` settings.
#[derive(Debug, Clone, Serialize, Deserialize, Parser)]
pub struct BackingStoreConfig {
    /// Connection string for the relational backing store.
    #[clap(long = "backing-store-dsn", env = "HYPERCUBE_BACKING_STORE_DSN")]
    pub dsn: String,
}

/// `cube_store.*` settings.
#[derive(Debug, Clone, Serialize, Deserialize, Parser)]
pub struct CubeStoreConfig {
    /// Memory cap passed to the embedded columnar engine, e.g. `"8GB"`.
    #[clap(long = "cube-store-memory-limit", env = "HYPERCUBE_CUBE_STORE_MEMORY_LIMIT")]
    pub memory_limit: String,

    /// Worker thread count for the embedded columnar engine.
    #[clap(long = "cube-store-threads", env = "HYPERCUBE_CUBE_STORE_THREADS")]
    pub threads: usize,

    /// Seconds a materialized cube is considered fresh before it is evicted on next lookup.
    #[clap(
        long = "cube-store-cache-ttl-seconds",
        env = "HYPERCUBE_CUBE_STORE_CACHE_TTL_SECONDS",
        default_value = "900"
    )]
    #[serde(default = "default_cache_ttl_seconds")]
    pub cache_ttl_seconds: u64,

    /// Whether materialized cubes are persisted to `persistent_path` on shutdown and restored
    /// from it on startup.
    #[clap(long = "cube-store-persistent-enabled", env = "HYPERCUBE_CUBE_STORE_PERSISTENT_ENABLED")]
    #[serde(default)]
    pub persistent_enabled: bool,

    /// On-disk snapshot file path. Required when `persistent_enabled` is set.
    #[clap(long = "cube-store-persistent-path", env = "HYPERCUBE_CUBE_STORE_PERSISTENT_PATH")]
    #[serde(default)]
    pub persistent_path: Option<String>,
}

impl CubeStoreConfig {
    /// `cache_ttl_seconds` as a [`Duration`].
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }
}

/// `invalidator.*` settings.
#[derive(Debug, Clone, Serialize, Deserialize, Parser)]
pub struct InvalidatorSettings {
    /// Whether the invalidator probe loop runs at all.
    #[clap(long = "invalidator-enabled", env = "HYPERCUBE_INVALIDATOR_ENABLED")]
    #[serde(default)]
    pub enabled: bool,

    /// Scalar probe query, e.g. `SELECT MAX(updated_at) FROM public.facts_agg`.
    #[clap(long = "invalidator-query", env = "HYPERCUBE_INVALIDATOR_QUERY")]
    #[serde(default)]
    pub query: String,

    /// Seconds between probes.
    #[clap(
        long = "invalidator-check-interval-seconds",
        env = "HYPERCUBE_INVALIDATOR_CHECK_INTERVAL_SECONDS",
        default_value = "60"
    )]
    #[serde(default = "default_check_interval_seconds")]
    pub check_interval_seconds: u64,
}

fn default_check_interval_seconds() -> u64 {
    60
}

impl InvalidatorSettings {
    /// Build the [`InvalidatorConfig`] this settings block describes. `enabled = false`
    /// collapses to an empty query, which [`InvalidatorConfig::is_enabled`] also treats as off.
    pub fn to_invalidator_config(&self) -> InvalidatorConfig {
        InvalidatorConfig {
            query: if self.enabled { self.query.clone() } else { String::new() },
            check_interval: Duration::from_secs(self.check_interval_seconds),
        }
    }
}

/// `hypercube.*` settings: everything specific to the `/cube*` convenience endpoints rather
/// than to caching mechanics.
#[derive(Debug, Clone, Serialize, Deserialize, Parser)]
pub struct HypercubeConfig {
    /// Source table name queried by the `/cube` and `/cube.json` convenience endpoints.
    #[clap(long = "hypercube-source-table", env = "HYPERCUBE_SOURCE_TABLE")]
    pub source_table: String,
}

/// The complete configuration tree, as loaded from YAML and overridable per-field from the
/// environment or CLI flags, the way `clap_blocks` layers config in the wider workspace.
#[derive(Debug, Clone, Serialize, Deserialize, Parser)]
pub struct Config {
    #[clap(flatten)]
    pub backing_store: BackingStoreConfig,

    #[clap(flatten)]
    pub cube_store: CubeStoreConfig,

    #[clap(flatten)]
    pub invalidator: InvalidatorSettings,

    #[clap(flatten)]
    pub hypercube: HypercubeConfig,

    /// HTTP listen address, e.g. `"0.0.0.0:8080"`.
    #[clap(long = "bind-address", env = "HYPERCUBE_BIND_ADDRESS", default_value = "0.0.0.0:8080")]
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

fn default_bind_address() -> String {
    "0.0.0.0:8080".to_string()
}

impl Config {
    /// Parse a configuration document from YAML text.
    pub fn from_yaml(text: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_yaml_with_defaults() {
        let yaml = r#"
backing_store:
  dsn: "postgres://localhost/facts"
cube_store:
  memory_limit: "8GB"
  threads: 4
invalidator: {}
hypercube:
  source_table: "public.facts_agg"
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.cube_store.cache_ttl_seconds, 900);
        assert!(!config.invalidator.enabled);
        assert_eq!(config.bind_address, "0.0.0.0:8080");
    }

    #[test]
    fn disabled_invalidator_settings_yield_disabled_config() {
        let settings = InvalidatorSettings {
            enabled: false,
            query: "SELECT 1".to_string(),
            check_interval_seconds: 30,
        };
        assert!(!settings.to_invalidator_config().is_enabled());
    }

    #[test]
    fn enabled_invalidator_settings_carry_query_through() {
        let settings = InvalidatorSettings {
            enabled: true,
            query: "SELECT MAX(updated_at) FROM public.facts_agg".to_string(),
            check_interval_seconds: 30,
        };
        let config = settings.to_invalidator_config();
        assert!(config.is_enabled());
        assert_eq!(config.query, "SELECT MAX(updated_at) FROM public.facts_agg");
    }
}
