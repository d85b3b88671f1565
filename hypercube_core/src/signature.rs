//! The grouping signature, and the derivation of a cube name from a cache key.
//!
//! Per the design's resolution of its own Open Question (the source keys a cube by grouping
//! signature alone, which collides whenever two queries group the same way but project
//! different metrics or filter differently): the cache/cube key used here is the grouping
//! signature **plus** a fingerprint of the canonicalized metric list and WHERE clause.

use data_encoding::HEXLOWER_PERMISSIVE;
use sha2::{Digest, Sha256};

/// The cube-name prefix reserved for cubes owned by this cache, per the persisted-state
/// layout in the design.
pub const CUBE_NAME_PREFIX: &str = "cache_";

/// The sorted, deduplicated tuple of canonicalized grouping expressions of a query, plus a
/// fingerprint of its metric list and filter. This is the full cache/cube key: two queries
/// collide (and share a cube) only if both are equal.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CacheKey {
    grouping: Vec<String>,
    fingerprint: String,
}

impl CacheKey {
    /// Build a key from an already sorted+deduplicated grouping tuple and the rendered
    /// select list / WHERE clause to fingerprint.
    pub fn new(grouping: Vec<String>, select_list: &[String], where_clause: Option<&str>) -> Self {
        Self {
            grouping,
            fingerprint: fingerprint(select_list, where_clause),
        }
    }

    /// The grouping expressions this key was derived from, in canonical sorted order.
    pub fn grouping(&self) -> &[String] {
        &self.grouping
    }

    /// Deterministic, injective cube name for this key.
    ///
    /// Each component is hex-encoded before joining with `_`: hex output never contains `_`,
    /// so splitting the name back on `_` recovers exactly the original components regardless
    /// of what characters a grouping expression contains. This closes the latent collision the
    /// design calls out as a bug not to reproduce (plain underscore-joining of raw components).
    pub fn cube_name(&self) -> String {
        let mut parts: Vec<String> = self
            .grouping
            .iter()
            .map(|g| HEXLOWER_PERMISSIVE.encode(g.as_bytes()))
            .collect();
        parts.push(HEXLOWER_PERMISSIVE.encode(self.fingerprint.as_bytes()));
        format!("{CUBE_NAME_PREFIX}{}", parts.join("_"))
    }

    /// Recover a [`CacheKey`] from a cube name produced by [`CacheKey::cube_name`], for restore
    /// from a snapshot. `None` if `name` doesn't carry the reserved prefix, has fewer than two
    /// hex-encoded components, or any component is not valid hex/UTF-8 — per the design, such a
    /// table is dropped from the live store rather than restored.
    pub fn from_cube_name(name: &str) -> Option<Self> {
        let rest = name.strip_prefix(CUBE_NAME_PREFIX)?;
        let mut parts: Vec<&str> = rest.split('_').collect();
        if parts.len() < 2 {
            return None;
        }
        let fingerprint_hex = parts.pop()?;
        let fingerprint = decode_component(fingerprint_hex)?;
        let grouping = parts
            .into_iter()
            .map(decode_component)
            .collect::<Option<Vec<String>>>()?;

        Some(Self {
            grouping,
            fingerprint,
        })
    }
}

fn decode_component(hex: &str) -> Option<String> {
    let bytes = HEXLOWER_PERMISSIVE.decode(hex.as_bytes()).ok()?;
    String::from_utf8(bytes).ok()
}

fn fingerprint(select_list: &[String], where_clause: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    for item in select_list {
        hasher.update(item.as_bytes());
        hasher.update(b"\0");
    }
    hasher.update(where_clause.unwrap_or("").as_bytes());
    let digest = hasher.finalize();
    // truncate: collision risk here is negligible compared to the grouping-tuple search space,
    // and a full 64-char hex digest would make cube names unwieldy.
    HEXLOWER_PERMISSIVE.encode(&digest[..8])
}
