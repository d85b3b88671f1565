//! The hypercube caching engine: admission, canonicalization, the grouping-signature cache
//! key, the cache index, the columnar-engine and backing-store contracts, the per-request
//! router pipeline, and the background invalidator.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(missing_debug_implementations, clippy::explicit_iter_loop, clippy::use_self, clippy::clone_on_ref_ptr)]

pub mod backing_store;
pub mod cache_index;
pub mod canonicalizer;
pub mod config;
pub mod cube_store;
pub mod error;
pub mod invalidator;
pub mod router;
pub mod signature;
pub mod sql_gate;

pub use backing_store::{BackingStore, BackingStoreError, Rowset};
pub use cache_index::{CacheIndex, CacheStats, Lookup};
pub use config::Config;
pub use cube_store::{CacheEntry, ColumnarEngine, CubeStoreError, MaterializeStats};
pub use error::{ErrorClass, RouterError};
pub use invalidator::{Invalidator, InvalidatorConfig};
pub use router::QueryRouter;
pub use signature::CacheKey;
pub use sql_gate::AdmissionError;
