//! Generic single-flight, loader-backed cache primitive.
//!
//! [`cache::driver::CacheDriver`] combines a [`backend::CacheBackend`] (where confirmed
//! values live) with a [`loader::Loader`] (how to produce a value for a key that isn't
//! cached yet) and collapses concurrent misses for the same key into one load.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

pub mod backend;
pub mod cache;
pub mod loader;

pub use cache::{Cache, CacheGetStatus, CachePeekStatus};
pub use cache::driver::CacheDriver;
