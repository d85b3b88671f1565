//! Error taxonomy for the hypercube caching engine.
//!
//! Each variant corresponds to one of the six error kinds of the design: admission,
//! parse/canonicalization, backing-store, cube-store, snapshot, and invalidator errors. The
//! [`QueryRouter`](crate::router::QueryRouter) never recovers cache state on any of these
//! paths — a half-built cube is always dropped before the error is surfaced.

use snafu::Snafu;

/// Errors that can occur while admitting, canonicalizing, and routing a query.
///
/// `Clone` because this type flows through the single-flight materialization gate in
/// `router`, whose shared result across waiting callers must be cloneable.
#[derive(Debug, Snafu, Clone, PartialEq, Eq)]
#[snafu(visibility(pub(crate)))]
pub enum RouterError {
    /// SqlGate rejected the query before it reached the backing store.
    #[snafu(display("query rejected: {reason}"))]
    Admission {
        /// Human-readable reason for the rejection.
        reason: String,
    },

    /// The backing store failed to execute the (canonicalized) query.
    #[snafu(display("backing store error: {source}"))]
    BackingStore {
        /// Underlying driver error.
        source: crate::backing_store::BackingStoreError,
    },

    /// The columnar engine failed to materialize, read, or drop a cube.
    #[snafu(display("cube store error: {source}"))]
    CubeStore {
        /// Underlying engine error.
        source: crate::cube_store::CubeStoreError,
    },
}

/// Client-vs-server outcome classification, mirroring the HTTP surface's status mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Caused by an invalid or unsafe client request; never reaches the backing store.
    Client,
    /// Caused by a failure in a collaborator (backing store, columnar engine).
    Server,
}

impl RouterError {
    /// Classify this error as a client or server outcome, per the design's error taxonomy.
    pub fn class(&self) -> ErrorClass {
        match self {
            RouterError::Admission { .. } => ErrorClass::Client,
            RouterError::BackingStore { .. } | RouterError::CubeStore { .. } => ErrorClass::Server,
        }
    }
}
