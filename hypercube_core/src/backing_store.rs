//! The `BackingStore` contract consumed by [`crate::router::QueryRouter`] and
//! [`crate::invalidator::Invalidator`].

use async_trait::async_trait;
use snafu::Snafu;
use std::fmt::Debug;

/// A column-oriented result set: column names plus row tuples, rendered as strings.
///
/// Strings are used for row values (rather than a typed column model) because the cache layer
/// never interprets values itself — it only ever materializes, reads back, or streams them —
/// and the concrete `BackingStore`/`ColumnarEngine` implementations are the ones that know the
/// real column types.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Rowset {
    /// Column names, in projection order.
    pub columns: Vec<String>,
    /// Row tuples; each inner `Vec` has `columns.len()` entries.
    pub rows: Vec<Vec<String>>,
}

impl Rowset {
    /// An empty rowset with the given column names.
    pub fn with_columns(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// `true` if there are no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Errors surfaced by a `BackingStore` implementation.
///
/// Driver errors are rendered to a message rather than kept as a boxed `dyn Error`: this type
/// flows through the single-flight materialization gate (see `router`), whose shared result
/// must be `Clone`, so it cannot hold a non-`Clone` trait object.
#[derive(Debug, Snafu, Clone, PartialEq, Eq)]
pub enum BackingStoreError {
    /// Failed to acquire a connection from the pool.
    #[snafu(display("could not acquire backing store connection: {message}"))]
    Connection {
        /// Underlying driver error, rendered.
        message: String,
    },

    /// The query executed but failed (syntax, permissions, missing relation, ...).
    #[snafu(display("backing store query failed: {message}"))]
    Execution {
        /// Underlying driver error, rendered.
        message: String,
    },

    /// A scalar probe query did not return exactly one row and one column.
    #[snafu(display("expected a single scalar value, got {rows} rows / {columns} columns"))]
    NotScalar {
        /// Observed row count.
        rows: usize,
        /// Observed column count.
        columns: usize,
    },
}

/// The relational store the proxy reads from. Out of scope beyond this contract: connection
/// pooling, row-to-type mapping, and retry policy are the concern of the concrete
/// implementation (`hypercube_backing`), not of the cache engine.
#[async_trait]
pub trait BackingStore: Debug + Send + Sync + 'static {
    /// Execute `sql` and return its full result set.
    async fn fetch(&self, sql: &str) -> Result<Rowset, BackingStoreError>;

    /// Execute a query expected to return exactly one row and one column, and return that
    /// value as a string. Used by the [`crate::invalidator::Invalidator`]'s probe query.
    async fn fetch_scalar(&self, sql: &str) -> Result<String, BackingStoreError> {
        let rowset = self.fetch(sql).await?;
        if rowset.rows.len() != 1 || rowset.columns.len() != 1 {
            return Err(BackingStoreError::NotScalar {
                rows: rowset.rows.len(),
                columns: rowset.columns.len(),
            });
        }
        Ok(rowset.rows[0][0].clone())
    }
}
