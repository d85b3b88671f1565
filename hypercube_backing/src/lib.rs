//! [`PgBackingStore`], the production [`hypercube_core::BackingStore`] implementation: a
//! connection-pooled client for the relational store the cache reads cold data from.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(missing_debug_implementations, clippy::explicit_iter_loop, clippy::use_self)]

use async_trait::async_trait;
use hypercube_core::{BackingStore, BackingStoreError, Rowset};
use observability_deps::tracing::{debug, warn};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{Column, ConnectOptions, Postgres, Row, TypeInfo, ValueRef};
use std::str::FromStr;
use std::time::Duration;

/// A pooled Postgres [`BackingStore`].
///
/// Every value is rendered to its textual representation on the way out: the cache layer
/// above never interprets cell values, it only stores and replays them, so there is no
/// benefit to carrying typed columns past this boundary.
#[derive(Debug)]
pub struct PgBackingStore {
    pool: sqlx::PgPool,
}

impl PgBackingStore {
    /// Connect a pool of up to `max_connections` connections to `dsn`.
    pub async fn connect(dsn: &str, max_connections: u32) -> Result<Self, BackingStoreError> {
        let opts = sqlx::postgres::PgConnectOptions::from_str(dsn)
            .map_err(|e| BackingStoreError::Connection {
                message: e.to_string(),
            })?
            .log_statements(sqlx::log::LevelFilter::Debug)
            .log_slow_statements(sqlx::log::LevelFilter::Warn, Duration::from_millis(500));

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_with(opts)
            .await
            .map_err(|e| BackingStoreError::Connection {
                message: e.to_string(),
            })?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl BackingStore for PgBackingStore {
    async fn fetch(&self, sql: &str) -> Result<Rowset, BackingStoreError> {
        debug!(sql, "executing backing store query");
        let rows = sqlx::query(sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| BackingStoreError::Execution {
                message: e.to_string(),
            })?;

        let Some(first) = rows.first() else {
            return Ok(Rowset::default());
        };
        let columns = first
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect();

        let mut out = Rowset::with_columns(columns);
        for row in &rows {
            out.rows.push(render_row(row)?);
        }
        Ok(out)
    }
}

/// Render every column of `row` to its textual form, falling back to `"NULL"` for SQL NULL.
fn render_row(row: &PgRow) -> Result<Vec<String>, BackingStoreError> {
    (0..row.len())
        .map(|i| render_cell(row, i))
        .collect()
}

fn render_cell(row: &PgRow, index: usize) -> Result<String, BackingStoreError> {
    let raw = row.try_get_raw(index).map_err(|e| BackingStoreError::Execution {
        message: e.to_string(),
    })?;
    if raw.is_null() {
        return Ok("NULL".to_string());
    }

    let type_name = raw.type_info().name();
    let rendered = match type_name {
        "BOOL" => row
            .try_get::<bool, _>(index)
            .map(|v| v.to_string()),
        "INT2" => row.try_get::<i16, _>(index).map(|v| v.to_string()),
        "INT4" => row.try_get::<i32, _>(index).map(|v| v.to_string()),
        "INT8" => row.try_get::<i64, _>(index).map(|v| v.to_string()),
        "FLOAT4" => row.try_get::<f32, _>(index).map(|v| v.to_string()),
        "FLOAT8" => row.try_get::<f64, _>(index).map(|v| v.to_string()),
        "NUMERIC" => row
            .try_get::<sqlx::types::BigDecimal, _>(index)
            .map(|v| v.to_string()),
        "TIMESTAMP" => row
            .try_get::<chrono::NaiveDateTime, _>(index)
            .map(|v| v.to_string()),
        "TIMESTAMPTZ" => row
            .try_get::<chrono::DateTime<chrono::Utc>, _>(index)
            .map(|v| v.to_rfc3339()),
        "DATE" => row
            .try_get::<chrono::NaiveDate, _>(index)
            .map(|v| v.to_string()),
        "JSON" | "JSONB" => row
            .try_get::<serde_json::Value, _>(index)
            .map(|v| v.to_string()),
        _ => row.try_get::<String, _>(index),
    };

    rendered.or_else(|e| {
        // Last resort: a type we don't special-case above that still happens to decode as
        // text (e.g. enum-like domains). Only warn and fail if that also doesn't work.
        row.try_get::<String, _>(index).map_err(|_| {
            warn!(type_name, error=%e, "could not render backing store cell");
            BackingStoreError::Execution {
                message: format!("unsupported column type: {type_name}"),
            }
        })
    })
}
