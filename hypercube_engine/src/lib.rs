//! [`DuckDbEngine`], the production [`hypercube_core::ColumnarEngine`] implementation: an
//! in-process DuckDB database holding one table per materialized cube.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(missing_debug_implementations, clippy::explicit_iter_loop, clippy::use_self)]

use async_trait::async_trait;
use hypercube_core::{CubeStoreError, ColumnarEngine, MaterializeStats, Rowset};
use observability_deps::tracing::{info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Table-name prefix this engine trusts as belonging to the cache: only tables carrying it
/// are ever touched by `drop_all`, `snapshot_save`, or `snapshot_load`.
const CUBE_NAME_PREFIX: &str = "cache_";

/// An embedded, in-process DuckDB instance.
///
/// All access goes through a single connection guarded by a `tokio::sync::Mutex` and run via
/// `spawn_blocking`, since `duckdb::Connection` calls are synchronous and the design treats
/// this engine as effectively single-writer.
pub struct DuckDbEngine {
    conn: Arc<Mutex<duckdb::Connection>>,
    snapshot_path: Option<PathBuf>,
}

impl std::fmt::Debug for DuckDbEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DuckDbEngine")
            .field("snapshot_path", &self.snapshot_path)
            .finish_non_exhaustive()
    }
}

impl DuckDbEngine {
    /// Open an in-memory DuckDB database configured with `memory_limit` (e.g. `"8GB"`) and
    /// `threads` worker threads.
    pub fn open(memory_limit: &str, threads: usize, snapshot_path: Option<PathBuf>) -> Result<Self, CubeStoreError> {
        let conn = duckdb::Connection::open_in_memory().map_err(engine_err)?;
        conn.execute_batch(&format!(
            "PRAGMA memory_limit='{memory_limit}'; PRAGMA threads={threads};"
        ))
        .map_err(engine_err)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            snapshot_path,
        })
    }

    async fn with_conn<F, T>(&self, f: F) -> Result<T, CubeStoreError>
    where
        F: FnOnce(&duckdb::Connection) -> Result<T, duckdb::Error> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.blocking_lock();
            f(&guard)
        })
        .await
        .map_err(|e| CubeStoreError::Engine {
            message: format!("engine task panicked: {e}"),
        })?
        .map_err(engine_err)
    }
}

fn engine_err(e: duckdb::Error) -> CubeStoreError {
    CubeStoreError::Engine {
        message: e.to_string(),
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[async_trait]
impl ColumnarEngine for DuckDbEngine {
    async fn materialize(&self, cube_name: &str, rowset: Rowset) -> Result<MaterializeStats, CubeStoreError> {
        let table = quote_ident(cube_name);
        let row_count = rowset.len();
        // Best-effort: DuckDB doesn't expose a cheap per-table storage-size query here, so
        // this estimates from the rendered cell bytes actually inserted.
        let byte_size = rowset.columns.iter().map(|c| c.len()).sum::<usize>()
            + rowset.rows.iter().flatten().map(|c| c.len()).sum::<usize>();
        let columns = rowset.columns.clone();
        let rows = rowset.rows;

        self.with_conn(move |conn| {
            let column_defs = columns
                .iter()
                .map(|c| format!("{} VARCHAR", quote_ident(c)))
                .collect::<Vec<_>>()
                .join(", ");
            conn.execute_batch(&format!("CREATE TABLE {table} ({column_defs})"))?;

            if !rows.is_empty() {
                let placeholders = vec!["?"; columns.len()].join(", ");
                let mut stmt =
                    conn.prepare(&format!("INSERT INTO {table} VALUES ({placeholders})"))?;
                for row in &rows {
                    stmt.execute(duckdb::params_from_iter(row.iter()))?;
                }
            }

            Ok(MaterializeStats { row_count, byte_size })
        })
        .await
    }

    async fn read(&self, cube_name: &str) -> Result<Rowset, CubeStoreError> {
        let table = quote_ident(cube_name);
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!("SELECT * FROM {table}"))?;
            let columns: Vec<String> = stmt.column_names();
            let width = columns.len();

            let rows = stmt
                .query_map([], move |row| {
                    (0..width)
                        .map(|i| row.get::<usize, Option<String>>(i).map(|v| v.unwrap_or_default()))
                        .collect::<Result<Vec<String>, _>>()
                })?
                .collect::<Result<Vec<_>, _>>()?;

            Ok(Rowset { columns, rows })
        })
        .await
    }

    async fn drop(&self, cube_name: &str) -> Result<(), CubeStoreError> {
        let table = quote_ident(cube_name);
        self.with_conn(move |conn| {
            conn.execute_batch(&format!("DROP TABLE IF EXISTS {table}"))
        })
        .await
    }

    async fn drop_all(&self) -> Result<(), CubeStoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT table_name FROM information_schema.tables WHERE table_name LIKE ?",
            )?;
            let like = format!("{CUBE_NAME_PREFIX}%");
            let names: Vec<String> = stmt
                .query_map([like], |row| row.get::<usize, String>(0))?
                .collect::<Result<_, _>>()?;
            for name in names {
                conn.execute_batch(&format!("DROP TABLE IF EXISTS {}", quote_ident(&name)))?;
            }
            Ok(())
        })
        .await
    }

    async fn snapshot_save(&self, cube_names: &[String]) -> Result<(), CubeStoreError> {
        let Some(path) = self.snapshot_path.clone() else {
            return Ok(());
        };
        let names = cube_names.to_vec();
        self.with_conn(move |conn| {
            let path_literal = path.to_string_lossy().replace('\'', "''");
            conn.execute_batch(&format!("ATTACH '{path_literal}' AS snapshot_db"))?;
            for name in &names {
                let table = quote_ident(name);
                conn.execute_batch(&format!(
                    "DROP TABLE IF EXISTS snapshot_db.{ident}; \
                     CREATE TABLE snapshot_db.{ident} AS SELECT * FROM {table}",
                    ident = quote_ident(name),
                ))?;
            }
            conn.execute_batch("DETACH snapshot_db")?;
            Ok(())
        })
        .await
    }

    async fn snapshot_load(&self) -> Vec<String> {
        let Some(path) = self.snapshot_path.clone() else {
            return Vec::new();
        };
        if !path.exists() {
            return Vec::new();
        }

        let result: Result<Vec<String>, CubeStoreError> = self
            .with_conn(move |conn| {
                let path_literal = path.to_string_lossy().replace('\'', "''");
                conn.execute_batch(&format!("ATTACH '{path_literal}' AS snapshot_db (READ_ONLY)"))?;
                let mut stmt = conn.prepare(
                    "SELECT table_name FROM information_schema.tables \
                     WHERE table_catalog = 'snapshot_db' AND table_name LIKE ?",
                )?;
                let like = format!("{CUBE_NAME_PREFIX}%");
                let names: Vec<String> = stmt
                    .query_map([like], |row| row.get::<usize, String>(0))?
                    .collect::<Result<_, _>>()?;

                let mut restored = Vec::new();
                for name in &names {
                    let ident = quote_ident(name);
                    let outcome = conn.execute_batch(&format!(
                        "CREATE TABLE {ident} AS SELECT * FROM snapshot_db.{ident}"
                    ));
                    match outcome {
                        Ok(()) => restored.push(name.clone()),
                        Err(_) => {
                            conn.execute_batch(&format!("DROP TABLE IF EXISTS {ident}")).ok();
                        }
                    }
                }
                conn.execute_batch("DETACH snapshot_db")?;
                Ok(restored)
            })
            .await;

        match result {
            Ok(names) => {
                info!(count = names.len(), "restored cubes from snapshot");
                names
            }
            Err(e) => {
                warn!(error=%e, "snapshot restore failed, starting with an empty cache");
                Vec::new()
            }
        }
    }
}
