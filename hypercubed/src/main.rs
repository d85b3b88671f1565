//! The hypercube caching proxy binary: loads configuration, wires up the router and
//! invalidator, and serves the HTTP surface until asked to shut down.

mod http;
mod logging;

use clap::Parser;
use hypercube_backing::PgBackingStore;
use hypercube_core::{CacheIndex, CacheKey, Invalidator, MaterializeStats, QueryRouter};
use hypercube_engine::DuckDbEngine;
use iox_time::SystemProvider;
use observability_deps::tracing::{error, info, warn};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Debug, Parser)]
#[clap(about = "Read-only analytical query caching proxy")]
struct Cli {
    /// Path to a YAML configuration file. If omitted, every setting must be supplied via its
    /// `--<flag>` / environment-variable form instead.
    #[clap(long, env = "HYPERCUBE_CONFIG")]
    config: Option<PathBuf>,
}

fn load_config(cli: &Cli) -> Result<hypercube_core::Config, String> {
    match &cli.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .map_err(|e| format!("could not read config file {}: {e}", path.display()))?;
            hypercube_core::Config::from_yaml(&text)
                .map_err(|e| format!("could not parse config file {}: {e}", path.display()))
        }
        None => Ok(hypercube_core::Config::parse()),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    logging::init();

    let cli = Cli::parse();
    let config = match load_config(&cli) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "failed to load configuration");
            return ExitCode::FAILURE;
        }
    };

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "fatal startup error");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: hypercube_core::Config) -> Result<(), String> {
    let backing_store = PgBackingStore::connect(&config.backing_store.dsn, 10)
        .await
        .map_err(|e| format!("backing store unreachable at startup: {e}"))?;
    let backing_store: Arc<dyn hypercube_core::BackingStore> = Arc::new(backing_store);

    let snapshot_path = config
        .cube_store
        .persistent_enabled
        .then(|| config.cube_store.persistent_path.clone())
        .flatten()
        .map(PathBuf::from);
    if config.cube_store.persistent_enabled && snapshot_path.is_none() {
        return Err("cube_store.persistent_enabled is set but cube_store.persistent_path is missing".to_string());
    }

    let engine = DuckDbEngine::open(
        &config.cube_store.memory_limit,
        config.cube_store.threads,
        snapshot_path,
    )
    .map_err(|e| format!("failed to start the embedded columnar engine: {e}"))?;
    let engine: Arc<dyn hypercube_core::ColumnarEngine> = Arc::new(engine);

    let time_provider = Arc::new(SystemProvider::new());
    let index = Arc::new(CacheIndex::new(time_provider, config.cube_store.cache_ttl()));

    if config.cube_store.persistent_enabled {
        restore_snapshot(&index, engine.as_ref(), config.cube_store.cache_ttl()).await;
    }

    let router = Arc::new(QueryRouter::new(
        Arc::clone(&backing_store),
        Arc::clone(&engine),
        Arc::clone(&index),
    ));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let invalidator_config = config.invalidator.to_invalidator_config();
    let invalidator_handle = if invalidator_config.is_enabled() {
        let invalidator = Arc::new(Invalidator::new(
            invalidator_config,
            Arc::clone(&backing_store),
            Arc::clone(&index),
            Arc::clone(&engine),
        ));
        let rx = shutdown_rx.clone();
        Some(tokio::spawn(async move { invalidator.run(rx).await }))
    } else {
        None
    };

    let state = Arc::new(http::AppState {
        router: Arc::clone(&router),
        source_table: config.hypercube.source_table.clone(),
    });

    let addr: SocketAddr = config
        .bind_address
        .parse()
        .map_err(|e| format!("invalid bind_address {:?}: {e}", config.bind_address))?;

    let make_svc = hyper::service::make_service_fn(move |_conn| {
        let state = Arc::clone(&state);
        async move {
            Ok::<_, Infallible>(hyper::service::service_fn(move |req| {
                let state = Arc::clone(&state);
                async move { Ok::<_, Infallible>(http::route(state, req).await) }
            }))
        }
    });

    let server = hyper::Server::try_bind(&addr)
        .map_err(|e| format!("failed to bind {addr}: {e}"))?
        .serve(make_svc);

    info!(%addr, "listening");

    let graceful = server.with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        info!("received shutdown signal");
    });

    if let Err(e) = graceful.await {
        warn!(error=%e, "server exited with an error");
    }

    let _ = shutdown_tx.send(true);
    if let Some(handle) = invalidator_handle {
        let _ = handle.await;
    }

    if config.cube_store.persistent_enabled {
        let cube_names: Vec<String> = index.keys().iter().map(CacheKey::cube_name).collect();
        if let Err(e) = engine.snapshot_save(&cube_names).await {
            warn!(error=%e, "snapshot save on shutdown failed");
        }
    }

    Ok(())
}

/// Restore cache state from the on-disk snapshot, if any. Any restored cube whose name cannot
/// be parsed back into a [`CacheKey`] is dropped rather than left orphaned in the live store,
/// per the persisted-state invariant.
async fn restore_snapshot(
    index: &Arc<CacheIndex>,
    engine: &dyn hypercube_core::ColumnarEngine,
    ttl: std::time::Duration,
) {
    let time_provider = SystemProvider::new();
    for cube_name in engine.snapshot_load().await {
        let Some(key) = CacheKey::from_cube_name(&cube_name) else {
            warn!(cube_name, "restored cube name does not parse back into a signature, dropping");
            engine.drop(&cube_name).await.ok();
            continue;
        };

        match engine.read(&cube_name).await {
            Ok(rowset) => {
                let now = iox_time::TimeProvider::now(&time_provider);
                let stats = MaterializeStats {
                    row_count: rowset.len(),
                    byte_size: rowset.columns.iter().map(|c| c.len()).sum::<usize>()
                        + rowset.rows.iter().flatten().map(|c| c.len()).sum::<usize>(),
                };
                index.restore(hypercube_core::CacheEntry::new(key, now, ttl, stats));
            }
            Err(e) => {
                warn!(cube_name, error=%e, "restored cube could not be read back, dropping");
                engine.drop(&cube_name).await.ok();
            }
        }
    }
}
