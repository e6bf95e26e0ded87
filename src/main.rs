use anyhow::Result;
use axum::Router;
use std::{fs, io::ErrorKind, path::PathBuf, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use thumbnailer::{
    config::AppConfig,
    handlers::AppState,
    routes,
    services::{
        gateway::FsObjectStore, ledger::IdempotencyLedger, processor::EventProcessor,
        thumbnail::ThumbnailSpec,
    },
};

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config ---
    let cfg = AppConfig::from_env_and_args()?;
    tracing::info!("Starting thumbnailer with config: {:?}", cfg);

    // --- Ensure storage directory exists ---
    let storage_root = PathBuf::from(&cfg.storage_dir);
    if !storage_root.exists() {
        fs::create_dir_all(&storage_root)?;
        tracing::info!("Created storage directory at {}", cfg.storage_dir);
    }

    // --- Initialize core services ---
    // One ledger per process: the claim check is the only thing that keeps
    // concurrent duplicate notifications from double-processing a version.
    let store = Arc::new(FsObjectStore::new(&storage_root));
    let ledger = Arc::new(IdempotencyLedger::new());
    let processor = Arc::new(EventProcessor::new(
        store,
        ledger,
        ThumbnailSpec::default(),
        cfg.layout,
    ));

    // --- Build router ---
    let state = AppState {
        processor,
        storage_root,
    };
    let app: Router = routes::routes::routes().with_state(state);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
