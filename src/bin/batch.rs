//! Batch-mode worker: drains its shard of an image folder and exits.
//!
//! One worker among N, identified by a 0-based task index; the shard is
//! computed from a sorted listing with no coordination between workers.
//! Exit code 0 on normal completion (including an empty shard), 2 on
//! configuration errors. Per-item failures are logged and counted but never
//! change the exit code.

use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use thumbnailer::{
    config::BatchConfig,
    services::{batch::BatchRunner, gateway::FsObjectStore, thumbnail::ThumbnailSpec},
};

#[tokio::main]
async fn main() -> ExitCode {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config ---
    let cfg = match BatchConfig::from_env_and_args() {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("ERROR: {err}");
            return ExitCode::from(2);
        }
    };
    tracing::info!(
        task = cfg.task_index,
        task_count = cfg.task_count,
        bucket = %cfg.bucket,
        prefix = %cfg.prefix,
        "starting batch worker"
    );

    let store = Arc::new(FsObjectStore::new(&cfg.storage_dir));
    let runner = BatchRunner::new(
        store,
        ThumbnailSpec::default(),
        cfg.layout,
        cfg.task_index,
        cfg.task_count,
    );

    match runner.run(&cfg.bucket, &cfg.prefix).await {
        Ok(summary) => {
            tracing::info!(
                processed = summary.processed,
                errored = summary.errored,
                total = summary.total,
                "worker finished"
            );
            ExitCode::SUCCESS
        }
        Err(err) => {
            // The listing itself failed; nothing was attempted.
            tracing::error!(error = %err, "batch run failed before processing");
            ExitCode::FAILURE
        }
    }
}
