//! proctor-sg — Segmentation Service
//!
//! Consumes "video ready" events, turns each interview recording into
//! labeled 16 kHz mono WAV segments in the bucket, and publishes an
//! "audio ready" event for the inference service.

use anyhow::Result;
use clap::Parser;
use proctor_common::api::{build_router, serve, ApiState};
use proctor_common::config::PipelineConfig;
use proctor_common::ledger::StatusLedger;
use proctor_common::queue::{run_consumer, ConsumeMode, QueueClient};
use proctor_common::storage::{FsObjectStore, ObjectStore};
use proctor_sg::SegmentationStage;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "proctor-sg", about = "Interview segmentation service")]
struct Args {
    /// Config file path (defaults to proctor.toml, then user config dir)
    #[arg(long, env = "PROCTOR_CONFIG")]
    config: Option<PathBuf>,

    /// Override the pipeline database path
    #[arg(long, env = "PROCTOR_DB_PATH")]
    db_path: Option<PathBuf>,

    /// Override the local scratch root
    #[arg(long, env = "PROCTOR_SCRATCH_ROOT")]
    scratch_root: Option<PathBuf>,

    /// Override the bucket root directory
    #[arg(long, env = "PROCTOR_BUCKET_ROOT")]
    bucket_root: Option<PathBuf>,

    /// Health/status server port
    #[arg(long, env = "PROCTOR_SG_PORT")]
    port: Option<u16>,

    /// Drain the queue once and exit instead of running continuously
    #[arg(long)]
    drain: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let mut config = PipelineConfig::load(args.config.as_deref())?;
    if let Some(path) = args.db_path {
        config.db_path = path;
    }
    if let Some(path) = args.scratch_root {
        config.scratch_root = path;
    }
    if let Some(path) = args.bucket_root {
        config.bucket_root = path;
    }

    info!("Starting proctor-sg (Segmentation) service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!("Database: {}", config.db_path.display());
    info!("Bucket root: {}", config.bucket_root.display());

    std::fs::create_dir_all(&config.scratch_root)?;

    let pool = proctor_common::db::init_db_pool(&config.db_path).await?;
    let ledger = StatusLedger::new(pool.clone());
    let queue = QueueClient::new(pool, config.queue.clone());
    let store: Arc<dyn ObjectStore> = Arc::new(FsObjectStore::new(&config.bucket_root));

    let stage = SegmentationStage::new(
        ledger.clone(),
        queue.clone(),
        store,
        config.segmentation.clone(),
        config.scratch_root.clone(),
        config.queue.audio_ready.clone(),
    );

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutdown requested; finishing in-flight message");
                cancel.cancel();
            }
        });
    }

    let mode = if args.drain {
        ConsumeMode::DrainOnce
    } else {
        // the status server only makes sense for the long-running service
        let state = ApiState::new(ledger.clone(), "proctor-sg", env!("CARGO_PKG_VERSION"));
        let router = build_router(state);
        let port = args.port.unwrap_or(config.http.sg_port);
        let http_cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = serve(router, port, http_cancel).await {
                tracing::error!(error = %e, "Status server failed");
            }
        });
        ConsumeMode::Continuous
    };

    run_consumer(&queue, &config.queue.video_ready, &stage, mode, &cancel).await?;
    cancel.cancel();

    Ok(())
}
