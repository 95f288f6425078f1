use std::sync::Arc;
use std::time::Duration;

use common::storage::FilesystemContentStore;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::config::IngestorConfig;
use crate::database::init_db;
use crate::error::IngestError;
use crate::extract::{ArchiveExtractor, ExtractLimits};
use crate::health::{self, Stats};
use crate::listener::Listener;
use crate::queue;
use crate::repository::Repository;
use crate::scanner::IocScanner;
use crate::telegram::DocumentGateway;
use crate::telegram::grammers::GrammersGateway;
use crate::worker::{WorkerContext, spawn_workers};

/// Boot order: Repository → Content Store → Queue → Workers → Listener.
/// On a shutdown signal the listener stops first, the queue drains within
/// the grace window, stragglers are cancelled, and the database closes.
pub async fn run(config: IngestorConfig) -> Result<(), IngestError> {
    let db = init_db(&config.database_url, config.db_max_connections).await?;
    let repo = Repository::new(db.clone());

    tokio::fs::create_dir_all(&config.storage_path)
        .await
        .map_err(|e| IngestError::Config(format!("cannot create storage root: {e}")))?;
    let store = Arc::new(
        FilesystemContentStore::new(config.storage_path.join("blobs"))
            .await
            .map_err(IngestError::Storage)?,
    );

    // Sibling scratch tree on the same filesystem as the store.
    let work_dir = config.storage_path.join("work");
    tokio::fs::create_dir_all(&work_dir)
        .await
        .map_err(|e| IngestError::Config(format!("cannot create work dir: {e}")))?;

    let scanner = Arc::new(
        IocScanner::new(
            &config.domain_suffixes(),
            &config.email_suffixes(),
            config
                .ipv4_cidrs()
                .map_err(|e| IngestError::Config(e.to_string()))?,
            config.scan_max_line_bytes,
        )
        .map_err(|e| IngestError::Config(format!("bad indicator pattern: {e}")))?,
    );

    let stats = Arc::new(Stats::new());
    if config.health_port != 0 {
        let stats = stats.clone();
        let port = config.health_port;
        tokio::spawn(async move {
            if let Err(e) = health::serve(port, stats).await {
                error!(error = %e, "health endpoint failed");
            }
        });
    }

    let gateway: Arc<dyn DocumentGateway> = Arc::new(GrammersGateway::connect(&config).await?);
    let channels = gateway.resolve_channels(&config.channels()).await?;
    info!(
        channels = channels.len(),
        workers = config.worker_count,
        queue_capacity = config.queue_capacity(),
        "ingestor started"
    );

    let (producer, consumer) = queue::bounded(config.queue_capacity());

    let ctx = Arc::new(WorkerContext {
        repo,
        store,
        gateway: gateway.clone(),
        extractor: Arc::new(ArchiveExtractor::new(ExtractLimits::new(
            config.max_decompressed_bytes,
            config.max_decompression_ratio,
        ))),
        scanner,
        download_max_retries: config.download_max_retries,
        work_dir,
        stats,
    });
    let mut workers = spawn_workers(config.worker_count, ctx, consumer);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let listener = Listener::new(gateway.clone(), producer, config.max_file_bytes());
    let mut listener_task = tokio::spawn(listener.run(shutdown_rx));

    let mut listener_done = false;
    tokio::select! {
        _ = shutdown_signal() => {
            info!("shutdown signal received");
        }
        result = &mut listener_task => {
            listener_done = true;
            // The listener only returns early on a fatal error.
            match result {
                Ok(Ok(())) => info!("listener finished"),
                Ok(Err(e)) => {
                    let _ = db.close().await;
                    return Err(e);
                }
                Err(e) => {
                    let _ = db.close().await;
                    return Err(IngestError::Other(format!("listener task failed: {e}")));
                }
            }
        }
    }

    // Stop producing, then drain the queue within the grace window. The
    // listener drops the producer on exit, which closes the queue.
    let _ = shutdown_tx.send(true);
    if !listener_done {
        let _ = listener_task.await;
    }

    let grace = Duration::from_secs(config.shutdown_grace_secs);
    let drained = tokio::time::timeout(grace, async {
        while workers.join_next().await.is_some() {}
    })
    .await;

    if drained.is_err() {
        warn!(
            grace_secs = config.shutdown_grace_secs,
            "grace window elapsed, cancelling in-flight jobs"
        );
        workers.abort_all();
        while workers.join_next().await.is_some() {}
    }

    if let Err(e) = gateway.disconnect().await {
        warn!(error = %e, "disconnect failed");
    }
    if let Err(e) = db.close().await {
        warn!(error = %e, "database close failed");
    }

    info!("clean shutdown");
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
