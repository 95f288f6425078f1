use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde_json::{Value, json};
use tracing::info;

/// Process-wide counters surfaced on `/metrics` and updated by the worker
/// pool.
pub struct Stats {
    started_at: Instant,
    jobs_processed: AtomicU64,
    jobs_failed: AtomicU64,
    files_deduplicated: AtomicU64,
    indicators_found: AtomicU64,
}

impl Stats {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            jobs_processed: AtomicU64::new(0),
            jobs_failed: AtomicU64::new(0),
            files_deduplicated: AtomicU64::new(0),
            indicators_found: AtomicU64::new(0),
        }
    }

    pub fn record_job_processed(&self) {
        self.jobs_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_job_failed(&self) {
        self.jobs_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_deduplicated(&self) {
        self.files_deduplicated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_indicators(&self, count: u64) {
        self.indicators_found.fetch_add(count, Ordering::Relaxed);
    }

    pub fn jobs_processed(&self) -> u64 {
        self.jobs_processed.load(Ordering::Relaxed)
    }

    pub fn jobs_failed(&self) -> u64 {
        self.jobs_failed.load(Ordering::Relaxed)
    }

    pub fn files_deduplicated(&self) -> u64 {
        self.files_deduplicated.load(Ordering::Relaxed)
    }

    pub fn indicators_found(&self) -> u64 {
        self.indicators_found.load(Ordering::Relaxed)
    }

    fn uptime_seconds(&self) -> f64 {
        self.started_at.elapsed().as_secs_f64()
    }
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

pub fn router(stats: Arc<Stats>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(stats)
}

/// Serve the health endpoint until the process exits.
pub async fn serve(port: u16, stats: Arc<Stats>) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "health endpoint listening");
    axum::serve(listener, router(stats)).await
}

async fn health_handler(State(stats): State<Arc<Stats>>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "uptime_seconds": stats.uptime_seconds(),
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

async fn metrics_handler(State(stats): State<Arc<Stats>>) -> String {
    format!(
        "# HELP ingestor_uptime_seconds Service uptime\n\
         # TYPE ingestor_uptime_seconds gauge\n\
         ingestor_uptime_seconds {}\n\
         # HELP ingestor_jobs_processed_total Jobs completed\n\
         # TYPE ingestor_jobs_processed_total counter\n\
         ingestor_jobs_processed_total {}\n\
         # HELP ingestor_jobs_failed_total Jobs failed\n\
         # TYPE ingestor_jobs_failed_total counter\n\
         ingestor_jobs_failed_total {}\n\
         # HELP ingestor_files_deduplicated_total Duplicate artifacts skipped\n\
         # TYPE ingestor_files_deduplicated_total counter\n\
         ingestor_files_deduplicated_total {}\n\
         # HELP ingestor_indicators_found_total Indicators extracted\n\
         # TYPE ingestor_indicators_found_total counter\n\
         ingestor_indicators_found_total {}\n",
        stats.uptime_seconds(),
        stats.jobs_processed(),
        stats.jobs_failed(),
        stats.files_deduplicated(),
        stats.indicators_found(),
    )
}
