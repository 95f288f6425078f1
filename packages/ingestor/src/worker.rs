use std::path::{Path, PathBuf};
use std::sync::Arc;

use common::retry::calculate_backoff;
use common::storage::{ContentStore, StoredBlob};
use common::{DocumentEvent, IndicatorType, JobStatus};
use tokio::io::AsyncWriteExt;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::IngestError;
use crate::extract::{ArchiveFormat, ExtractError, Extractor};
use crate::health::Stats;
use crate::queue::JobConsumer;
use crate::repository::Repository;
use crate::scanner::{IocScanner, ScanOutcome};
use crate::telegram::DocumentGateway;

/// Persisted job errors are capped to keep rows small.
const MAX_ERROR_LEN: usize = 500;

/// Everything a worker needs to run the per-job pipeline. Shared read-only
/// across the pool.
pub struct WorkerContext {
    pub repo: Repository,
    pub store: Arc<dyn ContentStore>,
    pub gateway: Arc<dyn DocumentGateway>,
    pub extractor: Arc<dyn Extractor>,
    pub scanner: Arc<IocScanner>,
    pub download_max_retries: u32,
    /// Scratch tree for downloads and extraction, sibling to the store root
    /// so renames into the store stay on one filesystem.
    pub work_dir: PathBuf,
    pub stats: Arc<Stats>,
}

/// What happened to one dequeued event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    SkippedDuplicate,
    Failed,
}

/// Start the fixed pool. Workers stop once the queue is closed and drained.
pub fn spawn_workers(
    count: usize,
    ctx: Arc<WorkerContext>,
    consumer: JobConsumer,
) -> JoinSet<()> {
    let mut set = JoinSet::new();
    for worker_id in 0..count {
        let ctx = ctx.clone();
        let consumer = consumer.clone();
        set.spawn(worker_loop(worker_id, ctx, consumer));
    }
    set
}

async fn worker_loop(worker_id: usize, ctx: Arc<WorkerContext>, consumer: JobConsumer) {
    debug!(worker_id, "worker started");
    while let Some(event) = consumer.dequeue().await {
        // Pipeline errors are recorded on the job row inside process_event;
        // what surfaces here is bookkeeping that could not even be recorded.
        if let Err(e) = process_event(&ctx, &event).await {
            error!(
                worker_id,
                file_ref = %event.file_ref,
                error = %e,
                "job bookkeeping failed"
            );
        }
    }
    debug!(worker_id, "worker stopped");
}

/// Run one event through the full pipeline. One bad job never stalls the
/// pool: every failure path ends in a `failed` job row and `Ok(Failed)`.
pub async fn process_event(
    ctx: &WorkerContext,
    event: &DocumentEvent,
) -> Result<JobOutcome, IngestError> {
    if ctx.repo.is_processed(&event.file_ref).await? {
        info!(file_ref = %event.file_ref, "skipped_duplicate_pre");
        ctx.stats.record_deduplicated();
        return Ok(JobOutcome::SkippedDuplicate);
    }

    let job_id = ctx.repo.begin_job(&event.file_ref).await?;
    ctx.repo
        .mark_job(job_id, JobStatus::Processing, None, None)
        .await?;

    match run_pipeline(ctx, job_id, event).await {
        Ok(()) => {
            ctx.stats.record_job_processed();
            Ok(JobOutcome::Completed)
        }
        Err(e) => {
            let message = truncate_error(&format!("{}: {}", e.class(), e));
            ctx.repo
                .mark_job(job_id, JobStatus::Failed, Some(&message), None)
                .await?;
            warn!(
                job_id = %job_id,
                file_ref = %event.file_ref,
                error_class = e.class(),
                error = %e,
                "job_failed"
            );
            ctx.stats.record_job_failed();
            Ok(JobOutcome::Failed)
        }
    }
}

async fn run_pipeline(
    ctx: &WorkerContext,
    job_id: Uuid,
    event: &DocumentEvent,
) -> Result<(), IngestError> {
    // Per-job scratch directory, removed on every exit path by Drop.
    let job_dir = tempfile::tempdir_in(&ctx.work_dir)
        .map_err(|e| IngestError::Storage(e.into()))?;

    let blob = download_with_retry(ctx, event, job_dir.path()).await?;
    ctx.repo
        .mark_job(job_id, JobStatus::Processing, None, Some(&blob.hash))
        .await?;

    if blob.deduplicated {
        info!(job_id = %job_id, hash = %blob.hash, "skipped_duplicate_post");
        ctx.stats.record_deduplicated();
    }

    // Extraction and scanning happen before the completion transaction: a
    // rejected archive leaves a failed job and no processed_files row.
    let scan = match ArchiveFormat::from_filename(&event.filename) {
        Some(format) => {
            Some(extract_and_scan(ctx, job_id, event, format, &blob, job_dir.path()).await?)
        }
        None => None,
    };

    ctx.repo.complete_job(job_id, event, &blob).await?;

    if let Some(outcome) = scan {
        if !outcome.hits.is_empty() {
            let written = ctx
                .repo
                .upsert_indicators(&outcome.hits, &blob.hash, event.channel.channel_id)
                .await?;
            info!(
                job_id = %job_id,
                total = outcome.hits.len(),
                written,
                domains = outcome.count_of(IndicatorType::Domain),
                emails = outcome.count_of(IndicatorType::Email),
                ipv4 = outcome.count_of(IndicatorType::Ipv4),
                "indicators_found"
            );
            ctx.stats.record_indicators(outcome.hits.len() as u64);
        }
    }

    Ok(())
}

/// Download with capped exponential backoff. Transient network errors and
/// rate limits retry; auth failures and missing upstream objects do not.
async fn download_with_retry(
    ctx: &WorkerContext,
    event: &DocumentEvent,
    job_dir: &Path,
) -> Result<StoredBlob, IngestError> {
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        info!(
            file_ref = %event.file_ref,
            filename = %event.filename,
            attempt,
            "download_start"
        );

        match download_once(ctx, event, job_dir).await {
            Ok(blob) => {
                info!(
                    file_ref = %event.file_ref,
                    size_bytes = blob.size_bytes,
                    hash = %blob.hash,
                    "download_complete"
                );
                return Ok(blob);
            }
            Err(e) if e.is_retryable() && attempt < ctx.download_max_retries => {
                let delay = match &e {
                    IngestError::RateLimited(after) => *after,
                    _ => calculate_backoff(attempt, 1_000, 60_000),
                };
                warn!(
                    file_ref = %event.file_ref,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "download_retry"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// One attempt: stream into job-local staging, verify the declared size,
/// then move into the store. Staging keeps a torn download from ever being
/// committed under a content hash.
async fn download_once(
    ctx: &WorkerContext,
    event: &DocumentEvent,
    job_dir: &Path,
) -> Result<StoredBlob, IngestError> {
    let staging = job_dir.join("download.bin");
    let mut file = tokio::fs::File::create(&staging)
        .await
        .map_err(|e| IngestError::Storage(e.into()))?;

    let written = ctx.gateway.download_to(&event.file_ref, &mut file).await?;
    file.flush()
        .await
        .map_err(|e| IngestError::Storage(e.into()))?;
    drop(file);

    if written != event.size_bytes {
        return Err(IngestError::Network(format!(
            "short download: got {written} of {} bytes",
            event.size_bytes
        )));
    }

    Ok(ctx.store.put_file(&staging).await?)
}

async fn extract_and_scan(
    ctx: &WorkerContext,
    job_id: Uuid,
    event: &DocumentEvent,
    format: ArchiveFormat,
    blob: &StoredBlob,
    job_dir: &Path,
) -> Result<ScanOutcome, IngestError> {
    let archive_path = ctx.store.blob_path(&blob.hash);
    let dest = job_dir.join("extract");
    tokio::fs::create_dir_all(&dest)
        .await
        .map_err(|e| IngestError::Storage(e.into()))?;

    info!(job_id = %job_id, filename = %event.filename, "extract_start");

    let extractor = ctx.extractor.clone();
    let scanner = ctx.scanner.clone();
    let result = tokio::task::spawn_blocking(move || {
        let members = extractor.extract(format, &archive_path, &dest)?;
        let outcome = scanner
            .scan_members(&members)
            .map_err(ExtractError::Io)?;
        Ok::<_, ExtractError>((members.len(), outcome))
    })
    .await
    .map_err(|e| IngestError::Other(format!("extraction task failed: {e}")))?;

    match result {
        Ok((members, outcome)) => {
            info!(
                job_id = %job_id,
                members,
                files_scanned = outcome.files_scanned,
                lines_truncated = outcome.lines_truncated,
                "extract_complete"
            );
            Ok(outcome)
        }
        Err(ExtractError::PasswordRequired) => {
            warn!(job_id = %job_id, filename = %event.filename, "extract_password_required");
            Err(ExtractError::PasswordRequired.into())
        }
        Err(e @ ExtractError::Traversal(_)) => {
            warn!(job_id = %job_id, detail = %e, "extract_unsafe_member");
            Err(e.into())
        }
        Err(
            e @ (ExtractError::TotalSizeExceeded { .. }
            | ExtractError::RatioExceeded { .. }
            | ExtractError::TooManyMembers { .. }),
        ) => {
            warn!(job_id = %job_id, detail = %e, "extract_bomb_aborted");
            Err(e.into())
        }
        Err(e) => Err(e.into()),
    }
}

fn truncate_error(message: &str) -> String {
    if message.len() <= MAX_ERROR_LEN {
        return message.to_string();
    }
    let mut end = MAX_ERROR_LEN;
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    message[..end].to_string()
}
