use chrono::Utc;
use common::storage::{ContentHash, StoredBlob};
use common::{DocumentEvent, ExternalFileRef, JobStatus};
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ActiveModelTrait, DatabaseConnection, DbErr, EntityTrait, Set, TransactionTrait,
};
use tracing::warn;
use uuid::Uuid;

use crate::entity::{extracted_indicator, processed_file, processing_job};
use crate::error::is_db_transient;
use crate::scanner::IndicatorHit;

/// Transient database failures are retried this many times on top of the
/// original attempt.
const DB_RETRY_ATTEMPTS: u32 = 3;

/// Indicator upserts are chunked to bound statement size; each chunk is an
/// independently idempotent sub-transaction.
const INDICATOR_CHUNK_SIZE: usize = 200;

/// Idempotent persistence of processed files, job history, and extracted
/// indicators. All operations are safe to replay.
#[derive(Clone)]
pub struct Repository {
    db: DatabaseConnection,
}

impl Repository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    /// Pre-download dedup check: has this external ref already produced a
    /// processed file?
    pub async fn is_processed(&self, file_ref: &ExternalFileRef) -> Result<bool, DbErr> {
        let token = file_ref.token();
        with_db_retry(|| {
            let db = self.db.clone();
            let token = token.clone();
            async move {
                Ok(processed_file::Entity::find_by_id(token)
                    .one(&db)
                    .await?
                    .is_some())
            }
        })
        .await
    }

    /// Insert a fresh job row with status `queued` and return its id.
    pub async fn begin_job(&self, file_ref: &ExternalFileRef) -> Result<Uuid, DbErr> {
        let job_id = Uuid::new_v4();
        let token = file_ref.token();
        with_db_retry(|| {
            let db = self.db.clone();
            let token = token.clone();
            async move {
                let now = Utc::now();
                let model = processing_job::ActiveModel {
                    job_id: Set(job_id),
                    telegram_file_id: Set(token),
                    status: Set(JobStatus::Queued),
                    error: Set(None),
                    file_hash: Set(None),
                    created_at: Set(now),
                    updated_at: Set(now),
                };
                processing_job::Entity::insert(model)
                    .exec_without_returning(&db)
                    .await?;
                Ok(())
            }
        })
        .await?;
        Ok(job_id)
    }

    /// Transition a job, optionally recording an error and the content hash
    /// once computed. Absent options leave the columns untouched.
    pub async fn mark_job(
        &self,
        job_id: Uuid,
        status: JobStatus,
        error: Option<&str>,
        file_hash: Option<&ContentHash>,
    ) -> Result<(), DbErr> {
        with_db_retry(|| {
            let db = self.db.clone();
            let error = error.map(str::to_string);
            let file_hash = file_hash.map(ContentHash::to_hex);
            async move {
                let mut model = processing_job::ActiveModel {
                    job_id: Set(job_id),
                    status: Set(status),
                    updated_at: Set(Utc::now()),
                    ..Default::default()
                };
                if error.is_some() {
                    model.error = Set(error);
                }
                if file_hash.is_some() {
                    model.file_hash = Set(file_hash);
                }
                model.update(&db).await?;
                Ok(())
            }
        })
        .await
    }

    /// One transaction covering the processed-file upsert and the job's
    /// `completed` transition, so a crash leaves either both or neither.
    ///
    /// On external-ref conflict only `last_seen_at` moves; `first_seen_at`
    /// is never rewritten.
    pub async fn complete_job(
        &self,
        job_id: Uuid,
        event: &DocumentEvent,
        blob: &StoredBlob,
    ) -> Result<(), DbErr> {
        with_db_retry(|| {
            let db = self.db.clone();
            let event = event.clone();
            let blob = blob.clone();
            async move {
                let txn = db.begin().await?;
                let now = Utc::now();

                let file = processed_file::ActiveModel {
                    telegram_file_id: Set(event.file_ref.token()),
                    channel_id: Set(event.channel.channel_id),
                    channel_title: Set(event.channel.title.clone()),
                    filename: Set(event.filename.clone()),
                    size_bytes: Set(blob.size_bytes as i64),
                    file_hash: Set(blob.hash.to_hex()),
                    storage_path: Set(blob.relative_path.clone()),
                    first_seen_at: Set(now),
                    last_seen_at: Set(now),
                };
                processed_file::Entity::insert(file)
                    .on_conflict(
                        OnConflict::column(processed_file::Column::TelegramFileId)
                            .update_columns([processed_file::Column::LastSeenAt])
                            .to_owned(),
                    )
                    .exec_without_returning(&txn)
                    .await?;

                let job = processing_job::ActiveModel {
                    job_id: Set(job_id),
                    status: Set(JobStatus::Completed),
                    updated_at: Set(now),
                    ..Default::default()
                };
                job.update(&txn).await?;

                txn.commit().await?;
                Ok(())
            }
        })
        .await
    }

    /// Upsert a batch of indicators mined from one archive. Replays are
    /// absorbed by the composite unique key; conflicts only bump
    /// `last_seen_at`. Returns the number of distinct identities written.
    pub async fn upsert_indicators(
        &self,
        hits: &[IndicatorHit],
        source_hash: &ContentHash,
        channel_id: i64,
    ) -> Result<usize, DbErr> {
        // The identity key excludes the member path, so hits from different
        // members can collide within one batch; Postgres rejects a statement
        // that touches the same row twice.
        let mut seen = std::collections::HashSet::new();
        let deduped: Vec<&IndicatorHit> = hits
            .iter()
            .filter(|h| seen.insert((h.indicator_type, h.value.clone(), h.line)))
            .collect();

        let hash_hex = source_hash.to_hex();

        for chunk in deduped.chunks(INDICATOR_CHUNK_SIZE) {
            with_db_retry(|| {
                let db = self.db.clone();
                let hash_hex = hash_hex.clone();
                let chunk: Vec<IndicatorHit> = chunk.iter().map(|h| (*h).clone()).collect();
                async move {
                    let now = Utc::now();
                    let models = chunk.iter().map(|hit| extracted_indicator::ActiveModel {
                        indicator_type: Set(hit.indicator_type),
                        value: Set(hit.value.clone()),
                        source_file_hash: Set(hash_hex.clone()),
                        source_relative_path: Set(hit.relative_path.clone()),
                        source_line: Set(hit.line as i32),
                        channel_id: Set(channel_id),
                        first_seen_at: Set(now),
                        last_seen_at: Set(now),
                        ..Default::default()
                    });

                    let txn = db.begin().await?;
                    extracted_indicator::Entity::insert_many(models)
                        .on_conflict(
                            OnConflict::columns([
                                extracted_indicator::Column::IndicatorType,
                                extracted_indicator::Column::Value,
                                extracted_indicator::Column::SourceFileHash,
                                extracted_indicator::Column::SourceLine,
                            ])
                            .update_columns([extracted_indicator::Column::LastSeenAt])
                            .to_owned(),
                        )
                        .exec_without_returning(&txn)
                        .await?;
                    txn.commit().await?;
                    Ok(())
                }
            })
            .await?;
        }

        Ok(deduped.len())
    }
}

/// Retry `op` on transient database errors with a short backoff.
async fn with_db_retry<T, F, Fut>(mut op: F) -> Result<T, DbErr>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, DbErr>>,
{
    let mut attempt: u32 = 0;
    loop {
        match op().await {
            Err(e) if is_db_transient(&e) && attempt < DB_RETRY_ATTEMPTS => {
                attempt += 1;
                let delay = common::retry::calculate_backoff(attempt, 100, 2_000);
                warn!(error = %e, attempt, delay_ms = delay.as_millis() as u64, "retrying transient database error");
                tokio::time::sleep(delay).await;
            }
            other => return other,
        }
    }
}
