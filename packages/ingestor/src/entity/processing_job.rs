use common::JobStatus;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// One processing attempt, success or failure.
///
/// Deliberately no foreign key to `processed_files`: job history survives
/// even when no file row results (failed downloads, rejected archives).
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "processing_jobs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub job_id: Uuid,

    #[sea_orm(indexed)]
    pub telegram_file_id: String,

    pub status: JobStatus,

    #[sea_orm(column_type = "Text", nullable)]
    pub error: Option<String>,
    /// Set once computed, even for jobs that later fail.
    pub file_hash: Option<String>,

    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

impl ActiveModelBehavior for ActiveModel {}
