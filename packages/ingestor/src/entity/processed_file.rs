use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// A successfully ingested artifact. A row exists only once the bytes are
/// durably in the content store.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "processed_files")]
pub struct Model {
    /// External ref token `{channel_id}_{message_id}_{document_id}`.
    #[sea_orm(primary_key, auto_increment = false)]
    pub telegram_file_id: String,

    pub channel_id: i64,
    pub channel_title: String,

    /// Original filename as sent by the platform.
    pub filename: String,
    pub size_bytes: i64,

    /// BLAKE2b-256 of the stored bytes, 64 lowercase hex chars. Not unique:
    /// distinct external refs may carry identical bytes.
    #[sea_orm(indexed)]
    pub file_hash: String,
    /// Path relative to the content store root.
    pub storage_path: String,

    pub first_seen_at: DateTimeUtc,
    pub last_seen_at: DateTimeUtc,
}

impl ActiveModelBehavior for ActiveModel {}
