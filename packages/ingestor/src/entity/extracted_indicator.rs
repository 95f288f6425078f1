use common::IndicatorType;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// An IOC mined from an artifact's contents.
///
/// Identity is `(indicator_type, value, source_file_hash, source_line)`:
/// the same value on two lines is two rows; the same value seen again in a
/// later ingestion only bumps `last_seen_at`. The unique index backing the
/// upsert is created in [`crate::database::init_db`].
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "extracted_indicators")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    pub indicator_type: IndicatorType,
    /// Normalized indicator text (lowercased, trailing dot stripped).
    pub value: String,

    /// Hash of the enclosing archive, not the inner member.
    pub source_file_hash: String,
    /// Path of the member inside the archive.
    pub source_relative_path: String,
    /// 1-based line number.
    pub source_line: i32,

    pub channel_id: i64,
    pub first_seen_at: DateTimeUtc,
    pub last_seen_at: DateTimeUtc,
}

impl ActiveModelBehavior for ActiveModel {}
