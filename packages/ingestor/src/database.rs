use std::time::Duration;

use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbErr};

/// Connect, sync the entity schema, and create the composite indexes the
/// entity attributes cannot express.
pub async fn init_db(db_url: &str, max_connections: u32) -> Result<DatabaseConnection, DbErr> {
    let mut opt = ConnectOptions::new(db_url.to_owned());

    opt.max_connections(max_connections)
        .min_connections(1)
        .connect_timeout(Duration::from_secs(8))
        .acquire_timeout(Duration::from_secs(8))
        .sqlx_logging(false);

    let db = Database::connect(opt).await?;
    db.get_schema_registry("ingestor::entity::*")
        .sync(&db)
        .await?;

    create_indexes(&db).await?;

    Ok(db)
}

/// Indexes beyond single-column ones. The unique index on indicator
/// identity is what the indicator upsert's ON CONFLICT targets.
async fn create_indexes(db: &DatabaseConnection) -> Result<(), DbErr> {
    for stmt in [
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_indicator_identity \
         ON extracted_indicators (indicator_type, value, source_file_hash, source_line)",
        "CREATE INDEX IF NOT EXISTS idx_processed_channel_seen \
         ON processed_files (channel_id, first_seen_at)",
        "CREATE INDEX IF NOT EXISTS idx_jobs_status_created \
         ON processing_jobs (status, created_at)",
    ] {
        db.execute_unprepared(stmt).await?;
    }
    Ok(())
}
