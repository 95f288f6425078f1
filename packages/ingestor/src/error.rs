use std::time::Duration;

use common::storage::StorageError;
use sea_orm::DbErr;
use thiserror::Error;

use crate::extract::ExtractError;
use crate::telegram::TelegramError;

/// Top-level error type for the ingestion pipeline.
///
/// Every variant maps to one error class (see [`IngestError::class`]); the
/// class decides the policy: fatal at boot, retry with backoff, or record
/// the job as failed and continue.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("rate limited, retry after {0:?}")]
    RateLimited(Duration),

    #[error("upstream object not found: {0}")]
    NotFound(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("database error: {0}")]
    Db(#[from] DbErr),

    #[error("unsafe archive: {0}")]
    UnsafeArchive(String),

    #[error("archive requires a password")]
    PasswordRequired,

    #[error("{0}")]
    Other(String),
}

impl IngestError {
    /// Stable error class used in logs and persisted job errors.
    pub fn class(&self) -> &'static str {
        match self {
            Self::Config(_) => "config_invalid",
            Self::Auth(_) => "auth_failed",
            Self::Network(_) | Self::RateLimited(_) => "transient_network",
            Self::NotFound(_) => "not_found",
            Self::Storage(_) => "storage_io",
            Self::Db(e) if is_db_transient(e) => "db_transient",
            Self::Db(_) => "db_error",
            Self::UnsafeArchive(_) => "unsafe_archive",
            Self::PasswordRequired => "password_required",
            Self::Other(_) => "unknown",
        }
    }

    /// Whether a download attempt that hit this error may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::RateLimited(_))
    }

    /// Whether this error must terminate the process.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Config(_) | Self::Auth(_))
    }
}

/// Deadlocks and dropped connections are worth retrying; everything else is
/// surfaced as-is.
pub fn is_db_transient(err: &DbErr) -> bool {
    matches!(err, DbErr::Conn(_) | DbErr::ConnectionAcquire(_))
}

impl From<TelegramError> for IngestError {
    fn from(err: TelegramError) -> Self {
        match err {
            TelegramError::Auth(msg) => Self::Auth(msg),
            TelegramError::ChannelUnavailable(msg) => {
                Self::Config(format!("configured channel unavailable: {msg}"))
            }
            TelegramError::NotFound(msg) => Self::NotFound(msg),
            TelegramError::RateLimited(after) => Self::RateLimited(after),
            TelegramError::Network(msg) => Self::Network(msg),
            TelegramError::Session(msg) => Self::Auth(msg),
        }
    }
}

impl From<ExtractError> for IngestError {
    fn from(err: ExtractError) -> Self {
        match err {
            ExtractError::PasswordRequired => Self::PasswordRequired,
            ExtractError::Io(e) => Self::Storage(e.into()),
            other => Self::UnsafeArchive(other.to_string()),
        }
    }
}
