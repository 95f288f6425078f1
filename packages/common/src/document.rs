use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identity of a document as known to the upstream platform.
///
/// Rendered as the stable token `"{channel_id}_{message_id}_{document_id}"`
/// at the persistence boundary; internally always the 3-tuple so callers
/// never reparse the string form.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExternalFileRef {
    pub channel_id: i64,
    pub message_id: i32,
    pub document_id: i64,
}

impl ExternalFileRef {
    pub fn new(channel_id: i64, message_id: i32, document_id: i64) -> Self {
        Self {
            channel_id,
            message_id,
            document_id,
        }
    }

    /// The token stored in `processed_files.telegram_file_id` and
    /// `processing_jobs.telegram_file_id`.
    pub fn token(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ExternalFileRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_{}_{}",
            self.channel_id, self.message_id, self.document_id
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid external file ref token: {0}")]
pub struct ParseRefError(String);

impl FromStr for ExternalFileRef {
    type Err = ParseRefError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, '_');
        let (Some(channel), Some(message), Some(document)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(ParseRefError(s.to_string()));
        };

        let channel_id = channel.parse().map_err(|_| ParseRefError(s.to_string()))?;
        let message_id = message.parse().map_err(|_| ParseRefError(s.to_string()))?;
        let document_id = document.parse().map_err(|_| ParseRefError(s.to_string()))?;

        Ok(Self {
            channel_id,
            message_id,
            document_id,
        })
    }
}

/// Channel metadata attached to every job descriptor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelMeta {
    pub channel_id: i64,
    pub title: String,
}

/// A document posted to a subscribed channel, as produced by the listener
/// and consumed by the worker pool.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DocumentEvent {
    pub file_ref: ExternalFileRef,
    pub channel: ChannelMeta,
    /// Original filename as sent by the platform.
    pub filename: String,
    /// Size declared by the platform; downloads are verified against it.
    pub size_bytes: u64,
    pub posted_at: DateTime<Utc>,
}
