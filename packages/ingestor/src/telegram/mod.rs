pub mod grammers;

use std::time::Duration;

use async_trait::async_trait;
use common::{ChannelMeta, DocumentEvent, ExternalFileRef};
use thiserror::Error;
use tokio::io::AsyncWrite;

/// An inbound platform event as seen by the listener.
#[derive(Debug)]
pub enum SourceEvent {
    /// A document posted to a subscribed channel.
    Document(DocumentEvent),
    /// Anything else (text messages, edits, unrelated chats). The listener
    /// discards these.
    Other,
}

#[derive(Debug, Error)]
pub enum TelegramError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("channel unavailable: {0}")]
    ChannelUnavailable(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("rate limited for {0:?}")]
    RateLimited(Duration),

    #[error("network error: {0}")]
    Network(String),

    #[error("session error: {0}")]
    Session(String),
}

impl TelegramError {
    /// Transient errors are worth a reconnect or a retried download;
    /// everything else is terminal for the attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_) | Self::RateLimited(_))
    }

    /// Fatal for the whole process (exit code 2).
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth(_) | Self::Session(_))
    }
}

/// Capability interface over the messaging platform, injected at supervisor
/// boot. The production implementation is [`grammers::GrammersGateway`];
/// tests substitute an in-memory stub.
#[async_trait]
pub trait DocumentGateway: Send + Sync {
    /// Resolve the configured channel identifiers. An identifier the
    /// session cannot access is an error, never skipped silently.
    async fn resolve_channels(&self, channels: &[String])
    -> Result<Vec<ChannelMeta>, TelegramError>;

    /// Wait for the next inbound event on any subscribed channel.
    async fn next_event(&self) -> Result<SourceEvent, TelegramError>;

    /// Re-establish the subscription after a transient failure.
    async fn reconnect(&self) -> Result<(), TelegramError>;

    /// Stream the referenced document's bytes into `sink`, returning the
    /// byte count. Each call re-fetches the message, so retries survive
    /// expired file references.
    async fn download_to(
        &self,
        file_ref: &ExternalFileRef,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<u64, TelegramError>;

    /// Flush session state and drop the connection.
    async fn disconnect(&self) -> Result<(), TelegramError>;
}
