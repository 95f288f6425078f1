use std::collections::HashMap;
use std::io::Write as _;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use common::{ChannelMeta, DocumentEvent, ExternalFileRef};
use grammers_client::types::{Chat, Downloadable, Media};
use grammers_client::{Client, Config, InitParams, InvocationError, Update};
use grammers_session::{PackedChat, Session};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::RwLock;
use tracing::info;

use crate::config::IngestorConfig;

use super::{DocumentGateway, SourceEvent, TelegramError};

/// MTProto gateway backed by grammers with a persistent on-disk session.
///
/// First run prompts for the login code on stdin; afterwards the saved
/// session re-authenticates automatically and survives restarts.
pub struct GrammersGateway {
    client: Client,
    session_path: PathBuf,
    /// Resolved subscribed channels by id. Packed chats carry the access
    /// hash needed to re-fetch messages from the worker side.
    chats: RwLock<HashMap<i64, PackedChat>>,
}

impl GrammersGateway {
    pub async fn connect(config: &IngestorConfig) -> Result<Self, TelegramError> {
        let session_path = config.session_path();
        if let Some(parent) = session_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| TelegramError::Session(e.to_string()))?;
        }

        let session = Session::load_file_or_create(&session_path)
            .map_err(|e| TelegramError::Session(e.to_string()))?;

        let client = Client::connect(Config {
            session,
            api_id: config.telegram_api_id,
            api_hash: config.telegram_api_hash.clone(),
            params: InitParams::default(),
        })
        .await
        .map_err(|e| TelegramError::Network(e.to_string()))?;

        if !client
            .is_authorized()
            .await
            .map_err(classify_invocation)?
        {
            let token = client
                .request_login_code(&config.telegram_phone)
                .await
                .map_err(|e| TelegramError::Auth(e.to_string()))?;
            let code = prompt("Telegram login code: ")
                .await
                .map_err(|e| TelegramError::Auth(e.to_string()))?;
            client
                .sign_in(&token, code.trim())
                .await
                .map_err(|e| TelegramError::Auth(e.to_string()))?;
        }

        client
            .session()
            .save_to_file(&session_path)
            .map_err(|e| TelegramError::Session(e.to_string()))?;

        info!("telegram session established");

        Ok(Self {
            client,
            session_path,
            chats: RwLock::new(HashMap::new()),
        })
    }

    async fn find_chat(&self, identifier: &str) -> Result<Option<Chat>, TelegramError> {
        // Numeric identifiers and titles are matched against the account's
        // dialogs; anything else goes through username resolution.
        if let Ok(wanted_id) = identifier.parse::<i64>() {
            let mut dialogs = self.client.iter_dialogs();
            while let Some(dialog) = dialogs.next().await.map_err(classify_invocation)? {
                if dialog.chat().id() == wanted_id {
                    return Ok(Some(dialog.chat().clone()));
                }
            }
            return Ok(None);
        }

        self.client
            .resolve_username(identifier.trim_start_matches('@'))
            .await
            .map_err(classify_invocation)
    }
}

#[async_trait]
impl DocumentGateway for GrammersGateway {
    async fn resolve_channels(
        &self,
        channels: &[String],
    ) -> Result<Vec<ChannelMeta>, TelegramError> {
        let mut metas = Vec::with_capacity(channels.len());
        let mut resolved = self.chats.write().await;

        for identifier in channels {
            let chat = self
                .find_chat(identifier)
                .await?
                .ok_or_else(|| TelegramError::ChannelUnavailable(identifier.clone()))?;

            info!(channel = %chat.name(), channel_id = chat.id(), "channel resolved");
            resolved.insert(chat.id(), chat.pack());
            metas.push(ChannelMeta {
                channel_id: chat.id(),
                title: chat.name().to_string(),
            });
        }

        Ok(metas)
    }

    async fn next_event(&self) -> Result<SourceEvent, TelegramError> {
        let update = self
            .client
            .next_update()
            .await
            .map_err(classify_invocation)?;

        let Update::NewMessage(message) = update else {
            return Ok(SourceEvent::Other);
        };
        if message.outgoing() {
            return Ok(SourceEvent::Other);
        }

        let chat = message.chat();
        if !self.chats.read().await.contains_key(&chat.id()) {
            return Ok(SourceEvent::Other);
        }

        let Some(Media::Document(document)) = message.media() else {
            return Ok(SourceEvent::Other);
        };

        let filename = if document.name().is_empty() {
            "unnamed".to_string()
        } else {
            document.name().to_string()
        };

        Ok(SourceEvent::Document(DocumentEvent {
            file_ref: ExternalFileRef::new(chat.id(), message.id(), document.id()),
            channel: ChannelMeta {
                channel_id: chat.id(),
                title: chat.name().to_string(),
            },
            filename,
            size_bytes: document.size() as u64,
            posted_at: message.date(),
        }))
    }

    async fn reconnect(&self) -> Result<(), TelegramError> {
        // grammers re-establishes the transport transparently; a failed
        // authorization check is the one condition worth surfacing here.
        if !self
            .client
            .is_authorized()
            .await
            .map_err(classify_invocation)?
        {
            return Err(TelegramError::Auth("session no longer authorized".into()));
        }
        Ok(())
    }

    async fn download_to(
        &self,
        file_ref: &ExternalFileRef,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<u64, TelegramError> {
        let packed = self
            .chats
            .read()
            .await
            .get(&file_ref.channel_id)
            .copied()
            .ok_or_else(|| TelegramError::NotFound(format!("channel {}", file_ref.channel_id)))?;

        let messages = self
            .client
            .get_messages_by_id(packed, &[file_ref.message_id])
            .await
            .map_err(classify_invocation)?;

        let message = messages
            .into_iter()
            .flatten()
            .next()
            .ok_or_else(|| TelegramError::NotFound(file_ref.token()))?;

        let media = message
            .media()
            .ok_or_else(|| TelegramError::NotFound(format!("{} has no media", file_ref.token())))?;
        if let Media::Document(document) = &media {
            if document.id() != file_ref.document_id {
                return Err(TelegramError::NotFound(file_ref.token()));
            }
        } else {
            return Err(TelegramError::NotFound(format!(
                "{} is not a document",
                file_ref.token()
            )));
        }

        let mut download = self.client.iter_download(&Downloadable::Media(media));
        let mut total: u64 = 0;
        while let Some(chunk) = download.next().await.map_err(classify_invocation)? {
            sink.write_all(&chunk)
                .await
                .map_err(|e| TelegramError::Network(e.to_string()))?;
            total += chunk.len() as u64;
        }
        sink.flush()
            .await
            .map_err(|e| TelegramError::Network(e.to_string()))?;

        Ok(total)
    }

    async fn disconnect(&self) -> Result<(), TelegramError> {
        self.client
            .session()
            .save_to_file(&self.session_path)
            .map_err(|e| TelegramError::Session(e.to_string()))
    }
}

fn classify_invocation(err: InvocationError) -> TelegramError {
    match &err {
        InvocationError::Rpc(rpc) => {
            if rpc.name.starts_with("FLOOD_WAIT") {
                return TelegramError::RateLimited(Duration::from_secs(
                    rpc.value.unwrap_or(60) as u64,
                ));
            }
            if rpc.code == 401 || rpc.name.contains("AUTH_KEY") || rpc.name.contains("SESSION") {
                return TelegramError::Auth(rpc.name.clone());
            }
            if rpc.name.contains("MSG_ID") || rpc.name.contains("CHANNEL_INVALID") {
                return TelegramError::NotFound(rpc.name.clone());
            }
            TelegramError::Network(err.to_string())
        }
        _ => TelegramError::Network(err.to_string()),
    }
}

async fn prompt(text: &'static str) -> std::io::Result<String> {
    tokio::task::spawn_blocking(move || {
        let mut stdout = std::io::stdout();
        stdout.write_all(text.as_bytes())?;
        stdout.flush()?;
        let mut line = String::new();
        std::io::stdin().read_line(&mut line)?;
        Ok(line)
    })
    .await
    .map_err(std::io::Error::other)?
}
