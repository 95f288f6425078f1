use std::sync::Arc;

use common::retry::calculate_backoff;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::IngestError;
use crate::queue::JobProducer;
use crate::telegram::{DocumentGateway, SourceEvent, TelegramError};

/// Adapter over the platform subscription: filters inbound events down to
/// documents and turns them into queued jobs.
///
/// When the queue is full the enqueue awaits — the listener never drops an
/// event. Transient subscription failures trigger reconnect with capped
/// exponential backoff; authentication failures propagate and take the
/// process down.
pub struct Listener {
    gateway: Arc<dyn DocumentGateway>,
    producer: JobProducer,
    max_file_bytes: u64,
}

impl Listener {
    pub fn new(gateway: Arc<dyn DocumentGateway>, producer: JobProducer, max_file_bytes: u64) -> Self {
        Self {
            gateway,
            producer,
            max_file_bytes,
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), IngestError> {
        let mut failures: u32 = 0;

        loop {
            let event = tokio::select! {
                _ = shutdown.changed() => {
                    info!("listener stopping, no new jobs will be enqueued");
                    return Ok(());
                }
                event = self.gateway.next_event() => event,
            };

            match event {
                Ok(SourceEvent::Document(doc)) => {
                    failures = 0;

                    if doc.size_bytes > self.max_file_bytes {
                        debug!(
                            file_ref = %doc.file_ref,
                            size_bytes = doc.size_bytes,
                            "document exceeds size cap, skipped"
                        );
                        continue;
                    }

                    debug!(
                        file_ref = %doc.file_ref,
                        filename = %doc.filename,
                        channel = %doc.channel.title,
                        "job enqueued"
                    );
                    if self.producer.enqueue(doc).await.is_err() {
                        info!("job queue closed, listener stopping");
                        return Ok(());
                    }
                }
                Ok(SourceEvent::Other) => {
                    failures = 0;
                }
                Err(e) if e.is_auth() => {
                    return Err(IngestError::from(e));
                }
                Err(e) => {
                    failures += 1;
                    let delay = match &e {
                        TelegramError::RateLimited(after) => *after,
                        _ => calculate_backoff(failures, 1_000, 60_000),
                    };
                    warn!(
                        error = %e,
                        failures,
                        delay_ms = delay.as_millis() as u64,
                        "subscription error, reconnecting"
                    );
                    tokio::time::sleep(delay).await;
                    if let Err(e) = self.gateway.reconnect().await {
                        if e.is_auth() {
                            return Err(IngestError::from(e));
                        }
                        warn!(error = %e, "reconnect failed, will retry");
                    }
                }
            }
        }
    }
}
