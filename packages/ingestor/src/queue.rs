use std::sync::Arc;

use common::DocumentEvent;
use thiserror::Error;
use tokio::sync::{Mutex, mpsc};

/// The listener side of the job queue. Enqueueing awaits while the queue is
/// full, which is the backpressure that keeps the listener from outrunning
/// the workers. Dropping the producer closes the queue; workers drain what
/// remains and then stop.
pub struct JobProducer {
    tx: mpsc::Sender<DocumentEvent>,
}

/// The worker side of the job queue. Cloneable so a fixed pool of workers
/// can share one FIFO.
#[derive(Clone)]
pub struct JobConsumer {
    rx: Arc<Mutex<mpsc::Receiver<DocumentEvent>>>,
}

#[derive(Debug, Error)]
#[error("job queue is closed")]
pub struct QueueClosed;

/// Create a bounded in-process FIFO of the given capacity.
pub fn bounded(capacity: usize) -> (JobProducer, JobConsumer) {
    let (tx, rx) = mpsc::channel(capacity);
    (
        JobProducer { tx },
        JobConsumer {
            rx: Arc::new(Mutex::new(rx)),
        },
    )
}

impl JobProducer {
    /// Blocks (cooperatively) while the queue is full. Events are never
    /// dropped on the producer side.
    pub async fn enqueue(&self, event: DocumentEvent) -> Result<(), QueueClosed> {
        self.tx.send(event).await.map_err(|_| QueueClosed)
    }
}

impl JobConsumer {
    /// Next job in FIFO order, or `None` once the queue is closed and
    /// drained.
    pub async fn dequeue(&self) -> Option<DocumentEvent> {
        self.rx.lock().await.recv().await
    }
}
