//! Per-socket connection state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clipshare_core::{ConnectionId, ServerEvent};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Outbound frame. Shared so one broadcast serializes once.
pub type Frame = Arc<str>;

/// Failure to hand a frame to one connection's writer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("send queue full")]
    QueueFull,

    #[error("connection closed")]
    Closed,

    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),
}

impl TransportError {
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::QueueFull => "queue_full",
            Self::Closed => "connection_closed",
            Self::Encode(_) => "encode",
        }
    }
}

/// A connected socket client, as seen by the hub.
///
/// The socket itself lives in the writer task; this struct only holds the
/// sending end of its queue.
pub struct ClientConnection {
    pub id: ConnectionId,
    tx: mpsc::Sender<Frame>,
    pub connected_at: Instant,
    last_pong: Mutex<Instant>,
    /// Frames refused because the queue was full or closed.
    pub dropped_messages: AtomicU64,
    closed: CancellationToken,
}

impl ClientConnection {
    pub fn new(id: ConnectionId, tx: mpsc::Sender<Frame>) -> Self {
        let now = Instant::now();
        Self {
            id,
            tx,
            connected_at: now,
            last_pong: Mutex::new(now),
            dropped_messages: AtomicU64::new(0),
            closed: CancellationToken::new(),
        }
    }

    /// A connection with a fresh ID and a bounded queue of `capacity`.
    pub fn channel(capacity: usize) -> (Arc<Self>, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Arc::new(Self::new(ConnectionId::new(), tx)), rx)
    }

    /// Queue a frame without waiting.
    pub fn send(&self, frame: Frame) -> Result<(), TransportError> {
        if self.closed.is_cancelled() {
            return Err(TransportError::Closed);
        }
        self.tx.try_send(frame).map_err(|e| {
            let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
            match e {
                mpsc::error::TrySendError::Full(_) => TransportError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => TransportError::Closed,
            }
        })
    }

    /// Serialize and queue one event.
    pub fn send_event(&self, event: &ServerEvent) -> Result<(), TransportError> {
        let frame = event.to_frame()?;
        self.send(Frame::from(frame))
    }

    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Record a pong or any other sign of life.
    pub fn mark_alive(&self) {
        *self.last_pong.lock() = Instant::now();
    }

    pub fn last_pong_elapsed(&self) -> Duration {
        self.last_pong.lock().elapsed()
    }

    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Ask the socket tasks to shut down. Frames already queued are still
    /// flushed by the writer.
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Token cancelled by [`Self::close`].
    pub fn closed(&self) -> CancellationToken {
        self.closed.clone()
    }
}
