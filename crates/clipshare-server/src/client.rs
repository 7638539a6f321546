use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, Utf8Bytes, WebSocket};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::connection::{ClientConnection, Frame};
use crate::controller::SessionController;

/// How long the writer gets to flush queued frames once the socket is done.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Socket liveness settings.
#[derive(Clone, Copy, Debug)]
pub struct Heartbeat {
    /// How often the writer pings.
    pub interval: Duration,
    /// Close the socket after this long without a pong.
    pub timeout: Duration,
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(90),
        }
    }
}

/// Drive one socket until it closes: a writer task drains the connection's
/// queue and pings, a reader task feeds text frames to the controller.
pub async fn handle_ws_connection(
    socket: WebSocket,
    connection: Arc<ClientConnection>,
    mut rx: mpsc::Receiver<Frame>,
    controller: SessionController,
    heartbeat: Heartbeat,
    shutdown: CancellationToken,
) {
    let id = connection.id.clone();
    let (mut ws_tx, mut ws_rx) = socket.split();
    controller.connect(Arc::clone(&connection));

    let closed = connection.closed();

    // Writer: queued frames, periodic ping, and a close frame at the end.
    let writer_conn = Arc::clone(&connection);
    let writer_closed = closed.clone();
    let mut writer = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(heartbeat.interval);
        ping_interval.tick().await; // consume first immediate tick

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    match msg {
                        Some(text) => {
                            if ws_tx.send(WsMessage::Text(Utf8Bytes::from(&*text))).await.is_err() {
                                return;
                            }
                        }
                        None => break,
                    }
                }
                _ = ping_interval.tick() => {
                    if writer_conn.last_pong_elapsed() > heartbeat.timeout {
                        info!(connection_id = %writer_conn.id, "client timed out");
                        break;
                    }
                    if ws_tx.send(WsMessage::Ping(Bytes::new())).await.is_err() {
                        return;
                    }
                    trace!(connection_id = %writer_conn.id, "sent ping");
                }
                () = writer_closed.cancelled() => break,
            }
        }

        // Flush what was queued before the close was requested.
        while let Ok(text) = rx.try_recv() {
            if ws_tx.send(WsMessage::Text(Utf8Bytes::from(&*text))).await.is_err() {
                return;
            }
        }
        let _ = ws_tx.send(WsMessage::Close(None)).await;
    });

    // Reader: client frames and pongs.
    let reader_conn = Arc::clone(&connection);
    let reader_controller = controller.clone();
    let mut reader = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            match msg {
                WsMessage::Text(text) => {
                    reader_conn.mark_alive();
                    reader_controller.handle_frame(&reader_conn.id, text.as_str());
                }
                WsMessage::Pong(_) => reader_conn.mark_alive(),
                WsMessage::Close(_) => break,
                WsMessage::Ping(_) => reader_conn.mark_alive(), // axum answers pings itself
                WsMessage::Binary(_) => {
                    debug!(connection_id = %reader_conn.id, "ignoring binary frame");
                }
            }
        }
    });

    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => {
            closed.cancel();
            if tokio::time::timeout(FLUSH_TIMEOUT, &mut writer).await.is_err() {
                writer.abort();
            }
        }
        () = shutdown.cancelled() => {
            closed.cancel();
            reader.abort();
            if tokio::time::timeout(FLUSH_TIMEOUT, &mut writer).await.is_err() {
                writer.abort();
            }
        }
    }

    controller.disconnect(&id);
}
