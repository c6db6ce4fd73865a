//! C8 — WebSocket Session: a duplex message channel with a background
//! receive loop, send chunking, and blocking-wait primitives
//! (spec.md §4.8).

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex as SyncMutex;
use tokio::sync::{oneshot, Mutex as AsyncMutex, Notify};
use tokio_util::sync::CancellationToken;

use crate::registry::{StreamingRegistry, StreamingSession};
use crate::request::CoreRequest;

const OPEN: u8 = 0;
const CLOSED: u8 = 1;

/// One received frame, reassembled by the transport into a complete
/// message: `{bytes, length, is_end, is_close, sender}` (spec.md §4.8).
/// `is_end` is always `true` here — axum's WebSocket transport (the
/// out-of-scope socket acceptor, spec.md §1) always hands back
/// already-defragmented messages.
#[derive(Debug, Clone)]
pub struct WsMessage {
    pub bytes: Vec<u8>,
    pub length: usize,
    pub is_end: bool,
    pub is_close: bool,
    pub sender: String,
}

pub type OnReceive = Arc<dyn Fn(WsMessage) + Send + Sync>;

/// `Open → Closed`.
pub struct WebSocketSession {
    identifier: String,
    state: AtomicU8,
    buffer_size: usize,
    cancel: CancellationToken,
    closed_notify: Arc<Notify>,
    sink: AsyncMutex<SplitSink<WebSocket, Message>>,
    waiter: SyncMutex<Option<oneshot::Sender<Option<WsMessage>>>>,
    on_receive: SyncMutex<Option<OnReceive>>,
    registry: Arc<StreamingRegistry<WebSocketSession>>,
}

impl WebSocketSession {
    /// Completes the HTTP-to-WebSocket upgrade handshake on `request`,
    /// starts the background receive loop, and registers the session.
    /// Returns `None` if the request never carried an upgrade (no
    /// `Connection: Upgrade`/`Upgrade: websocket` headers) or another
    /// session already claimed the stream slot.
    pub async fn open(
        request: &mut CoreRequest,
        buffer_size: usize,
        registry: Arc<StreamingRegistry<WebSocketSession>>,
        identifier: impl Into<String>,
        close_timeout: Option<Duration>,
    ) -> Option<Arc<WebSocketSession>> {
        let upgrade = request.ws_upgrade.take()?;
        let response_tx = request.stream_slot.lock().take()?;
        let identifier = identifier.into();
        let (session_tx, session_rx) = oneshot::channel::<Arc<WebSocketSession>>();
        let registry_for_upgrade = registry.clone();

        let response = upgrade.on_upgrade(move |socket: WebSocket| async move {
            let (sink, stream) = socket.split();
            let cancel = CancellationToken::new();
            if let Some(timeout) = close_timeout {
                let child = cancel.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(timeout).await;
                    child.cancel();
                });
            }
            let session = Arc::new(WebSocketSession {
                identifier,
                state: AtomicU8::new(OPEN),
                buffer_size: buffer_size.max(1),
                cancel,
                closed_notify: Arc::new(Notify::new()),
                sink: AsyncMutex::new(sink),
                waiter: SyncMutex::new(None),
                on_receive: SyncMutex::new(None),
                registry: registry_for_upgrade.clone(),
            });
            registry_for_upgrade.register(session.clone());
            let _ = session_tx.send(session.clone());
            session.run_receive_loop(stream).await;
        });

        let _ = response_tx.send(response);
        session_rx.await.ok()
    }

    fn state(&self) -> u8 {
        self.state.load(Ordering::SeqCst)
    }

    /// Registers the callback invoked for messages that arrive while no
    /// [`Self::wait_next`] caller is parked.
    pub fn on_receive(&self, callback: OnReceive) {
        *self.on_receive.lock() = Some(callback);
    }

    async fn run_receive_loop(self: Arc<Self>, mut stream: SplitStream<WebSocket>) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    self.mark_closed();
                    break;
                }
                frame = stream.next() => {
                    match frame {
                        Some(Ok(message)) => {
                            let is_close = matches!(message, Message::Close(_));
                            let bytes = match message {
                                Message::Text(text) => text.into_bytes(),
                                Message::Binary(data) => data.into(),
                                _ => Vec::new(),
                            };
                            let record = WsMessage {
                                length: bytes.len(),
                                bytes,
                                is_end: true,
                                is_close,
                                sender: self.identifier.clone(),
                            };
                            if is_close {
                                self.mark_closed();
                                self.deliver(record);
                                break;
                            }
                            self.deliver(record);
                        }
                        Some(Err(_)) | None => {
                            self.mark_closed();
                            break;
                        }
                    }
                }
            }
        }
        self.registry.unregister(&self);
    }

    /// Hands `message` to a parked [`Self::wait_next`] caller if there is
    /// one, otherwise invokes the `on_receive` callback (spec.md §4.8;
    /// never concurrent with itself, since it only ever runs inside this
    /// session's single receive task).
    fn deliver(&self, message: WsMessage) {
        if let Some(tx) = self.waiter.lock().take() {
            let _ = tx.send(Some(message));
            return;
        }
        if let Some(callback) = self.on_receive.lock().as_ref() {
            callback(message);
        }
    }

    fn mark_closed(&self) {
        if self.state.compare_exchange(OPEN, CLOSED, Ordering::SeqCst, Ordering::SeqCst).is_ok() {
            self.closed_notify.notify_waiters();
        }
        if let Some(tx) = self.waiter.lock().take() {
            let _ = tx.send(None);
        }
    }

    /// UTF-8 encodes `text`, then sends it as a text message. No-op if the
    /// session is not `Open`.
    pub async fn send_text(&self, text: &str) -> bool {
        if self.state() != OPEN {
            return false;
        }
        let mut sink = self.sink.lock().await;
        sink.send(Message::Text(text.to_string())).await.is_ok()
    }

    /// Sends `data` in chunks of `buffer_size`. No-op if the session is not
    /// `Open`.
    pub async fn send_bytes(&self, data: &[u8]) -> bool {
        if self.state() != OPEN {
            return false;
        }
        let mut sink = self.sink.lock().await;
        for chunk in data.chunks(self.buffer_size) {
            if sink.send(Message::Binary(chunk.to_vec())).await.is_err() {
                return false;
            }
        }
        true
    }

    /// Blocks until the next message arrives; returns `None` on
    /// connection error or close.
    pub async fn wait_next(self: &Arc<Self>) -> Option<WsMessage> {
        if self.state() != OPEN {
            return None;
        }
        let (tx, rx) = oneshot::channel();
        *self.waiter.lock() = Some(tx);
        rx.await.unwrap_or(None)
    }

    /// Blocks until `Closed`. The optional `timeout`, if given, becomes the
    /// receive-loop cancellation deadline.
    pub async fn wait_for_close(self: &Arc<Self>, timeout: Option<Duration>) {
        if let Some(duration) = timeout {
            let cancel = self.cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(duration).await;
                cancel.cancel();
            });
        }
        if self.state() == OPEN {
            self.closed_notify.notified().await;
        }
    }

    /// If still `Open`, issues a normal-closure frame, transitions to
    /// `Closed`, and unregisters. Idempotent.
    pub async fn close(self: &Arc<Self>) {
        if self.state() == OPEN {
            let mut sink = self.sink.lock().await;
            let _ = sink.send(Message::Close(None)).await;
        }
        StreamingSession::close(self.as_ref());
        self.registry.unregister(self);
    }
}

impl StreamingSession for WebSocketSession {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn is_active(&self) -> bool {
        self.state() == OPEN
    }

    fn close(&self) {
        self.cancel.cancel();
        self.mark_closed();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ws_message_carries_defragmented_payload() {
        let msg = WsMessage {
            bytes: b"hello".to_vec(),
            length: 5,
            is_end: true,
            is_close: false,
            sender: "peer".to_string(),
        };
        assert_eq!(msg.length, msg.bytes.len());
        assert!(msg.is_end);
    }
}
