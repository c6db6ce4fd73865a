//! C7 — SSE Session: a persistent `text/event-stream` writer with a send
//! queue, keep-alive watchdog, and blocking-wait for close (spec.md §4.7).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::response::Response;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::host::ListeningHost;
use crate::registry::{StreamingRegistry, StreamingSession};
use crate::request::{CoreRequest, StreamSlot};
use crate::response::CoreResponse;

const OPEN: u8 = 0;
const CLOSED: u8 = 1;
const DISPOSED: u8 = 2;

/// `Open → Closed → Disposed`.
pub struct SseSession {
    identifier: String,
    state: AtomicU8,
    queue: Mutex<VecDeque<axum::body::Bytes>>,
    bytes_sent: AtomicU64,
    last_write: Mutex<Instant>,
    closed_notify: Arc<Notify>,
    body_tx: tokio::sync::mpsc::UnboundedSender<axum::body::Bytes>,
    registry: Arc<StreamingRegistry<SseSession>>,
}

impl SseSession {
    /// Opens a new session: builds the `text/event-stream` response with
    /// CORS headers and the standard cache-control headers, hands it back
    /// through `stream_slot` so the dispatcher can return it ahead of the
    /// handler's own return, registers in `registry`, and sets the state to
    /// `Open`.
    pub fn open(
        request: &CoreRequest,
        host: &ListeningHost,
        registry: Arc<StreamingRegistry<SseSession>>,
        identifier: impl Into<String>,
    ) -> Option<Arc<SseSession>> {
        let stream_slot: StreamSlot = request.stream_slot.clone();
        let sender = stream_slot.lock().take()?;

        let (body_tx, body_rx) = tokio::sync::mpsc::unbounded_channel::<axum::body::Bytes>();
        let stream = tokio_stream::wrappers::UnboundedReceiverStream::new(body_rx)
            .map(Ok::<_, std::convert::Infallible>);

        let mut builder = Response::builder()
            .status(200)
            .header("Cache-Control", "no-store, no-cache")
            .header("Content-Type", "text/event-stream");
        if let Some(cors) = &host.cors {
            let origin = request.header("Origin");
            for (name, value) in cors.response_headers(origin) {
                builder = builder.header(name, value);
            }
        }
        let response = builder
            .body(Body::from_stream(stream))
            .expect("static headers always build a valid response");

        let _ = sender.send(response);

        let session = Arc::new(SseSession {
            identifier: identifier.into(),
            state: AtomicU8::new(OPEN),
            queue: Mutex::new(VecDeque::new()),
            bytes_sent: AtomicU64::new(0),
            last_write: Mutex::new(Instant::now()),
            closed_notify: Arc::new(Notify::new()),
            body_tx,
            registry: registry.clone(),
        });

        registry.register(session.clone());
        Some(session)
    }

    fn state(&self) -> u8 {
        self.state.load(Ordering::SeqCst)
    }

    /// Appends `data: <text>\n\n`, encoded as UTF-8, to the FIFO queue and
    /// flushes it. Returns `false` if the session is not `Open`.
    pub fn send(&self, text: &str) -> bool {
        if self.state() != OPEN {
            return false;
        }

        let record = format!("data: {text}\n\n");
        let bytes = axum::body::Bytes::from(record.into_bytes());
        self.queue.lock().push_back(bytes);
        self.flush()
    }

    /// Flushes the queue in FIFO order; on I/O failure, closes the session
    /// and discards the remainder (spec.md §4.7, §5).
    fn flush(&self) -> bool {
        loop {
            let next = self.queue.lock().pop_front();
            let Some(chunk) = next else { return true };
            let len = chunk.len() as u64;
            if self.body_tx.send(chunk).is_err() {
                self.force_close();
                return false;
            }
            self.bytes_sent.fetch_add(len, Ordering::SeqCst);
            *self.last_write.lock() = Instant::now();
        }
    }

    /// Clears the pending queue without closing. Synchronized under the
    /// same lock `send`/`flush` use, so it is race-free against a
    /// concurrent sender (SPEC_FULL.md §9 open question 3).
    pub fn cancel(&self) {
        self.queue.lock().clear();
    }

    /// Blocks the caller until the session leaves `Open`.
    pub async fn keep_alive(&self) {
        if self.state() == OPEN {
            self.closed_notify.notified().await;
        }
    }

    /// As [`Self::keep_alive`], but a watchdog also fires — forcing the
    /// session closed — if no successful write happens within `max_idle`.
    pub async fn keep_alive_with_timeout(&self, max_idle: Duration) {
        if self.state() != OPEN {
            return;
        }
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        loop {
            tokio::select! {
                _ = self.closed_notify.notified() => return,
                _ = ticker.tick() => {
                    let idle = self.last_write.lock().elapsed();
                    if idle >= max_idle {
                        self.force_close();
                        return;
                    }
                }
            }
        }
    }

    /// Flushes, transitions to `Closed`, unregisters, and returns the
    /// `STREAM_CLOSE` sentinel carrying the bytes-sent counter.
    pub fn close(self: &Arc<Self>) -> CoreResponse {
        self.flush();
        if self.state.compare_exchange(OPEN, CLOSED, Ordering::SeqCst, Ordering::SeqCst).is_ok() {
            self.registry.unregister(self);
            self.closed_notify.notify_waiters();
        }
        self.state.store(DISPOSED, Ordering::SeqCst);
        CoreResponse::StreamClosed { bytes_sent: self.bytes_sent.load(Ordering::SeqCst) }
    }

    fn force_close(&self) {
        if self.state.compare_exchange(OPEN, CLOSED, Ordering::SeqCst, Ordering::SeqCst).is_ok() {
            self.closed_notify.notify_waiters();
        }
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::SeqCst)
    }
}

impl StreamingSession for SseSession {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn is_active(&self) -> bool {
        self.state() == OPEN
    }

    fn close(&self) {
        self.force_close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_session(id: &str) -> (Arc<SseSession>, tokio::sync::mpsc::UnboundedReceiver<axum::body::Bytes>) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let registry = Arc::new(StreamingRegistry::new());
        let session = Arc::new(SseSession {
            identifier: id.to_string(),
            state: AtomicU8::new(OPEN),
            queue: Mutex::new(VecDeque::new()),
            bytes_sent: AtomicU64::new(0),
            last_write: Mutex::new(Instant::now()),
            closed_notify: Arc::new(Notify::new()),
            body_tx: tx,
            registry: registry.clone(),
        });
        registry.register(session.clone());
        (session, rx)
    }

    #[tokio::test]
    async fn send_emits_sse_framed_records_in_order() {
        let (session, mut rx) = fake_session("s1");
        assert!(session.send("a"));
        assert!(session.send("b"));
        assert!(session.send("c"));

        let mut received = Vec::new();
        while let Ok(chunk) = rx.try_recv() {
            received.push(chunk);
        }
        let joined: Vec<u8> = received.concat();
        assert_eq!(joined, b"data: a\n\ndata: b\n\ndata: c\n\n");
        assert_eq!(session.bytes_sent(), joined.len() as u64);
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (session, _rx) = fake_session("s2");
        session.send("x");
        let first = session.close();
        let second = session.close();
        assert!(matches!(first, CoreResponse::StreamClosed { .. }));
        assert!(matches!(second, CoreResponse::StreamClosed { .. }));
        assert!(!session.is_active());
    }

    #[tokio::test]
    async fn send_after_close_returns_false() {
        let (session, _rx) = fake_session("s3");
        session.close();
        assert!(!session.send("too late"));
    }

    #[tokio::test]
    async fn cancel_drops_unflushed_queue_entries() {
        let (session, mut rx) = fake_session("s4");
        {
            let mut q = session.queue.lock();
            q.push_back(axum::body::Bytes::from_static(b"data: buffered\n\n"));
        }
        session.cancel();
        session.close();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn keep_alive_returns_once_force_closed() {
        let (session, _rx) = fake_session("s5");
        let watcher = session.clone();
        let handle = tokio::spawn(async move { watcher.keep_alive().await });
        session.close();
        tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
    }
}
