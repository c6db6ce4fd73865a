//! The core request view spec.md §3 describes, plus the plumbing that lets
//! an SSE or WebSocket session hand its streaming response back to the
//! dispatcher ahead of the handler's own return (see [`StreamSlot`]).

use std::any::Any;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::error::ConfigError;

/// A one-shot hand-off for a streaming (SSE/WebSocket) response: whichever
/// session opens first takes the sender and resolves the dispatcher's
/// pending `select!` with the already-serialized upgrade/stream response,
/// before the user handler itself returns (spec.md §4.7/§4.8).
pub type StreamSlot = Arc<Mutex<Option<oneshot::Sender<axum::response::Response>>>>;

/// Case-preserving cookie map, parsed from the `Cookie` header
/// (spec.md §4.5 step 4). A pair with no `=` is a parse error.
pub fn parse_cookies(header: &str) -> Result<HashMap<String, String>, ConfigError> {
    let mut cookies = HashMap::new();
    for pair in header.split(';') {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }
        let (name, value) = pair
            .split_once('=')
            .ok_or_else(|| ConfigError::MalformedPortUrl(format!("malformed cookie pair {pair:?}")))?;
        cookies.insert(name.trim().to_string(), value.trim().to_string());
    }
    Ok(cookies)
}

/// Single-owner, unlocked per-request scratch map (spec.md §5 "Shared
/// resources"). Backed by `Any` so handlers/middleware can stash arbitrary
/// typed values without a new dependency.
#[derive(Default)]
pub struct Scratch(HashMap<String, Box<dyn Any + Send + Sync>>);

impl Scratch {
    pub fn insert<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) {
        self.0.insert(key.into(), Box::new(value));
    }

    pub fn get<T: Any + Send + Sync>(&self, key: &str) -> Option<&T> {
        self.0.get(key).and_then(|v| v.downcast_ref::<T>())
    }
}

/// The core request view: everything C2–C5 read or mutate.
pub struct CoreRequest {
    pub method: axum::http::Method,
    pub path: String,
    pub raw_query: String,
    /// Parsed query parameters; the router merges extracted path
    /// parameters into this map exactly once (spec.md §3 invariant).
    pub query: HashMap<String, String>,
    pub headers: HeaderMap,
    pub cookies: HashMap<String, String>,
    pub remote_addr: SocketAddr,
    pub host: String,
    pub body: Option<axum::body::Bytes>,
    pub request_id: Uuid,
    pub arrived_at: DateTime<Utc>,
    pub scratch: Scratch,

    pub(crate) content_length: Option<u64>,
    pub(crate) ws_upgrade: Option<WebSocketUpgrade>,
    pub(crate) stream_slot: StreamSlot,
}

impl CoreRequest {
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}
