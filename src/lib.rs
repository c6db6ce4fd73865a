//! `cobalto` — a batteries-included HTTP application server core: route
//! matching (C1), host resolution (C2), a route table (C3), a three-phase
//! middleware pipeline (C4), request dispatch (C5), a streaming-session
//! registry (C6), SSE sessions (C7), and WebSocket sessions (C8).

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod host;
pub mod method;
pub mod middleware;
pub mod pattern;
pub mod registry;
pub mod request;
pub mod response;
pub mod route;
pub mod server;
pub mod sse;
pub mod ws;

pub use config::{HostConfig, ServerConfig};
pub use dispatcher::ExecutionResult;
pub use error::{BoxError, ConfigError, DispatchOutcome};
pub use host::{AllowOrigin, CorsPolicy, ListeningHost, ListeningPort};
pub use method::MethodMask;
pub use middleware::{MiddlewareEntry, MiddlewareFn, MiddlewareOutcome, Phase};
pub use registry::{RegistryEvent, StreamingRegistry, StreamingSession};
pub use request::CoreRequest;
pub use response::CoreResponse;
pub use route::{Handler, Route};
pub use server::Server;
pub use sse::SseSession;
pub use ws::{WebSocketSession, WsMessage};
