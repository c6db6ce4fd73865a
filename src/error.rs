//! Error and outcome types shared across the dispatch core.

use std::fmt;

/// Type-erased error used for handler/middleware failures, mirroring the
/// boundary that the HTTP parser/acceptor collaborator hands the dispatcher.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Failures raised while building a [`crate::host::ListeningHost`] or
/// registering routes, ports, or middleware into it.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("route path {0:?} must start with '/'")]
    PathMustBeAbsolute(String),

    #[error("unbalanced parameter hole in path pattern {0:?}")]
    UnbalancedHole(String),

    #[error("route {new:?} collides with already-registered route {existing:?}")]
    RouteCollision { existing: String, new: String },

    #[error("port URL {0:?} is missing a scheme, host, port, or trailing slash")]
    MalformedPortUrl(String),

    #[error("status code {0} is out of the 100..=999 range")]
    StatusOutOfRange(u16),

    #[error("reason phrase exceeds 8192 bytes")]
    ReasonTooLong,

    #[error("invalid regular expression in route pattern: {0}")]
    InvalidRegex(#[from] regex::Error),
}

/// The outcome taxonomy of spec.md §7, one tag per dispatched request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Executed,
    ContentServedOnIllegalMethod,
    ContentTooLarge,
    StreamClosed,
    NoResponse,
    DnsFailed,
    DnsUnknownHost,
    ExceptionThrown,
    UncaughtExceptionThrown,
    ListeningHostNotReady,
    MalformedRequest,
    ClosedStream,
}

impl fmt::Display for DispatchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
