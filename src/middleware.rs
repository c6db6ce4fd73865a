//! C4 — Middleware Pipeline.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::{BoxError, DispatchOutcome};
use crate::request::CoreRequest;
use crate::response::{self, CoreResponse};

/// One of the three phases spec.md §4.4 defines, in the order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    BeforeContents,
    BeforeResponse,
    AfterResponse,
}

/// Identity of a registered middleware, used by a route's bypass list
/// (spec.md glossary "Bypass list").
pub type MiddlewareId = usize;

fn next_middleware_id() -> MiddlewareId {
    static NEXT: AtomicUsize = AtomicUsize::new(1);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

/// Outcome of running a single middleware.
pub enum MiddlewareOutcome {
    Continue,
    ShortCircuit(CoreResponse),
}

type MiddlewareFuture = Pin<Box<dyn Future<Output = Result<MiddlewareOutcome, BoxError>> + Send>>;

/// `{handle(request, context) -> response | nothing}` (spec.md §9 design
/// note on polymorphic middleware), modeled as a boxed async closure to
/// match the route handler's own `Arc<dyn Fn(...) -> ...>` shape.
pub type MiddlewareFn = Arc<dyn Fn(&mut CoreRequest) -> MiddlewareFuture + Send + Sync>;

/// A registered middleware: its identity, phase, and behavior.
#[derive(Clone)]
pub struct MiddlewareEntry {
    pub id: MiddlewareId,
    pub phase: Phase,
    pub name: Option<String>,
    pub func: MiddlewareFn,
}

impl MiddlewareEntry {
    pub fn new(phase: Phase, func: MiddlewareFn) -> Arc<Self> {
        Arc::new(MiddlewareEntry {
            id: next_middleware_id(),
            phase,
            name: None,
            func,
        })
    }

    pub fn named(phase: Phase, name: impl Into<String>, func: MiddlewareFn) -> Arc<Self> {
        Arc::new(MiddlewareEntry {
            id: next_middleware_id(),
            phase,
            name: Some(name.into()),
            func,
        })
    }
}

/// The error hook spec.md §7 describes: a failed middleware or handler is
/// routed through this before falling back to a 500 sentinel.
pub type ErrorHook = Arc<dyn Fn(&CoreRequest, &BoxError) -> Option<CoreResponse> + Send + Sync>;

/// Runs every middleware tagged with `phase`, first the host-wide chain
/// (skipping bypassed ids), then the route's own (spec.md §4.4).
///
/// Returns `Some((response, outcome))` the moment any middleware
/// short-circuits, throws (routed through `error_hook`), or throws with
/// `throw_exceptions` on — callers must stop running further phases and
/// further middleware in that case, reporting the returned outcome
/// verbatim rather than re-deriving it from the response (spec.md §7).
///
/// `throw_exceptions` on, combined with a middleware throwing and
/// `error_hook` returning nothing, panics instead of returning — per
/// spec.md §7 the error must bubble to the acceptor with no recorded
/// outcome for the connection.
pub async fn run_phase(
    phase: Phase,
    global: &[Arc<MiddlewareEntry>],
    route_local: &[Arc<MiddlewareEntry>],
    bypass: &[MiddlewareId],
    request: &mut CoreRequest,
    error_hook: &ErrorHook,
    throw_exceptions: bool,
) -> Option<(CoreResponse, DispatchOutcome)> {
    for entry in global.iter().filter(|e| e.phase == phase && !bypass.contains(&e.id)) {
        if let Some(result) = run_one(entry, request, error_hook, throw_exceptions).await {
            return Some(result);
        }
    }
    for entry in route_local.iter().filter(|e| e.phase == phase) {
        if let Some(result) = run_one(entry, request, error_hook, throw_exceptions).await {
            return Some(result);
        }
    }
    None
}

async fn run_one(
    entry: &Arc<MiddlewareEntry>,
    request: &mut CoreRequest,
    error_hook: &ErrorHook,
    throw_exceptions: bool,
) -> Option<(CoreResponse, DispatchOutcome)> {
    match (entry.func)(request).await {
        Ok(MiddlewareOutcome::Continue) => None,
        Ok(MiddlewareOutcome::ShortCircuit(resp)) => {
            let outcome = response::outcome_for(&resp);
            Some((resp, outcome))
        }
        Err(err) => {
            log::error!("middleware {:?} failed: {err}", entry.name);
            if let Some(resp) = error_hook(request, &err) {
                return Some((resp, DispatchOutcome::UncaughtExceptionThrown));
            }
            if throw_exceptions {
                panic!("middleware {:?} threw with throw_exceptions enabled: {err}", entry.name);
            }
            let sentinel = CoreResponse::with_status(500, "Internal Server Error")
                .unwrap_or(CoreResponse::Error(err));
            Some((sentinel, DispatchOutcome::ExceptionThrown))
        }
    }
}
