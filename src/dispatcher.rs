//! C5 — Request Dispatcher: the 18-step flow of spec.md §4.5, wired to
//! axum as the external HTTP parser/acceptor (spec.md §1/§6).

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Instant;

use axum::body::Body;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::FromRequestParts;
use axum::http::{HeaderMap, Method, Request, StatusCode};
use axum::response::Response;
use chrono::Utc;
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::error::DispatchOutcome;
use crate::host::ListeningHost;
use crate::middleware::{run_phase, Phase as MwPhase};
use crate::request::{parse_cookies, CoreRequest, Scratch};
use crate::response::{self, cors_preflight_response, CoreResponse, NormalResponse, StatusInfo};
use crate::route::LookupOutcome;

/// Emitted once per dispatched request (spec.md §4.5 step 18).
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub request_id: Uuid,
    pub outcome: DispatchOutcome,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub elapsed_ms: u64,
}

/// Runs the full dispatch flow for one inbound request against `host`,
/// returning the wire-ready axum response.
pub async fn dispatch(
    config: &ServerConfig,
    host: &ListeningHost,
    remote_addr: SocketAddr,
    request: Request<Body>,
) -> Response {
    let started = Instant::now();
    let request_id = Uuid::new_v4();

    // Step 1: locale. Thread-local locale state belongs to the embedder's
    // i18n layer (out of scope, spec.md §1); we only record the intent.
    if let Some(culture) = &host.culture {
        log::debug!("request {request_id} locale set to {culture}");
    }

    let (mut parts, body) = request.into_parts();

    // Step 3: X-Forwarded-For rewrite.
    let mut effective_remote = remote_addr;
    if host.trust_x_forwarded_for {
        if let Some(value) = parts.headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
            let candidate = value.split(',').next().unwrap_or("").trim();
            match candidate.parse::<std::net::IpAddr>() {
                Ok(ip) => effective_remote = SocketAddr::new(ip, effective_remote.port()),
                Err(_) => {
                    return finish(
                        config,
                        request_id,
                        started,
                        DispatchOutcome::MalformedRequest,
                        bad_request("malformed X-Forwarded-For header"),
                    );
                }
            }
        }
    }

    // Step 4: cookies.
    let cookies = match parts.headers.get("cookie").and_then(|v| v.to_str().ok()) {
        Some(raw) => match parse_cookies(raw) {
            Ok(map) => map,
            Err(_) => {
                return finish(
                    config,
                    request_id,
                    started,
                    DispatchOutcome::MalformedRequest,
                    bad_request("malformed Cookie header"),
                );
            }
        },
        None => Default::default(),
    };

    // Step 5: latin-1 header re-decode workaround.
    if host.re_decode_headers_as_body_encoding {
        re_decode_headers_in_place(&mut parts.headers);
    }

    // Step 6: max content length.
    let content_length = parts
        .headers
        .get("content-length")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    if let (Some(max), Some(len)) = (host.max_content_length, content_length) {
        if len > max {
            return finish(
                config,
                request_id,
                started,
                DispatchOutcome::ContentTooLarge,
                NormalResponse::new(StatusInfo::from_code(413).expect("413 is in range")),
            );
        }
    }

    // Step 7: semantic-free methods must not carry a body.
    let is_semantic_free = matches!(
        parts.method,
        Method::GET | Method::OPTIONS | Method::HEAD | Method::TRACE
    );
    if host.reject_body_on_semantic_free_methods && is_semantic_free && content_length.unwrap_or(0) > 0 {
        return finish(
            config,
            request_id,
            started,
            DispatchOutcome::ContentServedOnIllegalMethod,
            bad_request("body not allowed on this method"),
        );
    }

    let path = parts.uri.path().to_string();
    let raw_query = parts.uri.query().unwrap_or("").to_string();

    // Step 8: route lookup.
    let outcome = host.routes.lookup(&parts.method, &path);

    let (route, mut params) = match outcome {
        LookupOutcome::OptionsMatched(_) => {
            // Step 9.
            let origin = parts.headers.get("origin").and_then(|v| v.to_str().ok());
            let resp = match &host.cors {
                Some(cors) => cors_preflight_response(cors, origin),
                None => NormalResponse::new(StatusInfo::from_code(200).expect("200 is in range")),
            };
            return finish(config, request_id, started, DispatchOutcome::Executed, resp);
        }
        LookupOutcome::PathMatched => {
            // Step 10.
            return finish(
                config,
                request_id,
                started,
                DispatchOutcome::ContentServedOnIllegalMethod,
                NormalResponse::new(StatusInfo::from_code(405).expect("405 is in range")),
            );
        }
        LookupOutcome::NotMatched => {
            // Step 11.
            let not_found = match CoreResponse::not_found() {
                CoreResponse::Normal(r) => r,
                _ => unreachable!("CoreResponse::not_found always yields Normal"),
            };
            return finish(config, request_id, started, DispatchOutcome::Executed, not_found);
        }
        LookupOutcome::Matched(route, extracted) => (route.clone(), extracted),
    };

    // Step 12: trailing-slash redirect.
    if host.force_trailing_slash && route.pattern.is_template() && !path.ends_with('/') {
        let mut location = format!("{path}/");
        if !raw_query.is_empty() {
            location.push('?');
            location.push_str(&raw_query);
        }
        return finish(
            config,
            request_id,
            started,
            DispatchOutcome::Executed,
            NormalResponse::new(StatusInfo::from_code(301).expect("301 is in range"))
                .with_header("Location", location),
        );
    }

    let mut query = parse_query_string(&raw_query);
    query.extend(params.drain());

    let ws_upgrade = WebSocketUpgrade::from_request_parts(&mut parts, &()).await.ok();

    let mut core_request = CoreRequest {
        method: parts.method.clone(),
        path,
        raw_query,
        query,
        headers: parts.headers.clone(),
        cookies,
        remote_addr: effective_remote,
        host: host.label.clone(),
        body: None,
        request_id,
        arrived_at: Utc::now(),
        scratch: Scratch::default(),
        content_length,
        ws_upgrade,
        stream_slot: Default::default(),
    };

    // Step 13: phase 1.
    if let Some((resp, outcome)) = run_phase(
        MwPhase::BeforeContents,
        &host.global_middlewares,
        &route.middlewares,
        &route.bypass,
        &mut core_request,
        &config.error_hook,
        config.throw_exceptions,
    )
    .await
    {
        return finish_core(config, request_id, started, outcome, resp);
    }

    // Step 14: body loading, bounded by Content-Length / host max.
    let limit = host.max_content_length.unwrap_or(10 * 1024 * 1024) as usize;
    core_request.body = match axum::body::to_bytes(body, limit).await {
        Ok(bytes) => Some(bytes),
        Err(_) => {
            return finish(
                config,
                request_id,
                started,
                DispatchOutcome::ContentTooLarge,
                NormalResponse::new(StatusInfo::from_code(413).expect("413 is in range")),
            );
        }
    };

    // Step 15: phase 2, then handler.
    if let Some((resp, outcome)) = run_phase(
        MwPhase::BeforeResponse,
        &host.global_middlewares,
        &route.middlewares,
        &route.bypass,
        &mut core_request,
        &config.error_hook,
        config.throw_exceptions,
    )
    .await
    {
        return finish_core(config, request_id, started, outcome, resp);
    }

    let head_request = core_request.method == Method::HEAD;
    let (response_tx, response_rx) = tokio::sync::oneshot::channel::<Response>();
    *core_request.stream_slot.lock() = Some(response_tx);

    // Phase 3 runs after the handler returns but needs the request context
    // the handler is about to consume; snapshot its cloneable fields now,
    // before the whole value moves into the spawned task.
    let mut phase3_request = snapshot_for_phase3(&core_request);

    let handler = route.handler.clone();
    let handler_task = tokio::spawn((handler)(core_request));

    let core_response = tokio::select! {
        biased;
        Ok(early) = response_rx => {
            // An SSE/WebSocket session already produced the wire response;
            // the handler keeps running detached.
            return attach_response_headers(early, config, request_id);
        }
        joined = handler_task => {
            match joined {
                Ok(resp) => resp,
                Err(_) => CoreResponse::Error("handler task panicked".into()),
            }
        }
    };

    // Step 16: phase 3. A short-circuit here replaces the response
    // (SPEC_FULL.md §9 open question 2).
    let (final_response, outcome) = if let Some((resp, outcome)) = run_phase(
        MwPhase::AfterResponse,
        &host.global_middlewares,
        &route.middlewares,
        &route.bypass,
        &mut phase3_request,
        &config.error_hook,
        config.throw_exceptions,
    )
    .await
    {
        (resp, outcome)
    } else {
        let outcome = response::outcome_for(&core_response);
        (core_response, outcome)
    };

    let mut response = finish_core_to_response(final_response);
    if head_request {
        *response.body_mut() = Body::empty();
    }
    log_and_emit(config, request_id, started, outcome, &response);
    attach_response_headers(response, config, request_id)
}

fn attach_response_headers(mut response: Response, config: &ServerConfig, request_id: Uuid) -> Response {
    if let Some(banner) = &config.powered_by {
        if let Ok(value) = axum::http::HeaderValue::from_str(banner) {
            response.headers_mut().insert("X-Powered-By", value);
        }
    }
    if config.send_request_id_header {
        let token = request_id.as_simple().to_string();
        if let Ok(value) = axum::http::HeaderValue::from_str(&token) {
            response.headers_mut().insert("X-Request-Id", value);
        }
    }
    response
}

/// Clones the request fields that survive the handler's consumption of the
/// original value, so phase 3 (`AfterResponse`) middleware can still see the
/// method/path/headers/cookies/query the route matched on (spec.md §4.4).
/// `body`, `scratch`, `ws_upgrade`, and `stream_slot` are handler-owned or
/// unclonable and are left empty/default.
fn snapshot_for_phase3(request: &CoreRequest) -> CoreRequest {
    CoreRequest {
        method: request.method.clone(),
        path: request.path.clone(),
        raw_query: request.raw_query.clone(),
        query: request.query.clone(),
        headers: request.headers.clone(),
        cookies: request.cookies.clone(),
        remote_addr: request.remote_addr,
        host: request.host.clone(),
        body: None,
        request_id: request.request_id,
        arrived_at: request.arrived_at,
        scratch: Scratch::default(),
        content_length: request.content_length,
        ws_upgrade: None,
        stream_slot: Default::default(),
    }
}

fn bad_request(message: &str) -> NormalResponse {
    NormalResponse::new(StatusInfo::from_code(400).expect("400 is in range"))
        .with_header("Content-Type", "text/plain; charset=utf-8")
        .with_body(message.as_bytes().to_vec())
}

fn re_decode_headers_in_place(headers: &mut HeaderMap) {
    let pairs: Vec<(axum::http::HeaderName, Vec<u8>)> = headers
        .iter()
        .map(|(name, value)| {
            let latin1 = value.as_bytes();
            let text: String = latin1.iter().map(|&b| b as char).collect();
            (name.clone(), text.into_bytes())
        })
        .collect();
    for (name, bytes) in pairs {
        if let Ok(value) = axum::http::HeaderValue::from_bytes(&bytes) {
            headers.insert(name, value);
        }
    }
}

/// Minimal `application/x-www-form-urlencoded` query-string parser
/// (spec.md §3 "query parameters"), percent-decoded with the same
/// `urlencoding` crate the path-template matcher uses.
fn parse_query_string(raw: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for pair in raw.split('&').filter(|s| !s.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let key = urlencoding::decode(key).map(|c| c.into_owned()).unwrap_or_else(|_| key.to_string());
        let value = urlencoding::decode(value).map(|c| c.into_owned()).unwrap_or_else(|_| value.to_string());
        map.insert(key, value);
    }
    map
}

fn finish(
    config: &ServerConfig,
    request_id: Uuid,
    started: Instant,
    outcome: DispatchOutcome,
    normal: NormalResponse,
) -> Response {
    finish_core(config, request_id, started, outcome, CoreResponse::Normal(normal))
}

fn finish_core(
    config: &ServerConfig,
    request_id: Uuid,
    started: Instant,
    outcome: DispatchOutcome,
    resp: CoreResponse,
) -> Response {
    let response = finish_core_to_response(resp);
    log_and_emit(config, request_id, started, outcome, &response);
    attach_response_headers(response, config, request_id)
}

fn log_and_emit(
    config: &ServerConfig,
    request_id: Uuid,
    started: Instant,
    outcome: DispatchOutcome,
    response: &Response,
) {
    let elapsed_ms = started.elapsed().as_millis() as u64;
    log::debug!("request {request_id} outcome={outcome:?} elapsed_ms={elapsed_ms}");
    let bytes_out = response
        .headers()
        .get("content-length")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0);
    config.emit_event(ExecutionResult {
        request_id,
        outcome,
        bytes_in: 0,
        bytes_out,
        elapsed_ms,
    });
}

/// Step 17: serializes a [`CoreResponse`] into a wire-ready axum response.
fn finish_core_to_response(resp: CoreResponse) -> Response {
    match resp {
        CoreResponse::Normal(normal) => {
            let mut builder = Response::builder().status(
                StatusCode::from_u16(normal.status.code()).unwrap_or(StatusCode::OK),
            );
            for (name, value) in &normal.headers {
                builder = builder.header(name, value);
            }
            if let Some(content_type) = &normal.content_type {
                builder = builder.header("Content-Type", content_type);
            }
            if !normal.chunked {
                builder = builder.header("Content-Length", normal.body.len().to_string());
            }
            builder
                .body(Body::from(normal.body))
                .unwrap_or_else(|_| Response::new(Body::empty()))
        }
        CoreResponse::Empty => Response::builder()
            .status(StatusCode::NO_CONTENT)
            .body(Body::empty())
            .unwrap_or_else(|_| Response::new(Body::empty())),
        CoreResponse::StreamClosed { .. } => Response::builder()
            .status(StatusCode::OK)
            .body(Body::empty())
            .unwrap_or_else(|_| Response::new(Body::empty())),
        CoreResponse::Error(err) => {
            log::error!("uncaught handler error: {err}");
            Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .body(Body::from("Internal Server Error"))
                .unwrap_or_else(|_| Response::new(Body::empty()))
        }
        CoreResponse::Close => Response::builder()
            .status(StatusCode::OK)
            .body(Body::empty())
            .unwrap_or_else(|_| Response::new(Body::empty())),
        CoreResponse::Redirect301 { location } => Response::builder()
            .status(StatusCode::MOVED_PERMANENTLY)
            .header("Location", location)
            .body(Body::empty())
            .unwrap_or_else(|_| Response::new(Body::empty())),
    }
}

/// Resolves the listening host for `(dns_safe_host, port)` (spec.md §4.5
/// step 2), honoring a per-host `X-Forwarded-Host` override, dispatching on
/// success and answering with a tagged `DnsUnknownHost` outcome on failure.
pub async fn dispatch_with_host_resolution(
    config: &ServerConfig,
    dns_safe_host: &str,
    forwarded_host: Option<&str>,
    port: u16,
    remote_addr: SocketAddr,
    request: Request<Body>,
) -> Response {
    match crate::host::resolve_host(&config.hosts, dns_safe_host, forwarded_host, port) {
        Some(host) => dispatch(config, host, remote_addr, request).await,
        None => {
            let started = Instant::now();
            let request_id = Uuid::new_v4();
            finish(
                config,
                request_id,
                started,
                DispatchOutcome::DnsUnknownHost,
                bad_request("unknown listening host"),
            )
        }
    }
}
