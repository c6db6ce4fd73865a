use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use cobalto::config::{HostConfig, ServerConfig};
use cobalto::method::MethodMask;
use cobalto::middleware::{MiddlewareOutcome, Phase};
use cobalto::response::CoreResponse;

fn remote() -> SocketAddr {
    "127.0.0.1:9999".parse().unwrap()
}

fn get(path: &str) -> Request<Body> {
    Request::builder().method(Method::GET).uri(path).body(Body::empty()).unwrap()
}

fn request(method: Method, path: &str) -> Request<Body> {
    Request::builder().method(method).uri(path).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn dispatch_matches_template_route_and_extracts_params() {
    let host = HostConfig::new("api")
        .listen("http://localhost:8080/")
        .unwrap()
        .add_route(
            MethodMask::GET,
            "/users/<id>",
            Arc::new(|req| {
                Box::pin(async move {
                    let id = req.query.get("id").cloned().unwrap_or_default();
                    CoreResponse::ok(format!("user {id}"))
                })
            }),
        )
        .unwrap()
        .build();
    let config = ServerConfig::new(vec![]);

    let response = cobalto::dispatcher::dispatch(&config, &host, remote(), get("/users/42")).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn dispatch_returns_405_on_path_match_method_mismatch() {
    let host = HostConfig::new("api")
        .listen("http://localhost:8080/")
        .unwrap()
        .add_route(MethodMask::POST, "/api/items", Arc::new(|_req| Box::pin(async { CoreResponse::ok("created") })))
        .unwrap()
        .build();
    let config = ServerConfig::new(vec![]);

    let response = cobalto::dispatcher::dispatch(&config, &host, remote(), get("/api/items")).await;
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn dispatch_returns_404_on_no_match() {
    let host = HostConfig::new("api").listen("http://localhost:8080/").unwrap().build();
    let config = ServerConfig::new(vec![]);

    let response = cobalto::dispatcher::dispatch(&config, &host, remote(), get("/nowhere")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn middleware_short_circuit_skips_handler_and_later_middleware() {
    let handler_called = Arc::new(Mutex::new(false));
    let handler_flag = handler_called.clone();

    let host = HostConfig::new("api")
        .listen("http://localhost:8080/")
        .unwrap()
        .add_middleware(
            Phase::BeforeResponse,
            Arc::new(|_req| {
                Box::pin(async { Ok(MiddlewareOutcome::ShortCircuit(CoreResponse::with_status(418, "teapot").unwrap())) })
            }),
        )
        .add_route(
            MethodMask::GET,
            "/brew",
            Arc::new(move |_req| {
                let handler_flag = handler_flag.clone();
                Box::pin(async move {
                    *handler_flag.lock().unwrap() = true;
                    CoreResponse::ok("brewed")
                })
            }),
        )
        .unwrap()
        .build();
    let config = ServerConfig::new(vec![]);

    let response = cobalto::dispatcher::dispatch(&config, &host, remote(), get("/brew")).await;
    assert_eq!(response.status(), StatusCode::IM_A_TEAPOT);
    assert!(!*handler_called.lock().unwrap());
}

#[tokio::test]
async fn options_request_on_typed_route_short_circuits_before_method_check() {
    let host = HostConfig::new("api")
        .listen("http://localhost:8080/")
        .unwrap()
        .add_route(MethodMask::GET, "/anything", Arc::new(|_req| Box::pin(async { CoreResponse::ok("ok") })))
        .unwrap()
        .build();
    let config = ServerConfig::new(vec![]);

    let response = cobalto::dispatcher::dispatch(&config, &host, remote(), request(Method::OPTIONS, "/anything")).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn force_trailing_slash_redirects_template_routes() {
    let host = HostConfig::new("api")
        .listen("http://localhost:8080/")
        .unwrap()
        .force_trailing_slash(true)
        .add_route(MethodMask::GET, "/docs", Arc::new(|_req| Box::pin(async { CoreResponse::ok("docs") })))
        .unwrap()
        .build();
    let config = ServerConfig::new(vec![]);

    let response = cobalto::dispatcher::dispatch(&config, &host, remote(), get("/docs")).await;
    assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
    assert_eq!(response.headers().get("Location").unwrap(), "/docs/");
}

#[tokio::test]
async fn max_content_length_rejects_oversized_requests() {
    let host = HostConfig::new("api")
        .listen("http://localhost:8080/")
        .unwrap()
        .max_content_length(4)
        .add_route(MethodMask::POST, "/upload", Arc::new(|_req| Box::pin(async { CoreResponse::ok("ok") })))
        .unwrap()
        .build();
    let config = ServerConfig::new(vec![]);

    let request = Request::builder()
        .method(Method::POST)
        .uri("/upload")
        .header("content-length", "100")
        .body(Body::empty())
        .unwrap();

    let response = cobalto::dispatcher::dispatch(&config, &host, remote(), request).await;
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}
