//! Top-level server orchestration: binds one listener per distinct
//! configured port and routes every request through the dispatcher
//! (spec.md §4.5, §6), using axum and hyper as the external HTTP
//! parser/acceptor.

use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request};
use axum::Router as AxumRouter;
use tokio::net::TcpListener;

use crate::config::ServerConfig;
use crate::dispatcher::dispatch_with_host_resolution;

/// Owns the configured hosts and serves them until cancelled or an I/O
/// error stops a listener.
pub struct Server {
    config: Arc<ServerConfig>,
}

impl Server {
    pub fn new(config: ServerConfig) -> Self {
        Server { config: Arc::new(config) }
    }

    fn ports(&self) -> BTreeSet<u16> {
        self.config
            .hosts
            .iter()
            .flat_map(|host| host.ports.iter().map(|port| port.port))
            .collect()
    }

    /// Binds one `TcpListener` per distinct configured port and serves them
    /// concurrently. Returns once every listener task has exited, which in
    /// practice only happens on a bind/accept error.
    pub async fn run(self) -> std::io::Result<()> {
        let ports = self.ports();
        if ports.is_empty() {
            log::warn!("server started with no configured ports");
            return Ok(());
        }

        let mut tasks = Vec::new();
        for port in ports {
            let config = self.config.clone();
            let app = build_router(config, port);
            let listener = TcpListener::bind(("0.0.0.0", port)).await?;
            log::info!("listening on 0.0.0.0:{port}");
            tasks.push(tokio::spawn(async move {
                axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await
            }));
        }

        for task in tasks {
            if let Ok(Err(err)) = task.await {
                log::error!("listener exited with error: {err}");
            }
        }
        Ok(())
    }
}

fn build_router(config: Arc<ServerConfig>, port: u16) -> AxumRouter {
    AxumRouter::new().fallback(
        move |ConnectInfo(remote_addr): ConnectInfo<SocketAddr>, request: Request| {
            let config = config.clone();
            async move {
                let dns_safe_host = host_header(&request).unwrap_or_default();
                let forwarded_host = forwarded_host_header(&request);
                dispatch_with_host_resolution(
                    &config,
                    &dns_safe_host,
                    forwarded_host.as_deref(),
                    port,
                    remote_addr,
                    request,
                )
                .await
            }
        },
    )
}

/// Strips the `:port` suffix axum/hyper may leave on the `Host` header,
/// since port routing is already decided by which listener accepted the
/// connection (spec.md §4.2).
fn host_header(request: &Request) -> Option<String> {
    request
        .headers()
        .get(axum::http::header::HOST)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.split(':').next().unwrap_or(value).to_string())
}

/// Reads `X-Forwarded-Host` (spec.md §4.2, §4.5 step 2), normalized the same
/// way `host_header` normalizes `Host`. Trust is decided per-host by
/// `resolve_host`, not here.
fn forwarded_host_header(request: &Request) -> Option<String> {
    request
        .headers()
        .get("x-forwarded-host")
        .and_then(|value| value.to_str().ok())
        .map(|value| value.split(',').next().unwrap_or(value).trim())
        .map(|value| value.split(':').next().unwrap_or(value).to_string())
}
