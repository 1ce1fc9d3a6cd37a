//! Optional HTTP transport for the MCP tool surface (`http-server` feature),
//! a small axum router exposing `/mcp` (streamable HTTP) and `/health`.
//! No TLS or auth: the daemon binds loopback only.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use rmcp::transport::streamable_http_server::{
    session::local::LocalSessionManager, StreamableHttpServerConfig, StreamableHttpService,
};
use tokio_util::sync::CancellationToken;

use crate::daemon::Daemon;
use crate::presentation::Encoding;

async fn health_check() -> &'static str {
    "OK"
}

/// Serves the MCP tool surface over streamable HTTP at `/mcp`, plus a plain
/// `/health` endpoint, until the process is killed.
pub async fn serve(daemon: Arc<Daemon>, encoding: Encoding, bind: String) -> anyhow::Result<()> {
    let ct = CancellationToken::new();

    let mcp_service = StreamableHttpService::new(
        move || Ok(super::CodewatchServer::new(Arc::clone(&daemon), encoding)),
        LocalSessionManager::default().into(),
        {
            let mut config = StreamableHttpServerConfig::default();
            config.cancellation_token = ct.child_token();
            config.sse_keep_alive = Some(Duration::from_secs(15));
            config.stateful_mode = true;
            config
        },
    );

    let router = Router::new()
        .route("/health", axum::routing::get(health_check))
        .nest_service("/mcp", mcp_service)
        .layer(
            tower::ServiceBuilder::new().layer(tower_http::cors::CorsLayer::permissive()),
        );

    let listener = tokio::net::TcpListener::bind(&bind).await?;
    tracing::info!(%bind, "http MCP transport listening");
    let result = axum::serve(listener, router).await;
    ct.cancel();
    result.map_err(anyhow::Error::from)
}
