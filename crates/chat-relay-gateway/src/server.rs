//! Axum-based HTTP server.

use std::sync::Arc;

use axum::Router;
use axum::http::HeaderValue;
use axum::routing::{get, post};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::handlers;
use crate::state::AppState;

/// Build the application router over shared state.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(state.config.cors_origins());

    let app = Router::new()
        .route("/api/chat", post(handlers::chat))
        .route("/api/research", post(handlers::research))
        .route("/health", get(handlers::health));

    #[cfg(feature = "metrics")]
    let app = app.route("/metrics", get(crate::metrics::metrics_handler));

    app.layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() {
        return layer.allow_origin(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(allowed))
}

/// Start the gateway HTTP server and serve until Ctrl-C.
pub async fn start_gateway(state: Arc<AppState>, port: u16) -> anyhow::Result<()> {
    let bind_addr = state.config.bind();
    let engine = state.engine.id().to_string();
    let app = build_router(state);

    let addr = format!("{bind_addr}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(engine = %engine, "Gateway listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to install Ctrl-C handler");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use chat_relay_core::config::{Config, ServerConfig};
    use chat_relay_engine::EchoEngine;
    use chat_relay_stream::NoopTelemetry;
    use tower::ServiceExt;

    fn state_with_origins(origins: Vec<String>) -> Arc<AppState> {
        let config = Config {
            server: Some(ServerConfig {
                port: 3030,
                bind: None,
                cors_origins: origins,
            }),
            ..Config::default()
        };
        Arc::new(AppState::new(
            Arc::new(config),
            Arc::new(EchoEngine::new()),
            Arc::new(NoopTelemetry),
        ))
    }

    #[tokio::test]
    async fn test_cors_allows_configured_origin() {
        let app = build_router(state_with_origins(vec!["http://localhost:5173".into()]));
        let request = Request::get("/health")
            .header(header::ORIGIN, "http://localhost:5173")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "http://localhost:5173"
        );
    }

    #[tokio::test]
    async fn test_cors_any_origin_by_default() {
        let app = build_router(state_with_origins(Vec::new()));
        let request = Request::get("/health")
            .header(header::ORIGIN, "http://example.com")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let app = build_router(state_with_origins(Vec::new()));
        let request = Request::get("/api/other").body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
