use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use axum::http::{HeaderValue, Method, header};
use tower_http::cors::CorsLayer;

use crate::api::{self, AppState, SharedState};
use crate::config::ServerConfig;
use crate::db::{DbHandle, SgeDb};

/// Build the application router on top of shared state.
pub fn build_router(state: SharedState) -> Router {
    api::api_router().with_state(state)
}

fn cors_layer(config: &ServerConfig) -> CorsLayer {
    if config.dev_mode {
        return CorsLayer::permissive();
    }
    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
}

/// Start the API server and block until shutdown.
pub async fn start_server(config: ServerConfig) -> Result<()> {
    if let Some(parent) = config.db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).context("Failed to create database directory")?;
        }
    }

    let db = SgeDb::new(&config.db_path)?;
    let state = Arc::new(AppState {
        db: DbHandle::new(db),
    });

    let app = build_router(state).layer(cors_layer(&config));

    let host = if config.dev_mode { "0.0.0.0" } else { "127.0.0.1" };
    let addr = format!("{}:{}", host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    tracing::info!(addr = %local_addr, db = %config.db_path.display(), "SGE API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    tracing::info!("Shutting down...");
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn test_router() -> Router {
        let db = SgeDb::new_in_memory().unwrap();
        let state = Arc::new(AppState {
            db: DbHandle::new(db),
        });
        build_router(state)
    }

    #[tokio::test]
    async fn health_via_full_router() {
        let app = test_router();
        let req = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn protected_routes_are_mounted_behind_auth() {
        let app = test_router();
        for uri in ["/alumnos", "/vacantes", "/catalogos/provincias"] {
            let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
            let resp = app.clone().oneshot(req).await.unwrap();
            assert_eq!(resp.status(), StatusCode::UNAUTHORIZED, "uri {}", uri);
        }
    }

    #[tokio::test]
    async fn unknown_route_is_404() {
        let app = test_router();
        let req = Request::builder()
            .uri("/no-such-route")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn cors_layer_respects_dev_mode() {
        let mut config = ServerConfig::default();
        config.dev_mode = true;
        // Permissive layer builds without panicking; the exact policy is
        // tower-http's concern.
        let _ = cors_layer(&config);
        config.dev_mode = false;
        let _ = cors_layer(&config);
    }
}
