//! Read-only admin status API.
//!
//! Every route requires `Authorization: Bearer <admin.api_key>`.

pub mod auth;
pub mod handlers;

use axum::{middleware, routing::get, Router};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::layer::ResilienceLayer;

#[derive(Clone)]
pub struct AdminState {
    pub layer: Arc<ResilienceLayer>,
    pub api_key: Arc<str>,
}

impl AdminState {
    pub fn new(layer: Arc<ResilienceLayer>, api_key: impl Into<Arc<str>>) -> Self {
        Self {
            layer,
            api_key: api_key.into(),
        }
    }
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/providers", get(get_providers))
        .route("/admin/requests", get(get_requests))
        .route("/admin/requests/{id}", get(get_request))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the admin API until the shutdown signal fires.
pub async fn serve(
    listener: TcpListener,
    state: AdminState,
    mut shutdown: broadcast::Receiver<()>,
) -> std::io::Result<()> {
    let addr = listener.local_addr()?;
    tracing::info!(address = %addr, "Admin API listening");
    axum::serve(listener, setup_admin_router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ProviderConfig, ResilienceConfig};
    use crate::queue::RequestId;
    use axum::body::Body;
    use axum::http::{header::AUTHORIZATION, Request, StatusCode};
    use tower::ServiceExt;

    fn router() -> Router {
        let mut config = ResilienceConfig::default();
        config.providers = vec![ProviderConfig::new("a", "http://a.invalid")];
        config.health_check.enabled = false;
        let layer = Arc::new(ResilienceLayer::new(config).unwrap());
        setup_admin_router(AdminState::new(layer, "secret"))
    }

    fn get(uri: &str, key: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        if let Some(key) = key {
            builder = builder.header(AUTHORIZATION, format!("Bearer {}", key));
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_requires_bearer_key() {
        let res = router().oneshot(get("/admin/status", None)).await.unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

        let res = router().oneshot(get("/admin/status", Some("wrong"))).await.unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

        let res = router().oneshot(get("/admin/status", Some("secret"))).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_providers_and_unknown_request() {
        let res = router().oneshot(get("/admin/providers", Some("secret"))).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["a"]["circuit_state"], "CLOSED");

        let res = router().oneshot(get("/admin/requests/not-a-uuid", Some("secret"))).await.unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);

        let missing = format!("/admin/requests/{}", RequestId::new());
        let res = router().oneshot(get(&missing, Some("secret"))).await.unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }
}
