//! HTTP server implementation using Axum.

use axum::{
    Router,
    routing::{delete, get},
};
use hookclock_core::TriggerSource;
use hookclock_core::config::GatewayConfig;
use hookclock_scheduler::{Clock, EngineReporter, EventStore, LockedEvents};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared state for the gateway server.
pub struct AppState {
    pub store: Arc<dyn EventStore>,
    pub triggers: Arc<dyn TriggerSource>,
    pub reporter: Arc<dyn EngineReporter>,
    /// Events held by the engine running in this process.
    pub locked: Arc<LockedEvents>,
    pub clock: Arc<dyn Clock>,
    pub start_time: std::time::Instant,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    build_router_from_arc(Arc::new(state))
}

pub fn build_router_from_arc(shared: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(super::routes::health_check))
        .route("/api/v1/health", get(super::routes::health_check))
        .route("/api/v1/stats", get(super::routes::engine_stats))
        .route("/api/v1/cron-triggers", get(super::routes::list_cron_triggers))
        .route("/api/v1/cron-events", get(super::routes::list_cron_events))
        .route(
            "/api/v1/one-off-events",
            get(super::routes::list_one_off_events).post(super::routes::create_one_off_event),
        )
        .route(
            "/api/v1/one-off-events/{id}",
            delete(super::routes::delete_one_off_event),
        )
        .route("/api/v1/invocations", get(super::routes::list_invocations))
        .layer({
            let cors = CorsLayer::new()
                .allow_methods([
                    axum::http::Method::GET,
                    axum::http::Method::POST,
                    axum::http::Method::DELETE,
                    axum::http::Method::OPTIONS,
                ])
                .allow_headers(Any)
                .max_age(std::time::Duration::from_secs(3600));

            // e.g. HOOKCLOCK_CORS_ORIGINS=https://ops.example.com,https://admin.example.com
            if let Ok(origins_str) = std::env::var("HOOKCLOCK_CORS_ORIGINS") {
                let origins: Vec<_> = origins_str
                    .split(',')
                    .filter_map(|s| s.trim().parse::<axum::http::HeaderValue>().ok())
                    .collect();
                cors.allow_origin(origins)
            } else {
                cors.allow_origin(Any)
            }
        })
        .layer(TraceLayer::new_for_http())
        .with_state(shared)
}

/// Serve the API until `cancel` fires.
pub async fn serve(
    config: &GatewayConfig,
    state: AppState,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let app = build_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("🌐 Gateway server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    tracing::info!("🌐 Gateway server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use chrono::{TimeZone, Utc};
    use hookclock_core::SharedTriggers;
    use hookclock_scheduler::{ManualClock, SqliteEventStore, TracingReporter};
    use tower::ServiceExt;

    fn router() -> Router {
        build_router(AppState {
            store: Arc::new(SqliteEventStore::open_in_memory().unwrap()),
            triggers: Arc::new(SharedTriggers::default()),
            reporter: Arc::new(TracingReporter::new()),
            locked: Arc::new(LockedEvents::new()),
            clock: Arc::new(ManualClock::new(
                Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap(),
            )),
            start_time: std::time::Instant::now(),
        })
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_route() {
        let response = router()
            .oneshot(Request::get("/api/v1/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn test_create_one_off_route() {
        let body = serde_json::json!({
            "webhook": "http://localhost/once",
            "scheduled_time": "2026-03-02T12:30:00Z",
        });
        let response = router()
            .oneshot(
                Request::post("/api/v1/one-off-events")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let json = body_json(response).await;
        assert_eq!(json["ok"], true);
        assert_eq!(json["event"]["webhook"], "http://localhost/once");
    }

    #[tokio::test]
    async fn test_delete_unknown_one_off_route() {
        let response = router()
            .oneshot(
                Request::delete("/api/v1/one-off-events/missing")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
