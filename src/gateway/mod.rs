// src/gateway/mod.rs — HTTP ingestion gateway and query API

pub mod auth;
pub mod handlers;
pub mod types;

use axum::http::HeaderValue;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tokio::sync::broadcast;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use crate::aggregator::{AggregateStore, Aggregator};
use crate::infra::config::GatewayConfig;
use crate::persistence::EventRepository;
use crate::transport::PartitionedLog;

/// Shared state for gateway handlers.
#[derive(Clone)]
pub struct GatewayState {
    pub log: Arc<dyn PartitionedLog>,
    pub events: Arc<dyn EventRepository>,
    pub analytics: Arc<dyn AggregateStore>,
    pub aggregator: Aggregator,
    /// Consumer group whose lag the stats endpoint reports.
    pub aggregation_group: String,
    pub api_key: Option<String>,
}

/// Build the axum router with all routes.
pub fn build_router(state: GatewayState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list([
            HeaderValue::from_static("http://localhost:3000"),
            HeaderValue::from_static("http://localhost:5173"),
            HeaderValue::from_static("http://127.0.0.1:3000"),
            HeaderValue::from_static("http://127.0.0.1:5173"),
        ]))
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/events", post(handlers::post_event))
        .route(
            "/api/sessions/{id}/analytics",
            get(handlers::get_session_analytics),
        )
        .route("/api/sessions/{id}/events", get(handlers::get_session_events))
        .route(
            "/api/sessions/{id}/events/count",
            get(handlers::count_session_events),
        )
        .route("/api/aggregator/sessions", get(handlers::list_active_sessions))
        .route("/api/aggregator/stats", get(handlers::aggregator_stats))
        .route("/health", get(handlers::health))
        .layer(cors)
        .with_state(state)
}

/// Serve until a shutdown signal arrives.
pub async fn start_server(
    config: &GatewayConfig,
    state: GatewayState,
    mut shutdown: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.bind, config.port);
    if state.api_key.is_none() {
        tracing::warn!("No API key configured; the gateway accepts unauthenticated requests");
    }

    let router = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Gateway listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{self, spawn_store_server};
    use crate::transport::SqliteLog;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn test_state(api_key: Option<&str>) -> GatewayState {
        let (store, _join) = spawn_store_server(storage::in_memory().unwrap());
        GatewayState {
            log: Arc::new(SqliteLog::new(store.clone(), "code_events", 2)),
            events: Arc::new(store.clone()),
            analytics: Arc::new(store.clone()),
            aggregator: Aggregator::new(Arc::new(store), None),
            aggregation_group: "session-analytics".into(),
            api_key: api_key.map(String::from),
        }
    }

    const EVENT: &str = r#"{"sessionId":"s1","clientTimestampMs":1000,"fileUri":"file:///a.rs",
        "fileName":"a.rs","lineNumber":1,"textNormalized":"x","source":"manual"}"#;

    fn post(body: &str, key: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/api/events")
            .header("content-type", "application/json");
        if let Some(key) = key {
            builder = builder.header("X-API-Key", key);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn json_body(resp: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint_needs_no_key() {
        let app = build_router(test_state(Some("k")));
        let req = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_post_event_requires_key() {
        let app = build_router(test_state(Some("k")));
        let resp = app.clone().oneshot(post(EVENT, None)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let resp = app.oneshot(post(EVENT, Some("wrong"))).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_post_event_appends_to_log() {
        let state = test_state(Some("k"));
        let log = state.log.clone();
        let app = build_router(state);

        let resp = app.oneshot(post(EVENT, Some("k"))).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json_body(resp).await;
        assert_eq!(body["sessionId"], "s1");
        assert_eq!(body["offset"], 0);

        let partition = body["partition"].as_u64().unwrap() as u32;
        let records = log.poll("reader", &[partition], 10).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].key, "s1");
        let stored: serde_json::Value = serde_json::from_str(&records[0].payload).unwrap();
        assert!(stored["serverTimestampMs"].as_i64().unwrap() > 0);
    }

    #[tokio::test]
    async fn test_post_event_reports_missing_field() {
        let app = build_router(test_state(None));
        let body = EVENT.replace(r#""fileName":"a.rs","#, "");
        let resp = app.oneshot(post(&body, None)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = json_body(resp).await;
        assert!(body["details"].as_str().unwrap().contains("fileName"));
    }

    #[tokio::test]
    async fn test_post_event_rejects_malformed_json() {
        let app = build_router(test_state(None));
        let resp = app.oneshot(post("{not json", None)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unknown_session_analytics_is_404() {
        let app = build_router(test_state(None));
        let req = Request::builder()
            .uri("/api/sessions/nope/analytics")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_aggregator_views() {
        let state = test_state(None);
        state
            .aggregator
            .working_set()
            .fold(&crate::model::CodeEvent::from_json(EVENT).unwrap())
            .unwrap();
        let app = build_router(state);

        let req = Request::builder()
            .uri("/api/aggregator/sessions")
            .body(Body::empty())
            .unwrap();
        let body = json_body(app.clone().oneshot(req).await.unwrap()).await;
        assert_eq!(body["count"], 1);
        assert_eq!(body["sessions"][0]["sessionId"], "s1");

        let req = Request::builder()
            .uri("/api/aggregator/stats")
            .body(Body::empty())
            .unwrap();
        let body = json_body(app.oneshot(req).await.unwrap()).await;
        assert_eq!(body["activeSessions"], 1);
        assert_eq!(body["lag"].as_array().unwrap().len(), 2);
    }
}
