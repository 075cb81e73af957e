// tests/pipeline_test.rs — End to end: gateway → log → both consumers → flush

use axum::body::Body;
use axum::http::{Request, StatusCode};
use editstream::gateway::build_router;
use editstream::infra::config::Config;
use editstream::pipeline::{self, RunningPipeline};
use editstream::storage;
use editstream::transport::PartitionedLog;
use std::time::Duration;
use tower::ServiceExt;

fn test_config() -> Config {
    let mut config = Config::default();
    config.gateway.enabled = false;
    config.gateway.api_key = Some("test-key".into());
    config.log.partitions = 4;
    config.log.poll_interval_ms = 10;
    config.aggregation.workers = 2;
    config.aggregation.flush_interval_secs = 3_600;
    config.persistence.workers = 2;
    config
}

fn start(config: &Config) -> RunningPipeline {
    pipeline::start(config, storage::in_memory().unwrap()).unwrap()
}

fn event_json(session: &str, ts: i64, file: &str, line: i64) -> String {
    serde_json::json!({
        "sessionId": session,
        "clientTimestampMs": ts,
        "fileUri": format!("file:///src/{file}"),
        "fileName": file,
        "lineNumber": line,
        "textNormalized": "let x = 1;",
        "source": "manual",
    })
    .to_string()
}

async fn send(app: &axum::Router, body: String) -> StatusCode {
    let req = Request::builder()
        .method("POST")
        .uri("/api/events")
        .header("content-type", "application/json")
        .header("X-API-Key", "test-key")
        .body(Body::from(body))
        .unwrap();
    app.clone().oneshot(req).await.unwrap().status()
}

async fn get_json(app: &axum::Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let req = Request::builder()
        .uri(uri)
        .header("X-API-Key", "test-key")
        .body(Body::empty())
        .unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, value)
}

/// Poll until `check` passes or a few seconds elapse.
async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..300 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test]
async fn test_events_flow_to_both_consumers() {
    let config = test_config();
    let running = start(&config);
    let app = build_router(running.gateway_state());

    for (i, ts) in [1_000, 4_000, 7_000].iter().enumerate() {
        assert_eq!(send(&app, event_json("S", *ts, "A.java", i as i64)).await, StatusCode::OK);
    }
    assert_eq!(send(&app, event_json("T", 2_000, "B.java", 1)).await, StatusCode::OK);

    // Persistence consumer stores every raw event
    let app_ref = &app;
    assert!(
        eventually(|| async move {
            let (_, body) = get_json(app_ref, "/api/sessions/S/events/count").await;
            body["count"] == 3
        })
        .await
    );

    // Aggregation consumer folds into the working set
    let aggregator = running.aggregator().unwrap().clone();
    assert!(
        eventually(|| {
            let aggregator = aggregator.clone();
            async move { aggregator.stats().records_folded == 4 }
        })
        .await
    );
    let (_, active) = get_json(&app, "/api/aggregator/sessions").await;
    assert_eq!(active["count"], 2);

    // Shutdown runs a final flush
    let report = running.shutdown().await.unwrap();
    assert_eq!(report.captured, 2);
    assert_eq!(report.inserted, 2);

    let (status, s) = get_json(&app, "/api/sessions/S/analytics").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(s["totalEvents"], 3);
    assert_eq!(s["durationSeconds"], 6);
    assert_eq!(s["linesPerMinute"], 30.0);
    assert_eq!(s["averageInterEventGapMs"], 3_000.0);
    assert_eq!(s["mostEditedFile"], "A.java");

    let (_, events) = get_json(&app, "/api/sessions/S/events?fileUri=file:///src/A.java").await;
    assert_eq!(events.as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn test_malformed_log_record_is_skipped_and_committed() {
    let config = test_config();
    let running = start(&config);
    let log = running.log();

    log.append("S", "{\"not\":\"an event\"}".into()).await.unwrap();
    log.append("S", event_json("S", 1_000, "a.rs", 1)).await.unwrap();

    let partition = editstream::transport::partition_for("S", config.log.partitions);
    let group = config.aggregation.group_id.clone();
    assert!(
        eventually(|| {
            let log = log.clone();
            let group = group.clone();
            async move { log.committed(&group, partition).await.unwrap() == 2 }
        })
        .await
    );

    let stats = running.aggregator().unwrap().stats();
    assert_eq!(stats.records_folded, 1);
    assert_eq!(stats.records_skipped, 1);
    running.shutdown().await;
}

#[tokio::test]
async fn test_rejected_events_never_reach_the_log() {
    let config = test_config();
    let running = start(&config);
    let app = build_router(running.gateway_state());

    let blank_session = event_json("", 1_000, "a.rs", 1);
    assert_eq!(send(&app, blank_session).await, StatusCode::BAD_REQUEST);

    let (_, stats) = get_json(&app, "/api/aggregator/stats").await;
    let total_end: u64 = stats["lag"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["end"].as_u64().unwrap())
        .sum();
    assert_eq!(total_end, 0);
    running.shutdown().await;
}

#[tokio::test]
async fn test_disabled_aggregation_has_no_final_flush() {
    let mut config = test_config();
    config.aggregation.enabled = false;
    let running = start(&config);
    assert!(running.aggregator().is_none());
    assert!(running.shutdown().await.is_none());
}
