// src/gateway/handlers.rs

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use std::fmt::Display;

use crate::gateway::{auth, types::*, GatewayState};
use crate::infra::errors::PipelineError;
use crate::model::{SessionAnalytics, StoredEvent};
use crate::transport::consumer_lag;

type ApiError = (StatusCode, Json<ErrorResponse>);

fn bad_request(error: impl Into<String>, details: Option<String>) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: error.into(),
            details,
        }),
    )
}

fn internal(error: &str, cause: impl Display) -> ApiError {
    tracing::error!("{}: {}", error, cause);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: error.into(),
            details: Some(cause.to_string()),
        }),
    )
}

/// POST /api/events — Validate, stamp and append one event to the log.
pub async fn post_event(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    body: Result<Json<EventRequest>, JsonRejection>,
) -> Result<Json<EventAccepted>, ApiError> {
    auth::check_api_key(&state, &headers)?;

    let Json(request) = body.map_err(|e| bad_request("Malformed request body", Some(e.body_text())))?;

    let server_timestamp_ms = chrono::Utc::now().timestamp_millis();
    let event = match request.into_event(server_timestamp_ms) {
        Ok(event) => event,
        Err(e @ PipelineError::InvalidEvent { .. }) => {
            return Err(bad_request("Validation failed", Some(e.to_string())))
        }
        Err(e) => return Err(internal("Failed to process event", e)),
    };

    tracing::info!(
        "Received event for session: {}, file: {}, line: {}",
        event.session_id,
        event.file_name().unwrap_or("-"),
        event.line_number
    );

    let payload = event
        .to_json()
        .map_err(|e| internal("Failed to process event", e))?;
    let position = state
        .log
        .append(event.partition_key(), payload)
        .await
        .map_err(|e| internal("Failed to process event", e))?;

    Ok(Json(EventAccepted {
        message: "Event received successfully".into(),
        session_id: event.session_id,
        partition: position.partition,
        offset: position.offset,
    }))
}

/// GET /api/sessions/{id}/analytics — Persisted analytics for a session.
pub async fn get_session_analytics(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<SessionAnalytics>, ApiError> {
    auth::check_api_key(&state, &headers)?;

    match state.analytics.get(&id).await {
        Ok(Some(record)) => Ok(Json(record)),
        Ok(None) => Err((
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!("No analytics for session {id}"),
                details: None,
            }),
        )),
        Err(e) => Err(internal("Failed to load analytics", e)),
    }
}

/// GET /api/sessions/{id}/events — Stored raw events, optionally for one file.
pub async fn get_session_events(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(query): Query<EventsQuery>,
) -> Result<Json<Vec<StoredEvent>>, ApiError> {
    auth::check_api_key(&state, &headers)?;

    state
        .events
        .find_by_session(&id, query.file_uri.as_deref())
        .await
        .map(Json)
        .map_err(|e| internal("Failed to load events", e))
}

/// GET /api/sessions/{id}/events/count
pub async fn count_session_events(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<EventCount>, ApiError> {
    auth::check_api_key(&state, &headers)?;

    let count = state
        .events
        .count_by_session(&id)
        .await
        .map_err(|e| internal("Failed to count events", e))?;
    Ok(Json(EventCount {
        session_id: id,
        count,
    }))
}

/// GET /api/aggregator/sessions — Unflushed in-memory aggregates.
pub async fn list_active_sessions(
    State(state): State<GatewayState>,
    headers: HeaderMap,
) -> Result<Json<ActiveSessions>, ApiError> {
    auth::check_api_key(&state, &headers)?;

    let sessions = state.aggregator.peek();
    Ok(Json(ActiveSessions {
        count: sessions.len(),
        sessions,
    }))
}

/// GET /api/aggregator/stats — Counters, last flush and consumer lag.
pub async fn aggregator_stats(
    State(state): State<GatewayState>,
    headers: HeaderMap,
) -> Result<Json<AggregatorStatus>, ApiError> {
    auth::check_api_key(&state, &headers)?;

    let lag = consumer_lag(state.log.as_ref(), &state.aggregation_group)
        .await
        .map_err(|e| internal("Failed to read consumer offsets", e))?;
    Ok(Json(AggregatorStatus {
        stats: state.aggregator.stats(),
        lag,
    }))
}

/// GET /health — Liveness (no auth).
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        version: env!("CARGO_PKG_VERSION").into(),
    })
}
