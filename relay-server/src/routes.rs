//! Thin HTTP surface: enqueue a chat turn, stream its events back over SSE, and
//! report liveness/readiness. Demonstrates how an external HTTP framework would wire
//! into the core; request parsing, auth, and a task-administration CRUD surface are
//! explicitly out of scope here.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use relay_shared::domain::task_kind::TaskKind;
use relay_shared::error::RelayError;
use relay_shared::resilience::{CircuitBreaker, CircuitBreakerBehavior};

use crate::bootstrap::Bootstrap;

#[derive(Clone)]
pub struct AppState {
    pub bootstrap: Arc<Bootstrap>,
    pub db_breaker: Arc<CircuitBreaker>,
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub content: String,
    #[serde(default)]
    pub request_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
struct SendMessageResponse {
    invocation_id: Uuid,
}

pub async fn send_message(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Json(body): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if body.content.trim().is_empty() {
        return Err(ApiError::Validation("content must not be empty".into()));
    }

    let invocation_id = body.request_id.unwrap_or_else(Uuid::now_v7);
    let queue = state.bootstrap.registry.queue_for(TaskKind::ChatMessage)?;

    let payload = serde_json::json!({
        "invocation_id": invocation_id,
        "config_id": null,
        "kind": TaskKind::ChatMessage,
        "conversation_id": conversation_id,
        "content": body.content,
        "request_id": invocation_id,
    });

    state.bootstrap.broker.enqueue(queue, payload).await?;

    Ok((StatusCode::ACCEPTED, Json(SendMessageResponse { invocation_id })))
}

pub async fn conversation_events(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
) -> impl IntoResponse {
    let stream = relay_sse::FanOut::stream(conversation_id, state.bootstrap.bus.clone());
    relay_sse::axum_adapter::into_sse_response(stream)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    database_connected: bool,
    circuit_breaker_open: bool,
    check_duration_ms: u128,
}

/// Liveness/readiness combining a bounded `SELECT 1` with a circuit breaker over the
/// database: skip the live query entirely while the breaker is already open rather
/// than piling more timeouts onto a database that's already failing.
pub async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    let start = Instant::now();

    if !state.db_breaker.should_allow() {
        let body = HealthResponse {
            status: "degraded",
            database_connected: false,
            circuit_breaker_open: true,
            check_duration_ms: 0,
        };
        return (StatusCode::SERVICE_UNAVAILABLE, Json(body));
    }

    let check = tokio::time::timeout(Duration::from_secs(1), sqlx::query("SELECT 1").execute(&state.bootstrap.pool)).await;
    let duration_ms = start.elapsed().as_millis();

    match check {
        Ok(Ok(_)) => {
            state.db_breaker.record_success();
            (
                StatusCode::OK,
                Json(HealthResponse {
                    status: "ok",
                    database_connected: true,
                    circuit_breaker_open: false,
                    check_duration_ms: duration_ms,
                }),
            )
        }
        Ok(Err(e)) => {
            warn!(error = %e, "healthz database check failed");
            state.db_breaker.record_failure();
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "degraded",
                    database_connected: false,
                    circuit_breaker_open: state.db_breaker.state() != relay_shared::resilience::CircuitState::Closed,
                    check_duration_ms: duration_ms,
                }),
            )
        }
        Err(_elapsed) => {
            warn!("healthz database check timed out");
            state.db_breaker.record_failure();
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "degraded",
                    database_connected: false,
                    circuit_breaker_open: state.db_breaker.state() != relay_shared::resilience::CircuitState::Closed,
                    check_duration_ms: duration_ms,
                }),
            )
        }
    }
}

pub enum ApiError {
    Validation(String),
    Internal(String),
}

impl From<RelayError> for ApiError {
    fn from(e: RelayError) -> Self {
        match e {
            RelayError::Validation(msg) => ApiError::Validation(msg),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        match self {
            ApiError::Validation(msg) => (StatusCode::BAD_REQUEST, Json(serde_json::json!({"error": msg}))).into_response(),
            ApiError::Internal(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, Json(serde_json::json!({"error": msg}))).into_response()
            }
        }
    }
}
