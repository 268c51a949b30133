//! Health and read-only status endpoints
//!
//! Every stage binary embeds this router: `/health` for liveness probes and
//! `/interviews/{id}` exposing the ledger document (current status plus the
//! full transition history). Publishing pipeline events stays external.

use crate::ledger::StatusLedger;
use crate::types::ProcessingStatus;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// State shared across handlers
#[derive(Clone)]
pub struct ApiState {
    pub ledger: StatusLedger,
    /// Module name reported by /health (e.g. "proctor-sg")
    pub module: &'static str,
    pub version: &'static str,
    pub startup_time: DateTime<Utc>,
    /// Last consumer-loop error, surfaced for diagnostics
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl ApiState {
    pub fn new(ledger: StatusLedger, module: &'static str, version: &'static str) -> Self {
        Self {
            ledger,
            module,
            version,
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
        }
    }

    pub async fn record_error(&self, error: impl Into<String>) {
        *self.last_error.write().await = Some(error.into());
    }
}

/// API error type
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    Internal(String),
}

impl From<crate::Error> for ApiError {
    fn from(err: crate::Error) -> Self {
        match err {
            crate::Error::NotFound(msg) => ApiError::NotFound(msg),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg),
        };
        let body = Json(json!({
            "error": { "code": code, "message": message }
        }));
        (status, body).into_response()
    }
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub module: String,
    pub version: String,
    pub uptime_seconds: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// GET /health
async fn health_check(State(state): State<ApiState>) -> Json<HealthResponse> {
    let uptime = Utc::now().signed_duration_since(state.startup_time);
    let last_error = state.last_error.read().await.clone();

    Json(HealthResponse {
        status: "ok".to_string(),
        module: state.module.to_string(),
        version: state.version.to_string(),
        uptime_seconds: uptime.num_seconds().max(0) as u64,
        last_error,
    })
}

/// GET /interviews/{id}
///
/// Unknown ids answer 404 with a NOT_FOUND status body rather than a bare
/// error, so callers can treat the status field uniformly.
async fn interview_status(
    State(state): State<ApiState>,
    Path(interview_id): Path<String>,
) -> Result<Response, ApiError> {
    match state.ledger.get_interview(&interview_id).await? {
        Some(doc) => Ok(Json(doc).into_response()),
        None => Ok((
            StatusCode::NOT_FOUND,
            Json(json!({
                "interview_id": interview_id,
                "status": ProcessingStatus::NotFound,
            })),
        )
            .into_response()),
    }
}

/// Build the service router
pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/interviews/:id", get(interview_status))
        .with_state(state)
}

/// Serve the router until the token is cancelled.
pub async fn serve(router: Router, port: u16, cancel: CancellationToken) -> crate::Result<()> {
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await?;
    tracing::info!("Listening on http://127.0.0.1:{}", port);

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    Ok(())
}
