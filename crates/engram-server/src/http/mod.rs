mod metrics;
mod routes;

pub use routes::create_router;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use engram_core::{Engram, EngramError};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<Engram>,
    pub metrics: Arc<metrics::Metrics>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(service: Arc<Engram>) -> Self {
        Self {
            service,
            metrics: Arc::new(metrics::Metrics::new()),
            start_time: Instant::now(),
        }
    }
}

/// Uniform JSON envelope.
#[derive(Serialize)]
pub struct JsonResponse<T: Serialize> {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> JsonResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }
}

/// Error wrapper mapping the core taxonomy onto status codes.
pub struct AppError(pub EngramError);

pub type AppResult<T> = Result<T, AppError>;

impl From<EngramError> for AppError {
    fn from(e: EngramError) -> Self {
        AppError(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            EngramError::NodeNotFound(_)
            | EngramError::EdgeNotFound(_)
            | EngramError::EpisodeNotFound(_) => StatusCode::NOT_FOUND,
            EngramError::InvariantViolation { .. }
            | EngramError::Validation(_)
            | EngramError::MalformedInput(_) => StatusCode::BAD_REQUEST,
            EngramError::TransientExternal { .. }
            | EngramError::CircuitOpen(_)
            | EngramError::BudgetExhausted(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(JsonResponse::<()> {
            ok: false,
            data: None,
            error: Some(self.0.to_string()),
        });
        (status, body).into_response()
    }
}
