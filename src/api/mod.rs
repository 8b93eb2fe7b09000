//! API layer -- axum routes, upload handling, and middleware.

mod routes;
pub mod state;

use self::state::AppState;
use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::report::AnalysisOutcome;

/// Upload extensions accepted for analysis.
pub const ALLOWED_EXTENSIONS: &[&str] = &[".log", ".txt"];

/// Build the application router with all API routes.
pub fn router(state: AppState) -> Router {
    let body_limit = state.max_upload_bytes;
    Router::new()
        .route("/", get(routes::banner))
        // legacy dashboard path
        .route("/analyze", post(routes::analyze))
        .nest("/api/v1", routes::api_routes())
        .fallback(fallback)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn fallback() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "not found")
}

pub fn is_supported_upload(filename: &str) -> bool {
    let lower = filename.to_lowercase();
    ALLOWED_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

/// JSON body returned for a finished batch.
pub fn outcome_body(outcome: &AnalysisOutcome) -> Value {
    match outcome {
        AnalysisOutcome::NoData => json!({
            "status": "empty",
            "message": "File parsed but found no valid logs.",
            "data": []
        }),
        AnalysisOutcome::Report(report) => json!({
            "status": "success",
            "message": report.summary(),
            "data": report.records,
            "meta": {
                "batch_id": report.batch_id,
                "generated_at": report.generated_at.to_rfc3339(),
                "lines_parsed": report.lines_parsed,
                "insights_found": report.insights_found,
                "enrichment": report.enrichment,
            }
        }),
    }
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            ApiError::BadRequest(d) => (StatusCode::BAD_REQUEST, d),
            ApiError::Internal(d) => (StatusCode::INTERNAL_SERVER_ERROR, d),
        };
        (status, Json(json!({ "detail": detail }))).into_response()
    }
}
