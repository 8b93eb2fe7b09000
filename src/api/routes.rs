//! API route definitions.

use axum::extract::{Multipart, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use super::state::AppState;
use super::{is_supported_upload, outcome_body, ApiError};

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/analyze", post(analyze))
}

pub(super) async fn banner() -> Json<Value> {
    Json(json!({ "message": "logwarden analysis service is running" }))
}

async fn health() -> Json<Value> {
    Json(json!({
        "data": {
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION")
        },
        "meta": {
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "version": env!("CARGO_PKG_VERSION")
        }
    }))
}

/// Accept a multipart upload (field `file`), analyze it, and delete it.
pub(super) async fn analyze(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<Value>, ApiError> {
    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.to_string()))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let filename = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| ApiError::BadRequest("upload has no file name".to_string()))?;
        if !is_supported_upload(&filename) {
            warn!(%filename, "Rejected upload with unsupported extension");
            return Err(ApiError::BadRequest(
                "Invalid file type. Only .log and .txt files are allowed.".to_string(),
            ));
        }

        // Removed when `spool` drops, on every return path below.
        let spool = tempfile::Builder::new()
            .prefix("upload-")
            .suffix(".log")
            .tempfile_in(&state.upload_dir)
            .map_err(|e| ApiError::Internal(format!("failed to create upload file: {}", e)))?;
        let handle = spool
            .reopen()
            .map_err(|e| ApiError::Internal(format!("failed to open upload file: {}", e)))?;
        let mut out = tokio::fs::File::from_std(handle);

        while let Some(chunk) = field
            .chunk()
            .await
            .map_err(|e| ApiError::BadRequest(e.to_string()))?
        {
            out.write_all(&chunk)
                .await
                .map_err(|e| ApiError::Internal(format!("failed to store upload: {}", e)))?;
        }
        out.flush()
            .await
            .map_err(|e| ApiError::Internal(format!("failed to store upload: {}", e)))?;

        let size = out
            .metadata()
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))?
            .len();
        drop(out);
        info!(%filename, size, "Processing upload");

        let outcome = state
            .analyzer
            .analyze_file(spool.path(), size)
            .await
            .map_err(|e| {
                warn!(%filename, error = %e, "Batch analysis failed");
                ApiError::Internal(e.to_string())
            })?;

        return Ok(Json(outcome_body(&outcome)));
    }

    Err(ApiError::BadRequest("missing multipart field 'file'".to_string()))
}
