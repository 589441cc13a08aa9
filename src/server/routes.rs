// src/server/routes.rs

use std::sync::Arc;

use axum::Json;
use axum::extract::{Multipart, State};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, info};
use uuid::Uuid;

use crate::admission::ProcessingStatus;
use crate::server::AppState;
use crate::server::error::AppError;
use crate::storage::{PendingItem, SkippedItem, StoredItem};

/// Multipart field carrying the uploaded files.
pub const FILES_FIELD: &str = "files";

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub message: String,
    pub submission_id: Uuid,
    pub uploaded_files: Vec<StoredItem>,
    pub skipped: Vec<SkippedItem>,
}

/// GET /
pub async fn root() -> Json<Value> {
    Json(json!({ "message": "API is running." }))
}

/// GET /upload/status
pub async fn upload_status(State(app): State<AppState>) -> Json<ProcessingStatus> {
    let status = app.status.clone();
    // The marker lookup is blocking I/O; a panic there still reads as "unknown".
    let result = tokio::task::spawn_blocking(move || status.status()).await;
    Json(result.unwrap_or_else(|_| ProcessingStatus::unknown()))
}

/// POST /upload
pub async fn upload(
    State(app): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    let mut items = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("invalid multipart body: {e}")))?
    {
        if field.name() != Some(FILES_FIELD) {
            debug!(field = ?field.name(), "ignoring unexpected multipart field");
            continue;
        }
        let name = field.file_name().unwrap_or_default().to_string();
        let content = field
            .bytes()
            .await
            .map_err(|e| AppError::BadRequest(format!("failed to read '{name}': {e}")))?;
        items.push(PendingItem::new(name, content.to_vec()));
    }

    info!(files = items.len(), "upload request received");

    let gate = Arc::clone(&app.gate);
    let acceptance = tokio::task::spawn_blocking(move || gate.submit(items))
        .await
        .map_err(|e| AppError::Internal(format!("admission task failed: {e}")))??;

    Ok(Json(UploadResponse {
        message: acceptance.message,
        submission_id: acceptance.submission_id,
        uploaded_files: acceptance.accepted,
        skipped: acceptance.skipped,
    }))
}
