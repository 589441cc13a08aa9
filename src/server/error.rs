// src/server/error.rs

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::admission::AdmissionError;

/// Error type for HTTP handlers.
#[derive(Debug)]
pub enum AppError {
    Admission(AdmissionError),
    /// Malformed request (e.g. a broken multipart body).
    BadRequest(String),
    Internal(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Admission(err) => match err {
                AdmissionError::Conflict { .. } => StatusCode::CONFLICT,
                AdmissionError::MarkerStoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                AdmissionError::NothingAccepted { .. } => StatusCode::BAD_REQUEST,
                AdmissionError::Storage { .. } | AdmissionError::Trigger(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<AdmissionError> for AppError {
    fn from(err: AdmissionError) -> Self {
        AppError::Admission(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match self {
            AppError::Admission(AdmissionError::Conflict {
                message,
                retry_hint,
            }) => json!({
                "detail": {
                    "message": message,
                    "action": retry_hint,
                    "status": "processing",
                }
            }),
            AppError::Admission(AdmissionError::NothingAccepted { skipped }) => json!({
                "detail": "No valid files were uploaded. Check file names against the configured routes.",
                "skipped": skipped,
            }),
            AppError::Admission(AdmissionError::Storage { filename, .. }) => json!({
                "detail": format!("Failed to upload file: {filename}"),
            }),
            AppError::Admission(AdmissionError::Trigger(_)) => json!({
                "detail": "Files uploaded but failed to trigger pipeline.",
            }),
            AppError::Admission(err @ AdmissionError::MarkerStoreUnavailable(_)) => json!({
                "detail": "Unable to verify processing state; upload refused.",
                "error": err.to_string(),
            }),
            AppError::BadRequest(msg) | AppError::Internal(msg) => json!({ "detail": msg }),
        };
        (status, Json(body)).into_response()
    }
}
