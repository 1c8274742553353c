use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use crowd_heat::HeatmapError;
use log::{error, warn};
use thiserror::Error;
use tokio::task::JoinError;

/// Everything a request can fail with, mapped onto an HTTP status.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    PayloadTooLarge(String),

    #[error(transparent)]
    Heatmap(#[from] HeatmapError),

    #[error("Processing error: {0}")]
    Internal(String),
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        ApiError::BadRequest(format!("Malformed multipart upload: {}", err.body_text()))
    }
}

impl From<JoinError> for ApiError {
    fn from(err: JoinError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Heatmap(HeatmapError::Validation { .. }) => StatusCode::BAD_REQUEST,
            ApiError::Heatmap(HeatmapError::DimensionMismatch { .. }) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            ApiError::Heatmap(HeatmapError::UnsupportedFormat(_)) => {
                StatusCode::UNSUPPORTED_MEDIA_TYPE
            }
            ApiError::Heatmap(HeatmapError::InvalidConfig(_) | HeatmapError::Worker(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let detail = match &self {
            ApiError::Heatmap(HeatmapError::InvalidConfig(_) | HeatmapError::Worker(_)) => {
                format!("Processing error: {self}")
            }
            _ => self.to_string(),
        };
        if status.is_server_error() {
            error!("Request failed: {detail}");
        } else {
            warn!("Request rejected ({status}): {detail}");
        }
        (status, Json(serde_json::json!({ "detail": detail }))).into_response()
    }
}
