use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::error;

use crate::blog::BlogError;
use crate::blog::files::UploadError;

/// A service error on its way out as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub BlogError);

impl From<BlogError> for ApiError {
    fn from(err: BlogError) -> Self {
        Self(err)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self(BlogError::from(err))
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            BlogError::NotFound => StatusCode::NOT_FOUND,
            BlogError::Forbidden => StatusCode::FORBIDDEN,
            BlogError::Unauthorized | BlogError::BadCredentials => StatusCode::UNAUTHORIZED,
            BlogError::InvalidToken => StatusCode::BAD_REQUEST,
            BlogError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            BlogError::SearchUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            BlogError::Upload(UploadError::NotAnImage | UploadError::InvalidFilename) => {
                StatusCode::BAD_REQUEST
            }
            BlogError::Upload(UploadError::Io(_)) | BlogError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self.0 {
            BlogError::Validation(fields) => json!({
                "error": "validation failed",
                "fields": fields,
            }),
            BlogError::Internal(err) => {
                error!(error = %format!("{err:#}"), "request failed");
                json!({ "error": "Internal server error" })
            }
            BlogError::Upload(UploadError::Io(err)) => {
                error!(error = %err, "upload failed");
                json!({ "error": "Internal server error" })
            }
            BlogError::NotFound => json!({ "error": "Not found" }),
            BlogError::Forbidden => json!({ "error": "Forbidden" }),
            other => json!({ "error": other.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}

pub async fn not_found() -> ApiError {
    ApiError(BlogError::NotFound)
}
