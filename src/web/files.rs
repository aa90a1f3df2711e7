use axum::Json;
use axum::extract::{Multipart, Path, State};
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use super::error::ApiError;
use super::{AppState, blocking};
use crate::blog::files::{UploadError, content_type_for};
use crate::blog::{BlogError, ValidationErrors};

fn upload_field_error(field: &'static str, message: impl Into<String>) -> ApiError {
    let mut errors = ValidationErrors::new();
    errors.add(field, message);
    ApiError(BlogError::Validation(errors))
}

/// Pull the file part named `field` out of a multipart body.
pub async fn read_upload(
    mut multipart: Multipart,
    field: &'static str,
) -> Result<(String, Vec<u8>), ApiError> {
    while let Some(part) = multipart
        .next_field()
        .await
        .map_err(|e| upload_field_error(field, e.body_text()))?
    {
        if part.name() != Some(field) {
            continue;
        }
        let name = part.file_name().unwrap_or_default().to_string();
        let bytes = part
            .bytes()
            .await
            .map_err(|e| upload_field_error(field, e.body_text()))?;
        return Ok((name, bytes.to_vec()));
    }
    Err(upload_field_error(field, "This field is required."))
}

pub async fn upload(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<serde_json::Value>, ApiError> {
    let (name, bytes) = read_upload(multipart, "upload").await?;
    let url = blocking(&state, move |blog| blog.upload_post_image(&name, &bytes)).await?;
    Ok(Json(json!({ "uploaded": 1, "url": url })))
}

async fn serve_from(
    state: &AppState,
    filename: String,
    pick: fn(&crate::blog::Blog) -> &crate::blog::files::FileStore,
) -> Result<Response, ApiError> {
    let content_type = content_type_for(&filename);
    let bytes = blocking(state, move |blog| match pick(blog).read(&filename) {
        Ok(bytes) => Ok(bytes),
        Err(UploadError::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {
            Err(BlogError::NotFound)
        }
        Err(UploadError::InvalidFilename) => Err(BlogError::NotFound),
        Err(other) => Err(other.into()),
    })
    .await?;
    Ok(([(CONTENT_TYPE, content_type)], bytes).into_response())
}

pub async fn uploaded_file(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<Response, ApiError> {
    serve_from(&state, filename, |blog| blog.post_images()).await
}

pub async fn profile_picture(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<Response, ApiError> {
    serve_from(&state, filename, |blog| blog.profile_pics()).await
}
