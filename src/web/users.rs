use axum::Json;
use axum::extract::{Multipart, Path, State};
use axum::http::header::SET_COOKIE;
use axum::response::{IntoResponse, Response};
use serde_json::{Value, json};

use super::error::ApiError;
use super::files::read_upload;
use super::session::{CurrentUser, clear_session_cookie, session_cookie};
use super::{AppState, blocking};
use crate::blog::forms::{
    LoginForm, RegistrationForm, RequestResetForm, ResetPasswordForm, UpdateAccountForm,
};
use crate::blog::users::Deactivation;
use crate::model::types::User;

pub async fn register(
    State(state): State<AppState>,
    Json(form): Json<RegistrationForm>,
) -> Result<Json<Value>, ApiError> {
    let user = blocking(&state, move |blog| blog.register(&form)).await?;
    Ok(Json(json!({
        "message": format!(
            "Account {} has been registered. You can proceed with the login.",
            user.username
        ),
        "user": user,
    })))
}

pub async fn login(
    State(state): State<AppState>,
    Json(form): Json<LoginForm>,
) -> Result<Response, ApiError> {
    let ttl = state.blog.settings().session_ttl;
    let login = blocking(&state, move |blog| blog.login(&form)).await?;
    let cookie = session_cookie(&login.token, login.remember, ttl);
    Ok(([(SET_COOKIE, cookie)], Json(json!({ "user": login.user }))).into_response())
}

pub async fn logout() -> Response {
    (
        [(SET_COOKIE, clear_session_cookie())],
        Json(json!({ "message": "Logged out" })),
    )
        .into_response()
}

pub async fn account(CurrentUser(user): CurrentUser) -> Json<Value> {
    let picture = format!("/static/profile_pics/{}", user.profile_pic);
    Json(json!({ "user": user, "profile_pic_url": picture }))
}

pub async fn update_account(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(form): Json<UpdateAccountForm>,
) -> Result<Json<User>, ApiError> {
    let updated = blocking(&state, move |blog| blog.update_account(user.id, &form)).await?;
    Ok(Json(updated))
}

pub async fn update_picture(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    multipart: Multipart,
) -> Result<Json<User>, ApiError> {
    let (name, bytes) = read_upload(multipart, "profile_pic").await?;
    let updated = blocking(&state, move |blog| {
        blog.set_profile_picture(user.id, &name, &bytes)
    })
    .await?;
    Ok(Json(updated))
}

pub async fn deactivate(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Response, ApiError> {
    let outcome = blocking(&state, move |blog| blog.deactivate(user.id)).await?;
    Ok(match outcome {
        Deactivation::Deactivated => (
            [(SET_COOKIE, clear_session_cookie())],
            Json(json!({
                "status": "deactivated",
                "message": "Your account has been deactivated!",
            })),
        )
            .into_response(),
        Deactivation::Rejected { message } => {
            Json(json!({ "status": "rejected", "message": message })).into_response()
        }
    })
}

pub async fn reset_request(
    State(state): State<AppState>,
    Json(form): Json<RequestResetForm>,
) -> Result<Json<Value>, ApiError> {
    let message = blocking(&state, move |blog| blog.request_password_reset(&form)).await?;
    Ok(Json(json!({ "message": message })))
}

pub async fn reset_token_check(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let user = blocking(&state, move |blog| blog.verify_reset_token(&token)).await?;
    Ok(Json(json!({ "valid": true, "email": user.email })))
}

pub async fn reset_token(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Json(form): Json<ResetPasswordForm>,
) -> Result<Json<Value>, ApiError> {
    blocking(&state, move |blog| blog.reset_password(&token, &form)).await?;
    Ok(Json(json!({
        "message": "Your password has been updated. You can proceed with the login."
    })))
}
