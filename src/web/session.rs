//! Session cookie handling and the logged-in user extractors.

use std::time::Duration;

use axum::extract::FromRequestParts;
use axum::http::header::{COOKIE, HeaderValue};
use axum::http::request::Parts;

use super::AppState;
use super::error::ApiError;
use crate::blog::BlogError;
use crate::model::types::User;

pub const SESSION_COOKIE: &str = "session";

/// Value of cookie `name` from the request's `Cookie` headers.
pub fn cookie_value<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts
        .headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|header| header.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value)
        .filter(|v| !v.is_empty())
}

/// `Set-Cookie` value for a new session. Without `remember` the cookie ends
/// with the browser session.
pub fn session_cookie(token: &str, remember: bool, ttl: Duration) -> HeaderValue {
    let mut cookie = format!("{SESSION_COOKIE}={token}; Path=/; HttpOnly; SameSite=Lax");
    if remember {
        cookie.push_str(&format!("; Max-Age={}", ttl.as_secs()));
    }
    // Tokens are base64url plus '.', always valid header text.
    HeaderValue::from_str(&cookie).unwrap_or_else(|_| HeaderValue::from_static(""))
}

pub fn clear_session_cookie() -> HeaderValue {
    HeaderValue::from_static("session=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0")
}

/// The logged-in user; rejects with 401 when there is none.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

/// The logged-in user, if any.
#[derive(Debug, Clone)]
pub struct MaybeUser(pub Option<User>);

impl FromRequestParts<AppState> for MaybeUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Some(token) = cookie_value(parts, SESSION_COOKIE).map(str::to_string) else {
            return Ok(Self(None));
        };
        let user = super::blocking(state, move |blog| blog.session_user(&token)).await?;
        Ok(Self(user))
    }
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        match MaybeUser::from_request_parts(parts, state).await? {
            MaybeUser(Some(user)) => Ok(Self(user)),
            MaybeUser(None) => Err(ApiError(BlogError::Unauthorized)),
        }
    }
}
