use axum::Json;
use axum::extract::{Query, State};
use serde_json::{Value, json};

use super::error::ApiError;
use super::{AppState, PageQuery, blocking};
use crate::blog::forms::SearchForm;
use crate::model::types::{Page, Post};
use crate::search::query::SearchOutcome;

pub async fn landing() -> Json<Value> {
    Json(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub async fn about() -> Json<Value> {
    Json(json!({ "title": "About" }))
}

pub async fn home(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> Result<Json<Page<Post>>, ApiError> {
    let page = query.page();
    Ok(Json(blocking(&state, move |blog| blog.home(page)).await?))
}

pub async fn sidebar(State(state): State<AppState>) -> Result<Json<Vec<Post>>, ApiError> {
    Ok(Json(blocking(&state, |blog| blog.sidebar()).await?))
}

/// Link to page `page` of the results for `q`.
pub fn search_url(q: &str, page: usize) -> String {
    format!("/search?q={}&page={page}", urlencoding::encode(q))
}

pub async fn search(
    State(state): State<AppState>,
    Query(form): Query<SearchForm>,
) -> Result<Json<Value>, ApiError> {
    let q = form.q.trim().to_string();
    let outcome = blocking(&state, move |blog| blog.search(&form)).await?;
    let (has_next, has_prev) = (outcome.has_next(), outcome.has_prev());
    let body = match outcome {
        SearchOutcome::Results {
            posts,
            total,
            page,
            per_page,
        } => json!({
            "results": true,
            "posts": posts,
            "total": total,
            "page": page,
            "per_page": per_page,
            "next_url": has_next.then(|| search_url(&q, page + 1)),
            "prev_url": has_prev.then(|| search_url(&q, page - 1)),
        }),
        // Unavailable is already an error from the service.
        SearchOutcome::NoResults | SearchOutcome::Unavailable => json!({ "results": false }),
    };
    Ok(Json(body))
}
