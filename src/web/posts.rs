use axum::Json;
use axum::extract::{Path, Query, State};
use serde_json::{Value, json};

use super::error::ApiError;
use super::session::CurrentUser;
use super::{AppState, PageQuery, blocking};
use crate::blog::forms::{CommentForm, PostForm};
use crate::model::types::{Comment, Page, Post, PostDetail, TagGroup};

pub async fn new_post(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(form): Json<PostForm>,
) -> Result<Json<PostDetail>, ApiError> {
    let created = blocking(&state, move |blog| blog.create_post(user.id, &form)).await?;
    Ok(Json(created))
}

pub async fn post_detail(
    State(state): State<AppState>,
    Path(post_id): Path<i64>,
) -> Result<Json<PostDetail>, ApiError> {
    Ok(Json(blocking(&state, move |blog| blog.post(post_id)).await?))
}

pub async fn update_post(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(post_id): Path<i64>,
    Json(form): Json<PostForm>,
) -> Result<Json<PostDetail>, ApiError> {
    let updated = blocking(&state, move |blog| blog.update_post(user.id, post_id, &form)).await?;
    Ok(Json(updated))
}

pub async fn delete_post(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(post_id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    blocking(&state, move |blog| blog.delete_post(user.id, post_id)).await?;
    Ok(Json(json!({ "message": "Your post has been deleted!" })))
}

pub async fn comment(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(post_id): Path<i64>,
    Json(form): Json<CommentForm>,
) -> Result<Json<Comment>, ApiError> {
    let comment = blocking(&state, move |blog| blog.comment(user.id, post_id, &form)).await?;
    Ok(Json(comment))
}

pub async fn all_posts(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> Result<Json<Page<Post>>, ApiError> {
    let page = query.page();
    Ok(Json(blocking(&state, move |blog| blog.all_posts(page)).await?))
}

pub async fn posts_by_tag(
    State(state): State<AppState>,
    Path(tag): Path<String>,
    Query(query): Query<PageQuery>,
) -> Result<Json<Value>, ApiError> {
    let page = query.page();
    let label = tag.clone();
    let posts = blocking(&state, move |blog| blog.posts_by_tag(&tag, page)).await?;
    Ok(Json(json!({ "tag": label, "posts": posts })))
}

pub async fn tags(State(state): State<AppState>) -> Result<Json<Vec<TagGroup>>, ApiError> {
    Ok(Json(blocking(&state, |blog| blog.tags()).await?))
}
