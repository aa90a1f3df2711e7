use axum::Json;
use axum::extract::{Path, State};
use serde_json::{Value, json};

use super::error::ApiError;
use super::session::CurrentUser;
use super::{AppState, blocking};
use crate::blog::forms::BookForm;
use crate::model::types::Book;

pub async fn add_book(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(form): Json<BookForm>,
) -> Result<Json<Book>, ApiError> {
    Ok(Json(
        blocking(&state, move |blog| blog.add_book(user.id, &form)).await?,
    ))
}

pub async fn all_books(State(state): State<AppState>) -> Result<Json<Vec<Book>>, ApiError> {
    Ok(Json(blocking(&state, |blog| blog.books()).await?))
}

pub async fn book(
    State(state): State<AppState>,
    Path(book_id): Path<i64>,
) -> Result<Json<Book>, ApiError> {
    Ok(Json(blocking(&state, move |blog| blog.book(book_id)).await?))
}

pub async fn update_book(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(book_id): Path<i64>,
    Json(form): Json<BookForm>,
) -> Result<Json<Book>, ApiError> {
    Ok(Json(
        blocking(&state, move |blog| blog.update_book(user.id, book_id, &form)).await?,
    ))
}

pub async fn delete_book(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(book_id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    blocking(&state, move |blog| blog.delete_book(user.id, book_id)).await?;
    Ok(Json(json!({ "message": "Book has been deleted!" })))
}
