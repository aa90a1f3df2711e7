//! JSON HTTP surface over [`Blog`].

pub mod books;
pub mod error;
pub mod files;
pub mod home;
pub mod posts;
pub mod session;
pub mod users;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use axum::routing::{get, post};
use serde::Deserialize;
use tokio::net::TcpListener;
use tracing::info;

use crate::blog::{Blog, BlogResult};
use error::ApiError;

#[derive(Clone)]
pub struct AppState {
    pub blog: Arc<Blog>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<usize>,
}

impl PageQuery {
    pub fn page(&self) -> usize {
        self.page.unwrap_or(1).max(1)
    }
}

/// Run blocking service code off the async runtime.
pub async fn blocking<T, F>(state: &AppState, f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&Blog) -> BlogResult<T> + Send + 'static,
{
    let blog = Arc::clone(&state.blog);
    match tokio::task::spawn_blocking(move || f(&blog)).await {
        Ok(result) => result.map_err(ApiError::from),
        Err(join) => Err(ApiError::from(anyhow::anyhow!("blocking task failed: {join}"))),
    }
}

pub fn router(blog: Arc<Blog>) -> Router {
    let state = AppState { blog };
    Router::new()
        .route("/", get(home::landing))
        .route("/home", get(home::home))
        .route("/about", get(home::about))
        .route("/search", get(home::search))
        .route("/sidebar", get(home::sidebar))
        .route("/register", post(users::register))
        .route("/login", post(users::login))
        .route("/logout", get(users::logout).post(users::logout))
        .route("/account", get(users::account).post(users::update_account))
        .route("/account/picture", post(users::update_picture))
        .route("/account/deactivate", post(users::deactivate))
        .route("/reset_password", post(users::reset_request))
        .route(
            "/reset_password/{token}",
            get(users::reset_token_check).post(users::reset_token),
        )
        .route("/post/new", post(posts::new_post))
        .route("/post/{post_id}", get(posts::post_detail))
        .route("/post/{post_id}/update", post(posts::update_post))
        .route("/post/{post_id}/delete", post(posts::delete_post))
        .route("/post/{post_id}/comment", post(posts::comment))
        .route("/all_posts", get(posts::all_posts))
        .route("/all_posts/{tag}", get(posts::posts_by_tag))
        .route("/tags", get(posts::tags))
        .route("/files/{filename}", get(files::uploaded_file))
        .route("/upload", post(files::upload))
        .route("/static/profile_pics/{filename}", get(files::profile_picture))
        .route("/book/new", post(books::add_book))
        .route("/all_books", get(books::all_books))
        .route("/book/{book_id}", get(books::book))
        .route("/book/{book_id}/update", post(books::update_book))
        .route("/book/{book_id}/delete", post(books::delete_book))
        .fallback(error::not_found)
        .with_state(state)
}

/// Serve on `listener` until `shutdown` resolves.
pub async fn serve_listener(
    listener: TcpListener,
    blog: Arc<Blog>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let addr = listener.local_addr().ok();
    info!(?addr, backend = blog.index().backend_name(), "http server listening");
    axum::serve(listener, router(blog))
        .with_graceful_shutdown(shutdown)
        .await
        .context("http server")?;
    info!("http server stopped");
    Ok(())
}

/// Bind `addr` and serve until Ctrl-C.
pub async fn serve(blog: Arc<Blog>, addr: SocketAddr) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    serve_listener(listener, blog, async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await
}
