//! Consumer-facing search: index query plus ranked re-fetch from the store.

use anyhow::Result;
use serde::Serialize;
use tracing::debug;

use super::client::{BACKEND_UNAVAILABLE, IndexClient};
use super::searchable::POST_COLLECTION;
use crate::model::types::Post;
use crate::storage::SqliteStorage;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SearchOutcome {
    /// No backend configured; callers surface a service-unavailable error.
    Unavailable,
    NoResults,
    Results {
        posts: Vec<Post>,
        total: u64,
        page: usize,
        per_page: usize,
    },
}

impl SearchOutcome {
    pub fn has_next(&self) -> bool {
        match self {
            SearchOutcome::Results {
                total,
                page,
                per_page,
                ..
            } => page
                .checked_mul(*per_page)
                .is_some_and(|seen| (seen as u64) < *total),
            _ => false,
        }
    }

    pub fn has_prev(&self) -> bool {
        matches!(self, SearchOutcome::Results { page, .. } if *page > 1)
    }
}

/// Search posts and load them in relevance order.
pub fn search_posts(
    storage: &SqliteStorage,
    client: &IndexClient,
    expression: &str,
    page: usize,
    per_page: usize,
) -> Result<SearchOutcome> {
    let page = page.max(1);
    let (ids, total) = client.query(POST_COLLECTION, expression, page, per_page)?;
    if total == BACKEND_UNAVAILABLE {
        return Ok(SearchOutcome::Unavailable);
    }
    if total <= 0 {
        return Ok(SearchOutcome::NoResults);
    }

    let posts = storage.posts_by_ids_ranked(&ids)?;
    if posts.len() != ids.len() {
        // Index still holds documents whose rows are gone.
        debug!(
            expected = ids.len(),
            found = posts.len(),
            "search hits missing from store"
        );
    }
    Ok(SearchOutcome::Results {
        posts,
        total: total as u64,
        page,
        per_page,
    })
}
