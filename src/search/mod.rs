//! Full-text search over posts.
//!
//! - **[`searchable`]**: the trait entities implement to be mirrored into the index.
//! - **[`client`]**: [`IndexClient`](client::IndexClient), the optional backend wrapper.
//! - **[`sync`]**: commit hook that replays store writes against the index.
//! - **[`query`]**: search plus ranked re-fetch from the store.
//! - **[`tantivy`]** / **[`elastic`]**: backends.

pub mod client;
pub mod elastic;
pub mod query;
pub mod searchable;
pub mod sync;
pub mod tantivy;

use anyhow::Result;
use tracing::info;

use crate::config::{Config, SearchBackendKind};
use client::IndexClient;

/// Build the index client described by `config`.
pub fn client_from_config(config: &Config) -> Result<IndexClient> {
    let client = match &config.search_backend {
        SearchBackendKind::None => IndexClient::disabled(),
        SearchBackendKind::Tantivy => {
            IndexClient::new(tantivy::TantivyBackend::open(&config.index_dir)?)
        }
        SearchBackendKind::Elasticsearch { url } => {
            IndexClient::new(elastic::ElasticsearchBackend::new(url)?)
        }
    };
    info!(backend = client.backend_name(), "search backend configured");
    Ok(client)
}
