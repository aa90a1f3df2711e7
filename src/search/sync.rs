//! Keeps the search index in step with committed writes.
//!
//! [`SearchSync`] is a [`CommitHook`]: before the transaction commits it copies
//! the searchable entities out of the pending change sets into a
//! [`ChangeSnapshot`]; after the commit it replays that snapshot against the
//! [`IndexClient`]. Index failures are logged and counted, never returned, so
//! an index outage cannot fail a write that already landed in the store.

use anyhow::Result;
use tracing::{info, warn};

use super::client::IndexClient;
use super::searchable::{POST_COLLECTION, SearchFields, Searchable};
use crate::storage::{CommitHook, PendingChanges, SqliteStorage, TrackedEntity};

/// Owned copy of one searchable entity's indexed state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchDocument {
    pub collection: &'static str,
    pub id: i64,
    pub fields: SearchFields,
}

impl SearchDocument {
    pub fn from_searchable(entity: &dyn Searchable) -> Self {
        Self {
            collection: entity.collection(),
            id: entity.search_id(),
            fields: entity.search_fields(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DocumentKey {
    pub collection: &'static str,
    pub id: i64,
}

/// Searchable entities touched by one unit of work.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ChangeSnapshot {
    pub added: Vec<SearchDocument>,
    pub updated: Vec<SearchDocument>,
    pub deleted: Vec<DocumentKey>,
}

impl ChangeSnapshot {
    pub fn collect(pending: &PendingChanges) -> Self {
        let docs = |set: &[TrackedEntity]| -> Vec<SearchDocument> {
            set.iter()
                .filter_map(TrackedEntity::as_searchable)
                .map(SearchDocument::from_searchable)
                .collect()
        };
        Self {
            added: docs(&pending.new),
            updated: docs(&pending.dirty),
            deleted: pending
                .deleted
                .iter()
                .filter_map(TrackedEntity::as_searchable)
                .map(|e| DocumentKey {
                    collection: e.collection(),
                    id: e.search_id(),
                })
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }
}

/// What the post-commit replay did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncReport {
    pub upserted: usize,
    pub removed: usize,
    pub failed: usize,
}

pub struct SearchSync<'a> {
    client: &'a IndexClient,
}

impl<'a> SearchSync<'a> {
    pub fn new(client: &'a IndexClient) -> Self {
        Self { client }
    }

    /// Replay `snapshot` against the index, consuming it.
    pub fn apply(&self, snapshot: ChangeSnapshot) -> SyncReport {
        let mut report = SyncReport::default();
        if snapshot.is_empty() || !self.client.is_enabled() {
            return report;
        }

        for doc in snapshot.added.iter().chain(snapshot.updated.iter()) {
            match self.client.upsert(doc.collection, doc.id, &doc.fields) {
                Ok(()) => report.upserted += 1,
                Err(err) => {
                    report.failed += 1;
                    warn!(
                        collection = doc.collection,
                        id = doc.id,
                        error = %err,
                        "search index upsert failed"
                    );
                }
            }
        }
        for key in &snapshot.deleted {
            match self.client.remove(key.collection, key.id) {
                Ok(()) => report.removed += 1,
                Err(err) => {
                    report.failed += 1;
                    warn!(
                        collection = key.collection,
                        id = key.id,
                        error = %err,
                        "search index remove failed"
                    );
                }
            }
        }
        report
    }
}

impl CommitHook for SearchSync<'_> {
    type Snapshot = ChangeSnapshot;
    type Outcome = SyncReport;

    fn before_commit(&self, pending: &PendingChanges) -> ChangeSnapshot {
        ChangeSnapshot::collect(pending)
    }

    fn after_commit(&self, snapshot: ChangeSnapshot) -> SyncReport {
        self.apply(snapshot)
    }
}

/// Re-upsert every post. Used on cold start or after the backend was down.
///
/// Unlike the commit path, the first index error aborts the run.
pub fn reindex_posts(storage: &SqliteStorage, client: &IndexClient) -> Result<usize> {
    if !client.is_enabled() {
        warn!("reindex requested but no search backend is configured");
        return Ok(0);
    }
    let start = std::time::Instant::now();
    let docs: Vec<(i64, SearchFields)> = storage
        .all_posts()?
        .iter()
        .map(|post| (post.search_id(), post.search_fields()))
        .collect();
    client.upsert_batch(POST_COLLECTION, &docs)?;
    info!(
        backend = client.backend_name(),
        collection = POST_COLLECTION,
        documents = docs.len(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "reindex complete"
    );
    Ok(docs.len())
}
