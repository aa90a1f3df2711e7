//! Index client: the only path from the application to a search backend.
//!
//! The backend is optional. With none configured, writes are no-ops and
//! queries report [`BACKEND_UNAVAILABLE`] instead of an empty result, so
//! callers can tell "search is off" apart from "nothing matched".

use anyhow::{Result, bail};
use tracing::debug;

use super::searchable::SearchFields;

/// Query total meaning "no search backend".
pub const BACKEND_UNAVAILABLE: i64 = -1;

/// A full-text engine that stores documents per collection.
///
/// Errors propagate to the caller unchanged.
pub trait IndexBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Create or replace the document `id` in `collection`.
    fn index(&self, collection: &str, id: i64, fields: &SearchFields) -> Result<()>;

    /// Create or replace many documents. Backends with a costly commit
    /// override this to commit once.
    fn index_batch(&self, collection: &str, docs: &[(i64, SearchFields)]) -> Result<()> {
        for (id, fields) in docs {
            self.index(collection, *id, fields)?;
        }
        Ok(())
    }

    /// Delete document `id`; deleting a missing document succeeds.
    fn delete(&self, collection: &str, id: i64) -> Result<()>;

    /// Ids ranked by relevance for the requested window, plus the total
    /// number of matches.
    fn search(
        &self,
        collection: &str,
        expression: &str,
        offset: usize,
        limit: usize,
    ) -> Result<(Vec<i64>, u64)>;
}

pub struct IndexClient {
    backend: Option<Box<dyn IndexBackend>>,
}

impl IndexClient {
    pub fn new(backend: impl IndexBackend + 'static) -> Self {
        Self {
            backend: Some(Box::new(backend)),
        }
    }

    pub fn from_boxed(backend: Option<Box<dyn IndexBackend>>) -> Self {
        Self { backend }
    }

    /// A client with no backend.
    pub fn disabled() -> Self {
        Self { backend: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.backend.is_some()
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.as_ref().map_or("none", |b| b.name())
    }

    pub fn upsert(&self, collection: &str, id: i64, fields: &SearchFields) -> Result<()> {
        let Some(backend) = &self.backend else {
            return Ok(());
        };
        debug!(backend = backend.name(), collection, id, "index upsert");
        backend.index(collection, id, fields)
    }

    pub fn upsert_batch(&self, collection: &str, docs: &[(i64, SearchFields)]) -> Result<()> {
        let Some(backend) = &self.backend else {
            return Ok(());
        };
        debug!(backend = backend.name(), collection, documents = docs.len(), "index batch upsert");
        backend.index_batch(collection, docs)
    }

    pub fn remove(&self, collection: &str, id: i64) -> Result<()> {
        let Some(backend) = &self.backend else {
            return Ok(());
        };
        debug!(backend = backend.name(), collection, id, "index remove");
        backend.delete(collection, id)
    }

    /// Page `page` (1-based) of `page_size` ids matching `expression`.
    ///
    /// Returns `([], -1)` with no backend and `([], 0)` when nothing matched.
    pub fn query(
        &self,
        collection: &str,
        expression: &str,
        page: usize,
        page_size: usize,
    ) -> Result<(Vec<i64>, i64)> {
        let Some(backend) = &self.backend else {
            return Ok((Vec::new(), BACKEND_UNAVAILABLE));
        };
        if page_size == 0 {
            bail!("page size must be positive");
        }
        let window = (page.max(1) - 1)
            .checked_mul(page_size)
            .filter(|offset| offset.checked_add(page_size).is_some());
        let Some(offset) = window else {
            // Past any reachable result: only the total is meaningful.
            let (_, total) = backend.search(collection, expression, 0, 0)?;
            debug!(backend = backend.name(), collection, page, total, "query page out of range");
            return Ok((Vec::new(), total as i64));
        };
        let (ids, total) = backend.search(collection, expression, offset, page_size)?;
        debug!(
            backend = backend.name(),
            collection,
            expression,
            page,
            hits = ids.len(),
            total,
            "index query"
        );
        Ok((ids, total as i64))
    }
}

impl<T: IndexBackend + ?Sized> IndexBackend for std::sync::Arc<T> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn index(&self, collection: &str, id: i64, fields: &SearchFields) -> Result<()> {
        (**self).index(collection, id, fields)
    }

    fn index_batch(&self, collection: &str, docs: &[(i64, SearchFields)]) -> Result<()> {
        (**self).index_batch(collection, docs)
    }

    fn delete(&self, collection: &str, id: i64) -> Result<()> {
        (**self).delete(collection, id)
    }

    fn search(
        &self,
        collection: &str,
        expression: &str,
        offset: usize,
        limit: usize,
    ) -> Result<(Vec<i64>, u64)> {
        (**self).search(collection, expression, offset, limit)
    }
}

impl std::fmt::Debug for IndexClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexClient")
            .field("backend", &self.backend_name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Returns a fixed window and remembers the offsets it was asked for.
    #[derive(Default)]
    struct FixedBackend {
        offsets: Mutex<Vec<usize>>,
    }

    impl IndexBackend for FixedBackend {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn index(&self, _: &str, _: i64, _: &SearchFields) -> Result<()> {
            Ok(())
        }

        fn delete(&self, _: &str, _: i64) -> Result<()> {
            Ok(())
        }

        fn search(&self, _: &str, expression: &str, offset: usize, _: usize) -> Result<(Vec<i64>, u64)> {
            self.offsets.lock().push(offset);
            if expression == "nothing" {
                Ok((vec![], 0))
            } else {
                Ok((vec![3, 1], 2))
            }
        }
    }

    #[test]
    fn disabled_client_reports_unavailable() {
        let client = IndexClient::disabled();
        assert_eq!(client.query("post", "rust", 1, 10).unwrap(), (vec![], -1));
        assert!(client.upsert("post", 1, &SearchFields::new()).is_ok());
        assert!(client.remove("post", 1).is_ok());
        assert!(client.upsert_batch("post", &[(1, SearchFields::new())]).is_ok());
        assert_eq!(client.backend_name(), "none");
    }

    #[test]
    fn enabled_client_distinguishes_zero_results() {
        let client = IndexClient::new(FixedBackend::default());
        assert_eq!(client.query("post", "nothing", 1, 10).unwrap(), (vec![], 0));
        assert_eq!(client.query("post", "rust", 1, 10).unwrap(), (vec![3, 1], 2));
    }

    #[test]
    fn page_translates_to_offset() {
        let backend = std::sync::Arc::new(FixedBackend::default());
        let client = IndexClient::new(backend.clone());
        client.query("post", "rust", 3, 10).unwrap();
        client.query("post", "rust", 0, 10).unwrap();
        assert_eq!(*backend.offsets.lock(), vec![20, 0]);
        assert!(client.query("post", "rust", 1, 0).is_err());
    }

    #[test]
    fn overflowing_page_yields_empty_window() {
        let backend = std::sync::Arc::new(FixedBackend::default());
        let client = IndexClient::new(backend.clone());
        assert_eq!(client.query("post", "rust", usize::MAX, 10).unwrap(), (vec![], 2));
        assert_eq!(client.query("post", "rust", usize::MAX / 10 + 1, 10).unwrap(), (vec![], 2));
        assert_eq!(*backend.offsets.lock(), vec![0, 0]);
    }
}
