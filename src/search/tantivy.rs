//! Embedded Tantivy backend: one index directory per collection.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use parking_lot::Mutex;
use tantivy::collector::{Count, TopDocs};
use tantivy::query::QueryParser;
use tantivy::schema::*;
use tantivy::{Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term};
use tracing::{debug, info};

use super::client::IndexBackend;
use super::searchable::SearchFields;

const SCHEMA_VERSION: &str = "v1";

/// Writer heap for each collection.
const WRITER_HEAP_BYTES: usize = 50_000_000;

#[derive(Clone, Copy)]
pub struct Fields {
    pub id: Field,
    pub body: Field,
}

struct CollectionIndex {
    index: Index,
    writer: IndexWriter,
    reader: IndexReader,
    fields: Fields,
}

impl CollectionIndex {
    fn open_or_create(path: &Path) -> Result<Self> {
        let schema = build_schema();
        std::fs::create_dir_all(path)?;
        let index = if path.join("meta.json").exists() {
            Index::open_in_dir(path)?
        } else {
            Index::create_in_dir(path, schema.clone())?
        };
        let writer = index
            .writer_with_num_threads(1, WRITER_HEAP_BYTES)
            .with_context(|| "create index writer")?;
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()
            .with_context(|| "create index reader")?;
        let fields = fields_from_schema(&index.schema())?;

        Ok(Self {
            index,
            writer,
            reader,
            fields,
        })
    }

    /// Replace document `id` in the writer; visible after [`Self::commit`].
    fn stage(&mut self, id: i64, fields: &SearchFields) -> Result<()> {
        let f = self.fields;
        self.writer.delete_term(Term::from_field_i64(f.id, id));
        let mut d = TantivyDocument::default();
        d.add_i64(f.id, id);
        for value in fields.values() {
            d.add_text(f.body, value);
        }
        self.writer.add_document(d)?;
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.writer.commit()?;
        self.reader.reload()?;
        Ok(())
    }
}

/// Search backend storing each collection under `<root>/<collection>/v1`.
pub struct TantivyBackend {
    root: PathBuf,
    collections: Mutex<HashMap<String, CollectionIndex>>,
}

impl TantivyBackend {
    pub fn open(root: &Path) -> Result<Self> {
        std::fs::create_dir_all(root)
            .with_context(|| format!("creating index root {}", root.display()))?;
        info!(path = %root.display(), "opened tantivy index root");
        Ok(Self {
            root: root.to_path_buf(),
            collections: Mutex::new(HashMap::new()),
        })
    }

    fn with_collection<T>(
        &self,
        collection: &str,
        f: impl FnOnce(&mut CollectionIndex) -> Result<T>,
    ) -> Result<T> {
        validate_collection_name(collection)?;
        let mut collections = self.collections.lock();
        if !collections.contains_key(collection) {
            let dir = index_dir(&self.root, collection);
            let opened = CollectionIndex::open_or_create(&dir)
                .with_context(|| format!("opening index {}", dir.display()))?;
            collections.insert(collection.to_string(), opened);
        }
        let coll = collections
            .get_mut(collection)
            .ok_or_else(|| anyhow!("collection {collection} vanished"))?;
        f(coll)
    }
}

impl IndexBackend for TantivyBackend {
    fn name(&self) -> &'static str {
        "tantivy"
    }

    fn index(&self, collection: &str, id: i64, fields: &SearchFields) -> Result<()> {
        self.with_collection(collection, |coll| {
            coll.stage(id, fields)?;
            coll.commit()
        })
    }

    fn index_batch(&self, collection: &str, docs: &[(i64, SearchFields)]) -> Result<()> {
        self.with_collection(collection, |coll| {
            for (id, fields) in docs {
                coll.stage(*id, fields)?;
            }
            coll.commit()
        })
    }

    fn delete(&self, collection: &str, id: i64) -> Result<()> {
        self.with_collection(collection, |coll| {
            coll.writer.delete_term(Term::from_field_i64(coll.fields.id, id));
            coll.commit()
        })
    }

    fn search(
        &self,
        collection: &str,
        expression: &str,
        offset: usize,
        limit: usize,
    ) -> Result<(Vec<i64>, u64)> {
        self.with_collection(collection, |coll| {
            let searcher = coll.reader.searcher();
            let parser = QueryParser::for_index(&coll.index, vec![coll.fields.body]);
            let (query, errors) = parser.parse_query_lenient(expression);
            if !errors.is_empty() {
                debug!(expression, errors = errors.len(), "lenient query parse dropped terms");
            }

            let total = searcher.search(&*query, &Count)? as u64;
            if total == 0 || limit == 0 || offset as u64 >= total {
                return Ok((Vec::new(), total));
            }

            let top_docs = searcher.search(&*query, &TopDocs::with_limit(limit).and_offset(offset))?;
            let mut ids = Vec::with_capacity(top_docs.len());
            for (_score, addr) in top_docs {
                let doc: TantivyDocument = searcher.doc(addr)?;
                if let Some(id) = doc.get_first(coll.fields.id).and_then(|v| v.as_i64()) {
                    ids.push(id);
                }
            }
            Ok((ids, total))
        })
    }
}

pub fn build_schema() -> Schema {
    let mut schema_builder = Schema::builder();
    schema_builder.add_i64_field("id", INDEXED | STORED);
    schema_builder.add_text_field("body", TEXT);
    schema_builder.build()
}

pub fn fields_from_schema(schema: &Schema) -> Result<Fields> {
    Ok(Fields {
        id: schema
            .get_field("id")
            .map_err(|_| anyhow!("schema missing id"))?,
        body: schema
            .get_field("body")
            .map_err(|_| anyhow!("schema missing body"))?,
    })
}

pub fn index_dir(base: &Path, collection: &str) -> PathBuf {
    base.join(collection).join(SCHEMA_VERSION)
}

fn validate_collection_name(name: &str) -> Result<()> {
    if name.is_empty()
        || !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        bail!("invalid collection name {name:?}");
    }
    Ok(())
}
