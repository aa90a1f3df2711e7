//! Elasticsearch backend over the REST API.
//!
//! Uses the blocking reqwest client. The client is built on first use so a
//! backend can be constructed from async code; every call must still run on
//! a blocking thread.

use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use once_cell::sync::OnceCell;
use reqwest::StatusCode;
use reqwest::blocking::Client;
use serde_json::{Value, json};
use tracing::debug;

use super::client::IndexBackend;
use super::searchable::SearchFields;

const HTTP_TIMEOUT_SECS: u64 = 10;

pub struct ElasticsearchBackend {
    base_url: String,
    http: OnceCell<Client>,
}

impl ElasticsearchBackend {
    pub fn new(base_url: &str) -> Result<Self> {
        let base_url = base_url.trim_end_matches('/').to_string();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            bail!("elasticsearch url must be http(s): {base_url}");
        }
        Ok(Self {
            base_url,
            http: OnceCell::new(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn http(&self) -> Result<&Client> {
        self.http.get_or_try_init(|| {
            Client::builder()
                .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
                .user_agent(concat!("personal-blog/", env!("CARGO_PKG_VERSION")))
                .build()
                .context("building http client")
        })
    }

    fn doc_url(&self, collection: &str, id: i64) -> String {
        format!(
            "{}/{}/_doc/{}",
            self.base_url,
            urlencoding::encode(collection),
            id
        )
    }
}

impl IndexBackend for ElasticsearchBackend {
    fn name(&self) -> &'static str {
        "elasticsearch"
    }

    fn index(&self, collection: &str, id: i64, fields: &SearchFields) -> Result<()> {
        let response = self
            .http()?
            .put(self.doc_url(collection, id))
            .json(fields)
            .send()
            .with_context(|| format!("indexing {collection}/{id}"))?;
        if !response.status().is_success() {
            bail!("elasticsearch index returned {}", response.status());
        }
        Ok(())
    }

    fn delete(&self, collection: &str, id: i64) -> Result<()> {
        let response = self
            .http()?
            .delete(self.doc_url(collection, id))
            .send()
            .with_context(|| format!("deleting {collection}/{id}"))?;
        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            return Ok(());
        }
        bail!("elasticsearch delete returned {status}")
    }

    fn search(
        &self,
        collection: &str,
        expression: &str,
        offset: usize,
        limit: usize,
    ) -> Result<(Vec<i64>, u64)> {
        let url = format!(
            "{}/{}/_search",
            self.base_url,
            urlencoding::encode(collection)
        );
        let body = search_body(expression, offset, limit);
        let response = self
            .http()?
            .post(url)
            .json(&body)
            .send()
            .with_context(|| format!("searching {collection}"))?;

        let status = response.status();
        // Index not created yet: nothing was ever written to it.
        if status == StatusCode::NOT_FOUND {
            debug!(collection, "search against missing index");
            return Ok((Vec::new(), 0));
        }
        if !status.is_success() {
            bail!("elasticsearch search returned {status}");
        }
        let value: Value = response.json().context("parsing search response")?;
        parse_search_response(&value)
    }
}

pub fn search_body(expression: &str, offset: usize, limit: usize) -> Value {
    json!({
        "query": { "multi_match": { "query": expression, "fields": ["*"] } },
        "from": offset,
        "size": limit,
    })
}

/// Pull hit ids and the total out of a `_search` response.
///
/// `hits.total` is an object (`{"value": n}`) on 7.x and later, a bare
/// number before that.
pub fn parse_search_response(value: &Value) -> Result<(Vec<i64>, u64)> {
    let hits = value
        .get("hits")
        .ok_or_else(|| anyhow!("search response has no hits"))?;

    let total = match hits.get("total") {
        Some(Value::Number(n)) => n.as_u64(),
        Some(obj @ Value::Object(_)) => obj.get("value").and_then(Value::as_u64),
        _ => None,
    }
    .ok_or_else(|| anyhow!("search response has no total"))?;

    let mut ids = Vec::new();
    for hit in hits
        .get("hits")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
    {
        let raw = hit
            .get("_id")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("search hit without _id"))?;
        let id = raw
            .parse::<i64>()
            .with_context(|| format!("non-numeric document id {raw:?}"))?;
        ids.push(id);
    }
    Ok((ids, total))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_object_total() {
        let value = json!({
            "hits": {
                "total": { "value": 12, "relation": "eq" },
                "hits": [ { "_id": "4" }, { "_id": "9" } ]
            }
        });
        assert_eq!(parse_search_response(&value).unwrap(), (vec![4, 9], 12));
    }

    #[test]
    fn parses_legacy_numeric_total() {
        let value = json!({ "hits": { "total": 0, "hits": [] } });
        assert_eq!(parse_search_response(&value).unwrap(), (vec![], 0));
    }

    #[test]
    fn rejects_non_numeric_ids() {
        let value = json!({ "hits": { "total": 1, "hits": [ { "_id": "abc" } ] } });
        assert!(parse_search_response(&value).is_err());
    }

    #[test]
    fn body_uses_window_and_all_fields() {
        let body = search_body("borrow", 20, 10);
        assert_eq!(body["from"], 20);
        assert_eq!(body["size"], 10);
        assert_eq!(body["query"]["multi_match"]["fields"][0], "*");
    }

    #[test]
    fn rejects_non_http_urls() {
        assert!(ElasticsearchBackend::new("localhost:9200").is_err());
        let backend = ElasticsearchBackend::new("http://localhost:9200/").unwrap();
        assert_eq!(backend.base_url(), "http://localhost:9200");
        assert_eq!(backend.doc_url("post", 3), "http://localhost:9200/post/_doc/3");
    }
}
