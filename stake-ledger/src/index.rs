//! Search index access
//!
//! [`SearchIndex`] is the seam between the processors and the document
//! store. [`ElasticClient`] talks to an Elasticsearch-compatible cluster over
//! HTTP; [`MemoryIndex`] evaluates the same query bodies against documents
//! held in memory.

use crate::config::ElasticConfig;
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

/// Page callback for scroll requests
pub type PageHandler<'a> = dyn FnMut(Vec<Value>) -> Result<()> + Send + 'a;

/// Document store queried with the search DSL
#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Single request; returns the `_source` of each hit
    async fn search(&self, index: &str, body: &Value) -> Result<Vec<Value>>;

    /// Scrolls through every matching document, one page at a time, in
    /// delivery order. Stops at the first page without hits.
    async fn scroll(&self, index: &str, body: &Value, on_page: &mut PageHandler<'_>) -> Result<()>;
}

/// Decode hit sources, skipping (and logging) documents that do not parse
pub fn decode_hits<T: DeserializeOwned>(hits: Vec<Value>) -> Vec<T> {
    hits.into_iter()
        .filter_map(|hit| match serde_json::from_value::<T>(hit) {
            Ok(doc) => Some(doc),
            Err(e) => {
                warn!(error = %e, "skipping undecodable document");
                None
            }
        })
        .collect()
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(rename = "_scroll_id", default)]
    scroll_id: Option<String>,
    hits: HitsEnvelope,
}

#[derive(Debug, Deserialize)]
struct HitsEnvelope {
    #[serde(default)]
    hits: Vec<HitEnvelope>,
}

#[derive(Debug, Deserialize)]
struct HitEnvelope {
    #[serde(rename = "_source", default)]
    source: Value,
}

impl SearchResponse {
    fn into_sources(self) -> (Option<String>, Vec<Value>) {
        let sources = self.hits.hits.into_iter().map(|hit| hit.source).collect();
        (self.scroll_id, sources)
    }
}

/// HTTP client for an Elasticsearch-compatible cluster
pub struct ElasticClient {
    base_url: String,
    client: Client,
    username: Option<String>,
    password: Option<String>,
    page_size: usize,
    keep_alive: String,
}

impl ElasticClient {
    /// Build a client from configuration
    pub fn new(config: &ElasticConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            client,
            username: config.username.clone(),
            password: config.password.clone(),
            page_size: config.scroll_page_size,
            keep_alive: config.scroll_keep_alive.clone(),
        })
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.username {
            Some(user) => request.basic_auth(user, self.password.as_deref()),
            None => request,
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder, what: &str) -> Result<SearchResponse> {
        let response = self
            .authorized(request)
            .send()
            .await
            .map_err(|e| Error::Fetch(format!("{} request failed: {}", what, e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(Error::Fetch(format!(
                "{} failed with status {}: {}",
                what, status, error_text
            )));
        }

        response
            .json::<SearchResponse>()
            .await
            .map_err(|e| Error::Fetch(format!("failed to parse {} response: {}", what, e)))
    }

    async fn clear_scroll(&self, scroll_id: &str) {
        let url = format!("{}/_search/scroll", self.base_url);
        let request = self
            .client
            .delete(&url)
            .json(&json!({ "scroll_id": [scroll_id] }));

        match self.authorized(request).send().await {
            Ok(response)
                if response.status().is_success() || response.status() == StatusCode::NOT_FOUND => {}
            Ok(response) => warn!(status = %response.status(), "cannot clear scroll"),
            Err(e) => warn!(error = %e, "cannot clear scroll"),
        }
    }

    async fn drain_scroll(&self, mut scroll_id: String, on_page: &mut PageHandler<'_>) -> Result<()> {
        let url = format!("{}/_search/scroll", self.base_url);
        loop {
            let request = self.client.post(&url).json(&json!({
                "scroll": self.keep_alive,
                "scroll_id": scroll_id,
            }));
            let (next_id, hits) = self.send(request, "scroll").await?.into_sources();
            if hits.is_empty() {
                return Ok(());
            }
            debug!(hits = hits.len(), "scroll page");
            on_page(hits)?;
            if let Some(id) = next_id {
                scroll_id = id;
            }
        }
    }
}

#[async_trait]
impl SearchIndex for ElasticClient {
    async fn search(&self, index: &str, body: &Value) -> Result<Vec<Value>> {
        let url = format!("{}/{}/_search", self.base_url, index);
        let request = self.client.post(&url).json(body);
        let (_, hits) = self.send(request, "search").await?.into_sources();
        Ok(hits)
    }

    async fn scroll(&self, index: &str, body: &Value, on_page: &mut PageHandler<'_>) -> Result<()> {
        let url = format!(
            "{}/{}/_search?scroll={}&size={}",
            self.base_url, index, self.keep_alive, self.page_size
        );
        let request = self.client.post(&url).json(body);
        let (scroll_id, hits) = self.send(request, "scroll search").await?.into_sources();

        if hits.is_empty() {
            if let Some(id) = scroll_id {
                self.clear_scroll(&id).await;
            }
            return Ok(());
        }
        on_page(hits)?;

        let Some(scroll_id) = scroll_id else {
            return Ok(());
        };
        let outcome = self.drain_scroll(scroll_id.clone(), on_page).await;
        self.clear_scroll(&scroll_id).await;
        outcome
    }
}

/// In-memory document store evaluating `bool.must`, `match`, `term`,
/// `range`, `match_all`, `sort` and `size`
pub struct MemoryIndex {
    indices: RwLock<HashMap<String, Vec<Value>>>,
    page_size: usize,
}

impl Default for MemoryIndex {
    fn default() -> Self {
        Self::new(9000)
    }
}

impl MemoryIndex {
    /// Empty store paging scrolls by `page_size`
    pub fn new(page_size: usize) -> Self {
        Self {
            indices: RwLock::new(HashMap::new()),
            page_size: page_size.max(1),
        }
    }

    /// Append a document to `index`
    pub fn insert(&self, index: &str, doc: Value) {
        self.indices
            .write()
            .entry(index.to_string())
            .or_default()
            .push(doc);
    }

    /// Documents of `index` matching `body`, sorted and truncated
    fn evaluate(&self, index: &str, body: &Value, default_size: Option<usize>) -> Result<Vec<Value>> {
        let indices = self.indices.read();
        let Some(docs) = indices.get(index) else {
            return Ok(Vec::new());
        };

        let query = body.get("query").cloned().unwrap_or_else(|| json!({ "match_all": {} }));
        let mut hits = Vec::new();
        for doc in docs {
            if matches(&query, doc)? {
                hits.push(doc.clone());
            }
        }

        if let Some(sort) = body.get("sort").and_then(Value::as_array) {
            for key in sort.iter().rev() {
                let Some((field, spec)) = key.as_object().and_then(|o| o.iter().next()) else {
                    continue;
                };
                let descending = spec.get("order").and_then(Value::as_str) == Some("desc");
                hits.sort_by(|a, b| {
                    let ord = compare_values(&a[field.as_str()], &b[field.as_str()]);
                    if descending {
                        ord.reverse()
                    } else {
                        ord
                    }
                });
            }
        }

        let size = body
            .get("size")
            .and_then(Value::as_u64)
            .map(|s| s as usize)
            .or(default_size);
        if let Some(size) = size {
            hits.truncate(size);
        }
        Ok(hits)
    }
}

#[async_trait]
impl SearchIndex for MemoryIndex {
    async fn search(&self, index: &str, body: &Value) -> Result<Vec<Value>> {
        self.evaluate(index, body, Some(10))
    }

    async fn scroll(&self, index: &str, body: &Value, on_page: &mut PageHandler<'_>) -> Result<()> {
        let hits = self.evaluate(index, body, None)?;
        for page in hits.chunks(self.page_size) {
            on_page(page.to_vec())?;
        }
        Ok(())
    }
}

fn matches(query: &Value, doc: &Value) -> Result<bool> {
    let Some((kind, clause)) = query.as_object().and_then(|o| o.iter().next()) else {
        return Err(Error::Decode(format!("empty query clause {}", query)));
    };

    match kind.as_str() {
        "match_all" => Ok(true),
        "bool" => {
            let must = clause.get("must").and_then(Value::as_array);
            for sub in must.into_iter().flatten() {
                if !matches(sub, doc)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        "match" | "term" => {
            let Some((field, expected)) = clause.as_object().and_then(|o| o.iter().next()) else {
                return Ok(false);
            };
            let expected = expected.get("query").unwrap_or(expected);
            Ok(field_equals(&doc[field.as_str()], expected))
        }
        "range" => {
            let Some((field, bounds)) = clause.as_object().and_then(|o| o.iter().next()) else {
                return Ok(false);
            };
            let value = &doc[field.as_str()];
            let within = |op: &str, accept: fn(Ordering) -> bool| {
                bounds
                    .get(op)
                    .map_or(true, |bound| accept(compare_values(value, bound)))
            };
            Ok(!value.is_null()
                && within("gte", |o| o != Ordering::Less)
                && within("gt", |o| o == Ordering::Greater)
                && within("lte", |o| o != Ordering::Greater)
                && within("lt", |o| o == Ordering::Less))
        }
        other => Err(Error::Decode(format!("unsupported query clause {:?}", other))),
    }
}

fn field_equals(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::String(a), Value::String(e)) => a == e,
        (Value::Number(_), Value::String(e)) => actual.to_string() == *e,
        (Value::String(a), Value::Number(_)) => *a == expected.to_string(),
        _ => actual == expected,
    }
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        _ => match (a.as_str(), b.as_str()) {
            (Some(x), Some(y)) => x.cmp(y),
            _ => Ordering::Equal,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query;
    use crate::types::EpochWindow;

    fn seeded() -> MemoryIndex {
        let index = MemoryIndex::new(2);
        for (ts, receiver) in [(30, "b"), (10, "a"), (20, "a"), (40, "a"), (99, "a")] {
            index.insert(
                "transactions",
                json!({ "receiver": receiver, "timestamp": ts, "status": "success" }),
            );
        }
        index
    }

    #[tokio::test]
    async fn test_scroll_filters_sorts_and_pages() {
        let index = seeded();
        let body = query::transactions_to("a", EpochWindow { start: 0, end: 50 });

        let mut pages = Vec::new();
        index
            .scroll("transactions", &body, &mut |hits| {
                pages.push(hits.iter().map(|h| h["timestamp"].as_i64().unwrap()).collect::<Vec<_>>());
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(pages, vec![vec![10, 20], vec![40]]);
    }

    #[tokio::test]
    async fn test_search_latest_first() {
        let index = seeded();
        let body = json!({
            "query": { "match": { "receiver": "a" } },
            "sort": [{ "timestamp": { "order": "desc" } }],
            "size": 1,
        });
        let hits = index.search("transactions", &body).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0]["timestamp"], 99);
    }

    #[tokio::test]
    async fn test_unknown_index_is_empty() {
        let index = MemoryIndex::default();
        let hits = index.search("missing", &json!({})).await.unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn test_decode_hits_skips_bad_documents() {
        #[derive(Deserialize)]
        struct Doc {
            timestamp: i64,
        }
        let docs: Vec<Doc> = decode_hits(vec![json!({ "timestamp": 5 }), json!({ "timestamp": "x" })]);
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].timestamp, 5);
    }
}
