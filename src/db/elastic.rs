//! Search-index engine adapter (Elasticsearch).
//!
//! Talks to the cluster over its HTTP API. Indices are exposed as "tables"
//! under the single pseudo-namespace `_all`; mappings become columns. Raw
//! queries are accepted in three shapes, detected automatically:
//!
//! - a console-style request: `POST /orders/_search` on the first line with
//!   an optional JSON body below,
//! - a bare JSON search body, run against all indices,
//! - a plain query-string (Lucene syntax), wrapped in a `query_string` query.

use crate::error::{CoreError, CoreResult};
use crate::models::{ColumnInfo, IndexInfo, ObjectKind, RowPage, TableInfo, clamp_page_size};
use reqwest::Method;
use serde_json::{Value as JsonValue, json};
use std::collections::BTreeSet;
use std::time::Duration;
use url::Url;

use super::adapter::NativeResult;

/// Pseudo-namespace returned by `list_databases`; the cluster has no
/// database concept of its own.
pub const PSEUDO_DATABASE: &str = "_all";

/// Path segments that mutate data even when requested with GET.
const MUTATING_PATH_SEGMENTS: &[&str] = &["_delete_by_query", "_update_by_query", "_forcemerge"];

/// A parsed console-style request line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleRequest {
    pub method: String,
    pub path: String,
    pub body: Option<String>,
}

impl ConsoleRequest {
    /// True when this request mutates data: any non-GET/HEAD verb, or a GET
    /// against a mutating path.
    pub fn is_write(&self) -> bool {
        if !matches!(self.method.as_str(), "GET" | "HEAD") {
            return true;
        }
        self.path
            .split(['/', '?'])
            .any(|segment| MUTATING_PATH_SEGMENTS.contains(&segment))
    }
}

/// Parse a console-style request (`VERB /path` + optional body lines).
/// Returns `None` when the payload is not in console shape.
pub fn parse_console_request(query: &str) -> Option<ConsoleRequest> {
    let trimmed = query.trim();
    let (first_line, rest) = match trimmed.split_once('\n') {
        Some((line, rest)) => (line.trim(), rest.trim()),
        None => (trimmed, ""),
    };

    let (verb, path) = first_line.split_once(char::is_whitespace)?;
    let verb = verb.to_ascii_uppercase();
    if !matches!(
        verb.as_str(),
        "GET" | "POST" | "PUT" | "DELETE" | "HEAD" | "PATCH"
    ) {
        return None;
    }

    let path = path.trim();
    if path.is_empty() {
        return None;
    }

    Some(ConsoleRequest {
        method: verb,
        path: if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{}", path)
        },
        body: if rest.is_empty() {
            None
        } else {
            Some(rest.to_string())
        },
    })
}

/// Live Elasticsearch handle. Cheap to clone; clones share the HTTP client.
#[derive(Debug, Clone)]
pub struct ElasticEngine {
    http: reqwest::Client,
    base_url: Url,
    username: Option<String>,
    password: Option<String>,
}

impl ElasticEngine {
    pub fn connect(
        config: &crate::models::ConnectionConfig,
        host: &str,
        port: u16,
        connect_timeout: Duration,
    ) -> CoreResult<Self> {
        let scheme = config.scheme.as_deref().unwrap_or("http");
        let base_url = Url::parse(&format!("{}://{}:{}", scheme, host, port))
            .map_err(|e| CoreError::connect(format!("Invalid cluster URL: {}", e)))?;

        let http = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| CoreError::connect(e.to_string()))?;

        Ok(Self {
            http,
            base_url,
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }

    fn request(&self, method: Method, path: &str) -> CoreResult<reqwest::RequestBuilder> {
        let url = self
            .base_url
            .join(path)
            .map_err(|e| CoreError::invalid_input(format!("Invalid request path: {}", e)))?;
        let mut builder = self.http.request(method, url);
        if let Some(username) = &self.username {
            builder = builder.basic_auth(username, self.password.as_deref());
        }
        Ok(builder)
    }

    /// Send a request and parse the JSON response, passing cluster error
    /// bodies through verbatim.
    async fn send(&self, builder: reqwest::RequestBuilder) -> CoreResult<JsonValue> {
        let response = builder.send().await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(CoreError::query(format!("{}: {}", status, text)));
        }
        if text.is_empty() {
            return Ok(JsonValue::Null);
        }
        serde_json::from_str(&text)
            .map_err(|e| CoreError::query(format!("Unparseable cluster response: {}", e)))
    }

    pub async fn ping(&self) -> CoreResult<()> {
        self.send(self.request(Method::GET, "/")?).await?;
        Ok(())
    }

    /// The cluster has no databases; a single pseudo-namespace stands in.
    pub async fn list_databases(&self) -> CoreResult<Vec<String>> {
        Ok(vec![PSEUDO_DATABASE.to_string()])
    }

    /// List indices as tables, skipping internal dot-prefixed ones.
    pub async fn list_tables(&self, _database: &str) -> CoreResult<Vec<TableInfo>> {
        let body = self
            .send(self.request(Method::GET, "/_cat/indices?format=json")?)
            .await?;

        let mut names: Vec<String> = body
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(|entry| entry.get("index").and_then(JsonValue::as_str))
            .filter(|name| !name.starts_with('.'))
            .map(str::to_string)
            .collect();
        names.sort();

        Ok(names
            .into_iter()
            .map(|name| TableInfo::new(name, ObjectKind::Index))
            .collect())
    }

    /// Flatten an index's mapping properties into columns.
    pub async fn describe(&self, _database: &str, index: &str) -> CoreResult<Vec<ColumnInfo>> {
        let body = self
            .send(self.request(Method::GET, &format!("/{}/_mapping", index))?)
            .await?;

        let properties = body
            .get(index)
            .and_then(|m| m.get("mappings"))
            .and_then(|m| m.get("properties"))
            .and_then(JsonValue::as_object);

        Ok(properties
            .into_iter()
            .flatten()
            .map(|(field, info)| {
                let data_type = info
                    .get("type")
                    .and_then(JsonValue::as_str)
                    .unwrap_or("object");
                ColumnInfo::new(field.clone(), data_type, true)
            })
            .collect())
    }

    /// Index-level secondary indexes do not exist on the cluster.
    pub async fn list_indexes(&self, _database: &str, _index: &str) -> CoreResult<Vec<IndexInfo>> {
        Ok(Vec::new())
    }

    pub async fn page_rows(
        &self,
        _database: &str,
        index: &str,
        page: u32,
        page_size: u32,
    ) -> CoreResult<RowPage> {
        let page = page.max(1);
        let page_size = clamp_page_size(page_size);
        let from = (page as u64 - 1) * page_size as u64;

        let body = self
            .send(
                self.request(Method::POST, &format!("/{}/_search", index))?
                    .json(&json!({
                        "query": { "match_all": {} },
                        "from": from,
                        "size": page_size,
                    })),
            )
            .await?;

        let (columns, rows, total) = hits_to_records(&body);
        Ok(RowPage {
            columns,
            rows,
            page,
            page_size,
            total,
        })
    }

    /// Run a raw query with no rewriting; see the module docs for the three
    /// accepted shapes.
    pub async fn run(&self, _database: Option<&str>, query: &str) -> CoreResult<NativeResult> {
        if let Some(request) = parse_console_request(query) {
            let method = Method::from_bytes(request.method.as_bytes())
                .map_err(|e| CoreError::invalid_input(format!("Invalid method: {}", e)))?;
            let is_write = request.is_write();
            let mut builder = self.request(method, &request.path)?;
            if let Some(body) = &request.body {
                let body: JsonValue = serde_json::from_str(body)
                    .map_err(|e| CoreError::invalid_input(format!("Invalid JSON body: {}", e)))?;
                builder = builder.json(&body);
            }
            let response = self.send(builder).await?;
            return Ok(normalize_response(&response, is_write));
        }

        // Bare search body or query-string: always a read against all indices.
        let search_body = if query.trim_start().starts_with('{') {
            serde_json::from_str(query)
                .map_err(|e| CoreError::invalid_input(format!("Invalid JSON query: {}", e)))?
        } else {
            json!({ "query": { "query_string": { "query": query.trim() } } })
        };

        let response = self
            .send(
                self.request(Method::POST, &format!("/{}/_search", PSEUDO_DATABASE))?
                    .json(&search_body),
            )
            .await?;
        Ok(normalize_response(&response, false))
    }

    pub async fn close(self) {
        // Nothing to tear down; dropping the HTTP client releases its pool.
    }
}

/// Map a search response's hits to records (`_id` plus `_source` fields);
/// returns declared columns, rows and the reported total when present.
fn hits_to_records(
    response: &JsonValue,
) -> (
    Vec<String>,
    Vec<serde_json::Map<String, JsonValue>>,
    Option<u64>,
) {
    let hits = response.get("hits");
    let total = hits.and_then(|h| h.get("total")).and_then(|t| match t {
        JsonValue::Number(n) => n.as_u64(),
        other => other.get("value").and_then(JsonValue::as_u64),
    });

    let mut documents: Vec<serde_json::Map<String, JsonValue>> = Vec::new();
    for hit in hits
        .and_then(|h| h.get("hits"))
        .and_then(JsonValue::as_array)
        .into_iter()
        .flatten()
    {
        let mut record = serde_json::Map::new();
        record.insert(
            "_id".to_string(),
            hit.get("_id").cloned().unwrap_or(JsonValue::Null),
        );
        if let Some(source) = hit.get("_source").and_then(JsonValue::as_object) {
            for (key, value) in source {
                record.insert(key.clone(), value.clone());
            }
        }
        documents.push(record);
    }

    let mut all_keys = BTreeSet::new();
    all_keys.insert("_id".to_string());
    for document in &documents {
        for key in document.keys() {
            all_keys.insert(key.clone());
        }
    }
    let columns: Vec<String> = all_keys.into_iter().collect();

    // Pad missing fields so every record carries the declared columns.
    for document in &mut documents {
        for key in &columns {
            document.entry(key.clone()).or_insert(JsonValue::Null);
        }
    }

    (columns, documents, total)
}

/// Normalize an arbitrary cluster response into the common result shape.
fn normalize_response(response: &JsonValue, is_write: bool) -> NativeResult {
    if response.get("hits").is_some() {
        let (columns, rows, total) = hits_to_records(response);
        return NativeResult::rows(columns, rows, total);
    }

    if is_write {
        // Bulk-style mutations report counts; single-document ops report a
        // "result" marker and count as one.
        let affected = ["deleted", "updated", "created"]
            .iter()
            .find_map(|key| response.get(*key).and_then(JsonValue::as_u64))
            .or_else(|| response.get("result").map(|_| 1))
            .unwrap_or(0);
        return NativeResult::Affected(affected);
    }

    // Non-search reads (cluster health, counts, ...) come back as one record.
    match response.as_object() {
        Some(object) => NativeResult::rows(
            object.keys().cloned().collect(),
            vec![object.clone()],
            None,
        ),
        None => NativeResult::rows(Vec::new(), Vec::new(), None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_console_request() {
        let req = parse_console_request("GET /orders/_search\n{\"query\":{}}").unwrap();
        assert_eq!(req.method, "GET");
        assert_eq!(req.path, "/orders/_search");
        assert!(req.body.is_some());
    }

    #[test]
    fn test_parse_console_request_adds_leading_slash() {
        let req = parse_console_request("delete orders").unwrap();
        assert_eq!(req.method, "DELETE");
        assert_eq!(req.path, "/orders");
        assert!(req.body.is_none());
    }

    #[test]
    fn test_parse_rejects_bare_json_and_query_strings() {
        assert!(parse_console_request("{\"query\":{\"match_all\":{}}}").is_none());
        assert!(parse_console_request("status:active AND city:berlin").is_none());
        assert!(parse_console_request("").is_none());
    }

    #[test]
    fn test_write_detection_by_verb() {
        assert!(parse_console_request("POST /orders/_doc\n{}").unwrap().is_write());
        assert!(parse_console_request("DELETE /orders").unwrap().is_write());
        assert!(!parse_console_request("GET /orders/_search").unwrap().is_write());
        assert!(!parse_console_request("HEAD /orders").unwrap().is_write());
    }

    #[test]
    fn test_get_against_mutating_alias_is_write() {
        let req = parse_console_request("GET /orders/_delete_by_query\n{}").unwrap();
        assert!(req.is_write());
    }

    #[test]
    fn test_hits_mapping_with_total_object() {
        let response = serde_json::json!({
            "hits": {
                "total": { "value": 2, "relation": "eq" },
                "hits": [
                    { "_id": "1", "_source": { "name": "a" } },
                    { "_id": "2", "_source": { "name": "b", "extra": 1 } },
                ]
            }
        });
        let (columns, rows, total) = hits_to_records(&response);
        assert_eq!(total, Some(2));
        assert_eq!(columns[0], "_id");
        assert!(columns.contains(&"extra".to_string()));
        assert_eq!(rows.len(), 2);
        // Missing field padded with null.
        assert_eq!(rows[0]["extra"], JsonValue::Null);
    }

    #[test]
    fn test_hits_mapping_with_legacy_numeric_total() {
        let response = serde_json::json!({
            "hits": { "total": 5, "hits": [] }
        });
        let (_, rows, total) = hits_to_records(&response);
        assert_eq!(total, Some(5));
        assert!(rows.is_empty());
    }

    #[test]
    fn test_normalize_write_response_counts() {
        let deleted = serde_json::json!({ "deleted": 7, "took": 3 });
        match normalize_response(&deleted, true) {
            NativeResult::Affected(n) => assert_eq!(n, 7),
            other => panic!("expected mutation, got {:?}", other),
        }

        let indexed = serde_json::json!({ "result": "created", "_id": "9" });
        match normalize_response(&indexed, true) {
            NativeResult::Affected(n) => assert_eq!(n, 1),
            other => panic!("expected mutation, got {:?}", other),
        }
    }

    #[test]
    fn test_normalize_read_object_becomes_single_record() {
        let health = serde_json::json!({ "status": "green", "number_of_nodes": 3 });
        match normalize_response(&health, false) {
            NativeResult::Rows { rows, .. } => {
                assert_eq!(rows.len(), 1);
                assert_eq!(rows[0]["status"], "green");
            }
            other => panic!("expected rows, got {:?}", other),
        }
    }
}
