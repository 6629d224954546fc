//! Document engine adapter (MongoDB).
//!
//! Wraps a `mongodb::Client` behind the uniform capability surface. Raw
//! queries are JSON command payloads of the form
//! `{"collection": "users", "method": "find", "filter": {...}}`; document
//! fields map to record fields, with nested structures kept as structured
//! JSON values in a single field.

use crate::error::{CoreError, CoreResult};
use crate::models::{ColumnInfo, IndexInfo, ObjectKind, RowPage, TableInfo, clamp_page_size};
use futures_util::StreamExt;
use mongodb::bson::{Bson, Document, doc};
use mongodb::options::{ClientOptions, Credential, IndexOptions, ServerAddress};
use mongodb::{Client, IndexModel};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use super::adapter::NativeResult;

/// Number of documents sampled when inferring a collection's structure.
const STRUCTURE_SAMPLE_SIZE: i64 = 20;

/// Default result cap for raw find/aggregate payloads without an explicit limit.
const DEFAULT_RESULT_LIMIT: i64 = 100;

/// Live MongoDB client handle. Cheap to clone; clones share the topology.
#[derive(Debug, Clone)]
pub struct MongoEngine {
    client: Client,
}

impl MongoEngine {
    /// Connect using the full URI when configured, otherwise the discrete
    /// host/port/credential fields. A supplied URI wins over everything,
    /// including tunnel endpoint substitution.
    pub async fn connect(
        config: &crate::models::ConnectionConfig,
        host: &str,
        port: u16,
        connect_timeout: Duration,
    ) -> CoreResult<Self> {
        let options = match &config.uri {
            Some(uri) => ClientOptions::parse(uri)
                .await
                .map_err(|e| CoreError::connect(e.to_string()))?,
            None => {
                let mut options = ClientOptions::default();
                options.hosts = vec![ServerAddress::Tcp {
                    host: host.to_string(),
                    port: Some(port),
                }];
                if let Some(username) = &config.username {
                    let mut credential = Credential::default();
                    credential.username = Some(username.clone());
                    credential.password = config.password.clone();
                    options.credential = Some(credential);
                }
                options
            }
        };

        let mut options = options;
        options.server_selection_timeout = Some(connect_timeout);

        let client =
            Client::with_options(options).map_err(|e| CoreError::connect(e.to_string()))?;
        Ok(Self { client })
    }

    pub async fn ping(&self) -> CoreResult<()> {
        self.client
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .await?;
        Ok(())
    }

    pub async fn list_databases(&self) -> CoreResult<Vec<String>> {
        Ok(self.client.list_database_names().await?)
    }

    pub async fn list_tables(&self, database: &str) -> CoreResult<Vec<TableInfo>> {
        let mut names = self
            .client
            .database(database)
            .list_collection_names()
            .await?;
        names.sort();
        Ok(names
            .into_iter()
            .map(|name| TableInfo::new(name, ObjectKind::Collection))
            .collect())
    }

    /// Infer a collection's fields by sampling documents and unioning the
    /// BSON type names seen per field.
    pub async fn describe(&self, database: &str, collection: &str) -> CoreResult<Vec<ColumnInfo>> {
        let coll = self
            .client
            .database(database)
            .collection::<Document>(collection);

        let mut cursor = coll.find(doc! {}).limit(STRUCTURE_SAMPLE_SIZE).await?;
        let mut field_types: BTreeMap<String, BTreeSet<&'static str>> = BTreeMap::new();
        while let Some(document) = cursor.next().await {
            for (key, value) in &document? {
                field_types
                    .entry(key.clone())
                    .or_default()
                    .insert(bson_type_name(value));
            }
        }

        Ok(field_types
            .into_iter()
            .map(|(name, types)| {
                let data_type = types.into_iter().collect::<Vec<_>>().join("/");
                let key = if name == "_id" { "PRI" } else { "" };
                ColumnInfo::new(name, data_type, true).with_key(key)
            })
            .collect())
    }

    pub async fn list_indexes(
        &self,
        database: &str,
        collection: &str,
    ) -> CoreResult<Vec<IndexInfo>> {
        let coll = self
            .client
            .database(database)
            .collection::<Document>(collection);

        let mut cursor = coll.list_indexes().await?;
        let mut indexes = Vec::new();
        while let Some(model) = cursor.next().await {
            let model: IndexModel = model?;
            let name = model
                .options
                .as_ref()
                .and_then(|o| o.name.clone())
                .unwrap_or_default();
            let unique = model
                .options
                .as_ref()
                .and_then(|o| o.unique)
                .unwrap_or(false);
            indexes.push(IndexInfo {
                name,
                columns: model.keys.keys().cloned().collect(),
                unique,
            });
        }
        Ok(indexes)
    }

    pub async fn page_rows(
        &self,
        database: &str,
        collection: &str,
        page: u32,
        page_size: u32,
    ) -> CoreResult<RowPage> {
        let page = page.max(1);
        let page_size = clamp_page_size(page_size);
        let coll = self
            .client
            .database(database)
            .collection::<Document>(collection);

        let total = coll.estimated_document_count().await?;

        let skip = (page as u64 - 1) * page_size as u64;
        let mut cursor = coll
            .find(doc! {})
            .skip(skip)
            .limit(page_size as i64)
            .await?;

        let mut documents = Vec::new();
        while let Some(document) = cursor.next().await {
            documents.push(document?);
        }

        let (columns, rows) = documents_to_records(&documents);
        Ok(RowPage {
            columns,
            rows,
            page,
            page_size,
            total: Some(total),
        })
    }

    /// Run a JSON command payload with no rewriting.
    pub async fn run(&self, database: Option<&str>, query: &str) -> CoreResult<NativeResult> {
        let payload: JsonValue = serde_json::from_str(query)
            .map_err(|e| CoreError::invalid_input(format!("Invalid JSON query: {}", e)))?;

        let collection_name = payload
            .get("collection")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| CoreError::invalid_input("Missing 'collection' in query"))?;
        let method = payload
            .get("method")
            .and_then(JsonValue::as_str)
            .unwrap_or("find");
        let filter = json_to_document(payload.get("filter"))?;
        let limit = payload
            .get("limit")
            .and_then(JsonValue::as_i64)
            .unwrap_or(DEFAULT_RESULT_LIMIT);

        let database =
            database.ok_or_else(|| CoreError::invalid_input("No target database selected"))?;
        let coll = self
            .client
            .database(database)
            .collection::<Document>(collection_name);

        match method {
            "find" => {
                let mut find = coll.find(filter).limit(limit);
                if let Some(projection) = payload.get("projection") {
                    find = find.projection(json_to_document(Some(projection))?);
                }
                let mut cursor = find.await?;
                let mut documents = Vec::new();
                while let Some(document) = cursor.next().await {
                    documents.push(document?);
                }
                let (columns, rows) = documents_to_records(&documents);
                Ok(NativeResult::rows(columns, rows, None))
            }
            "count" => {
                let count = coll.count_documents(filter).await?;
                let mut row = serde_json::Map::new();
                row.insert("count".to_string(), JsonValue::Number(count.into()));
                Ok(NativeResult::rows(
                    vec!["count".to_string()],
                    vec![row],
                    Some(1),
                ))
            }
            "aggregate" => {
                let pipeline = json_to_documents(payload.get("pipeline"))?;
                let mut cursor = coll.aggregate(pipeline).await?;
                let mut documents = Vec::new();
                while let Some(document) = cursor.next().await {
                    documents.push(document?);
                }
                let (columns, rows) = documents_to_records(&documents);
                Ok(NativeResult::rows(columns, rows, None))
            }
            "distinct" => {
                let field = payload
                    .get("field")
                    .and_then(JsonValue::as_str)
                    .ok_or_else(|| CoreError::invalid_input("distinct requires 'field'"))?;
                let values = coll.distinct(field, filter).await?;
                let rows: Vec<_> = values
                    .iter()
                    .map(|v| {
                        let mut row = serde_json::Map::new();
                        row.insert(field.to_string(), bson_to_json(v));
                        row
                    })
                    .collect();
                Ok(NativeResult::rows(vec![field.to_string()], rows, None))
            }
            "insertOne" => {
                let document = json_to_document(payload.get("document"))?;
                coll.insert_one(document).await?;
                Ok(NativeResult::Affected(1))
            }
            "insertMany" => {
                let documents = json_to_documents(payload.get("documents"))?;
                let result = coll.insert_many(documents).await?;
                Ok(NativeResult::Affected(result.inserted_ids.len() as u64))
            }
            "updateOne" | "updateMany" => {
                let update = json_to_document(payload.get("update"))?;
                let result = if method == "updateOne" {
                    coll.update_one(filter, update).await?
                } else {
                    coll.update_many(filter, update).await?
                };
                Ok(NativeResult::Affected(result.modified_count))
            }
            "replaceOne" => {
                let replacement = json_to_document(payload.get("replacement"))?;
                let result = coll.replace_one(filter, replacement).await?;
                Ok(NativeResult::Affected(result.modified_count))
            }
            "deleteOne" | "deleteMany" => {
                let result = if method == "deleteOne" {
                    coll.delete_one(filter).await?
                } else {
                    coll.delete_many(filter).await?
                };
                Ok(NativeResult::Affected(result.deleted_count))
            }
            "drop" => {
                coll.drop().await?;
                Ok(NativeResult::Affected(0))
            }
            "createIndex" => {
                let keys = json_to_document(payload.get("keys"))?;
                let unique = payload
                    .get("unique")
                    .and_then(JsonValue::as_bool)
                    .unwrap_or(false);
                let model = IndexModel::builder()
                    .keys(keys)
                    .options(IndexOptions::builder().unique(unique).build())
                    .build();
                coll.create_index(model).await?;
                Ok(NativeResult::Affected(0))
            }
            "dropIndex" => {
                let name = payload
                    .get("name")
                    .and_then(JsonValue::as_str)
                    .ok_or_else(|| CoreError::invalid_input("dropIndex requires 'name'"))?;
                coll.drop_index(name).await?;
                Ok(NativeResult::Affected(0))
            }
            other => Err(CoreError::invalid_input(format!(
                "Unsupported method: {}",
                other
            ))),
        }
    }

    pub async fn close(self) {
        self.client.shutdown().await;
    }
}

/// Convert an optional JSON value into a BSON document; absent means empty.
fn json_to_document(value: Option<&JsonValue>) -> CoreResult<Document> {
    match value {
        None | Some(JsonValue::Null) => Ok(Document::new()),
        Some(value) => mongodb::bson::to_document(value)
            .map_err(|e| CoreError::invalid_input(format!("Invalid document: {}", e))),
    }
}

/// Convert an optional JSON array into a list of BSON documents.
fn json_to_documents(value: Option<&JsonValue>) -> CoreResult<Vec<Document>> {
    match value {
        None | Some(JsonValue::Null) => Ok(Vec::new()),
        Some(JsonValue::Array(items)) => items
            .iter()
            .map(|item| json_to_document(Some(item)))
            .collect(),
        Some(_) => Err(CoreError::invalid_input("Expected an array of documents")),
    }
}

/// Map documents to records: column order is the union of keys across all
/// documents with `_id` first, missing fields become null.
fn documents_to_records(
    documents: &[Document],
) -> (Vec<String>, Vec<serde_json::Map<String, JsonValue>>) {
    let mut all_keys = BTreeSet::new();
    all_keys.insert("_id".to_string());
    for document in documents {
        for key in document.keys() {
            all_keys.insert(key.clone());
        }
    }

    let columns: Vec<String> = all_keys.into_iter().collect();
    let rows = documents
        .iter()
        .map(|document| {
            columns
                .iter()
                .map(|key| {
                    (
                        key.clone(),
                        document.get(key).map(bson_to_json).unwrap_or(JsonValue::Null),
                    )
                })
                .collect()
        })
        .collect();
    (columns, rows)
}

/// Convert a BSON value to a JSON value for the common record shape.
fn bson_to_json(bson: &Bson) -> JsonValue {
    match bson {
        Bson::Null => JsonValue::Null,
        Bson::Boolean(b) => JsonValue::Bool(*b),
        Bson::Int32(i) => JsonValue::Number((*i).into()),
        Bson::Int64(i) => JsonValue::Number((*i).into()),
        Bson::Double(f) => serde_json::Number::from_f64(*f)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        Bson::String(s) => JsonValue::String(s.clone()),
        Bson::ObjectId(oid) => JsonValue::String(oid.to_hex()),
        Bson::DateTime(dt) => JsonValue::String(dt.to_string()),
        Bson::Array(arr) => JsonValue::Array(arr.iter().map(bson_to_json).collect()),
        Bson::Document(document) => JsonValue::Object(
            document
                .iter()
                .map(|(k, v)| (k.clone(), bson_to_json(v)))
                .collect(),
        ),
        Bson::Binary(bin) => JsonValue::String(format!("<binary {} bytes>", bin.bytes.len())),
        Bson::RegularExpression(regex) => {
            JsonValue::String(format!("/{}/{}", regex.pattern, regex.options))
        }
        Bson::Timestamp(ts) => {
            JsonValue::String(format!("Timestamp({}, {})", ts.time, ts.increment))
        }
        other => JsonValue::String(format!("{:?}", other)),
    }
}

/// Human-readable type name for a BSON value.
fn bson_type_name(value: &Bson) -> &'static str {
    match value {
        Bson::Null => "null",
        Bson::Boolean(_) => "bool",
        Bson::Int32(_) => "int32",
        Bson::Int64(_) => "int64",
        Bson::Double(_) => "double",
        Bson::String(_) => "string",
        Bson::ObjectId(_) => "ObjectId",
        Bson::DateTime(_) => "DateTime",
        Bson::Array(_) => "Array",
        Bson::Document(_) => "Document",
        Bson::Binary(_) => "Binary",
        Bson::RegularExpression(_) => "Regex",
        Bson::Timestamp(_) => "Timestamp",
        _ => "unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::oid::ObjectId;
    use serde_json::json;

    #[test]
    fn test_bson_to_json_scalars() {
        assert_eq!(bson_to_json(&Bson::Int32(7)), json!(7));
        assert_eq!(bson_to_json(&Bson::Boolean(true)), json!(true));
        assert_eq!(
            bson_to_json(&Bson::String("x".to_string())),
            json!("x")
        );
        assert_eq!(bson_to_json(&Bson::Null), JsonValue::Null);
    }

    #[test]
    fn test_bson_object_id_renders_as_hex() {
        let oid = ObjectId::new();
        let json = bson_to_json(&Bson::ObjectId(oid));
        assert_eq!(json, JsonValue::String(oid.to_hex()));
    }

    #[test]
    fn test_nested_document_stays_structured() {
        let nested = doc! { "address": { "city": "Berlin", "zip": "10115" } };
        let json = bson_to_json(&Bson::Document(nested));
        assert_eq!(json["address"]["city"], "Berlin");
    }

    #[test]
    fn test_documents_to_records_unions_keys_with_id_first() {
        let docs = vec![
            doc! { "_id": 1, "name": "a" },
            doc! { "_id": 2, "age": 30 },
        ];
        let (columns, rows) = documents_to_records(&docs);
        assert_eq!(columns[0], "_id");
        assert!(columns.contains(&"name".to_string()));
        assert!(columns.contains(&"age".to_string()));
        // Missing fields are padded with null.
        assert_eq!(rows[0]["age"], JsonValue::Null);
        assert_eq!(rows[1]["name"], JsonValue::Null);
    }

    #[test]
    fn test_json_to_document_rejects_non_object() {
        assert!(json_to_document(Some(&json!([1, 2]))).is_err());
        assert!(json_to_document(Some(&json!({"a": 1}))).is_ok());
        assert!(json_to_document(None).unwrap().is_empty());
    }

    #[test]
    fn test_json_to_documents_requires_array() {
        assert!(json_to_documents(Some(&json!({"a": 1}))).is_err());
        let docs = json_to_documents(Some(&json!([{"$match": {"x": 1}}]))).unwrap();
        assert_eq!(docs.len(), 1);
    }

    #[test]
    fn test_binary_renders_placeholder() {
        let bin = Bson::Binary(mongodb::bson::Binary {
            subtype: mongodb::bson::spec::BinarySubtype::Generic,
            bytes: vec![0, 1, 2],
        });
        assert_eq!(bson_to_json(&bin), json!("<binary 3 bytes>"));
    }
}
