//! Gateway confirmation-protocol tests.
//!
//! The two-phase write gate must hold before any engine I/O happens, so
//! these tests run against registered but disconnected configs: an
//! unconfirmed write yields needs-confirmation without touching a client,
//! while reads and confirmed writes proceed to the adapter lookup (and fail
//! with NotConnected here, never with a confirmation demand).

use db_hub::db::{ConnectionManager, ConnectionRegistry};
use db_hub::error::CoreError;
use db_hub::indexer::SchemaIndexer;
use db_hub::models::{ConnectionConfig, EngineKind, QueryRequest};
use db_hub::query::QueryGateway;
use std::sync::Arc;
use std::time::Duration;

fn gateway_fixture(configs: Vec<ConnectionConfig>) -> (tempfile::TempDir, QueryGateway) {
    let dir = tempfile::tempdir().unwrap();
    let registry = ConnectionRegistry::load(dir.path().join("connections.json")).unwrap();
    for config in configs {
        registry.create(config).unwrap();
    }
    let manager = Arc::new(ConnectionManager::new(
        registry,
        Arc::new(SchemaIndexer::new()),
        Duration::from_secs(5),
    ));
    (dir, QueryGateway::new(manager))
}

fn mysql_config(id: &str) -> ConnectionConfig {
    let mut config = ConnectionConfig::new(id, "mysql", EngineKind::Mysql);
    config.host = Some("127.0.0.1".to_string());
    config
}

fn mongo_config(id: &str) -> ConnectionConfig {
    let mut config = ConnectionConfig::new(id, "mongo", EngineKind::Mongodb);
    config.host = Some("127.0.0.1".to_string());
    config
}

fn elastic_config(id: &str) -> ConnectionConfig {
    let mut config = ConnectionConfig::new(id, "es", EngineKind::Elasticsearch);
    config.host = Some("127.0.0.1".to_string());
    config
}

#[tokio::test]
async fn test_unconfirmed_delete_needs_confirmation_with_no_side_effect() {
    let (_dir, gateway) = gateway_fixture(vec![mysql_config("c1")]);

    let request = QueryRequest::new("c1", "DELETE FROM users");
    let outcome = gateway.execute(&request).await.unwrap();
    assert!(outcome.needs_confirmation());

    // Resubmitting unconfirmed is still side-effect-free and re-entrant.
    let outcome = gateway.execute(&request).await.unwrap();
    match outcome {
        db_hub::models::QueryOutcome::NeedsConfirmation { query, reason } => {
            assert_eq!(query, "DELETE FROM users");
            assert!(reason.contains("DELETE"));
        }
        other => panic!("expected needs-confirmation, got {:?}", other),
    }
}

#[tokio::test]
async fn test_confirmed_write_proceeds_to_adapter() {
    let (_dir, gateway) = gateway_fixture(vec![mysql_config("c1")]);

    // With confirmation the gate opens; the next obstacle is the missing
    // live connection, proving the adapter path was reached.
    let request = QueryRequest::new("c1", "DELETE FROM users").confirmed();
    let result = gateway.execute(&request).await;
    assert!(matches!(result, Err(CoreError::NotConnected { .. })));
}

#[tokio::test]
async fn test_select_never_needs_confirmation() {
    let (_dir, gateway) = gateway_fixture(vec![mysql_config("c1")]);

    for confirmed in [false, true] {
        let mut request = QueryRequest::new("c1", "SELECT * FROM users");
        request.confirmed = confirmed;
        let result = gateway.execute(&request).await;
        // Reads go straight to the adapter regardless of the flag.
        assert!(
            matches!(&result, Err(CoreError::NotConnected { .. })),
            "confirmed={}: expected NotConnected",
            confirmed
        );
    }
}

#[tokio::test]
async fn test_unknown_connection_is_not_found() {
    let (_dir, gateway) = gateway_fixture(vec![]);
    let request = QueryRequest::new("ghost", "SELECT 1");
    assert!(matches!(
        gateway.execute(&request).await,
        Err(CoreError::NotFound { .. })
    ));
}

#[tokio::test]
async fn test_document_write_gated_by_engine_rules() {
    let (_dir, gateway) = gateway_fixture(vec![mongo_config("m1")]);

    let request = QueryRequest::new(
        "m1",
        r#"{"collection": "users", "method": "deleteMany", "filter": {}}"#,
    );
    let outcome = gateway.execute(&request).await.unwrap();
    assert!(outcome.needs_confirmation());

    // A find on the same connection is not gated.
    let request = QueryRequest::new("m1", r#"{"collection": "users", "method": "find"}"#);
    assert!(matches!(
        gateway.execute(&request).await,
        Err(CoreError::NotConnected { .. })
    ));
}

#[tokio::test]
async fn test_search_index_write_gated_by_verb() {
    let (_dir, gateway) = gateway_fixture(vec![elastic_config("e1")]);

    let request = QueryRequest::new("e1", "DELETE /orders");
    let outcome = gateway.execute(&request).await.unwrap();
    assert!(outcome.needs_confirmation());

    let request = QueryRequest::new("e1", "GET /orders/_search");
    assert!(matches!(
        gateway.execute(&request).await,
        Err(CoreError::NotConnected { .. })
    ));
}

#[tokio::test]
async fn test_classification_uses_each_connections_engine() {
    // The same query string means different things per engine family: a
    // bare JSON payload is a write for the document engine when its method
    // says so, but always a read for the search-index engine.
    let payload = r#"{"collection": "users", "method": "deleteMany"}"#;
    let (_dir, gateway) = gateway_fixture(vec![mongo_config("m1"), elastic_config("e1")]);

    let outcome = gateway.execute(&QueryRequest::new("m1", payload)).await.unwrap();
    assert!(outcome.needs_confirmation());

    let result = gateway.execute(&QueryRequest::new("e1", payload)).await;
    assert!(matches!(result, Err(CoreError::NotConnected { .. })));
}
