//! Lexical write classification, one rule set per engine family.
//!
//! Classification runs before execution and decides whether a query must be
//! confirmed. It is deliberately lexical: adapters pass raw queries through
//! without parsing, so the gate only inspects the leading SQL verb, the
//! declared payload method, or the console request line.

use crate::db::elastic::parse_console_request;
use crate::models::EngineKind;

/// SQL verbs that mutate data or schema.
const SQL_WRITE_VERBS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "CREATE", "ALTER", "DROP", "TRUNCATE", "REPLACE",
];

/// Document payload methods that mutate data or schema.
const DOCUMENT_WRITE_METHODS: &[&str] = &[
    "insertOne",
    "insertMany",
    "updateOne",
    "updateMany",
    "replaceOne",
    "deleteOne",
    "deleteMany",
    "drop",
    "createIndex",
    "dropIndex",
];

/// Classify a raw query for the given engine family.
///
/// Returns the offending verb/method/request when the query is a write,
/// `None` for reads. Known limitation, kept deliberately: document-engine
/// read methods (`find`, `aggregate`, `count`, `distinct`) are never
/// classified as writes, even when an aggregation pipeline contains a
/// write stage such as `$out` or `$merge`.
pub fn write_operation(engine: EngineKind, query: &str) -> Option<String> {
    match engine {
        EngineKind::Mysql => relational_write_verb(query).map(str::to_string),
        EngineKind::Mongodb => document_write_method(query).map(str::to_string),
        EngineKind::Elasticsearch => search_write_operation(query),
    }
}

/// Relational rule: after stripping leading whitespace and comments, the
/// first word is matched case-insensitively against the write-verb set.
/// Word-boundary matching keeps identifiers like `UPDATEDAT` from matching.
pub fn relational_write_verb(sql: &str) -> Option<&'static str> {
    let stripped = strip_leading_trivia(sql);
    let word_len = stripped
        .find(|c: char| !c.is_ascii_alphanumeric() && c != '_')
        .unwrap_or(stripped.len());
    let first_word = &stripped[..word_len];

    SQL_WRITE_VERBS
        .iter()
        .find(|verb| first_word.eq_ignore_ascii_case(verb))
        .copied()
}

/// Strip leading whitespace, `--` and `#` line comments and `/* */` block
/// comments.
fn strip_leading_trivia(mut sql: &str) -> &str {
    loop {
        sql = sql.trim_start();
        if let Some(rest) = sql.strip_prefix("--").or_else(|| sql.strip_prefix("#")) {
            sql = rest.split_once('\n').map(|(_, tail)| tail).unwrap_or("");
        } else if let Some(rest) = sql.strip_prefix("/*") {
            sql = rest.split_once("*/").map(|(_, tail)| tail).unwrap_or("");
        } else {
            return sql;
        }
    }
}

/// Document rule: the payload's declared method (default `find`) is matched
/// against the write-method set. Unparseable payloads classify as reads -
/// the engine rejects them anyway, with its own message.
pub fn document_write_method(query: &str) -> Option<&'static str> {
    let payload: serde_json::Value = serde_json::from_str(query).ok()?;
    let method = payload
        .get("method")
        .and_then(serde_json::Value::as_str)
        .unwrap_or("find");
    DOCUMENT_WRITE_METHODS
        .iter()
        .find(|candidate| **candidate == method)
        .copied()
}

/// Search-index rule: console-style requests are writes for any non-GET/HEAD
/// verb, or for GET against a mutating alias; bare JSON bodies and
/// query-strings are searches.
fn search_write_operation(query: &str) -> Option<String> {
    let request = parse_console_request(query)?;
    if request.is_write() {
        Some(format!("{} {}", request.method, request.path))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ---- relational ----

    #[test]
    fn test_select_is_read() {
        assert_eq!(relational_write_verb("SELECT * FROM users"), None);
        assert_eq!(relational_write_verb("  show tables"), None);
        assert_eq!(relational_write_verb("EXPLAIN DELETE FROM users"), None);
    }

    #[test]
    fn test_write_verbs_detected() {
        assert_eq!(
            relational_write_verb("DELETE FROM users"),
            Some("DELETE")
        );
        assert_eq!(
            relational_write_verb("insert into t values (1)"),
            Some("INSERT")
        );
        assert_eq!(
            relational_write_verb("Truncate table logs"),
            Some("TRUNCATE")
        );
        assert_eq!(
            relational_write_verb("REPLACE INTO t VALUES (1)"),
            Some("REPLACE")
        );
    }

    #[test]
    fn test_word_boundary_not_fooled_by_identifiers() {
        // A column called UPDATEDAT must not look like UPDATE.
        assert_eq!(relational_write_verb("UPDATEDAT"), None);
        assert_eq!(relational_write_verb("DELETED_ROWS;"), None);
        assert_eq!(relational_write_verb("UPDATE users SET x = 1"), Some("UPDATE"));
    }

    #[test]
    fn test_leading_comments_stripped() {
        assert_eq!(
            relational_write_verb("-- cleanup\nDROP TABLE users"),
            Some("DROP")
        );
        assert_eq!(
            relational_write_verb("/* batch job */ DELETE FROM logs"),
            Some("DELETE")
        );
        assert_eq!(
            relational_write_verb("# comment\nSELECT 1"),
            None
        );
        assert_eq!(
            relational_write_verb("/* a */ /* b */\n  -- c\nALTER TABLE t ADD x INT"),
            Some("ALTER")
        );
    }

    #[test]
    fn test_write_verb_inside_literal_is_not_leading() {
        // Only the leading verb counts; a verb in the statement body does not.
        assert_eq!(
            relational_write_verb("SELECT * FROM audit WHERE action = 'DELETE'"),
            None
        );
    }

    #[test]
    fn test_empty_and_comment_only_are_reads() {
        assert_eq!(relational_write_verb(""), None);
        assert_eq!(relational_write_verb("-- nothing here"), None);
    }

    // ---- document ----

    #[test]
    fn test_document_reads() {
        assert_eq!(
            document_write_method(r#"{"collection": "users", "method": "find"}"#),
            None
        );
        assert_eq!(
            document_write_method(r#"{"collection": "users", "method": "aggregate"}"#),
            None
        );
        // Method defaults to find.
        assert_eq!(
            document_write_method(r#"{"collection": "users", "filter": {"age": 3}}"#),
            None
        );
    }

    #[test]
    fn test_document_writes() {
        assert_eq!(
            document_write_method(r#"{"collection": "users", "method": "deleteMany"}"#),
            Some("deleteMany")
        );
        assert_eq!(
            document_write_method(r#"{"collection": "users", "method": "insertOne"}"#),
            Some("insertOne")
        );
        assert_eq!(
            document_write_method(r#"{"collection": "users", "method": "drop"}"#),
            Some("drop")
        );
    }

    #[test]
    fn test_document_aggregate_with_out_stage_is_still_a_read() {
        // Documented limitation: write stages inside pipelines are not
        // inspected.
        let query = r#"{"collection": "users", "method": "aggregate",
                        "pipeline": [{"$out": "backup"}]}"#;
        assert_eq!(document_write_method(query), None);
    }

    #[test]
    fn test_document_invalid_json_is_a_read() {
        assert_eq!(document_write_method("not json"), None);
    }

    // ---- search-index ----

    #[test]
    fn test_search_reads() {
        assert_eq!(
            write_operation(EngineKind::Elasticsearch, "GET /orders/_search"),
            None
        );
        assert_eq!(
            write_operation(EngineKind::Elasticsearch, r#"{"query": {"match_all": {}}}"#),
            None
        );
        assert_eq!(
            write_operation(EngineKind::Elasticsearch, "status:active"),
            None
        );
    }

    #[test]
    fn test_search_writes() {
        assert!(
            write_operation(EngineKind::Elasticsearch, "DELETE /orders").is_some()
        );
        assert!(
            write_operation(EngineKind::Elasticsearch, "POST /orders/_doc\n{\"a\": 1}").is_some()
        );
        assert!(
            write_operation(
                EngineKind::Elasticsearch,
                "GET /orders/_delete_by_query\n{\"query\": {\"match_all\": {}}}"
            )
            .is_some()
        );
    }

    // ---- dispatch ----

    #[test]
    fn test_dispatch_per_engine() {
        assert_eq!(
            write_operation(EngineKind::Mysql, "DELETE FROM users"),
            Some("DELETE".to_string())
        );
        assert_eq!(
            write_operation(
                EngineKind::Mongodb,
                r#"{"collection": "users", "method": "updateMany"}"#
            ),
            Some("updateMany".to_string())
        );
        assert_eq!(write_operation(EngineKind::Mysql, "SELECT 1"), None);
    }
}
