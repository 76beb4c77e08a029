//! Integration tests for read-only query execution against SQLite.
//!
//! Tests verify that:
//! - Rows are materialised in column metadata order
//! - The row cap truncates and flags the result
//! - A statement exceeding its timeout fails and releases its connection
//! - Driver errors surface as execution errors carrying the driver message
//! - The session rejects writes even when reached directly

use serde_json::json;
use sql_pilot::config::PoolOptions;
use sql_pilot::db::{DbConnection, QueryExecutor, SqlPool};
use sql_pilot::error::{DbError, ExecutionFailure};
use sql_pilot::models::Credentials;
use sql_pilot::service::SqlSafetyValidator;
use sqlx::sqlite::SqlitePoolOptions;
use std::time::Duration;
use tempfile::NamedTempFile;

/// A database with `users(id INT, name VARCHAR)` holding two rows.
async fn seeded_db() -> NamedTempFile {
    let file = NamedTempFile::new().unwrap();
    let url = format!("sqlite:{}?mode=rwc", file.path().display());
    let pool = SqlitePoolOptions::new().connect(&url).await.unwrap();
    for sql in [
        "CREATE TABLE users (id INT, name VARCHAR(50))",
        "INSERT INTO users VALUES (1, 'alice'), (2, 'bob')",
        "CREATE TABLE payloads (id INTEGER PRIMARY KEY, body BLOB, price REAL)",
        "INSERT INTO payloads VALUES (1, x'68656c6c6f', 9.5), (2, x'ff00', NULL)",
    ] {
        sqlx::query(sql).execute(&pool).await.unwrap();
    }
    pool.close().await;
    file
}

async fn open(file: &NamedTempFile) -> SqlPool {
    let credentials = Credentials::new(format!("sqlite:{}", file.path().display()), "", "");
    SqlPool::connect(&credentials, &PoolOptions::default())
        .await
        .unwrap()
}

#[tokio::test]
async fn test_select_returns_rows_in_column_order() {
    let file = seeded_db().await;
    let pool = open(&file).await;
    let executor = QueryExecutor::new();

    let sql = SqlSafetyValidator::validate("SELECT * FROM users ORDER BY id").unwrap();
    let result = executor.execute_on_pool(&pool, &sql).await.unwrap();

    assert_eq!(result.columns, vec!["id", "name"]);
    assert_eq!(result.row_count(), 2);
    assert!(!result.truncated);
    assert_eq!(json!(result.rows[0]), json!({"id": 1, "name": "alice"}));
    assert_eq!(json!(result.rows[1]), json!({"id": 2, "name": "bob"}));

    // Key order follows the select list, not the alphabet
    let sql = SqlSafetyValidator::validate("SELECT name, id FROM users WHERE id = 1").unwrap();
    let result = executor.execute_on_pool(&pool, &sql).await.unwrap();
    assert_eq!(result.columns, vec!["name", "id"]);
    let keys: Vec<_> = result.rows[0].keys().cloned().collect();
    assert_eq!(keys, vec!["name", "id"]);

    assert_eq!(pool.checked_out(), 0);
    pool.close().await;
}

#[tokio::test]
async fn test_expression_and_binary_columns() {
    let file = seeded_db().await;
    let pool = open(&file).await;
    let executor = QueryExecutor::new();

    let sql = SqlSafetyValidator::validate("SELECT count(*) AS n, 1.5 AS half FROM users").unwrap();
    let result = executor.execute_on_pool(&pool, &sql).await.unwrap();
    assert_eq!(json!(result.rows[0]), json!({"n": 2, "half": 1.5}));

    let sql = SqlSafetyValidator::validate("SELECT body, price FROM payloads ORDER BY id").unwrap();
    let result = executor.execute_on_pool(&pool, &sql).await.unwrap();
    assert_eq!(result.rows[0]["body"], json!("hello"));
    assert_eq!(result.rows[0]["price"], json!(9.5));
    // Not UTF-8: base64
    assert_eq!(result.rows[1]["body"], json!("/wA="));
    assert_eq!(result.rows[1]["price"], json!(null));

    pool.close().await;
}

#[tokio::test]
async fn test_empty_result_keeps_column_labels() {
    let file = seeded_db().await;
    let pool = open(&file).await;

    let sql = SqlSafetyValidator::validate("SELECT * FROM users WHERE id > 100").unwrap();
    let result = QueryExecutor::new().execute_on_pool(&pool, &sql).await.unwrap();
    assert_eq!(result.row_count(), 0);
    assert_eq!(result.columns, vec!["id", "name"]);
    assert!(!result.truncated);

    let sql = SqlSafetyValidator::validate("SELECT name AS who, id FROM users WHERE 1 = 0").unwrap();
    let result = QueryExecutor::new().execute_on_pool(&pool, &sql).await.unwrap();
    assert_eq!(result.columns, vec!["who", "id"]);

    pool.close().await;
}

#[tokio::test]
async fn test_row_cap_truncates() {
    let file = seeded_db().await;
    let pool = open(&file).await;
    let executor = QueryExecutor::with_defaults(15, Some(1));

    let sql = SqlSafetyValidator::validate("SELECT id FROM users ORDER BY id").unwrap();
    let result = executor.execute_on_pool(&pool, &sql).await.unwrap();
    assert_eq!(result.row_count(), 1);
    assert!(result.truncated);
    assert_eq!(result.rows[0]["id"], json!(1));

    // Exactly at the cap is not truncation
    let sql = SqlSafetyValidator::validate("SELECT id FROM users WHERE id = 2").unwrap();
    let result = executor.execute_on_pool(&pool, &sql).await.unwrap();
    assert_eq!(result.row_count(), 1);
    assert!(!result.truncated);

    pool.close().await;
}

#[tokio::test]
async fn test_timeout_releases_connection() {
    let file = seeded_db().await;
    let pool = open(&file).await;
    let executor = QueryExecutor::with_defaults(1, None);
    let before = pool.checked_out();

    let sql = SqlSafetyValidator::validate(
        "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c WHERE x < 500000000) \
         SELECT count(*) FROM c",
    )
    .unwrap();
    let err = executor.execute_on_pool(&pool, &sql).await.unwrap_err();

    assert!(err.is_timeout(), "expected timeout, got {err:?}");
    assert!(matches!(
        err,
        DbError::Execution {
            kind: ExecutionFailure::Timeout,
            ..
        }
    ));
    assert_eq!(pool.checked_out(), before);
    // The interrupted statement keeps its worker busy; the pool is left open
}

#[tokio::test]
async fn test_sub_second_timeout_on_handle() {
    let file = seeded_db().await;
    let pool = open(&file).await;
    let executor = QueryExecutor::new();

    let sql = SqlSafetyValidator::validate(
        "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c WHERE x < 500000000) \
         SELECT max(x) FROM c",
    )
    .unwrap();
    {
        let mut handle = pool.acquire().await.unwrap();
        assert_eq!(pool.checked_out(), 1);
        let err = executor
            .execute_with_timeout(&mut handle, &sql, Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }
    assert_eq!(pool.checked_out(), 0);
}

#[tokio::test]
async fn test_zero_timeout_is_rejected() {
    let file = seeded_db().await;
    let pool = open(&file).await;
    let mut handle = pool.acquire().await.unwrap();

    let sql = SqlSafetyValidator::validate("SELECT 1").unwrap();
    let err = QueryExecutor::new()
        .execute_read_only(&mut handle, &sql, 0)
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::InvalidInput { .. }));

    drop(handle);
    pool.close().await;
}

#[tokio::test]
async fn test_driver_error_is_execution_error() {
    let file = seeded_db().await;
    let pool = open(&file).await;

    let sql = SqlSafetyValidator::validate("SELECT * FROM no_such_table").unwrap();
    let err = QueryExecutor::new()
        .execute_on_pool(&pool, &sql)
        .await
        .unwrap_err();

    match err {
        DbError::Execution { kind, message, .. } => {
            assert_eq!(kind, ExecutionFailure::Database);
            assert!(message.contains("no_such_table"), "{message}");
        }
        other => panic!("expected execution error, got {other:?}"),
    }
    assert_eq!(pool.checked_out(), 0);
    pool.close().await;
}

#[tokio::test]
async fn test_session_is_read_only() {
    let file = seeded_db().await;
    let pool = open(&file).await;
    let mut handle = pool.acquire().await.unwrap();
    handle.apply_read_only_hint().await;

    let DbConnection::SQLite(conn) = handle.connection() else {
        panic!("expected a SQLite connection");
    };
    let write = sqlx::query("DELETE FROM users").execute(&mut **conn).await;
    assert!(write.is_err(), "writes must be rejected");

    drop(handle);
    let sql = SqlSafetyValidator::validate("SELECT count(*) AS n FROM users").unwrap();
    let result = QueryExecutor::new().execute_on_pool(&pool, &sql).await.unwrap();
    assert_eq!(result.rows[0]["n"], json!(2));
    pool.close().await;
}
