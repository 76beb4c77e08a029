//! Query execution engine.
//!
//! Runs SQL that has passed the safety validator against a checked-out
//! connection with two guards in place: a read-only session hint and a
//! statement timeout, enforced both server-side (where the database has a
//! setting for it) and client-side with `tokio::time::timeout`.
//!
//! Results are fully materialised. An optional row cap bounds memory; when it
//! is hit the extra rows are dropped and the result is marked truncated.

use crate::db::pool::{ConnectionHandle, DbConnection, SqlPool};
use crate::db::types::RowToJson;
use crate::error::{DbError, DbResult, ExecutionFailure};
use crate::models::{DEFAULT_QUERY_TIMEOUT_SECS, QueryResult};
use crate::service::ValidatedSql;
use futures_util::future::BoxFuture;
use futures_util::{FutureExt, StreamExt};
use sqlx::{Column, Executor, Statement};
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, warn};

/// PostgreSQL: canceling statement due to statement timeout
const PG_QUERY_CANCELED: &str = "57014";

/// Query executor that handles database query execution.
#[derive(Debug, Clone)]
pub struct QueryExecutor {
    default_timeout_secs: u64,
    row_cap: Option<usize>,
}

impl QueryExecutor {
    /// Create a new query executor with default settings.
    pub fn new() -> Self {
        Self {
            default_timeout_secs: DEFAULT_QUERY_TIMEOUT_SECS,
            row_cap: None,
        }
    }

    /// Create a new query executor with custom settings. A zero timeout falls
    /// back to the default.
    pub fn with_defaults(timeout_secs: u64, row_cap: Option<usize>) -> Self {
        Self {
            default_timeout_secs: if timeout_secs == 0 {
                DEFAULT_QUERY_TIMEOUT_SECS
            } else {
                timeout_secs
            },
            row_cap: row_cap.filter(|cap| *cap > 0),
        }
    }

    pub fn default_timeout_secs(&self) -> u64 {
        self.default_timeout_secs
    }

    pub fn row_cap(&self) -> Option<usize> {
        self.row_cap
    }

    /// Check out a connection from `pool`, run `sql` with the default
    /// timeout, and give the connection back before returning.
    pub async fn execute_on_pool(&self, pool: &SqlPool, sql: &ValidatedSql) -> DbResult<QueryResult> {
        let mut handle = pool.acquire().await?;
        self.execute_read_only(&mut handle, sql, self.default_timeout_secs)
            .await
    }

    /// Execute validated SQL on `handle` and return all rows.
    ///
    /// `timeout_secs` must be positive.
    pub async fn execute_read_only(
        &self,
        handle: &mut ConnectionHandle,
        sql: &ValidatedSql,
        timeout_secs: u64,
    ) -> DbResult<QueryResult> {
        if timeout_secs == 0 {
            return Err(DbError::invalid_input(
                "Statement timeout must be a positive number of seconds",
            ));
        }
        self.execute_with_timeout(handle, sql, Duration::from_secs(timeout_secs))
            .await
    }

    /// Same as [`execute_read_only`](Self::execute_read_only) with a sub-second
    /// capable timeout.
    pub async fn execute_with_timeout(
        &self,
        handle: &mut ConnectionHandle,
        sql: &ValidatedSql,
        query_timeout: Duration,
    ) -> DbResult<QueryResult> {
        let start = Instant::now();

        handle.apply_read_only_hint().await;
        handle.apply_statement_timeout(query_timeout).await;

        debug!(
            pool = %handle.pool_name(),
            sql = %sql,
            timeout_ms = query_timeout.as_millis() as u64,
            row_cap = ?self.row_cap,
            "Executing query"
        );

        let fetch_limit = self.row_cap.map_or(usize::MAX, |cap| cap.saturating_add(1));
        let timeout_secs = query_timeout.as_secs().max(1);
        let mut fetched = match handle.connection() {
            DbConnection::MySql(c) => {
                let rows = (&mut **c).fetch(sql.as_str()).take(fetch_limit).collect::<Vec<_>>();
                match timeout(query_timeout, rows).await {
                    Ok(results) => collect_rows(results).map(|rows| self.process_rows(rows, start)),
                    Err(_) => Err(DbError::timeout(timeout_secs)),
                }
            }
            DbConnection::Postgres(c) => {
                let rows = (&mut **c).fetch(sql.as_str()).take(fetch_limit).collect::<Vec<_>>();
                match timeout(query_timeout, rows).await {
                    Ok(results) => collect_rows(results).map(|rows| self.process_rows(rows, start)),
                    Err(_) => Err(DbError::timeout(timeout_secs)),
                }
            }
            DbConnection::SQLite(c) => {
                let rows = (&mut **c).fetch(sql.as_str()).take(fetch_limit).collect::<Vec<_>>();
                match timeout(query_timeout, rows).await {
                    Ok(results) => collect_rows(results).map(|rows| self.process_rows(rows, start)),
                    Err(_) => Err(DbError::timeout(timeout_secs)),
                }
            }
        };

        // No row to read labels from: take them from the statement metadata
        if let Ok(result) = &mut fetched {
            if result.rows.is_empty() {
                result.columns = statement_columns(handle, sql, query_timeout).await;
            }
        }

        fetched.map_err(|e| {
            let e = server_timeout(e, timeout_secs);
            warn!(pool = %handle.pool_name(), error = %e, "Query failed");
            e
        })
    }

    /// Process rows from any database type into a QueryResult. Labels come from
    /// the first row; an empty result is labelled by the caller.
    fn process_rows<R: RowToJson>(&self, mut rows: Vec<R>, start: Instant) -> QueryResult {
        let truncated = self.row_cap.is_some_and(|cap| rows.len() > cap);
        if let Some(cap) = self.row_cap {
            rows.truncate(cap);
        }
        if truncated {
            warn!(limit = ?self.row_cap, "Query result truncated");
        }

        let columns = rows.first().map(|r| r.column_names()).unwrap_or_default();
        let rows = rows.iter().map(|r| r.to_json_map()).collect();

        QueryResult {
            columns,
            rows,
            truncated,
            execution_time_ms: start.elapsed().as_millis() as u64,
        }
    }
}

impl Default for QueryExecutor {
    fn default() -> Self {
        Self::new()
    }
}

/// Column labels of `sql` as reported by preparing it. Empty when the driver
/// cannot describe the statement in time.
async fn statement_columns(
    handle: &mut ConnectionHandle,
    sql: &ValidatedSql,
    limit: Duration,
) -> Vec<String> {
    let described = match handle.connection() {
        DbConnection::MySql(c) => timeout(limit, prepared_columns(&mut **c, sql.as_str())).await,
        DbConnection::Postgres(c) => timeout(limit, prepared_columns(&mut **c, sql.as_str())).await,
        DbConnection::SQLite(c) => timeout(limit, prepared_columns(&mut **c, sql.as_str())).await,
    };
    match described {
        Ok(Ok(columns)) => columns,
        Ok(Err(e)) => {
            debug!(error = %e, "Statement metadata unavailable");
            Vec::new()
        }
        Err(_) => Vec::new(),
    }
}

fn prepared_columns<'c, E>(conn: E, sql: &'c str) -> BoxFuture<'c, Result<Vec<String>, sqlx::Error>>
where
    E: Executor<'c> + 'c,
{
    async move {
        let statement = conn.prepare(sql).await?;
        Ok(statement
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect())
    }
    .boxed()
}

fn collect_rows<R>(results: Vec<Result<R, sqlx::Error>>) -> DbResult<Vec<R>> {
    let mut rows = Vec::with_capacity(results.len());
    for result in results {
        rows.push(result.map_err(DbError::from)?);
    }
    Ok(rows)
}

/// Statements cancelled by the server-side limit are timeouts too.
fn server_timeout(err: DbError, timeout_secs: u64) -> DbError {
    match &err {
        DbError::Execution {
            kind: ExecutionFailure::Database,
            message,
            sql_state,
        } if sql_state.as_deref() == Some(PG_QUERY_CANCELED)
            || message.contains("maximum statement execution time exceeded") =>
        {
            DbError::timeout(timeout_secs)
        }
        _ => err,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_executor_defaults() {
        let executor = QueryExecutor::new();
        assert_eq!(executor.default_timeout_secs(), DEFAULT_QUERY_TIMEOUT_SECS);
        assert_eq!(executor.row_cap(), None);
    }

    #[test]
    fn test_executor_custom_settings() {
        let executor = QueryExecutor::with_defaults(60, Some(500));
        assert_eq!(executor.default_timeout_secs(), 60);
        assert_eq!(executor.row_cap(), Some(500));
    }

    #[test]
    fn test_zero_settings_fall_back() {
        let executor = QueryExecutor::with_defaults(0, Some(0));
        assert_eq!(executor.default_timeout_secs(), DEFAULT_QUERY_TIMEOUT_SECS);
        assert_eq!(executor.row_cap(), None);
    }

    #[test]
    fn test_server_side_cancel_is_timeout() {
        let pg = DbError::execution(
            ExecutionFailure::Database,
            "canceling statement due to statement timeout",
            Some(PG_QUERY_CANCELED.to_string()),
        );
        assert!(server_timeout(pg, 15).is_timeout());

        let mysql = DbError::execution(
            ExecutionFailure::Database,
            "Query execution was interrupted, maximum statement execution time exceeded",
            Some("HY000".to_string()),
        );
        assert!(server_timeout(mysql, 15).is_timeout());

        let syntax = DbError::execution(ExecutionFailure::Database, "near \"SELEC\"", None);
        assert!(!server_timeout(syntax, 15).is_timeout());
    }
}
