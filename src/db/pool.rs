//! Connection pool management.
//!
//! This module wraps database-specific pools (MySqlPool, PgPool, SqlitePool)
//! in a [`SqlPool`] that tracks how many connections callers currently hold.
//! Connections are only ever handed out as a [`ConnectionHandle`], which gives
//! the connection back and updates the count when dropped, on every exit path.

use crate::config::PoolOptions;
use crate::error::{ConnectionFailure, DbError, DbResult, is_auth_error, is_auth_message};
use crate::models::{Credentials, DatabaseType};
use sqlx::pool::PoolConnection;
use sqlx::{
    Executor, MySql, MySqlPool, PgPool, Postgres, Sqlite, SqlitePool,
    mysql::MySqlConnectOptions, mysql::MySqlPoolOptions, postgres::PgConnectOptions,
    postgres::PgPoolOptions, sqlite::SqliteConnectOptions, sqlite::SqlitePoolOptions,
};
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Database-specific connection pool (avoids AnyPool limitations).
#[derive(Debug, Clone)]
pub enum DbPool {
    MySql(MySqlPool),
    Postgres(PgPool),
    SQLite(SqlitePool),
}

impl DbPool {
    /// Close the connection pool.
    pub async fn close(&self) {
        match self {
            DbPool::MySql(pool) => pool.close().await,
            DbPool::Postgres(pool) => pool.close().await,
            DbPool::SQLite(pool) => pool.close().await,
        }
    }

    pub fn is_closed(&self) -> bool {
        match self {
            DbPool::MySql(pool) => pool.is_closed(),
            DbPool::Postgres(pool) => pool.is_closed(),
            DbPool::SQLite(pool) => pool.is_closed(),
        }
    }

    /// Get the database type for this pool.
    pub fn db_type(&self) -> DatabaseType {
        match self {
            DbPool::MySql(_) => DatabaseType::MySQL,
            DbPool::Postgres(_) => DatabaseType::PostgreSQL,
            DbPool::SQLite(_) => DatabaseType::SQLite,
        }
    }
}

struct PoolInner {
    name: String,
    pool: DbPool,
    /// Handles currently checked out. The reaper skips pools with a non-zero count.
    checked_out: AtomicUsize,
    created_at: Instant,
    /// std lock: never held across an await
    last_used: std::sync::RwLock<Instant>,
}

impl PoolInner {
    fn touch(&self) {
        if let Ok(mut last_used) = self.last_used.write() {
            *last_used = Instant::now();
        }
    }

    /// Saturates at 0 so an extra release can never wrap the counter.
    fn release(&self) {
        let result = self
            .checked_out
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                Some(count.saturating_sub(1))
            });
        if let Ok(0) = result {
            warn!(pool = %self.name, "Checked-out count underflow detected - extra release");
        }
    }
}

/// A bounded pool for one credential triple.
///
/// Cloning is cheap and every clone refers to the same physical pool;
/// [`SqlPool::ptr_eq`] tells whether two values are the same pool instance.
#[derive(Clone)]
pub struct SqlPool {
    inner: Arc<PoolInner>,
}

impl SqlPool {
    /// Build a pool for `credentials` and open its first connection.
    ///
    /// Username and password are applied as connect options, overriding any
    /// user info embedded in the URL. SQLite ignores both and opens the file
    /// read-only.
    pub async fn connect(credentials: &Credentials, options: &PoolOptions) -> DbResult<Self> {
        let db_type = credentials.database_type().ok_or_else(|| {
            DbError::connection(
                ConnectionFailure::Configuration,
                format!("Unsupported database URL: {}", credentials.masked_url()),
                "Use a mysql://, mariadb://, postgres://, postgresql:// or sqlite: URL",
            )
        })?;
        let name = format!("sql-pilot-pool-{:016x}", credentials.fingerprint());
        let url = credentials.connection_url();
        let acquire_timeout = options.connect_timeout();
        let idle_timeout = Some(options.idle_timeout());

        debug!(
            pool = %name,
            db_type = %db_type,
            url = %credentials.masked_url(),
            "Creating connection pool"
        );

        let pool = match db_type {
            DatabaseType::MySQL => {
                let mut connect = MySqlConnectOptions::from_str(url)
                    .map_err(|e| invalid_url(db_type, e))?
                    .charset("utf8mb4");
                if !credentials.username().is_empty() {
                    connect = connect.username(credentials.username());
                }
                if !credentials.password().is_empty() {
                    connect = connect.password(credentials.password());
                }

                let pool = MySqlPoolOptions::new()
                    .min_connections(options.min_connections)
                    .max_connections(options.max_connections)
                    .acquire_timeout(acquire_timeout)
                    .idle_timeout(idle_timeout)
                    .connect_with(connect)
                    .await
                    .map_err(|e| connect_error(db_type, e))?;
                DbPool::MySql(pool)
            }
            DatabaseType::PostgreSQL => {
                let mut connect =
                    PgConnectOptions::from_str(url).map_err(|e| invalid_url(db_type, e))?;
                if !credentials.username().is_empty() {
                    connect = connect.username(credentials.username());
                }
                if !credentials.password().is_empty() {
                    connect = connect.password(credentials.password());
                }

                let pool = PgPoolOptions::new()
                    .min_connections(options.min_connections)
                    .max_connections(options.max_connections)
                    .acquire_timeout(acquire_timeout)
                    .idle_timeout(idle_timeout)
                    .connect_with(connect)
                    .await
                    .map_err(|e| connect_error(db_type, e))?;
                DbPool::Postgres(pool)
            }
            DatabaseType::SQLite => {
                let connect = SqliteConnectOptions::from_str(url)
                    .map_err(|e| invalid_url(db_type, e))?
                    .read_only(true);

                let pool = SqlitePoolOptions::new()
                    .min_connections(options.min_connections)
                    .max_connections(options.max_connections)
                    .acquire_timeout(acquire_timeout)
                    .idle_timeout(idle_timeout)
                    .connect_with(connect)
                    .await
                    .map_err(|e| connect_error(db_type, e))?;
                DbPool::SQLite(pool)
            }
        };

        info!(pool = %name, db_type = %db_type, "Connection pool ready");

        let now = Instant::now();
        Ok(Self {
            inner: Arc::new(PoolInner {
                name,
                pool,
                checked_out: AtomicUsize::new(0),
                created_at: now,
                last_used: std::sync::RwLock::new(now),
            }),
        })
    }

    /// Check out a connection. Waits up to the connect timeout when every
    /// connection is busy.
    pub async fn acquire(&self) -> DbResult<ConnectionHandle> {
        let conn = match &self.inner.pool {
            DbPool::MySql(p) => DbConnection::MySql(p.acquire().await?),
            DbPool::Postgres(p) => DbConnection::Postgres(p.acquire().await?),
            DbPool::SQLite(p) => DbConnection::SQLite(p.acquire().await?),
        };
        self.inner.checked_out.fetch_add(1, Ordering::AcqRel);
        self.inner.touch();
        debug!(pool = %self.inner.name, "Connection checked out");

        Ok(ConnectionHandle {
            conn,
            pool: Arc::clone(&self.inner),
        })
    }

    /// Diagnostic name, `sql-pilot-pool-<hash of credentials>`.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn db_type(&self) -> DatabaseType {
        self.inner.pool.db_type()
    }

    /// Number of connections currently held through a [`ConnectionHandle`].
    pub fn checked_out(&self) -> usize {
        self.inner.checked_out.load(Ordering::Acquire)
    }

    pub fn created_at(&self) -> Instant {
        self.inner.created_at
    }

    /// Last checkout or release. Synchronous - does not hold locks across await.
    pub fn last_used(&self) -> Instant {
        self.inner
            .last_used
            .read()
            .map(|guard| *guard)
            .unwrap_or(self.inner.created_at)
    }

    /// True when nothing is checked out and the pool has not been used for `ttl`.
    pub fn is_idle_for(&self, ttl: Duration, now: Instant) -> bool {
        self.checked_out() == 0 && now.saturating_duration_since(self.last_used()) > ttl
    }

    /// Number of live `SqlPool` values referring to this pool, this one included.
    pub fn holders(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Record a use without checking anything out.
    pub fn touch(&self) {
        self.inner.touch();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.pool.is_closed()
    }

    /// Close the pool. Waits for checked-out connections to come back.
    pub async fn close(&self) {
        info!(pool = %self.inner.name, "Closing connection pool");
        self.inner.pool.close().await;
    }

    /// Whether two values refer to the same pool instance.
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }
}

impl std::fmt::Debug for SqlPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlPool")
            .field("name", &self.inner.name)
            .field("db_type", &self.db_type())
            .field("checked_out", &self.checked_out())
            .finish()
    }
}

/// A physical connection borrowed from one of the driver pools.
#[derive(Debug)]
pub enum DbConnection {
    MySql(PoolConnection<MySql>),
    Postgres(PoolConnection<Postgres>),
    SQLite(PoolConnection<Sqlite>),
}

/// Scoped checkout of one connection.
///
/// Dropping the handle returns the connection to its pool and decrements the
/// pool's checked-out count, whether the caller finished, failed or timed out.
pub struct ConnectionHandle {
    conn: DbConnection,
    pool: Arc<PoolInner>,
}

impl ConnectionHandle {
    pub fn db_type(&self) -> DatabaseType {
        match self.conn {
            DbConnection::MySql(_) => DatabaseType::MySQL,
            DbConnection::Postgres(_) => DatabaseType::PostgreSQL,
            DbConnection::SQLite(_) => DatabaseType::SQLite,
        }
    }

    pub fn pool_name(&self) -> &str {
        &self.pool.name
    }

    pub fn connection(&mut self) -> &mut DbConnection {
        &mut self.conn
    }

    /// Ask the session to reject writes.
    ///
    /// Best effort: a driver that refuses the hint only produces a warning.
    pub async fn apply_read_only_hint(&mut self) {
        let sql = match self.conn {
            DbConnection::MySql(_) => "SET SESSION TRANSACTION READ ONLY",
            DbConnection::Postgres(_) => "SET SESSION CHARACTERISTICS AS TRANSACTION READ ONLY",
            DbConnection::SQLite(_) => "PRAGMA query_only = ON",
        };
        if let Err(e) = self.execute_raw(sql).await {
            warn!(pool = %self.pool.name, error = %e, "Read-only hint not applied");
        }
    }

    /// Ask the server to abort statements running longer than `timeout`.
    ///
    /// Best effort, SQLite has no server-side equivalent. The executor always
    /// enforces the same limit on the client side as well.
    pub async fn apply_statement_timeout(&mut self, timeout: Duration) {
        let millis = timeout.as_millis();
        let sql = match self.conn {
            DbConnection::MySql(_) => format!("SET SESSION max_execution_time = {}", millis),
            DbConnection::Postgres(_) => format!("SET statement_timeout = {}", millis),
            DbConnection::SQLite(_) => return,
        };
        if let Err(e) = self.execute_raw(&sql).await {
            warn!(pool = %self.pool.name, error = %e, "Server-side statement timeout not applied");
        }
    }

    async fn execute_raw(&mut self, sql: &str) -> Result<(), sqlx::Error> {
        match &mut self.conn {
            DbConnection::MySql(c) => (&mut **c).execute(sql).await.map(|_| ()),
            DbConnection::Postgres(c) => (&mut **c).execute(sql).await.map(|_| ()),
            DbConnection::SQLite(c) => (&mut **c).execute(sql).await.map(|_| ()),
        }
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        self.pool.release();
        self.pool.touch();
        debug!(pool = %self.pool.name, "Connection returned");
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("pool", &self.pool.name)
            .field("db_type", &self.db_type())
            .finish()
    }
}

fn invalid_url(db_type: DatabaseType, err: sqlx::Error) -> DbError {
    DbError::connection(
        ConnectionFailure::Configuration,
        format!("Invalid {} connection string: {}", db_type, err),
        connection_suggestion(db_type),
    )
}

/// Map a failure while opening the first connection.
///
/// Anything the driver reports here is a connection problem, even errors that
/// would be statement errors later (e.g. an unknown database name).
fn connect_error(db_type: DatabaseType, err: sqlx::Error) -> DbError {
    if is_auth_error(&err) || is_auth_message(&err.to_string()) {
        return DbError::authentication();
    }
    let raw = err.to_string();
    match DbError::from(err) {
        e @ DbError::Connection { .. } => e,
        _ => DbError::connection(
            ConnectionFailure::Unreachable,
            format!("Failed to connect: {}", raw),
            connection_suggestion(db_type),
        ),
    }
}

fn connection_suggestion(db_type: DatabaseType) -> &'static str {
    match db_type {
        DatabaseType::MySQL => {
            "Check the host, port and database name: mysql://host:port/database"
        }
        DatabaseType::PostgreSQL => {
            "Check the host, port and database name: postgres://host:port/database"
        }
        DatabaseType::SQLite => "Check that the file exists: sqlite:path/to/db.sqlite",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_error_auth_is_stable() {
        let err = connect_error(
            DatabaseType::MySQL,
            sqlx::Error::Protocol(
                "Access denied for user 'root'@'10.0.0.1' (using password: YES)".to_string(),
            ),
        );
        assert!(err.is_authentication_failure());
    }

    #[test]
    fn test_connect_error_io_is_unreachable() {
        let err = connect_error(
            DatabaseType::PostgreSQL,
            sqlx::Error::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "connection refused",
            )),
        );
        assert!(matches!(
            err,
            DbError::Connection {
                kind: ConnectionFailure::Unreachable,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_unsupported_url_rejected() {
        let creds = Credentials::new("oracle://localhost/xe", "scott", "tiger");
        let err = SqlPool::connect(&creds, &PoolOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DbError::Connection {
                kind: ConnectionFailure::Configuration,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_missing_sqlite_file_is_connection_error() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite:{}", dir.path().join("missing.db").display());
        let err = SqlPool::connect(&Credentials::new(url, "", ""), &PoolOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Connection { .. }));
        assert!(!err.is_authentication_failure());
    }

    #[tokio::test]
    async fn test_handle_drop_releases_count() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let url = format!("sqlite:{}", file.path().display());
        let pool = SqlPool::connect(&Credentials::new(url, "", ""), &PoolOptions::default())
            .await
            .unwrap();
        assert_eq!(pool.checked_out(), 0);
        assert!(pool.name().starts_with("sql-pilot-pool-"));

        let first = pool.acquire().await.unwrap();
        let second = pool.acquire().await.unwrap();
        assert_eq!(pool.checked_out(), 2);
        drop(first);
        assert_eq!(pool.checked_out(), 1);
        drop(second);
        assert_eq!(pool.checked_out(), 0);

        pool.close().await;
        assert!(pool.is_closed());
    }

    #[tokio::test]
    async fn test_clones_share_identity() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let url = format!("sqlite:{}", file.path().display());
        let creds = Credentials::new(url, "", "");
        let a = SqlPool::connect(&creds, &PoolOptions::default()).await.unwrap();
        let b = SqlPool::connect(&creds, &PoolOptions::default()).await.unwrap();
        assert!(SqlPool::ptr_eq(&a, &a.clone()));
        assert!(!SqlPool::ptr_eq(&a, &b));
        assert_eq!(a.name(), b.name());
        a.close().await;
        b.close().await;
    }

    #[tokio::test]
    async fn test_idle_detection() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let url = format!("sqlite:{}", file.path().display());
        let pool = SqlPool::connect(&Credentials::new(url, "", ""), &PoolOptions::default())
            .await
            .unwrap();
        let later = Instant::now() + Duration::from_secs(120);
        assert!(pool.is_idle_for(Duration::from_secs(60), later));

        let handle = pool.acquire().await.unwrap();
        assert!(!pool.is_idle_for(Duration::from_secs(60), later));
        drop(handle);
        pool.close().await;
    }
}
