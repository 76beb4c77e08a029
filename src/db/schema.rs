//! Schema introspection module.
//!
//! Reads table and column metadata from a checked-out connection into a
//! [`SchemaDescription`] for SQLite, PostgreSQL, and MySQL databases.
//!
//! # Architecture
//!
//! SQL queries are organized in the `queries` submodule with constants for each
//! database type. Database-specific implementations are in their respective
//! submodules (postgres, mysql, sqlite), each providing the same interface.
//!
//! Only base tables of the connection's active database/schema are listed,
//! in the catalog's own order. Any metadata error fails the whole call.

use crate::db::pool::{ConnectionHandle, DbConnection};
use crate::error::{DbError, DbResult};
use crate::models::{SchemaDescription, TableDescription};
use tracing::debug;

/// Schema introspector for database introspection.
pub struct SchemaIntrospector;

impl SchemaIntrospector {
    /// Describe every base table, or only those named in `table_filter`
    /// (case-insensitive) when it is non-empty.
    pub async fn describe_schema(
        handle: &mut ConnectionHandle,
        table_filter: Option<&[String]>,
    ) -> DbResult<SchemaDescription> {
        handle.apply_read_only_hint().await;
        let pool = handle.pool_name().to_string();

        let tables = match handle.connection() {
            DbConnection::MySql(c) => mysql::describe(c, table_filter).await,
            DbConnection::Postgres(c) => postgres::describe(c, table_filter).await,
            DbConnection::SQLite(c) => sqlite::describe(c, table_filter).await,
        }
        .map_err(|e| DbError::from(e).into_schema_error())?;

        debug!(pool = %pool, tables = tables.len(), "Described schema");
        Ok(SchemaDescription::new(tables))
    }
}

fn wanted(name: &str, filter: Option<&[String]>) -> bool {
    match filter {
        Some(names) if !names.is_empty() => names.iter().any(|n| n.trim().eq_ignore_ascii_case(name)),
        _ => true,
    }
}

// =============================================================================
// SQL Query Templates
// =============================================================================

mod queries {
    pub mod postgres {
        pub const LIST_TABLES: &str = r#"
            SELECT table_name::text AS table_name
            FROM information_schema.tables
            WHERE table_schema = current_schema()
            AND table_type = 'BASE TABLE'
            ORDER BY table_name
            "#;

        pub const DESCRIBE_COLUMNS: &str = r#"
            SELECT
                a.attname::text AS column_name,
                t.typname::text AS type_name,
                col_description(a.attrelid, a.attnum) AS remark
            FROM pg_catalog.pg_attribute a
            JOIN pg_catalog.pg_class c ON c.oid = a.attrelid
            JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
            JOIN pg_catalog.pg_type t ON t.oid = a.atttypid
            WHERE c.relname = $1
            AND n.nspname = current_schema()
            AND a.attnum > 0
            AND NOT a.attisdropped
            ORDER BY a.attnum
            "#;
    }

    pub mod mysql {
        pub const LIST_TABLES: &str = r#"
            SELECT CONVERT(TABLE_NAME USING utf8) AS TABLE_NAME
            FROM information_schema.TABLES
            WHERE TABLE_SCHEMA = DATABASE()
            AND TABLE_TYPE = 'BASE TABLE'
            ORDER BY TABLE_NAME
            "#;

        pub const DESCRIBE_COLUMNS: &str = r#"
            SELECT
                CONVERT(COLUMN_NAME USING utf8) AS COLUMN_NAME,
                CONVERT(UPPER(DATA_TYPE) USING utf8) AS DATA_TYPE,
                CONVERT(COLUMN_COMMENT USING utf8) AS COLUMN_COMMENT
            FROM information_schema.COLUMNS
            WHERE TABLE_SCHEMA = DATABASE()
            AND TABLE_NAME = ?
            ORDER BY ORDINAL_POSITION
            "#;
    }

    pub mod sqlite {
        pub const LIST_TABLES: &str = r#"
            SELECT name FROM sqlite_master
            WHERE type = 'table'
            AND name NOT LIKE 'sqlite_%'
            ORDER BY name
            "#;

        pub const DESCRIBE_COLUMNS: &str = "SELECT name, type FROM pragma_table_info(?) ORDER BY cid";
    }
}

// =============================================================================
// Database-Specific Implementations
// =============================================================================

mod postgres {
    use super::*;
    use crate::models::ColumnDescription;
    use sqlx::{PgConnection, Row};

    pub async fn describe(
        conn: &mut PgConnection,
        filter: Option<&[String]>,
    ) -> Result<Vec<TableDescription>, sqlx::Error> {
        let names: Vec<String> = sqlx::query_scalar(queries::postgres::LIST_TABLES)
            .fetch_all(&mut *conn)
            .await?;

        let mut tables = Vec::new();
        for name in names.into_iter().filter(|n| wanted(n, filter)) {
            let rows = sqlx::query(queries::postgres::DESCRIBE_COLUMNS)
                .bind(&name)
                .fetch_all(&mut *conn)
                .await?;

            let columns = rows
                .iter()
                .map(|row| {
                    Ok(ColumnDescription::new(
                        row.try_get::<String, _>("column_name")?,
                        row.try_get::<String, _>("type_name")?,
                    )
                    .with_remark(row.try_get::<Option<String>, _>("remark")?))
                })
                .collect::<Result<Vec<_>, sqlx::Error>>()?;

            tables.push(TableDescription::new(name, columns));
        }
        Ok(tables)
    }
}

mod mysql {
    use super::*;
    use crate::models::ColumnDescription;
    use sqlx::mysql::MySqlRow;
    use sqlx::{MySqlConnection, Row};

    /// MySQL may return VARBINARY instead of VARCHAR depending on charset configuration.
    fn get_optional_string(row: &MySqlRow, column: &str) -> Result<Option<String>, sqlx::Error> {
        match row.try_get::<Option<String>, _>(column) {
            Ok(v) => Ok(v),
            Err(_) => Ok(row
                .try_get::<Option<Vec<u8>>, _>(column)?
                .and_then(|bytes| String::from_utf8(bytes).ok())),
        }
    }

    fn get_string(row: &MySqlRow, column: &str) -> Result<String, sqlx::Error> {
        get_optional_string(row, column)?.ok_or_else(|| sqlx::Error::ColumnNotFound(column.into()))
    }

    pub async fn describe(
        conn: &mut MySqlConnection,
        filter: Option<&[String]>,
    ) -> Result<Vec<TableDescription>, sqlx::Error> {
        let rows = sqlx::query(queries::mysql::LIST_TABLES)
            .fetch_all(&mut *conn)
            .await?;
        let names = rows
            .iter()
            .map(|row| get_string(row, "TABLE_NAME"))
            .collect::<Result<Vec<_>, _>>()?;

        let mut tables = Vec::new();
        for name in names.into_iter().filter(|n| wanted(n, filter)) {
            let rows = sqlx::query(queries::mysql::DESCRIBE_COLUMNS)
                .bind(&name)
                .fetch_all(&mut *conn)
                .await?;

            let columns = rows
                .iter()
                .map(|row| {
                    Ok(ColumnDescription::new(
                        get_string(row, "COLUMN_NAME")?,
                        get_string(row, "DATA_TYPE")?,
                    )
                    .with_remark(get_optional_string(row, "COLUMN_COMMENT")?))
                })
                .collect::<Result<Vec<_>, sqlx::Error>>()?;

            tables.push(TableDescription::new(name, columns));
        }
        Ok(tables)
    }
}

mod sqlite {
    use super::*;
    use crate::models::ColumnDescription;
    use sqlx::{Row, SqliteConnection};

    pub async fn describe(
        conn: &mut SqliteConnection,
        filter: Option<&[String]>,
    ) -> Result<Vec<TableDescription>, sqlx::Error> {
        let names: Vec<String> = sqlx::query_scalar(queries::sqlite::LIST_TABLES)
            .fetch_all(&mut *conn)
            .await?;

        let mut tables = Vec::new();
        for name in names.into_iter().filter(|n| wanted(n, filter)) {
            let rows = sqlx::query(queries::sqlite::DESCRIBE_COLUMNS)
                .bind(&name)
                .fetch_all(&mut *conn)
                .await?;

            let columns = rows
                .iter()
                .map(|row| {
                    Ok(ColumnDescription::new(
                        row.try_get::<String, _>("name")?,
                        row.try_get::<String, _>("type")?,
                    ))
                })
                .collect::<Result<Vec<_>, sqlx::Error>>()?;

            tables.push(TableDescription::new(name, columns));
        }
        Ok(tables)
    }
}
