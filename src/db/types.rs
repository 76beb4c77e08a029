//! Database-agnostic type mappings.
//!
//! This module turns driver rows into JSON maps.
//!
//! # Architecture
//!
//! Type conversion uses a two-phase approach:
//! 1. `TypeCategory` classifies column types into logical categories
//! 2. Database-specific decoders handle the actual value extraction
//!
//! A value that cannot be decoded into its category becomes JSON `null`
//! rather than failing the whole result.

use crate::models::{DatabaseType, Row};
use serde_json::Value as JsonValue;
use sqlx::mysql::{MySqlRow, MySqlTypeInfo, MySqlValueRef};
use sqlx::postgres::{PgRow, PgTypeInfo, PgValueRef};
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, ColumnIndex, Decode, Row as DriverRow, Type, TypeInfo, ValueRef};

// =============================================================================
// Type Classification
// =============================================================================

/// Logical category for database column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    Text,
    Binary,
    Json,
    Uuid,
    Timestamp,
    TimestampTz,
    Date,
    Time,
    Unknown,
}

/// Classify a database type name into a logical category.
pub fn categorize_type(type_name: &str, db: DatabaseType) -> TypeCategory {
    let lower = type_name.to_lowercase();

    // Decimal/Numeric - check first as it overlaps with "numeric" in float checks
    if lower.contains("decimal") || lower.contains("numeric") {
        // SQLite's NUMERIC is actually a float
        if db == DatabaseType::SQLite && lower == "numeric" {
            return TypeCategory::Float;
        }
        return TypeCategory::Decimal;
    }

    // Boolean - before integers so MySQL's BOOLEAN alias is not taken for TINYINT
    if lower == "bool" || lower == "boolean" {
        return TypeCategory::Boolean;
    }

    // Integer types ("point" would otherwise match "int")
    if (lower.contains("int") && !lower.contains("point"))
        || lower.contains("serial")
        || lower == "tiny"
        || lower == "year"
    {
        return TypeCategory::Integer;
    }

    // Float types
    if lower.contains("float") || lower.contains("double") || lower == "real" {
        return TypeCategory::Float;
    }

    // JSON types
    if lower == "json" || lower == "jsonb" {
        return TypeCategory::Json;
    }

    // UUID (PostgreSQL)
    if lower == "uuid" {
        return TypeCategory::Uuid;
    }

    // Binary types
    if lower.contains("blob") || lower.contains("binary") || lower == "bytea" {
        return TypeCategory::Binary;
    }

    // SQLite stores dates as text; let the text decoder handle them
    if db != DatabaseType::SQLite {
        match lower.as_str() {
            "timestamptz" => return TypeCategory::TimestampTz,
            "timestamp" | "datetime" => return TypeCategory::Timestamp,
            "date" => return TypeCategory::Date,
            "time" => return TypeCategory::Time,
            _ => {}
        }
    }

    if lower.contains("char") || lower.contains("text") || lower == "name" {
        return TypeCategory::Text;
    }

    TypeCategory::Unknown
}

// =============================================================================
// Decimal Type Support
// =============================================================================

/// Wrapper type for raw DECIMAL/NUMERIC values as strings.
/// This preserves the exact database representation.
#[derive(Debug)]
pub struct RawDecimal(pub String);

impl Type<sqlx::MySql> for RawDecimal {
    fn type_info() -> MySqlTypeInfo {
        <String as Type<sqlx::MySql>>::type_info()
    }

    fn compatible(ty: &MySqlTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("decimal") || name.contains("numeric")
    }
}

impl<'r> Decode<'r, sqlx::MySql> for RawDecimal {
    fn decode(value: MySqlValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::MySql>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

impl Type<sqlx::Postgres> for RawDecimal {
    fn type_info() -> PgTypeInfo {
        <String as Type<sqlx::Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("numeric") || name.contains("decimal")
    }
}

impl<'r> Decode<'r, sqlx::Postgres> for RawDecimal {
    fn decode(value: PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::Postgres>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

// =============================================================================
// Shared Value Helpers
// =============================================================================

/// Binary data becomes text when it is valid UTF-8, base64 otherwise.
pub fn decode_binary_value(bytes: &[u8]) -> JsonValue {
    use base64::{Engine as _, engine::general_purpose::STANDARD};

    match std::str::from_utf8(bytes) {
        Ok(s) => JsonValue::String(s.to_string()),
        Err(_) => JsonValue::String(STANDARD.encode(bytes)),
    }
}

/// Non-finite floats have no JSON number form and are kept as strings.
fn float_value(v: f64) -> JsonValue {
    serde_json::Number::from_f64(v)
        .map(JsonValue::Number)
        .unwrap_or_else(|| JsonValue::String(v.to_string()))
}

fn display_value<T: ToString>(v: Option<T>) -> JsonValue {
    v.map(|v| JsonValue::String(v.to_string()))
        .unwrap_or(JsonValue::Null)
}

/// Decode column `idx` as `T`; NULL and type mismatches both give `None`.
fn decoded<'r, R, T>(row: &'r R, idx: usize) -> Option<T>
where
    R: DriverRow,
    usize: ColumnIndex<R>,
    T: Decode<'r, R::Database> + Type<R::Database>,
{
    row.try_get::<Option<T>, _>(idx).ok().flatten()
}

fn is_null<R>(row: &R, idx: usize) -> bool
where
    R: DriverRow,
    usize: ColumnIndex<R>,
{
    row.try_get_raw(idx).map(|v| v.is_null()).unwrap_or(true)
}

fn integer<'r, R, T>(row: &'r R, idx: usize) -> Option<JsonValue>
where
    R: DriverRow,
    usize: ColumnIndex<R>,
    T: Decode<'r, R::Database> + Type<R::Database>,
    serde_json::Number: From<T>,
{
    decoded::<R, T>(row, idx).map(|v| JsonValue::Number(v.into()))
}

fn boolean<'r, R>(row: &'r R, idx: usize) -> JsonValue
where
    R: DriverRow,
    usize: ColumnIndex<R>,
    bool: Decode<'r, R::Database> + Type<R::Database>,
{
    decoded::<R, bool>(row, idx)
        .map(JsonValue::Bool)
        .unwrap_or(JsonValue::Null)
}

fn float<'r, R>(row: &'r R, idx: usize) -> JsonValue
where
    R: DriverRow,
    usize: ColumnIndex<R>,
    f64: Decode<'r, R::Database> + Type<R::Database>,
    f32: Decode<'r, R::Database> + Type<R::Database>,
{
    decoded::<R, f64>(row, idx)
        .or_else(|| decoded::<R, f32>(row, idx).map(f64::from))
        .map(float_value)
        .unwrap_or(JsonValue::Null)
}

fn binary<'r, R>(row: &'r R, idx: usize) -> JsonValue
where
    R: DriverRow,
    usize: ColumnIndex<R>,
    Vec<u8>: Decode<'r, R::Database> + Type<R::Database>,
{
    decoded::<R, Vec<u8>>(row, idx)
        .map(|v| decode_binary_value(&v))
        .unwrap_or(JsonValue::Null)
}

fn json<'r, R>(row: &'r R, idx: usize) -> JsonValue
where
    R: DriverRow,
    usize: ColumnIndex<R>,
    JsonValue: Decode<'r, R::Database> + Type<R::Database>,
{
    decoded::<R, JsonValue>(row, idx).unwrap_or(JsonValue::Null)
}

/// Exact DECIMAL/NUMERIC text, so no precision is lost in JSON.
fn decimal<'r, R>(row: &'r R, idx: usize) -> JsonValue
where
    R: DriverRow,
    usize: ColumnIndex<R>,
    RawDecimal: Decode<'r, R::Database> + Type<R::Database>,
{
    match row.try_get::<Option<RawDecimal>, _>(idx) {
        Ok(Some(v)) => JsonValue::String(v.0),
        Ok(None) => JsonValue::Null,
        Err(e) => {
            tracing::warn!(column = idx, error = %e, "Decimal column not decoded");
            JsonValue::Null
        }
    }
}

// =============================================================================
// Row to JSON Trait
// =============================================================================

/// Trait for converting database rows to JSON maps.
pub trait RowToJson {
    /// Column labels in metadata order, duplicates preserved.
    fn column_names(&self) -> Vec<String>;

    /// Row as label to value. A repeated label keeps the last column's value.
    fn to_json_map(&self) -> Row;
}

fn labels<R: DriverRow>(row: &R) -> Vec<String> {
    row.columns().iter().map(|c| c.name().to_string()).collect()
}

/// Pair each label with its decoded value, in metadata order.
fn json_map<R, F>(row: &R, db: DatabaseType, mut decode: F) -> Row
where
    R: DriverRow,
    F: FnMut(usize, &str, TypeCategory) -> JsonValue,
{
    row.columns()
        .iter()
        .enumerate()
        .map(|(idx, col)| {
            let type_name = col.type_info().name();
            let value = decode(idx, type_name, categorize_type(type_name, db));
            (col.name().to_string(), value)
        })
        .collect()
}

impl RowToJson for MySqlRow {
    fn column_names(&self) -> Vec<String> {
        labels(self)
    }

    fn to_json_map(&self) -> Row {
        json_map(self, DatabaseType::MySQL, |idx, type_name, category| {
            mysql::decode_column(self, idx, type_name, category)
        })
    }
}

impl RowToJson for PgRow {
    fn column_names(&self) -> Vec<String> {
        labels(self)
    }

    fn to_json_map(&self) -> Row {
        json_map(self, DatabaseType::PostgreSQL, |idx, _, category| {
            postgres::decode_column(self, idx, category)
        })
    }
}

impl RowToJson for SqliteRow {
    fn column_names(&self) -> Vec<String> {
        labels(self)
    }

    fn to_json_map(&self) -> Row {
        json_map(self, DatabaseType::SQLite, |idx, _, category| {
            sqlite::decode_column(self, idx, category)
        })
    }
}

// =============================================================================
// Database-Specific Decoders
// =============================================================================

mod mysql {
    use super::*;
    use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

    pub fn decode_column(
        row: &MySqlRow,
        idx: usize,
        type_name: &str,
        category: TypeCategory,
    ) -> JsonValue {
        match category {
            TypeCategory::Decimal => decimal(row, idx),
            TypeCategory::Integer => decode_integer(row, idx),
            TypeCategory::Boolean => boolean(row, idx),
            TypeCategory::Float => float(row, idx),
            TypeCategory::Binary => binary(row, idx),
            TypeCategory::Json => json(row, idx),
            TypeCategory::Timestamp | TypeCategory::TimestampTz => {
                display_value(decoded::<_, NaiveDateTime>(row, idx))
            }
            TypeCategory::Date => display_value(decoded::<_, NaiveDate>(row, idx)),
            TypeCategory::Time => display_value(decoded::<_, NaiveTime>(row, idx)),
            _ => decode_text(row, idx, type_name),
        }
    }

    /// Signed and unsigned widths each only accept their own column flavour.
    fn decode_integer(row: &MySqlRow, idx: usize) -> JsonValue {
        if is_null(row, idx) {
            return JsonValue::Null;
        }
        integer::<_, i64>(row, idx)
            .or_else(|| integer::<_, u64>(row, idx))
            .or_else(|| integer::<_, i32>(row, idx))
            .or_else(|| integer::<_, u32>(row, idx))
            .or_else(|| integer::<_, i16>(row, idx))
            .or_else(|| integer::<_, u16>(row, idx))
            .or_else(|| integer::<_, i8>(row, idx))
            .or_else(|| integer::<_, u8>(row, idx))
            .unwrap_or(JsonValue::Null)
    }

    /// MySQL may hand back VARBINARY for text depending on the connection charset.
    fn decode_text(row: &MySqlRow, idx: usize, type_name: &str) -> JsonValue {
        if let Some(v) = decoded::<_, String>(row, idx) {
            return JsonValue::String(v);
        }
        if let Ok(Some(bytes)) = row.try_get_unchecked::<Option<Vec<u8>>, _>(idx) {
            return decode_binary_value(&bytes);
        }
        tracing::debug!(type_name, "Unsupported MySQL column type, returning null");
        JsonValue::Null
    }
}

mod postgres {
    use super::*;
    use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};

    pub fn decode_column(row: &PgRow, idx: usize, category: TypeCategory) -> JsonValue {
        match category {
            TypeCategory::Decimal => decimal(row, idx),
            TypeCategory::Integer => integer::<_, i64>(row, idx)
                .or_else(|| integer::<_, i32>(row, idx))
                .or_else(|| integer::<_, i16>(row, idx))
                .unwrap_or(JsonValue::Null),
            TypeCategory::Boolean => boolean(row, idx),
            TypeCategory::Float => float(row, idx),
            TypeCategory::Binary => binary(row, idx),
            TypeCategory::Json => json(row, idx),
            TypeCategory::Uuid => display_value(decoded::<_, uuid::Uuid>(row, idx)),
            TypeCategory::TimestampTz => display_value(
                decoded::<_, DateTime<Utc>>(row, idx).map(|v| v.to_rfc3339()),
            ),
            TypeCategory::Timestamp => display_value(decoded::<_, NaiveDateTime>(row, idx)),
            TypeCategory::Date => display_value(decoded::<_, NaiveDate>(row, idx)),
            TypeCategory::Time => display_value(decoded::<_, NaiveTime>(row, idx)),
            _ => decoded::<_, String>(row, idx)
                .map(JsonValue::String)
                .unwrap_or(JsonValue::Null),
        }
    }
}

mod sqlite {
    use super::*;

    /// SQLite is dynamically typed: expression columns such as `SELECT 1` or
    /// `count(*)` report the type of the stored value, not a declared type.
    pub fn decode_column(row: &SqliteRow, idx: usize, category: TypeCategory) -> JsonValue {
        let category = match category {
            TypeCategory::Unknown => storage_category(row, idx),
            known => known,
        };
        match category {
            TypeCategory::Integer => {
                integer::<_, i64>(row, idx).unwrap_or_else(|| decode_text(row, idx))
            }
            TypeCategory::Boolean => boolean(row, idx),
            TypeCategory::Float | TypeCategory::Decimal => float(row, idx),
            TypeCategory::Binary => binary(row, idx),
            _ => decode_text(row, idx),
        }
    }

    /// Category of the value actually stored in this row.
    fn storage_category(row: &SqliteRow, idx: usize) -> TypeCategory {
        match row.try_get_raw(idx) {
            Ok(value) if !value.is_null() => {
                categorize_type(value.type_info().name(), DatabaseType::SQLite)
            }
            _ => TypeCategory::Unknown,
        }
    }

    /// Values stored in a column with an unexpected affinity fall back to
    /// whatever representation decodes.
    fn decode_text(row: &SqliteRow, idx: usize) -> JsonValue {
        if let Ok(Some(v)) = row.try_get_unchecked::<Option<String>, _>(idx) {
            return JsonValue::String(v);
        }
        if let Ok(Some(v)) = row.try_get_unchecked::<Option<i64>, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(Some(v)) = row.try_get_unchecked::<Option<f64>, _>(idx) {
            return float_value(v);
        }
        JsonValue::Null
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categorize_type_integer() {
        assert_eq!(
            categorize_type("INT", DatabaseType::MySQL),
            TypeCategory::Integer
        );
        assert_eq!(
            categorize_type("BIGINT", DatabaseType::PostgreSQL),
            TypeCategory::Integer
        );
        assert_eq!(
            categorize_type("TINYINT", DatabaseType::MySQL),
            TypeCategory::Integer
        );
        assert_eq!(
            categorize_type("INT4", DatabaseType::PostgreSQL),
            TypeCategory::Integer
        );
        assert_eq!(
            categorize_type("INTEGER", DatabaseType::SQLite),
            TypeCategory::Integer
        );
    }

    #[test]
    fn test_categorize_type_decimal() {
        assert_eq!(
            categorize_type("DECIMAL", DatabaseType::MySQL),
            TypeCategory::Decimal
        );
        assert_eq!(
            categorize_type("NUMERIC", DatabaseType::PostgreSQL),
            TypeCategory::Decimal
        );
        // SQLite NUMERIC is a float
        assert_eq!(
            categorize_type("numeric", DatabaseType::SQLite),
            TypeCategory::Float
        );
    }

    #[test]
    fn test_categorize_type_temporal() {
        assert_eq!(
            categorize_type("DATETIME", DatabaseType::MySQL),
            TypeCategory::Timestamp
        );
        assert_eq!(
            categorize_type("TIMESTAMPTZ", DatabaseType::PostgreSQL),
            TypeCategory::TimestampTz
        );
        assert_eq!(
            categorize_type("DATE", DatabaseType::PostgreSQL),
            TypeCategory::Date
        );
        // SQLite dates are plain text
        assert_eq!(
            categorize_type("DATETIME", DatabaseType::SQLite),
            TypeCategory::Unknown
        );
    }

    #[test]
    fn test_categorize_type_misc() {
        assert_eq!(
            categorize_type("jsonb", DatabaseType::PostgreSQL),
            TypeCategory::Json
        );
        assert_eq!(
            categorize_type("BOOLEAN", DatabaseType::SQLite),
            TypeCategory::Boolean
        );
        assert_eq!(
            categorize_type("VARCHAR", DatabaseType::MySQL),
            TypeCategory::Text
        );
        assert_eq!(
            categorize_type("POINT", DatabaseType::PostgreSQL),
            TypeCategory::Unknown
        );
    }

    #[test]
    fn test_decode_binary_value() {
        assert_eq!(
            decode_binary_value(b"hello world"),
            JsonValue::String("hello world".to_string())
        );
        assert_eq!(
            decode_binary_value(&[0xFF, 0xFE, 0x00, 0x01]),
            JsonValue::String("//4AAQ==".to_string())
        );
        assert_eq!(decode_binary_value(&[]), JsonValue::String(String::new()));
    }

    #[test]
    fn test_non_finite_float_is_string() {
        assert_eq!(float_value(1.5), serde_json::json!(1.5));
        assert_eq!(float_value(f64::NAN), JsonValue::String("NaN".to_string()));
    }
}
