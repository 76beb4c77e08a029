//! Query-related data models.
//!
//! This module defines the tabular query result and the request/response
//! shapes of the three use cases.

use crate::models::Credentials;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Default statement timeout in seconds.
pub const DEFAULT_QUERY_TIMEOUT_SECS: u64 = 15;

/// One result row: column label to value, in result metadata order.
pub type Row = serde_json::Map<String, JsonValue>;

/// Result of a read-only query.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryResult {
    /// Column labels in metadata order, duplicates preserved
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
    /// True when rows were dropped because of the configured row cap
    #[serde(default)]
    pub truncated: bool,
    pub execution_time_ms: u64,
}

impl QueryResult {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

/// Generate-and-run request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    pub question: String,
    pub db_url: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// Restrict introspection to these tables
    #[serde(default)]
    pub table_names: Option<Vec<String>>,
    /// Extra schema notes appended to the introspected schema text
    #[serde(default)]
    pub table_schema: Option<String>,
}

impl GenerateRequest {
    pub fn new(question: impl Into<String>, credentials: &Credentials) -> Self {
        Self {
            question: question.into(),
            db_url: credentials.url().to_string(),
            username: credentials.username().to_string(),
            password: credentials.password().to_string(),
            table_names: None,
            table_schema: None,
        }
    }

    pub fn with_table_names(mut self, names: Vec<String>) -> Self {
        self.table_names = Some(names);
        self
    }

    pub fn with_table_schema(mut self, notes: impl Into<String>) -> Self {
        self.table_schema = Some(notes.into());
        self
    }

    pub fn credentials(&self) -> Credentials {
        Credentials::new(&self.db_url, &self.username, &self.password)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub sql: String,
    pub data: Vec<Row>,
    pub count: usize,
}

/// Run-only request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteRequest {
    #[serde(default)]
    pub sql: String,
    pub db_url: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

impl ExecuteRequest {
    pub fn new(sql: impl Into<String>, credentials: &Credentials) -> Self {
        Self {
            sql: sql.into(),
            db_url: credentials.url().to_string(),
            username: credentials.username().to_string(),
            password: credentials.password().to_string(),
        }
    }

    pub fn credentials(&self) -> Credentials {
        Credentials::new(&self.db_url, &self.username, &self.password)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteResponse {
    pub data: Vec<Row>,
    pub count: usize,
}

impl From<QueryResult> for ExecuteResponse {
    fn from(result: QueryResult) -> Self {
        let count = result.row_count();
        Self {
            data: result.rows,
            count,
        }
    }
}

/// Connection test request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionRequest {
    pub db_url: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

impl ConnectionRequest {
    pub fn credentials(&self) -> Credentials {
        Credentials::new(&self.db_url, &self.username, &self.password)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestConnectionResponse {
    pub status: String,
    pub message: String,
}

impl TestConnectionResponse {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            status: "success".to_string(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_generate_request_camel_case() {
        let req: GenerateRequest = serde_json::from_value(json!({
            "question": "list all users",
            "dbUrl": "mysql://localhost/shop",
            "username": "root",
            "password": "secret",
            "tableNames": ["users"],
            "tableSchema": "users.name is the login"
        }))
        .unwrap();
        assert_eq!(req.table_names, Some(vec!["users".to_string()]));
        assert_eq!(req.credentials().username(), "root");
        assert_eq!(req.table_schema.as_deref(), Some("users.name is the login"));
    }

    #[test]
    fn test_execute_request_missing_sql_defaults_empty() {
        let req: ExecuteRequest = serde_json::from_value(json!({
            "dbUrl": "sqlite:a.db"
        }))
        .unwrap();
        assert!(req.sql.is_empty());
        assert_eq!(req.credentials().password(), "");
    }

    #[test]
    fn test_execute_response_from_result() {
        let mut row = Row::new();
        row.insert("id".to_string(), json!(1));
        let result = QueryResult {
            columns: vec!["id".to_string()],
            rows: vec![row],
            truncated: false,
            execution_time_ms: 3,
        };
        let response = ExecuteResponse::from(result);
        assert_eq!(response.count, 1);
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({"data": [{"id": 1}], "count": 1})
        );
    }
}
