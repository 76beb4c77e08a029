//! Data models for SQL Pilot.
//!
//! This module re-exports all model types used throughout the application.

pub mod credentials;
pub mod query;
pub mod schema;

// Re-export commonly used types
pub use credentials::{Credentials, DatabaseType};
pub use query::{
    ConnectionRequest, DEFAULT_QUERY_TIMEOUT_SECS, ExecuteRequest, ExecuteResponse,
    GenerateRequest, GenerateResponse, QueryResult, Row, TestConnectionResponse,
};
pub use schema::{ColumnDescription, SchemaDescription, TableDescription};
