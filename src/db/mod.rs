//! Database abstraction layer.
//!
//! This module provides database access functionality:
//! - Credential-scoped pool caching
//! - Connection pools with scoped checkout
//! - Query execution
//! - Schema introspection
//! - Row decoding into JSON values

pub mod executor;
pub mod pool;
pub mod pool_cache;
pub mod schema;
pub mod types;

pub use executor::QueryExecutor;
pub use pool::{ConnectionHandle, DbConnection, DbPool, SqlPool};
pub use pool_cache::PoolCache;
pub use schema::SchemaIntrospector;
pub use types::RowToJson;
