//! SQL Pilot Library
//!
//! Turns natural-language questions into read-only SQL and runs it against
//! caller-supplied databases (SQLite, PostgreSQL, MySQL/MariaDB), with one
//! cached connection pool per credential set.

pub mod ai;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod service;
pub mod transport;

pub use config::Config;
pub use error::DbError;
pub use service::Orchestrator;
