//! Request-level services: SQL safety checks and use-case orchestration.

pub mod orchestrator;
pub mod sql_validator;

pub use orchestrator::Orchestrator;
pub use sql_validator::{SqlSafetyValidator, ValidatedSql, ValidationVerdict};
