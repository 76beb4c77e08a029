//! SQL statement validation for read-only enforcement.
//!
//! Classification is purely lexical: the statement must start with one of
//! the allow-listed keywords (SELECT, SHOW, DESC, DESCRIBE, EXPLAIN, WITH)
//! followed by whitespace. Anything else, including blank text, is denied.
//!
//! The allow-list is a first line of defence only. A `WITH` clause wrapping a
//! data-modifying statement passes it, which is why execution also runs with
//! a read-only session hint.

use crate::error::{DbError, DbResult};
use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

static READ_ONLY_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)^\s*(SELECT|SHOW|DESC|DESCRIBE|EXPLAIN|WITH)\s+.*$")
        .expect("read-only pattern is a valid regex")
});

mod reasons {
    pub const EMPTY: &str = "SQL statement is empty.";
    pub const NOT_READ_ONLY: &str =
        "Only read-only statements are allowed (SELECT, SHOW, DESC, DESCRIBE, EXPLAIN, WITH).";
}

/// Outcome of classifying a statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationVerdict {
    pub allowed: bool,
    /// Why the statement was denied. `None` when allowed.
    pub reason: Option<String>,
}

impl ValidationVerdict {
    fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    fn deny(reason: &str) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.to_string()),
        }
    }
}

/// SQL text that passed [`SqlSafetyValidator::validate`].
///
/// Can only be built by the validator, so holding one proves the statement
/// was checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedSql(String);

impl ValidatedSql {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for ValidatedSql {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ValidatedSql {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Stateless read-only allow-list.
pub struct SqlSafetyValidator;

impl SqlSafetyValidator {
    /// Normalise model output into a single executable statement.
    ///
    /// Removes markdown code fences, turns every line break into a space,
    /// trims, and drops one trailing semicolon.
    pub fn clean_generated_sql(raw: &str) -> String {
        let unfenced = raw.replace("```sql", "").replace("```", "");
        let single_line = unfenced
            .replace("\r\n", " ")
            .replace(['\n', '\r'], " ");

        let trimmed = single_line.trim();
        let trimmed = trimmed.strip_suffix(';').unwrap_or(trimmed);
        trimmed.trim_end().to_string()
    }

    /// Decide whether `sql` is read-only by its leading keyword.
    pub fn classify(sql: &str) -> ValidationVerdict {
        if sql.trim().is_empty() {
            return ValidationVerdict::deny(reasons::EMPTY);
        }
        if READ_ONLY_PATTERN.is_match(sql) {
            ValidationVerdict::allow()
        } else {
            ValidationVerdict::deny(reasons::NOT_READ_ONLY)
        }
    }

    /// Classify `sql` and wrap it for execution, or fail with a validation error.
    pub fn validate(sql: &str) -> DbResult<ValidatedSql> {
        let verdict = Self::classify(sql);
        if verdict.allowed {
            Ok(ValidatedSql(sql.to_string()))
        } else {
            Err(DbError::validation(
                verdict
                    .reason
                    .unwrap_or_else(|| reasons::NOT_READ_ONLY.to_string()),
            ))
        }
    }
}
