//! System prompt template for SQL generation.
//!
//! Templates reference three placeholders: `{schema}`, `{dbType}` and
//! `{ragContext}`. Substitution is single pass, so placeholder-like text
//! inside a substituted value is left alone.

use crate::error::{DbError, DbResult};
use std::path::Path;
use tracing::info;

const DEFAULT_TEMPLATE: &str = r#"You are an expert {dbType} SQL engineer.
Translate the user's question into exactly one read-only SQL query.

Rules:
- Output only the SQL statement. No explanations, no markdown.
- Only use SELECT, SHOW, DESCRIBE, EXPLAIN or WITH statements. Never modify data.
- Only reference tables and columns that exist in the schema below.
- Use the {dbType} dialect for functions, quoting and limits.
- When the business context defines a term, follow that definition.

Database schema:
{schema}

Business context:
{ragContext}
"#;

#[derive(Debug, Clone)]
pub struct PromptTemplate {
    text: String,
}

impl PromptTemplate {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    /// Read a template from `path`, or use the built-in one when `None`.
    pub fn load(path: Option<&Path>) -> DbResult<Self> {
        match path {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|e| {
                    DbError::invalid_input(format!(
                        "Cannot read prompt template {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                info!(path = %path.display(), "Loaded prompt template");
                Ok(Self::new(text))
            }
            None => Ok(Self::default()),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn render(&self, schema: &str, db_type: &str, rag_context: &str) -> String {
        let mut out = String::with_capacity(self.text.len() + schema.len() + rag_context.len());
        let mut rest = self.text.as_str();

        while let Some(start) = rest.find('{') {
            out.push_str(&rest[..start]);
            let tail = &rest[start..];
            let (value, consumed) = if tail.starts_with("{schema}") {
                (schema, "{schema}".len())
            } else if tail.starts_with("{dbType}") {
                (db_type, "{dbType}".len())
            } else if tail.starts_with("{ragContext}") {
                (rag_context, "{ragContext}".len())
            } else {
                ("{", 1)
            };
            out.push_str(value);
            rest = &tail[consumed..];
        }
        out.push_str(rest);
        out
    }
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self::new(DEFAULT_TEMPLATE)
    }
}
