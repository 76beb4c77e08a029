//! Schema-related data models.
//!
//! This module defines the structured schema description produced by
//! introspection and its canonical text rendering used as prompt context.

use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescription {
    pub name: String,
    /// Declared type as reported by the catalog (e.g. "VARCHAR", "int4")
    pub type_name: String,
    /// Column comment, when the catalog has a non-empty one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remark: Option<String>,
}

impl ColumnDescription {
    /// Create a new column description.
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            remark: None,
        }
    }

    /// Set the remark. Empty remarks are dropped.
    pub fn with_remark(mut self, remark: Option<String>) -> Self {
        self.remark = remark.filter(|r| !r.trim().is_empty());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDescription {
    pub name: String,
    pub columns: Vec<ColumnDescription>,
}

impl TableDescription {
    pub fn new(name: impl Into<String>, columns: Vec<ColumnDescription>) -> Self {
        Self {
            name: name.into(),
            columns,
        }
    }
}

/// Ordered tables in catalog enumeration order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDescription {
    pub tables: Vec<TableDescription>,
}

impl SchemaDescription {
    pub fn new(tables: Vec<TableDescription>) -> Self {
        Self { tables }
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Look up a table by name (case-insensitive).
    pub fn table(&self, name: &str) -> Option<&TableDescription> {
        self.tables
            .iter()
            .find(|t| t.name.eq_ignore_ascii_case(name))
    }

    /// Render the canonical prompt text.
    ///
    /// ```text
    /// Table: users (
    ///   - id INT
    ///   - name VARCHAR // display name
    /// )
    ///
    /// ```
    pub fn to_prompt_text(&self) -> String {
        let mut out = String::new();
        for table in &self.tables {
            let _ = writeln!(out, "Table: {} (", table.name);
            for col in &table.columns {
                let _ = write!(out, "  - {} {}", col.name, col.type_name);
                if let Some(remark) = &col.remark {
                    let _ = write!(out, " // {}", remark);
                }
                out.push('\n');
            }
            out.push_str(")\n\n");
        }
        out
    }
}

impl std::fmt::Display for SchemaDescription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_prompt_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users() -> TableDescription {
        TableDescription::new(
            "users",
            vec![
                ColumnDescription::new("id", "INT"),
                ColumnDescription::new("name", "VARCHAR")
                    .with_remark(Some("display name".to_string())),
            ],
        )
    }

    #[test]
    fn test_prompt_text_format() {
        let schema = SchemaDescription::new(vec![users()]);
        assert_eq!(
            schema.to_prompt_text(),
            "Table: users (\n  - id INT\n  - name VARCHAR // display name\n)\n\n"
        );
    }

    #[test]
    fn test_prompt_text_keeps_table_order() {
        let schema = SchemaDescription::new(vec![
            TableDescription::new("zeta", vec![]),
            TableDescription::new("alpha", vec![]),
        ]);
        let text = schema.to_prompt_text();
        assert!(text.find("zeta").unwrap() < text.find("alpha").unwrap());
    }

    #[test]
    fn test_empty_remark_is_dropped() {
        let col = ColumnDescription::new("id", "INT").with_remark(Some("  ".to_string()));
        assert_eq!(col.remark, None);
    }

    #[test]
    fn test_empty_schema_renders_nothing() {
        assert_eq!(SchemaDescription::default().to_prompt_text(), "");
    }

    #[test]
    fn test_table_lookup_is_case_insensitive() {
        let schema = SchemaDescription::new(vec![users()]);
        assert!(schema.table("USERS").is_some());
        assert!(schema.table("orders").is_none());
    }
}
