//! Caller-supplied database credentials.
//!
//! A [`Credentials`] triple is both the connection target and the pool cache
//! key, so two requests share a pool only when url, username and password
//! are all identical.

use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use url::Url;

/// Supported database types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    PostgreSQL,
    /// Includes MariaDB
    MySQL,
    SQLite,
}

impl DatabaseType {
    /// Parse database type from a connection string.
    ///
    /// A leading `jdbc:` prefix is ignored.
    pub fn from_connection_string(connection_string: &str) -> Option<Self> {
        let lower = strip_jdbc_prefix(connection_string.trim()).to_lowercase();
        if lower.starts_with("postgres://") || lower.starts_with("postgresql://") {
            Some(Self::PostgreSQL)
        } else if lower.starts_with("mysql://") || lower.starts_with("mariadb://") {
            Some(Self::MySQL)
        } else if lower.starts_with("sqlite:") {
            Some(Self::SQLite)
        } else {
            None
        }
    }

    /// Get the display name for this database type.
    ///
    /// Doubles as the dialect label handed to the SQL generator.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::PostgreSQL => "PostgreSQL",
            Self::MySQL => "MySQL",
            Self::SQLite => "SQLite",
        }
    }
}

impl std::fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

fn strip_jdbc_prefix(url: &str) -> &str {
    match url.get(..5) {
        Some(prefix) if prefix.eq_ignore_ascii_case("jdbc:") => &url[5..],
        _ => url,
    }
}

/// Database credentials: `{url, username, password}`.
///
/// Immutable once constructed. Equality and hashing cover the full triple,
/// password included.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Credentials {
    url: String,
    username: String,
    /// Contains sensitive data - never log
    #[serde(skip_serializing)]
    password: String,
}

impl Credentials {
    pub fn new(
        url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            username: username.into(),
            password: password.into(),
        }
    }

    /// The URL exactly as supplied.
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    /// The URL with surrounding whitespace and any `jdbc:` prefix removed.
    pub fn connection_url(&self) -> &str {
        strip_jdbc_prefix(self.url.trim())
    }

    pub fn database_type(&self) -> Option<DatabaseType> {
        DatabaseType::from_connection_string(&self.url)
    }

    /// Stable fingerprint of the whole triple, used to tag pools in logs.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        hasher.finish()
    }

    /// Get a display-safe version of the URL (password in user info masked).
    pub fn masked_url(&self) -> String {
        let url = self.connection_url();
        match Url::parse(url) {
            Ok(mut parsed) if parsed.password().is_some() => {
                if parsed.set_password(Some("****")).is_ok() {
                    return parsed.to_string();
                }
                url.to_string()
            }
            _ => url.to_string(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("url", &self.masked_url())
            .field("username", &self.username)
            .field("password", &"****")
            .finish()
    }
}
