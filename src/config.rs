//! Configuration handling for SQL Pilot.
//!
//! This module provides configuration management via CLI arguments and environment variables.

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_HTTP_HOST: &str = "127.0.0.1";
pub const DEFAULT_HTTP_PORT: u16 = 8080;
pub const DEFAULT_QUERY_TIMEOUT_SECS: u64 = crate::models::DEFAULT_QUERY_TIMEOUT_SECS;

// Pool configuration defaults
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;
pub const DEFAULT_MIN_CONNECTIONS: u32 = 1;
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_REAPER_INTERVAL_SECS: u64 = 60;

// SQL generator / context retriever defaults
pub const DEFAULT_LLM_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_LLM_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_LLM_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_DOCS_DIR: &str = "docs";
pub const DEFAULT_MIN_SCORE: f64 = 0.55;
pub const DEFAULT_MAX_RESULTS: usize = 3;

/// Settings applied to every pool built by the pool cache.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PoolOptions {
    pub max_connections: u32,
    pub min_connections: u32,
    /// Idle connections are closed after this many seconds
    pub idle_timeout_secs: u64,
    /// Bounds both the initial connect and every later checkout
    pub connect_timeout_secs: u64,
    /// Close cached pools unused for this long; 0 keeps them for the process lifetime
    pub pool_idle_ttl_secs: u64,
    /// Maximum number of distinct cached pools; 0 means unlimited
    pub max_pools: usize,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            min_connections: DEFAULT_MIN_CONNECTIONS,
            idle_timeout_secs: DEFAULT_IDLE_TIMEOUT_SECS,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            pool_idle_ttl_secs: 0,
            max_pools: 0,
        }
    }
}

impl PoolOptions {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Idle TTL for cached pools, `None` when reaping is disabled.
    pub fn pool_idle_ttl(&self) -> Option<Duration> {
        (self.pool_idle_ttl_secs > 0).then(|| Duration::from_secs(self.pool_idle_ttl_secs))
    }

    /// How often the reaper wakes up: the TTL itself, capped at one minute.
    pub fn reaper_interval(&self) -> Duration {
        Duration::from_secs(self.pool_idle_ttl_secs.clamp(1, DEFAULT_REAPER_INTERVAL_SECS))
    }

    /// Validate pool options and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_connections == 0 {
            return Err("max_connections must be greater than 0".to_string());
        }
        if self.min_connections > self.max_connections {
            return Err(format!(
                "min_connections ({}) cannot exceed max_connections ({})",
                self.min_connections, self.max_connections
            ));
        }
        if self.connect_timeout_secs == 0 {
            return Err("connect_timeout must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Configuration for SQL Pilot.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "sql-pilot",
    about = "Natural-language questions to read-only SQL against any database you have credentials for",
    version,
    author
)]
pub struct Config {
    /// HTTP host to bind to
    #[arg(long, default_value = DEFAULT_HTTP_HOST, env = "SQL_PILOT_HTTP_HOST")]
    pub http_host: String,

    /// HTTP port to bind to
    #[arg(long, default_value_t = DEFAULT_HTTP_PORT, env = "SQL_PILOT_HTTP_PORT")]
    pub http_port: u16,

    /// Statement timeout in seconds
    #[arg(
        long,
        default_value_t = DEFAULT_QUERY_TIMEOUT_SECS,
        env = "SQL_PILOT_QUERY_TIMEOUT"
    )]
    pub query_timeout: u64,

    /// Maximum rows kept per result (0 = unlimited)
    #[arg(long, default_value_t = 0, env = "SQL_PILOT_MAX_ROWS")]
    pub max_rows: usize,

    /// Maximum connections per pool
    #[arg(
        long,
        default_value_t = DEFAULT_MAX_CONNECTIONS,
        env = "SQL_PILOT_POOL_MAX_CONNECTIONS"
    )]
    pub pool_max_connections: u32,

    /// Minimum idle connections per pool
    #[arg(
        long,
        default_value_t = DEFAULT_MIN_CONNECTIONS,
        env = "SQL_PILOT_POOL_MIN_CONNECTIONS"
    )]
    pub pool_min_connections: u32,

    /// Seconds before an idle connection is closed
    #[arg(
        long,
        default_value_t = DEFAULT_IDLE_TIMEOUT_SECS,
        env = "SQL_PILOT_POOL_IDLE_TIMEOUT"
    )]
    pub pool_idle_timeout: u64,

    /// Connection timeout in seconds
    #[arg(
        long,
        default_value_t = DEFAULT_CONNECT_TIMEOUT_SECS,
        env = "SQL_PILOT_CONNECT_TIMEOUT"
    )]
    pub connect_timeout: u64,

    /// Close cached pools unused for this many seconds (0 = never)
    #[arg(long, default_value_t = 0, env = "SQL_PILOT_POOL_IDLE_TTL")]
    pub pool_idle_ttl: u64,

    /// Maximum distinct credential sets with a cached pool (0 = unlimited)
    #[arg(long, default_value_t = 0, env = "SQL_PILOT_MAX_POOLS")]
    pub max_pools: usize,

    /// Base URL of the OpenAI-compatible chat completions API
    #[arg(long, default_value = DEFAULT_LLM_BASE_URL, env = "OPENAI_BASE_URL")]
    pub llm_base_url: String,

    /// API key for the chat completions API
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub llm_api_key: Option<String>,

    /// Model name sent with every generation request
    #[arg(long, default_value = DEFAULT_LLM_MODEL, env = "OPENAI_MODEL")]
    pub llm_model: String,

    /// Timeout for one generation request in seconds
    #[arg(
        long,
        default_value_t = DEFAULT_LLM_TIMEOUT_SECS,
        env = "SQL_PILOT_LLM_TIMEOUT"
    )]
    pub llm_timeout: u64,

    /// System prompt template file; the built-in template is used when unset
    #[arg(long, value_name = "FILE", env = "SQL_PILOT_PROMPT_TEMPLATE")]
    pub prompt_template: Option<PathBuf>,

    /// Directory of business documents used as retrieval context
    #[arg(long, value_name = "DIR", default_value = DEFAULT_DOCS_DIR, env = "SQL_PILOT_DOCS_DIR")]
    pub docs_dir: PathBuf,

    /// Minimum relevance score for a retrieved segment
    #[arg(long, default_value_t = DEFAULT_MIN_SCORE, env = "SQL_PILOT_RETRIEVER_MIN_SCORE")]
    pub retriever_min_score: f64,

    /// Maximum number of retrieved segments
    #[arg(long, default_value_t = DEFAULT_MAX_RESULTS, env = "SQL_PILOT_RETRIEVER_MAX_RESULTS")]
    pub retriever_max_results: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "SQL_PILOT_LOG_LEVEL")]
    pub log_level: String,

    /// Enable JSON logging format
    #[arg(long, env = "SQL_PILOT_JSON_LOGS")]
    pub json_logs: bool,
}

impl Config {
    /// Parse configuration from command line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Create a default configuration (useful for testing).
    pub fn default_config() -> Self {
        Self {
            http_host: DEFAULT_HTTP_HOST.to_string(),
            http_port: DEFAULT_HTTP_PORT,
            query_timeout: DEFAULT_QUERY_TIMEOUT_SECS,
            max_rows: 0,
            pool_max_connections: DEFAULT_MAX_CONNECTIONS,
            pool_min_connections: DEFAULT_MIN_CONNECTIONS,
            pool_idle_timeout: DEFAULT_IDLE_TIMEOUT_SECS,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT_SECS,
            pool_idle_ttl: 0,
            max_pools: 0,
            llm_base_url: DEFAULT_LLM_BASE_URL.to_string(),
            llm_api_key: None,
            llm_model: DEFAULT_LLM_MODEL.to_string(),
            llm_timeout: DEFAULT_LLM_TIMEOUT_SECS,
            prompt_template: None,
            docs_dir: PathBuf::from(DEFAULT_DOCS_DIR),
            retriever_min_score: DEFAULT_MIN_SCORE,
            retriever_max_results: DEFAULT_MAX_RESULTS,
            log_level: "info".to_string(),
            json_logs: false,
        }
    }

    /// Collect the pool settings.
    pub fn pool_options(&self) -> PoolOptions {
        PoolOptions {
            max_connections: self.pool_max_connections,
            min_connections: self.pool_min_connections,
            idle_timeout_secs: self.pool_idle_timeout,
            connect_timeout_secs: self.connect_timeout,
            pool_idle_ttl_secs: self.pool_idle_ttl,
            max_pools: self.max_pools,
        }
    }

    /// Validate cross-field constraints clap cannot express.
    pub fn validate(&self) -> Result<(), String> {
        self.pool_options().validate()?;
        if self.query_timeout == 0 {
            return Err("query_timeout must be greater than 0".to_string());
        }
        if !(0.0..=1.0).contains(&self.retriever_min_score) {
            return Err(format!(
                "retriever_min_score ({}) must be between 0 and 1",
                self.retriever_min_score
            ));
        }
        Ok(())
    }

    /// Get the HTTP bind address.
    pub fn http_bind_addr(&self) -> String {
        format!("{}:{}", self.http_host, self.http_port)
    }

    /// Get the query timeout as a Duration.
    pub fn query_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.query_timeout)
    }

    /// Get the generation timeout as a Duration.
    pub fn llm_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.llm_timeout)
    }

    /// Row cap for query results, `None` when unlimited.
    pub fn row_cap(&self) -> Option<usize> {
        (self.max_rows > 0).then_some(self.max_rows)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::default_config()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.http_host, DEFAULT_HTTP_HOST);
        assert_eq!(config.http_port, DEFAULT_HTTP_PORT);
        assert_eq!(config.query_timeout, 15);
        assert_eq!(config.row_cap(), None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_http_bind_addr() {
        let config = Config {
            http_host: "0.0.0.0".to_string(),
            http_port: 3000,
            ..Config::default()
        };
        assert_eq!(config.http_bind_addr(), "0.0.0.0:3000");
    }

    #[test]
    fn test_timeout_durations() {
        let config = Config {
            query_timeout: 60,
            llm_timeout: 90,
            ..Config::default()
        };
        assert_eq!(config.query_timeout_duration(), Duration::from_secs(60));
        assert_eq!(config.llm_timeout_duration(), Duration::from_secs(90));
    }

    #[test]
    fn test_pool_options_defaults() {
        let opts = PoolOptions::default();
        assert_eq!(opts.max_connections, 5);
        assert_eq!(opts.min_connections, 1);
        assert_eq!(opts.idle_timeout(), Duration::from_secs(60));
        assert_eq!(opts.connect_timeout(), Duration::from_secs(5));
        assert_eq!(opts.pool_idle_ttl(), None);
        assert_eq!(opts.max_pools, 0);
        assert_eq!(Config::default().pool_options(), opts);
    }

    #[test]
    fn test_pool_options_validation_max_zero() {
        let opts = PoolOptions {
            max_connections: 0,
            ..PoolOptions::default()
        };
        assert!(opts.validate().unwrap_err().contains("max_connections"));
    }

    #[test]
    fn test_pool_options_validation_min_exceeds_max() {
        let opts = PoolOptions {
            max_connections: 2,
            min_connections: 3,
            ..PoolOptions::default()
        };
        assert!(opts.validate().unwrap_err().contains("cannot exceed"));
    }

    #[test]
    fn test_min_connections_zero_is_allowed() {
        let opts = PoolOptions {
            min_connections: 0,
            ..PoolOptions::default()
        };
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn test_reaper_interval_follows_ttl() {
        let short = PoolOptions {
            pool_idle_ttl_secs: 10,
            ..PoolOptions::default()
        };
        assert_eq!(short.pool_idle_ttl(), Some(Duration::from_secs(10)));
        assert_eq!(short.reaper_interval(), Duration::from_secs(10));

        let long = PoolOptions {
            pool_idle_ttl_secs: 3600,
            ..PoolOptions::default()
        };
        assert_eq!(long.reaper_interval(), Duration::from_secs(60));
    }

    #[test]
    fn test_row_cap() {
        let config = Config {
            max_rows: 500,
            ..Config::default()
        };
        assert_eq!(config.row_cap(), Some(500));
    }

    #[test]
    fn test_zero_query_timeout_rejected() {
        let config = Config {
            query_timeout: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_min_score_out_of_range_rejected() {
        let config = Config {
            retriever_min_score: 1.5,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_from_cli_args() {
        let config = Config::try_parse_from([
            "sql-pilot",
            "--http-port",
            "9000",
            "--max-pools",
            "32",
            "--pool-idle-ttl",
            "300",
        ])
        .unwrap();
        assert_eq!(config.http_port, 9000);
        assert_eq!(config.pool_options().max_pools, 32);
        assert_eq!(
            config.pool_options().pool_idle_ttl(),
            Some(Duration::from_secs(300))
        );
    }
}
