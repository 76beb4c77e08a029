//! SQL Pilot - Main entry point.
//!
//! Serves the generate, execute and test-connection endpoints over HTTP.

use clap::Parser;
use sql_pilot::ai::{DocumentRetriever, OpenAiConfig, OpenAiGenerator, PromptTemplate};
use sql_pilot::config::Config;
use sql_pilot::db::{PoolCache, QueryExecutor};
use sql_pilot::service::Orchestrator;
use sql_pilot::transport::{HttpTransport, Transport};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber
            .with(fmt::layer().with_target(true).with_thread_ids(false))
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse configuration from command line and environment
    let config = Config::parse();

    init_tracing(&config);

    if let Err(e) = config.validate() {
        eprintln!("Error: invalid configuration: {}", e);
        std::process::exit(2);
    }

    info!(
        bind = %config.http_bind_addr(),
        query_timeout_secs = config.query_timeout,
        "Starting SQL Pilot v{}",
        env!("CARGO_PKG_VERSION")
    );

    let llm = OpenAiConfig::from_config(&config);
    if llm.api_key.is_none() {
        warn!(base_url = %llm.base_url, "No LLM API key configured, sending unauthenticated requests");
    }
    let template = PromptTemplate::load(config.prompt_template.as_deref())?;
    let generator = OpenAiGenerator::new(llm, template)?;

    let retriever = DocumentRetriever::load(
        &config.docs_dir,
        config.retriever_min_score,
        config.retriever_max_results,
    )?;

    let pools = PoolCache::new(config.pool_options());
    let executor = QueryExecutor::with_defaults(config.query_timeout, config.row_cap());
    let orchestrator = Arc::new(Orchestrator::new(
        pools,
        Arc::new(generator),
        Arc::new(retriever),
        executor,
    ));

    let transport = HttpTransport::new(orchestrator, &config.http_host, config.http_port);
    info!(transport = transport.name(), "Using HTTP transport");

    if let Err(e) = transport.run().await {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("Server shutdown complete");
    Ok(())
}
