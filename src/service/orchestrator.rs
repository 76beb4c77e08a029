//! Use-case orchestration.
//!
//! Composes the pool cache, schema introspection, the collaborators, the
//! safety validator and the executor into the three operations exposed over
//! HTTP. Each operation runs its steps strictly in order; every checked-out
//! connection and every ephemeral pool is released before returning.

use crate::ai::{ContextRetriever, SqlGenerator};
use crate::db::{PoolCache, QueryExecutor, SchemaIntrospector, SqlPool};
use crate::error::{DbError, DbResult};
use crate::models::{
    Credentials, ExecuteRequest, ExecuteResponse, GenerateRequest, GenerateResponse,
    SchemaDescription, TestConnectionResponse,
};
use crate::service::sql_validator::SqlSafetyValidator;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Sent to the generator when retrieval finds nothing relevant.
pub const NO_CONTEXT_PLACEHOLDER: &str = "No relevant business context found.";

/// Separator between retrieved context segments.
pub const CONTEXT_SEPARATOR: &str = "\n---\n";

pub const CONNECTION_OK_MESSAGE: &str = "Connection successful.";

pub struct Orchestrator {
    pools: Arc<PoolCache>,
    generator: Arc<dyn SqlGenerator>,
    retriever: Arc<dyn ContextRetriever>,
    executor: QueryExecutor,
}

impl Orchestrator {
    pub fn new(
        pools: Arc<PoolCache>,
        generator: Arc<dyn SqlGenerator>,
        retriever: Arc<dyn ContextRetriever>,
        executor: QueryExecutor,
    ) -> Self {
        Self {
            pools,
            generator,
            retriever,
            executor,
        }
    }

    pub fn pools(&self) -> &Arc<PoolCache> {
        &self.pools
    }

    /// Answer a natural-language question with generated SQL and its result.
    pub async fn generate_and_run(&self, request: &GenerateRequest) -> DbResult<GenerateResponse> {
        let question = request.question.trim();
        if question.is_empty() {
            return Err(DbError::invalid_input("Question must not be empty"));
        }
        let credentials = request.credentials();
        info!(url = %credentials.masked_url(), question, "Generating SQL");

        // 1. Schema, through the cached pool
        let pool = self.pools.acquire(&credentials).await?;
        let schema = Self::describe(&pool, request.table_names.as_deref()).await?;
        let schema_text = schema_prompt(&schema, request.table_schema.as_deref());

        // 2. Business context
        let segments = self.retriever.retrieve(question).await?;
        let context = if segments.is_empty() {
            NO_CONTEXT_PLACEHOLDER.to_string()
        } else {
            segments
                .iter()
                .map(|s| s.text.as_str())
                .collect::<Vec<_>>()
                .join(CONTEXT_SEPARATOR)
        };
        debug!(segments = segments.len(), "Context assembled");

        // 3. Generation
        let dialect = pool.db_type().display_name();
        let raw = self
            .generator
            .generate(&schema_text, dialect, &context, question)
            .await?;

        // 4. Cleanup and validation
        let cleaned = SqlSafetyValidator::clean_generated_sql(&raw);
        let sql = SqlSafetyValidator::validate(&cleaned).inspect_err(|_| {
            warn!(sql = %cleaned, "Generated SQL rejected");
        })?;
        info!(sql = %sql, "Generated SQL");

        // 5. Execution
        let result = self.executor.execute_on_pool(&pool, &sql).await?;
        let count = result.row_count();
        info!(
            row_count = count,
            truncated = result.truncated,
            execution_time_ms = result.execution_time_ms,
            "Generated query executed"
        );

        Ok(GenerateResponse {
            sql: sql.into_inner(),
            data: result.rows,
            count,
        })
    }

    /// Execute caller-supplied SQL on a throwaway pool.
    pub async fn run_only(&self, request: &ExecuteRequest) -> DbResult<ExecuteResponse> {
        let trimmed = request.sql.trim();
        if trimmed.is_empty() {
            return Err(DbError::validation("SQL must not be empty"));
        }
        let sql = SqlSafetyValidator::validate(trimmed).inspect_err(|_| {
            warn!(sql = %trimmed, "Potentially unsafe SQL rejected");
        })?;

        let credentials = request.credentials();
        info!(url = %credentials.masked_url(), sql = %sql, "Executing SQL");

        let pool = self.pools.create_ephemeral(&credentials).await?;
        let result = self.executor.execute_on_pool(&pool, &sql).await;
        pool.close().await;

        let result = result?;
        info!(
            row_count = result.row_count(),
            truncated = result.truncated,
            execution_time_ms = result.execution_time_ms,
            "Query executed"
        );
        Ok(result.into())
    }

    /// Check that `credentials` can connect and read metadata.
    pub async fn test_connection(&self, credentials: &Credentials) -> DbResult<TestConnectionResponse> {
        info!(url = %credentials.masked_url(), "Testing connection");

        let outcome = async {
            let pool = self.pools.acquire(credentials).await?;
            Self::describe(&pool, None).await
        }
        .await;

        match outcome {
            Ok(schema) => {
                debug!(tables = schema.tables.len(), "Connection test succeeded");
                Ok(TestConnectionResponse::success(CONNECTION_OK_MESSAGE))
            }
            Err(e) => {
                warn!(url = %credentials.masked_url(), error = %e, "Connection test failed");
                Err(e.into_connection_error())
            }
        }
    }

    /// Describe the schema on a connection that is returned before this returns.
    async fn describe(pool: &SqlPool, table_filter: Option<&[String]>) -> DbResult<SchemaDescription> {
        let mut handle = pool.acquire().await?;
        SchemaIntrospector::describe_schema(&mut handle, table_filter).await
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("pools", &self.pools)
            .field("executor", &self.executor)
            .finish_non_exhaustive()
    }
}

/// Schema text for the prompt, with caller notes appended when present.
fn schema_prompt(schema: &SchemaDescription, notes: Option<&str>) -> String {
    let mut text = schema.to_prompt_text();
    if let Some(notes) = notes.map(str::trim).filter(|n| !n.is_empty()) {
        text.push_str("Additional schema notes:\n");
        text.push_str(notes);
        text.push('\n');
    }
    text
}
