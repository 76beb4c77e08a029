//! External collaborators of the orchestrator.
//!
//! The orchestrator only sees the two traits defined here. Concrete
//! implementations are an OpenAI-compatible chat completion client and an
//! in-process document retriever; tests substitute stubs.

pub mod openai;
pub mod prompt;
pub mod retriever;

use crate::error::DbResult;
use async_trait::async_trait;

pub use openai::{OpenAiConfig, OpenAiGenerator};
pub use prompt::PromptTemplate;
pub use retriever::DocumentRetriever;

/// Turns a natural-language question into SQL text.
///
/// The returned text is raw model output. Callers must clean and validate it
/// before execution.
#[async_trait]
pub trait SqlGenerator: Send + Sync {
    async fn generate(
        &self,
        schema: &str,
        dialect: &str,
        context: &str,
        question: &str,
    ) -> DbResult<String>;
}

/// A scored piece of business documentation.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextSegment {
    pub text: String,
    /// Relevance in `[0, 1]`
    pub score: f64,
}

/// Finds documentation relevant to a question.
///
/// Implementations apply their own relevance floor and result cap and
/// return segments best first.
#[async_trait]
pub trait ContextRetriever: Send + Sync {
    async fn retrieve(&self, question: &str) -> DbResult<Vec<ContextSegment>>;
}
