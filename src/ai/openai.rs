//! OpenAI-compatible SQL generator.
//!
//! Sends the rendered system prompt plus the question as a single chat
//! completion request and returns the first choice's content. Works with any
//! server exposing `POST {base_url}/chat/completions`; the API key is optional
//! for local deployments.

use crate::ai::SqlGenerator;
use crate::ai::prompt::PromptTemplate;
use crate::config::{Config, DEFAULT_LLM_BASE_URL, DEFAULT_LLM_MODEL, DEFAULT_LLM_TIMEOUT_SECS};
use crate::error::{DbError, DbResult};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// OpenAI client configuration.
#[derive(Clone)]
pub struct OpenAiConfig {
    /// e.g. `https://api.openai.com/v1`
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
}

impl OpenAiConfig {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
            model: model.into(),
            timeout_secs: DEFAULT_LLM_TIMEOUT_SECS,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            base_url: config.llm_base_url.clone(),
            api_key: config.llm_api_key.clone().filter(|k| !k.trim().is_empty()),
            model: config.llm_model.clone(),
            timeout_secs: config.llm_timeout,
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self::new(DEFAULT_LLM_BASE_URL, DEFAULT_LLM_MODEL)
    }
}

impl std::fmt::Debug for OpenAiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "****"))
            .field("model", &self.model)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct OpenAiGenerator {
    config: OpenAiConfig,
    template: PromptTemplate,
    client: Client,
}

impl OpenAiGenerator {
    pub fn new(config: OpenAiConfig, template: PromptTemplate) -> DbResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| DbError::generation(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            config,
            template,
            client,
        })
    }

    pub fn config(&self) -> &OpenAiConfig {
        &self.config
    }

    fn parse_error(status: StatusCode, body: &str) -> DbError {
        if status == StatusCode::UNAUTHORIZED {
            return DbError::generation("LLM authentication failed. Check OPENAI_API_KEY.");
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            return DbError::generation("LLM rate limit reached. Please wait and try again.");
        }
        if let Ok(error_response) = serde_json::from_str::<ErrorResponse>(body) {
            return DbError::generation(format!("LLM API error: {}", error_response.error.message));
        }
        DbError::generation(format!("LLM API error ({}): {}", status, body))
    }
}

#[async_trait]
impl SqlGenerator for OpenAiGenerator {
    async fn generate(
        &self,
        schema: &str,
        dialect: &str,
        context: &str,
        question: &str,
    ) -> DbResult<String> {
        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: self.template.render(schema, dialect, context),
                },
                ChatMessage {
                    role: "user",
                    content: question.to_string(),
                },
            ],
            temperature: 0.0,
        };

        debug!(model = %self.config.model, dialect, "Requesting SQL generation");

        let mut builder = self.client.post(self.config.completions_url()).json(&request);
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                DbError::generation("LLM request timed out")
            } else if e.is_connect() {
                DbError::generation(format!("Failed to connect to LLM API: {}", e))
            } else {
                DbError::generation(format!("LLM request failed: {}", e))
            }
        })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| DbError::generation(format!("Failed to read LLM response: {}", e)))?;

        if !status.is_success() {
            return Err(Self::parse_error(status, &body));
        }

        let parsed: ChatResponse = serde_json::from_str(&body)
            .map_err(|e| DbError::generation(format!("Failed to parse LLM response: {}", e)))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| DbError::generation("LLM returned an empty response"))
    }
}

// Chat completion wire types

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}
