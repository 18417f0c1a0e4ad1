//! LLM client wrapper for genai-rs
//!
//! Provides a small interface over the genai-rs Interactions API with:
//! - Timeout enforcement per attempt from config
//! - Automatic retry with exponential backoff on transient failures
//! - A [`CompletionModel`] trait so callers can swap in scripted models
//!
//! # Example
//!
//! ```no_run
//! use promptlab_core::{CompletionModel, LlmClient, LlmConfig, LlmRequest};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let genai_client = genai_rs::Client::builder("api-key".to_string()).build()?;
//! let client = LlmClient::new(genai_client, LlmConfig::default());
//!
//! let request = LlmRequest::with_system("I ran my first 5K today!", "You are a coach.");
//! let response = client.complete(request).await?;
//!
//! println!("Response: {}", response.text);
//! if let Some(tokens) = response.tokens_used {
//!     println!("Tokens used: {}", tokens);
//! }
//! # Ok(())
//! # }
//! ```

use crate::config::LlmConfig;
use crate::error::LlmError;
use async_trait::async_trait;
use genai_rs::{GenerationConfig, InteractionResponse};

/// Speaker of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnRole {
    User,
    Model,
}

/// One turn of the conversation sent to the model.
#[derive(Debug, Clone, PartialEq)]
pub struct Turn {
    pub role: TurnRole,
    pub text: String,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            text: text.into(),
        }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Model,
            text: text.into(),
        }
    }
}

/// Request to the LLM
#[derive(Debug, Clone, PartialEq)]
pub struct LlmRequest {
    /// Conversation turns, oldest first
    pub turns: Vec<Turn>,

    /// Optional system instruction
    pub system_instruction: Option<String>,

    /// Sampling temperature override
    ///
    /// `None` uses [`LlmConfig::temperature`].
    pub temperature: Option<f32>,

    /// JSON schema the response must conform to
    ///
    /// This constrains generation only. Callers still validate the payload.
    pub response_format: Option<serde_json::Value>,
}

impl LlmRequest {
    /// Create a new LLM request with a single user prompt
    pub fn new(prompt: impl Into<String>) -> Self {
        Self::from_turns(vec![Turn::user(prompt)])
    }

    /// Create a new LLM request with prompt and system instruction
    pub fn with_system(prompt: impl Into<String>, system: impl Into<String>) -> Self {
        Self::new(prompt).with_system_instruction(system)
    }

    /// Create a request from an explicit conversation
    pub fn from_turns(turns: Vec<Turn>) -> Self {
        Self {
            turns,
            system_instruction: None,
            temperature: None,
            response_format: None,
        }
    }

    /// Set the system instruction
    #[must_use]
    pub fn with_system_instruction(mut self, system: impl Into<String>) -> Self {
        self.system_instruction = Some(system.into());
        self
    }

    /// Override the sampling temperature for this request
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Set a JSON schema for structured output
    #[must_use]
    pub fn with_response_format(mut self, schema: serde_json::Value) -> Self {
        self.response_format = Some(schema);
        self
    }

    /// Concatenated text of all turns, used for validation and logging.
    pub fn prompt_text(&self) -> String {
        self.turns
            .iter()
            .map(|t| t.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// Text returned by a completion call.
#[derive(Debug, Clone, PartialEq)]
pub struct LlmResponse {
    /// Generated text
    pub text: String,

    /// Total tokens reported by the API, when available
    pub tokens_used: Option<u32>,
}

impl LlmResponse {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tokens_used: None,
        }
    }
}

/// A source of model completions.
///
/// [`LlmClient`] is the production implementation. Everything in the
/// evaluation crate depends on this trait rather than the concrete client,
/// which keeps scoring and orchestration testable without network access.
///
/// Implementations must be safe to call concurrently.
#[async_trait]
pub trait CompletionModel: Send + Sync {
    /// Identifier of the underlying model (used in logs and reports).
    fn model_name(&self) -> &str;

    /// Produce a completion for the request.
    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse, LlmError>;
}

/// LLM client wrapping genai-rs with timeout and retry handling
pub struct LlmClient {
    /// Underlying genai-rs client
    client: genai_rs::Client,

    /// LLM configuration (model, timeout, sampling, retries)
    config: LlmConfig,
}

impl std::fmt::Debug for LlmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmClient")
            .field("model", &self.config.model)
            .field("client", &"[REDACTED]")
            .field("config", &self.config)
            .finish()
    }
}

impl LlmClient {
    /// Create a new LLM client with the given genai-rs client and configuration
    pub fn new(client: genai_rs::Client, config: LlmConfig) -> Self {
        Self { client, config }
    }

    /// Build the genai-rs client for `api_key` and wrap it.
    pub fn from_api_key(api_key: impl Into<String>, config: LlmConfig) -> Result<Self, LlmError> {
        let client = genai_rs::Client::builder(api_key.into()).build()?;
        Ok(Self::new(client, config))
    }

    /// Get a reference to the LLM configuration.
    pub fn config(&self) -> &LlmConfig {
        &self.config
    }

    /// Generate a complete response.
    ///
    /// # Retry Behavior
    ///
    /// Transient failures (timeouts, rate limits, API errors) are retried up
    /// to `config.max_retries` times with exponential backoff starting at
    /// `config.retry_base_delay_ms`.
    ///
    /// # Errors
    ///
    /// Returns:
    /// - `LlmError::Timeout` if an attempt exceeds `config.timeout`
    /// - `LlmError::GenAi` for underlying API errors
    /// - `LlmError::NoContent` if the response carries no text
    pub async fn generate(&self, request: LlmRequest) -> Result<LlmResponse, LlmError> {
        validate_request(&request)?;

        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            match self.generate_once(&request).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    log::warn!(
                        "LLM request failed (attempt {}/{}): {}, retrying...",
                        attempt + 1,
                        self.config.max_retries + 1,
                        e
                    );
                    last_error = Some(e);
                    tokio::time::sleep(self.config.retry_delay(attempt)).await;
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error
            .unwrap_or_else(|| LlmError::Other("Retry loop exited unexpectedly".to_string())))
    }

    /// Execute a single request (no retries)
    async fn generate_once(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let response = self
            .build_interaction(request)
            .with_timeout(self.config.timeout)
            .create()
            .await
            .map_err(LlmError::from)?;

        let text = match response.text() {
            Some(text) if !text.trim().is_empty() => text.to_string(),
            _ => return Err(LlmError::NoContent),
        };

        Ok(LlmResponse {
            text,
            tokens_used: total_tokens(&response),
        })
    }

    fn build_interaction(&self, request: &LlmRequest) -> genai_rs::InteractionBuilder<'_> {
        let generation_config = GenerationConfig {
            temperature: Some(request.temperature.unwrap_or(self.config.temperature)),
            max_output_tokens: Some(self.config.max_tokens as i32),
            ..Default::default()
        };

        let mut interaction = self
            .client
            .interaction()
            .with_model(&self.config.model)
            .with_generation_config(generation_config);

        // A lone user turn goes as plain text; anything longer is sent as history.
        match request.turns.as_slice() {
            [only] if only.role == TurnRole::User => {
                interaction = interaction.with_text(&only.text);
            }
            turns => {
                interaction = interaction.with_turns(turns.iter().map(to_genai_turn).collect());
            }
        }

        if let Some(ref system) = request.system_instruction {
            interaction = interaction.with_system_instruction(system);
        }

        if let Some(ref schema) = request.response_format {
            interaction = interaction.with_response_format(schema.clone());
        }

        interaction
    }
}

#[async_trait]
impl CompletionModel for LlmClient {
    fn model_name(&self) -> &str {
        &self.config.model
    }

    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse, LlmError> {
        self.generate(request).await
    }
}

fn validate_request(request: &LlmRequest) -> Result<(), LlmError> {
    if request.turns.is_empty() {
        return Err(LlmError::InvalidRequest(
            "Request must contain at least one turn".to_string(),
        ));
    }
    if request.turns.iter().all(|t| t.text.trim().is_empty()) {
        return Err(LlmError::InvalidRequest("Prompt cannot be empty".to_string()));
    }
    Ok(())
}

fn to_genai_turn(turn: &Turn) -> genai_rs::Turn {
    match turn.role {
        TurnRole::User => genai_rs::Turn::user(turn.text.as_str()),
        TurnRole::Model => genai_rs::Turn::model(turn.text.as_str()),
    }
}

/// Total token count reported by the API, if present and non-negative.
fn total_tokens(response: &InteractionResponse) -> Option<u32> {
    response
        .usage
        .as_ref()
        .and_then(|u| u.total_tokens)
        .and_then(|t| u32::try_from(t).ok())
}
