//! # Promptlab Core
//!
//! Shared building blocks for the promptlab evaluation harness.
//!
//! ## Overview
//!
//! - **Model client**: [`LlmClient`] wraps the genai-rs client with
//!   per-attempt timeouts and bounded retries
//! - **Model seam**: [`CompletionModel`] is the trait the evaluation crate
//!   depends on, so tests can script model behavior without network access
//! - **Configuration**: [`LlmConfig`] builder for timeouts, sampling and retries
//! - **Utilities**: text helpers such as [`truncate`] and [`strip_code_fence`]
//!
//! ## Example
//!
//! ```no_run
//! use promptlab_core::{CompletionModel, LlmClient, LlmConfig, LlmRequest};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = LlmClient::from_api_key("api-key", LlmConfig::default())?;
//!
//! let request = LlmRequest::new("Suggest a ten minute stretch routine")
//!     .with_temperature(0.1);
//! let response = client.complete(request).await?;
//!
//! println!("{}", response.text);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod llm;
pub mod utils;

// Re-export public API
pub use config::{LlmConfig, DEFAULT_MODEL};
pub use error::{ConfigError, LlmError};
pub use llm::{CompletionModel, LlmClient, LlmRequest, LlmResponse, Turn, TurnRole};
pub use utils::{strip_code_fence, truncate, truncate_with_count};
