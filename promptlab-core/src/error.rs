use thiserror::Error;

/// Errors that can occur in the LLM client
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LlmError {
    /// Error from the underlying genai-rs library
    #[error("GenAI error: {0}")]
    GenAi(genai_rs::GenaiError),

    /// Request timed out
    #[error("Request timed out after {0}ms")]
    Timeout(u64),

    /// Rate limit exceeded
    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    /// Invalid request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// No content in response
    #[error("No content in response")]
    NoContent,

    /// Other LLM error
    #[error("{0}")]
    Other(String),
}

impl LlmError {
    /// Check if this error is retryable.
    ///
    /// Returns `true` for transient errors that might succeed on retry:
    /// - Timeouts
    /// - Rate limits
    /// - API errors, which may be transient (network issues, server overload)
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LlmError::Timeout(_) | LlmError::RateLimit(_) | LlmError::GenAi(_)
        )
    }

    /// Check if this is a timeout error.
    pub fn is_timeout(&self) -> bool {
        matches!(self, LlmError::Timeout(_))
    }
}

impl From<genai_rs::GenaiError> for LlmError {
    fn from(error: genai_rs::GenaiError) -> Self {
        // Per-attempt timeouts surface as our own variant
        if let genai_rs::GenaiError::Timeout(duration) = &error {
            return LlmError::Timeout(duration.as_millis() as u64);
        }
        LlmError::GenAi(error)
    }
}

/// Errors raised while assembling runtime configuration.
///
/// These are the only errors allowed to abort a run, and they always do so
/// before the first evaluation starts.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// A required credential is not set
    #[error("Missing required credential: {0}")]
    MissingCredential(String),

    /// The environment file exists but could not be read
    #[error("Failed to load environment file {path}: {message}")]
    EnvFile { path: String, message: String },

    /// A configuration value is out of range
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
