use std::time::Duration;

/// Default Gemini model for generation and judging.
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";

/// Configuration for the LLM client
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub struct LlmConfig {
    /// Model identifier passed to the API
    ///
    /// Default: [`DEFAULT_MODEL`]
    pub model: String,

    /// Maximum output tokens per request
    ///
    /// Default: 2048
    pub max_tokens: u32,

    /// Timeout for a single request attempt
    ///
    /// Default: 30 seconds
    pub timeout: Duration,

    /// Sampling temperature used when a request does not override it
    ///
    /// Default: 0.7
    pub temperature: f32,

    /// Maximum number of retries on transient failures
    ///
    /// Default: 1
    pub max_retries: u32,

    /// Base delay for exponential backoff (milliseconds)
    ///
    /// Default: 1000ms
    pub retry_base_delay_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            max_tokens: 2048,
            timeout: Duration::from_secs(30),
            temperature: 0.7,
            max_retries: 1,
            retry_base_delay_ms: 1000,
        }
    }
}

impl LlmConfig {
    /// Set the model identifier.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set the maximum output tokens per request.
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Set the timeout for a single request attempt.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the default sampling temperature (0.0 - 2.0).
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set the maximum number of retries on transient failures.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the base delay for exponential backoff (milliseconds).
    #[must_use]
    pub fn with_retry_base_delay_ms(mut self, delay_ms: u64) -> Self {
        self.retry_base_delay_ms = delay_ms;
        self
    }

    /// Get the retry delay for a given attempt number (0-indexed)
    ///
    /// Uses exponential backoff: delay = base_delay * 2^attempt, capped at
    /// 60 seconds.
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        const MAX_DELAY_MS: u64 = 60_000;

        let delay_ms = self
            .retry_base_delay_ms
            .saturating_mul(2u64.saturating_pow(attempt))
            .min(MAX_DELAY_MS);

        Duration::from_millis(delay_ms)
    }

    /// Worst-case wall time for one logical call including every retry.
    ///
    /// Callers that wrap a call in an outer timeout use this so the outer
    /// bound never cuts off a retry the client is entitled to make.
    pub fn total_budget(&self) -> Duration {
        let attempts = self.max_retries.saturating_add(1);
        let mut total = self.timeout.saturating_mul(attempts);
        for attempt in 0..self.max_retries {
            total = total.saturating_add(self.retry_delay(attempt));
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_llm_config() {
        let config = LlmConfig::default();
        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.max_tokens, 2048);
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.temperature, 0.7);
        assert_eq!(config.max_retries, 1);
        assert_eq!(config.retry_base_delay_ms, 1000);
    }

    #[test]
    fn test_builder() {
        let config = LlmConfig::default()
            .with_model("gemini-2.5-pro")
            .with_max_tokens(512)
            .with_timeout(Duration::from_secs(5))
            .with_temperature(0.1)
            .with_max_retries(3)
            .with_retry_base_delay_ms(250);

        assert_eq!(config.model, "gemini-2.5-pro");
        assert_eq!(config.max_tokens, 512);
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.temperature, 0.1);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_base_delay_ms, 250);
    }

    #[test]
    fn test_retry_delay() {
        let config = LlmConfig::default();

        assert_eq!(config.retry_delay(0), Duration::from_millis(1000));
        assert_eq!(config.retry_delay(1), Duration::from_millis(2000));
        assert_eq!(config.retry_delay(2), Duration::from_millis(4000));
    }

    #[test]
    fn test_retry_delay_overflow_protection() {
        let config = LlmConfig::default();

        assert_eq!(config.retry_delay(10), Duration::from_millis(60_000));
        assert_eq!(config.retry_delay(u32::MAX), Duration::from_millis(60_000));
    }

    #[test]
    fn test_total_budget() {
        // 2 attempts of 30s plus one 1s backoff
        let config = LlmConfig::default();
        assert_eq!(config.total_budget(), Duration::from_secs(61));

        let no_retry = LlmConfig::default().with_max_retries(0);
        assert_eq!(no_retry.total_budget(), Duration::from_secs(30));
    }
}
