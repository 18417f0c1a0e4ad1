//! Response generation for prompt candidates.

use crate::prompt::PromptCandidate;
use crate::scenario::ScenarioItem;
use async_trait::async_trait;
use promptlab_core::{CompletionModel, LlmError};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// A response could not be produced for one scenario.
///
/// Always scenario-local: callers record a fallback score and move on.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum GenerationError {
    #[error("{0}")]
    Llm(#[from] LlmError),

    #[error("timed out after {0}ms")]
    Timeout(u64),
}

/// Produces the agent's reply to a scenario under a candidate prompt.
#[async_trait]
pub trait ResponseGenerator: Send + Sync {
    async fn generate(
        &self,
        candidate: &PromptCandidate,
        scenario: &ScenarioItem,
    ) -> Result<String, GenerationError>;
}

/// Generator backed by a completion model.
pub struct LlmResponseGenerator {
    model: Arc<dyn CompletionModel>,
    timeout: Duration,
}

impl LlmResponseGenerator {
    /// Default outer bound on one generation, retries included.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(90);

    pub fn new(model: Arc<dyn CompletionModel>) -> Self {
        Self {
            model,
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl ResponseGenerator for LlmResponseGenerator {
    async fn generate(
        &self,
        candidate: &PromptCandidate,
        scenario: &ScenarioItem,
    ) -> Result<String, GenerationError> {
        let request = candidate.to_request(scenario);
        let response = tokio::time::timeout(self.timeout, self.model.complete(request))
            .await
            .map_err(|_| GenerationError::Timeout(self.timeout.as_millis() as u64))??;

        log::debug!(
            "Generated {} chars for scenario {} (tokens: {:?})",
            response.text.len(),
            scenario.id,
            response.tokens_used
        );
        Ok(response.text)
    }
}
