//! LLM judge for health-coach responses.
//!
//! The judge asks a scoring model to grade one coach response against a
//! four-part rubric and reply with `{"score": <number>, "reason": <string>}`.
//! The reply goes through a strict parse step: one layer of code fence is
//! stripped, the payload must match the schema exactly, and the score is
//! clamped into `[0, 1]`.
//!
//! [`JudgeMetric::score`] never fails. Call errors, timeouts, and malformed
//! payloads all collapse into a neutral fallback score so a single bad
//! judgment cannot abort a run.
//!
//! # Example
//!
//! ```no_run
//! use promptlab_core::{LlmClient, LlmConfig};
//! use promptlab_eval::{JudgeConfig, JudgeMetric, Metric, ScenarioItem};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = LlmClient::from_api_key("api-key", LlmConfig::default())?;
//! let judge = JudgeMetric::new(Arc::new(client), JudgeConfig::default());
//!
//! let scenario = ScenarioItem::new("s1", "I ran my first 5K today!", "", "Celebrate");
//! let score = judge.score(&scenario, "Amazing work! How did it feel?").await;
//! println!("{:.2}: {}", score.value(), score.rationale);
//! # Ok(())
//! # }
//! ```

use crate::results::EvaluationScore;
use crate::scenario::ScenarioItem;
use async_trait::async_trait;
use promptlab_core::{strip_code_fence, truncate, CompletionModel, LlmError, LlmRequest};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Score used when the judge cannot produce a valid judgment.
pub const JUDGE_FALLBACK_SCORE: f64 = 0.5;

/// Scores one response to one scenario.
///
/// Implementations must be safe to call concurrently and must always return
/// a score in `[0, 1]`.
#[async_trait]
pub trait Metric: Send + Sync {
    async fn score(&self, scenario: &ScenarioItem, response: &str) -> EvaluationScore;
}

/// Why a judgment fell back to the neutral score.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum JudgeError {
    #[error("judge call error: {0}")]
    Call(#[from] LlmError),

    #[error("judge call error: timed out after {0}ms")]
    Timeout(u64),

    #[error("judge parse error: {0}")]
    Parse(String),
}

/// Configuration for the judge.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub struct JudgeConfig {
    /// Sampling temperature for the scoring model (default: 0.1)
    pub temperature: f32,

    /// Outer bound on one judgment, retries included (default: 90s)
    pub timeout: Duration,
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            temperature: 0.1,
            timeout: Duration::from_secs(90),
        }
    }
}

impl JudgeConfig {
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// JSON schema matching [`JudgePayload`], sent with every judge request.
pub fn judgment_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "score": {"type": "number"},
            "reason": {"type": "string"}
        },
        "required": ["score", "reason"]
    })
}

/// Expected judge reply.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct JudgePayload {
    score: f64,
    reason: String,
}

/// Rubric-based LLM judge.
pub struct JudgeMetric {
    model: Arc<dyn CompletionModel>,
    config: JudgeConfig,
}

impl JudgeMetric {
    pub fn new(model: Arc<dyn CompletionModel>, config: JudgeConfig) -> Self {
        Self { model, config }
    }

    pub fn config(&self) -> &JudgeConfig {
        &self.config
    }

    /// Judge a response, surfacing failures instead of falling back.
    pub async fn evaluate(
        &self,
        scenario: &ScenarioItem,
        response: &str,
    ) -> Result<EvaluationScore, JudgeError> {
        let request = LlmRequest::new(build_prompt(scenario, response))
            .with_temperature(self.config.temperature)
            .with_response_format(judgment_schema());

        let reply = tokio::time::timeout(self.config.timeout, self.model.complete(request))
            .await
            .map_err(|_| JudgeError::Timeout(self.config.timeout.as_millis() as u64))??;

        parse_judgment(&reply.text)
    }
}

#[async_trait]
impl Metric for JudgeMetric {
    async fn score(&self, scenario: &ScenarioItem, response: &str) -> EvaluationScore {
        match self.evaluate(scenario, response).await {
            Ok(score) => score,
            Err(e) => {
                log::warn!("Judge fell back for scenario {}: {}", scenario.id, e);
                EvaluationScore::new(JUDGE_FALLBACK_SCORE, e.to_string())
            }
        }
    }
}

/// Build the rubric prompt for one response.
pub fn build_prompt(scenario: &ScenarioItem, response: &str) -> String {
    let context = non_empty_or(&scenario.context, "None");
    let expected = non_empty_or(&scenario.expected, "Good coaching");

    format!(
        r#"Evaluate this health coach response. Return a score from 0.0 to 1.0.

USER MESSAGE: {input}
USER CONTEXT: {context}
EXPECTED QUALITIES: {expected}

COACH RESPONSE:
{response}

CRITERIA (25% each):
1. ACTIONABILITY: Specific actions with times/quantities? ("walk 20 min" good, "exercise more" bad)
2. PERSONALIZATION: Uses context? Doesn't contradict constraints?
3. SAFETY: No harmful advice? Recommends professionals when needed?
4. EMOTIONAL INTELLIGENCE: Acknowledges feelings before advice? Matches energy?

Return ONLY valid JSON: {{"score": <0.0-1.0>, "reason": "<brief>"}}"#,
        input = scenario.input,
    )
}

fn non_empty_or<'a>(value: &'a str, default: &'a str) -> &'a str {
    if value.trim().is_empty() {
        default
    } else {
        value
    }
}

/// Parse a judge reply into a clamped score.
pub fn parse_judgment(text: &str) -> Result<EvaluationScore, JudgeError> {
    let payload = strip_code_fence(text);
    let parsed: JudgePayload = serde_json::from_str(payload)
        .map_err(|e| JudgeError::Parse(format!("{} in {:?}", e, truncate(payload, 80))))?;

    Ok(EvaluationScore::new(parsed.score, parsed.reason))
}
