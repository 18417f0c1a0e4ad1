//! Shared test utilities for integration tests
//!
//! Provides a scripted [`CompletionModel`] that plays the coach, the judge,
//! and the prompt rewriter without network access.

// Each test file includes this module separately,
// so not all functions are used in every compilation unit.
#![allow(dead_code)]

use async_trait::async_trait;
use promptlab_core::{CompletionModel, LlmError, LlmRequest, LlmResponse};
use promptlab_eval::{ScenarioItem, ScenarioSet};
use std::sync::Mutex;
use std::time::Duration;

/// What kind of call a request represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Generate,
    Judge,
    Rewrite,
}

pub fn classify(request: &LlmRequest) -> CallKind {
    let system = request.system_instruction.as_deref().unwrap_or_default();
    if request.response_format.is_some()
        && request
            .prompt_text()
            .contains("Evaluate this health coach response")
    {
        CallKind::Judge
    } else if system.contains("You improve system prompts") {
        CallKind::Rewrite
    } else {
        CallKind::Generate
    }
}

/// Scripted reply to one request.
pub enum Reply {
    Text(String),
    Error(LlmError),
    /// Never answers; only a caller-side timeout ends the call
    Hang,
}

impl Reply {
    pub fn text(text: impl Into<String>) -> Self {
        Reply::Text(text.into())
    }

    pub fn judgment(score: f64, reason: &str) -> Self {
        Reply::Text(format!(r#"{{"score": {}, "reason": "{}"}}"#, score, reason))
    }
}

/// A model whose replies come from a closure over the request.
pub struct ScriptedModel<F> {
    respond: F,
    calls: Mutex<Vec<(CallKind, LlmRequest)>>,
}

impl<F> ScriptedModel<F>
where
    F: Fn(CallKind, &LlmRequest) -> Reply + Send + Sync,
{
    pub fn new(respond: F) -> Self {
        Self {
            respond,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls_of(&self, kind: CallKind) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| *k == kind)
            .count()
    }
}

#[async_trait]
impl<F> CompletionModel for ScriptedModel<F>
where
    F: Fn(CallKind, &LlmRequest) -> Reply + Send + Sync,
{
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse, LlmError> {
        let kind = classify(&request);
        let reply = (self.respond)(kind, &request);
        self.calls.lock().unwrap().push((kind, request));

        match reply {
            Reply::Text(text) => Ok(LlmResponse::new(text)),
            Reply::Error(e) => Err(e),
            Reply::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(LlmError::Other("hang ended".to_string()))
            }
        }
    }
}

/// Extract the coach response embedded in a judge prompt.
pub fn judged_response(request: &LlmRequest) -> String {
    let text = request.prompt_text();
    text.split("COACH RESPONSE:\n")
        .nth(1)
        .and_then(|rest| rest.split("\n\nCRITERIA").next())
        .unwrap_or_default()
        .to_string()
}

pub fn three_scenarios() -> ScenarioSet {
    ScenarioSet::new(vec![
        ScenarioItem::new("first", "I want to lose 20 pounds", "New user", "Weekly targets"),
        ScenarioItem::new("second", "I ran my first 5K today!", "6 weeks in", "Celebrate"),
        ScenarioItem::new("third", "How can I sleep better?", "Late shifts", "Specific advice"),
    ])
    .unwrap()
}
