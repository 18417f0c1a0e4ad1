//! Single-scenario evaluation shared by the baseline and optimization paths.

use crate::generator::ResponseGenerator;
use crate::judge::Metric;
use crate::prompt::PromptCandidate;
use crate::results::{EvaluationKind, EvaluationScore};
use crate::scenario::ScenarioItem;
use crate::telemetry::{TelemetryClient, TraceInput, TraceMetadata, TraceOutput};
use promptlab_core::truncate;

/// Maximum characters of a response kept in a trace.
pub const TRACE_RESPONSE_CHARS: usize = 500;

/// Result of generating and scoring one scenario.
#[derive(Debug, Clone)]
pub struct ScenarioOutcome {
    pub score: EvaluationScore,
    /// Generated text, absent when generation failed
    pub response: Option<String>,
}

/// Generate a response and score it. Never fails.
///
/// A generation failure yields the fallback score without calling the judge.
pub async fn evaluate_scenario(
    candidate: &PromptCandidate,
    scenario: &ScenarioItem,
    generator: &dyn ResponseGenerator,
    metric: &dyn Metric,
) -> ScenarioOutcome {
    match generator.generate(candidate, scenario).await {
        Ok(response) => {
            let score = metric.score(scenario, &response).await;
            ScenarioOutcome {
                score,
                response: Some(response),
            }
        }
        Err(e) => {
            log::warn!("Generation failed for scenario {}: {}", scenario.id, e);
            ScenarioOutcome {
                score: EvaluationScore::generation_failed(&e),
                response: None,
            }
        }
    }
}

/// Identifies the run a trace belongs to.
#[derive(Debug, Clone)]
pub struct TraceScope {
    pub name: &'static str,
    pub experiment_id: String,
    pub kind: EvaluationKind,
}

impl TraceScope {
    pub fn new(name: &'static str, experiment_id: impl Into<String>, kind: EvaluationKind) -> Self {
        Self {
            name,
            experiment_id: experiment_id.into(),
            kind,
        }
    }

    /// Open, update, and end the trace for one evaluated scenario.
    pub fn record(
        &self,
        telemetry: &TelemetryClient,
        index: usize,
        scenario: &ScenarioItem,
        response: Option<&str>,
        score: &EvaluationScore,
    ) {
        let mut trace = telemetry.trace(
            self.name,
            TraceInput {
                user_message: scenario.input.clone(),
                context: scenario.context.clone(),
                expected: scenario.expected.clone(),
            },
            TraceMetadata {
                experiment_id: self.experiment_id.clone(),
                scenario_index: index,
                evaluation_type: self.kind,
                score: None,
            },
        );

        let output = TraceOutput {
            response: response.map(|r| truncate(r, TRACE_RESPONSE_CHARS)).unwrap_or_default(),
            score: score.value(),
            error: response.is_none().then(|| score.rationale.clone()),
        };

        if let Err(e) = trace.update(output) {
            log::warn!("Failed to update trace for scenario {}: {}", scenario.id, e);
        }
        trace.end();
    }
}

/// Records one trace per evaluated scenario into a telemetry client.
///
/// Optimizers receive one through [`OptimizationRequest`], and
/// [`TrialEvaluator`] records every outcome with it, generation failures
/// included.
///
/// [`OptimizationRequest`]: crate::optimizer::OptimizationRequest
/// [`TrialEvaluator`]: crate::optimizer::TrialEvaluator
#[derive(Debug, Clone)]
pub struct ScenarioTracer<'a> {
    telemetry: &'a TelemetryClient,
    scope: TraceScope,
}

impl<'a> ScenarioTracer<'a> {
    pub fn new(telemetry: &'a TelemetryClient, scope: TraceScope) -> Self {
        Self { telemetry, scope }
    }

    pub fn record(&self, index: usize, scenario: &ScenarioItem, outcome: &ScenarioOutcome) {
        self.scope.record(
            self.telemetry,
            index,
            scenario,
            outcome.response.as_deref(),
            &outcome.score,
        );
    }
}
