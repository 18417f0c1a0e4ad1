//! Sequential evaluation of one fixed prompt.

use crate::context::EvalContext;
use crate::evaluation::{evaluate_scenario, ScenarioTracer, TraceScope};
use crate::generator::ResponseGenerator;
use crate::harness::EvalProgress;
use crate::judge::Metric;
use crate::prompt::PromptCandidate;
use crate::results::{EvaluationKind, TrialResult};
use crate::scenario::ScenarioSet;

/// Trace name for baseline evaluations.
pub const BASELINE_TRACE_NAME: &str = "baseline_evaluation";

/// Runs a single candidate over every scenario, in declared order.
///
/// Scenarios are evaluated one at a time. Each produces exactly one score
/// and one trace, failures included. Traces are flushed once at the end.
pub struct BaselineRunner<'a> {
    context: &'a EvalContext,
    experiment_id: String,
}

impl<'a> BaselineRunner<'a> {
    pub fn new(context: &'a EvalContext, experiment_id: impl Into<String>) -> Self {
        Self {
            context,
            experiment_id: experiment_id.into(),
        }
    }

    pub async fn run(
        &self,
        candidate: &PromptCandidate,
        scenarios: &ScenarioSet,
        metric: &dyn Metric,
        generator: &dyn ResponseGenerator,
    ) -> TrialResult {
        self.run_with_progress(candidate, scenarios, metric, generator, |_| {})
            .await
    }

    /// Same as [`run`](Self::run), reporting progress after each scenario.
    pub async fn run_with_progress<F>(
        &self,
        candidate: &PromptCandidate,
        scenarios: &ScenarioSet,
        metric: &dyn Metric,
        generator: &dyn ResponseGenerator,
        on_progress: F,
    ) -> TrialResult
    where
        F: Fn(EvalProgress) + Send + Sync,
    {
        let total = scenarios.len();
        let tracer = ScenarioTracer::new(
            &self.context.telemetry,
            TraceScope::new(
                BASELINE_TRACE_NAME,
                self.experiment_id.clone(),
                EvaluationKind::Baseline,
            ),
        );
        on_progress(EvalProgress::Started { total, trials: 1 });

        let mut scores = Vec::with_capacity(total);
        for (index, scenario) in scenarios.iter().enumerate() {
            log::info!(
                "Scenario {}/{}: {}",
                index + 1,
                total,
                promptlab_core::truncate(&scenario.input, 43)
            );

            let outcome = evaluate_scenario(candidate, scenario, generator, metric).await;
            tracer.record(index, scenario, &outcome);

            log::info!("  Score: {:.2}", outcome.score.value());
            on_progress(EvalProgress::ScenarioCompleted {
                trial: 1,
                completed: index + 1,
                total,
                score: outcome.score.value(),
            });
            scores.push(outcome.score);
        }

        let trial = TrialResult::new(candidate.clone(), scores);
        on_progress(EvalProgress::TrialCompleted {
            trial: 1,
            aggregate: trial.aggregate_score(),
        });

        match self.context.telemetry.flush().await {
            Ok(count) => log::debug!("Flushed {} baseline traces", count),
            Err(e) => log::warn!("Failed to flush baseline traces: {}", e),
        }

        trial
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::GenerationError;
    use crate::results::EvaluationScore;
    use crate::scenario::ScenarioItem;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct LengthMetric;

    #[async_trait]
    impl Metric for LengthMetric {
        async fn score(&self, _scenario: &ScenarioItem, response: &str) -> EvaluationScore {
            EvaluationScore::new(response.len() as f64 / 10.0, "length")
        }
    }

    /// Echoes the scenario input and records call order.
    #[derive(Default)]
    struct OrderedGenerator {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ResponseGenerator for OrderedGenerator {
        async fn generate(
            &self,
            _candidate: &PromptCandidate,
            scenario: &ScenarioItem,
        ) -> Result<String, GenerationError> {
            self.calls.lock().unwrap().push(scenario.id.clone());
            if scenario.id == "fail" {
                return Err(GenerationError::Timeout(30_000));
            }
            Ok(scenario.input.clone())
        }
    }

    fn scenarios() -> ScenarioSet {
        ScenarioSet::new(vec![
            ScenarioItem::new("a", "12345", "", ""),
            ScenarioItem::new("fail", "timeout please", "", ""),
            ScenarioItem::new("c", "1234567", "", ""),
        ])
        .unwrap()
    }

    #[tokio::test]
    async fn test_baseline_runs_in_order_with_fallback() {
        let context = EvalContext::in_memory("p");
        let runner = BaselineRunner::new(&context, "baseline-test");
        let generator = OrderedGenerator::default();
        let candidate = PromptCandidate::default_seed().unwrap();

        let trial = runner
            .run(&candidate, &scenarios(), &LengthMetric, &generator)
            .await;

        assert_eq!(*generator.calls.lock().unwrap(), vec!["a", "fail", "c"]);
        let values = trial.score_values();
        assert_eq!(values, vec![0.5, 0.0, 0.7]);
        assert!((trial.aggregate_score() - 0.4).abs() < 1e-12);

        // One trace per scenario, failures included, all flushed
        assert_eq!(context.telemetry.pending_count(), 0);
        let traces = context.telemetry.committed();
        assert_eq!(traces.len(), 3);
        assert_eq!(traces[1].metadata.scenario_index, 1);
        assert!(traces[1].output.as_ref().unwrap().error.is_some());
        assert_eq!(traces[2].metadata.experiment_id, "baseline-test");
    }

    #[tokio::test]
    async fn test_baseline_progress_events() {
        let context = EvalContext::in_memory("p");
        let runner = BaselineRunner::new(&context, "baseline-test");
        let events = Mutex::new(Vec::new());

        runner
            .run_with_progress(
                &PromptCandidate::default_seed().unwrap(),
                &scenarios(),
                &LengthMetric,
                &OrderedGenerator::default(),
                |event| events.lock().unwrap().push(event),
            )
            .await;

        let events = events.into_inner().unwrap();
        assert_eq!(events.len(), 5);
        assert!(matches!(events[0], EvalProgress::Started { total: 3, trials: 1 }));
        assert!(matches!(
            events[2],
            EvalProgress::ScenarioCompleted { completed: 2, score, .. } if score == 0.0
        ));
        assert!(matches!(events[4], EvalProgress::TrialCompleted { trial: 1, .. }));
    }

    #[tokio::test]
    async fn test_baseline_empty_set() {
        let context = EvalContext::in_memory("p");
        let trial = BaselineRunner::new(&context, "empty")
            .run(
                &PromptCandidate::default_seed().unwrap(),
                &ScenarioSet::empty(),
                &LengthMetric,
                &OrderedGenerator::default(),
            )
            .await;
        assert!(trial.per_scenario_scores.is_empty());
        assert_eq!(trial.aggregate_score(), 0.0);
    }
}
