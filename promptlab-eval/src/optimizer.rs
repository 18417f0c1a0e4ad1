//! Prompt optimization contract and the default meta-prompt optimizer.
//!
//! An [`Optimizer`] searches for a better [`PromptCandidate`] within a trial
//! budget. The harness hands it the seed, the scenarios, a metric, and a
//! generator, and gets back an [`OptimizationOutcome`]: every trial it ran,
//! ranked best first.
//!
//! [`TrialEvaluator`] scores one candidate across the whole scenario set with
//! bounded concurrency. Optimizers should evaluate every candidate through
//! it so scores stay aligned with the scenario order.

use crate::evaluation::{evaluate_scenario, ScenarioTracer};
use crate::generator::ResponseGenerator;
use crate::harness::EvalProgress;
use crate::judge::Metric;
use crate::prompt::{PromptCandidate, TemplateError};
use crate::results::{rank_trials, EvaluationScore, TrialResult};
use crate::scenario::{ScenarioItem, ScenarioSet};
use async_trait::async_trait;
use futures_util::future::{BoxFuture, FutureExt};
use futures_util::stream::{self, StreamExt};
use promptlab_core::{strip_code_fence, truncate, CompletionModel, LlmError, LlmRequest};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Default number of scenarios evaluated concurrently within a trial.
pub const DEFAULT_WORKERS: usize = 2;

/// Default bound on one rewrite call.
pub const DEFAULT_REWRITE_TIMEOUT: Duration = Duration::from_secs(90);

/// Errors that end an optimization run without an outcome.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum OptimizationError {
    #[error("Trial budget must be at least 1")]
    ZeroBudget,

    #[error("No scenarios to optimize against")]
    NoScenarios,

    #[error("Optimizer produced no trials")]
    NoTrials,

    #[error("Trial {trial} has {got} scores for {expected} scenarios")]
    Misaligned {
        trial: usize,
        expected: usize,
        got: usize,
    },

    #[error("Invalid candidate: {0}")]
    InvalidCandidate(#[from] TemplateError),

    #[error("Optimizer model call failed: {0}")]
    Llm(#[from] LlmError),

    #[error("Rewrite timed out after {0}ms")]
    Timeout(u64),
}

/// Everything an optimizer needs for one run.
pub struct OptimizationRequest<'a> {
    pub seed: &'a PromptCandidate,
    pub scenarios: &'a ScenarioSet,
    pub metric: &'a dyn Metric,
    pub generator: &'a dyn ResponseGenerator,
    /// Upper bound on the number of trials
    pub trial_budget: usize,
    pub on_progress: &'a (dyn Fn(EvalProgress) + Send + Sync),
    /// Receives one trace per evaluated scenario, when set
    pub tracer: Option<&'a ScenarioTracer<'a>>,
}

impl<'a> OptimizationRequest<'a> {
    /// Check the preconditions every optimizer relies on.
    pub fn validate(&self) -> Result<(), OptimizationError> {
        if self.trial_budget == 0 {
            return Err(OptimizationError::ZeroBudget);
        }
        if self.scenarios.is_empty() {
            return Err(OptimizationError::NoScenarios);
        }
        Ok(())
    }

    /// A trial evaluator over this request's scenarios.
    pub fn evaluator(&self, workers: usize) -> TrialEvaluator<'a> {
        TrialEvaluator {
            scenarios: self.scenarios,
            metric: self.metric,
            generator: self.generator,
            workers: workers.max(1),
            on_progress: self.on_progress,
            tracer: self.tracer,
        }
    }
}

/// Ranked trials of a finished optimization.
///
/// Always holds at least one trial. The first trial is the best.
#[derive(Debug, Clone)]
pub struct OptimizationOutcome {
    trials: Vec<TrialResult>,
}

impl OptimizationOutcome {
    /// Rank trials by aggregate score, best first.
    pub fn from_trials(mut trials: Vec<TrialResult>) -> Result<Self, OptimizationError> {
        if trials.is_empty() {
            return Err(OptimizationError::NoTrials);
        }
        rank_trials(&mut trials);
        Ok(Self { trials })
    }

    pub fn best(&self) -> &TrialResult {
        &self.trials[0]
    }

    pub fn trials(&self) -> &[TrialResult] {
        &self.trials
    }

    pub fn len(&self) -> usize {
        self.trials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trials.is_empty()
    }

    /// Drop the lowest-ranked trials beyond `budget` (at least one is kept).
    pub fn truncate(&mut self, budget: usize) {
        self.trials.truncate(budget.max(1));
    }

    pub fn into_trials(self) -> Vec<TrialResult> {
        self.trials
    }
}

/// A prompt search strategy.
#[async_trait]
pub trait Optimizer: Send + Sync {
    fn name(&self) -> &str;

    /// Run at most `request.trial_budget` trials starting from the seed.
    async fn optimize(
        &self,
        request: OptimizationRequest<'_>,
    ) -> Result<OptimizationOutcome, OptimizationError>;
}

/// Scores one candidate across the full scenario set.
pub struct TrialEvaluator<'a> {
    scenarios: &'a ScenarioSet,
    metric: &'a dyn Metric,
    generator: &'a dyn ResponseGenerator,
    workers: usize,
    on_progress: &'a (dyn Fn(EvalProgress) + Send + Sync),
    tracer: Option<&'a ScenarioTracer<'a>>,
}

impl TrialEvaluator<'_> {
    /// Evaluate `candidate` as trial number `trial` (1-based).
    ///
    /// Scenarios run up to `workers` at a time; scores come back in
    /// scenario order regardless of completion order. Every scenario is
    /// traced when the evaluator has a tracer, failed generations included.
    pub async fn evaluate(&self, trial: usize, candidate: &PromptCandidate) -> TrialResult {
        let total = self.scenarios.len();
        let completed = AtomicUsize::new(0);
        let completed = &completed;

        // Boxed up front so the stream stays Send inside async_trait futures
        let pending: Vec<BoxFuture<'_, (usize, EvaluationScore)>> = self
            .scenarios
            .iter()
            .enumerate()
            .map(|(index, scenario)| {
                async move {
                    let outcome =
                        evaluate_scenario(candidate, scenario, self.generator, self.metric).await;
                    if let Some(tracer) = self.tracer {
                        tracer.record(index, scenario, &outcome);
                    }
                    let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                    (self.on_progress)(EvalProgress::ScenarioCompleted {
                        trial,
                        completed: done,
                        total,
                        score: outcome.score.value(),
                    });
                    (index, outcome.score)
                }
                .boxed()
            })
            .collect();

        let mut indexed: Vec<(usize, EvaluationScore)> = stream::iter(pending)
            .buffer_unordered(self.workers)
            .collect()
            .await;

        indexed.sort_by_key(|(index, _)| *index);
        let result = TrialResult::new(
            candidate.clone(),
            indexed.into_iter().map(|(_, score)| score).collect(),
        );

        log::info!(
            "Trial {} scored {:.3} over {} scenarios",
            trial,
            result.aggregate_score(),
            total
        );
        (self.on_progress)(EvalProgress::TrialCompleted {
            trial,
            aggregate: result.aggregate_score(),
        });
        result
    }
}

/// Configuration for [`MetaPromptOptimizer`].
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub struct MetaPromptConfig {
    /// Concurrent scenario evaluations per trial (default: 2)
    pub workers: usize,

    /// Sampling temperature for rewrites (default: 0.9)
    pub temperature: f32,

    /// How many low-scoring scenarios to show the rewriter (default: 3)
    pub feedback_examples: usize,

    /// Bound on each rewrite call, retries included (default: 90s)
    pub rewrite_timeout: Duration,
}

impl Default for MetaPromptConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            temperature: 0.9,
            feedback_examples: 3,
            rewrite_timeout: DEFAULT_REWRITE_TIMEOUT,
        }
    }
}

impl MetaPromptConfig {
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    #[must_use]
    pub fn with_feedback_examples(mut self, count: usize) -> Self {
        self.feedback_examples = count;
        self
    }

    #[must_use]
    pub fn with_rewrite_timeout(mut self, timeout: Duration) -> Self {
        self.rewrite_timeout = timeout;
        self
    }
}

/// Rewrites the system prompt with an LLM, guided by judge feedback.
///
/// Trial 1 evaluates the seed unchanged. Each later trial shows the model the
/// best prompt so far, its score, and the scenarios it handled worst, and
/// asks for an improved system prompt. A failed rewrite stops the search
/// early; the trials gathered so far are still returned.
pub struct MetaPromptOptimizer {
    model: Arc<dyn CompletionModel>,
    config: MetaPromptConfig,
}

impl MetaPromptOptimizer {
    pub fn new(model: Arc<dyn CompletionModel>, config: MetaPromptConfig) -> Self {
        Self { model, config }
    }

    async fn propose(
        &self,
        best: &TrialResult,
        scenarios: &ScenarioSet,
    ) -> Result<PromptCandidate, OptimizationError> {
        let request = LlmRequest::with_system(
            build_rewrite_prompt(best, scenarios, self.config.feedback_examples),
            REWRITER_SYSTEM,
        )
        .with_temperature(self.config.temperature);

        let timeout = self.config.rewrite_timeout;
        let reply = tokio::time::timeout(timeout, self.model.complete(request))
            .await
            .map_err(|_| OptimizationError::Timeout(timeout.as_millis() as u64))??;
        let rewritten = strip_code_fence(&reply.text);
        Ok(best.candidate.with_system_prompt(rewritten)?)
    }
}

#[async_trait]
impl Optimizer for MetaPromptOptimizer {
    fn name(&self) -> &str {
        "meta_prompt"
    }

    async fn optimize(
        &self,
        request: OptimizationRequest<'_>,
    ) -> Result<OptimizationOutcome, OptimizationError> {
        request.validate()?;
        let evaluator = request.evaluator(self.config.workers);

        let mut trials = vec![evaluator.evaluate(1, request.seed).await];

        for trial in 2..=request.trial_budget {
            let Some(best) = best_so_far(&trials) else {
                break;
            };

            let candidate = match self.propose(best, request.scenarios).await {
                Ok(candidate) => candidate,
                Err(e) => {
                    log::warn!(
                        "Stopping after {} trials: rewrite {} failed: {}",
                        trials.len(),
                        trial,
                        e
                    );
                    break;
                }
            };

            trials.push(evaluator.evaluate(trial, &candidate).await);
        }

        OptimizationOutcome::from_trials(trials)
    }
}

fn best_so_far(trials: &[TrialResult]) -> Option<&TrialResult> {
    trials.iter().reduce(|best, trial| {
        if trial.aggregate_score() > best.aggregate_score() {
            trial
        } else {
            best
        }
    })
}

const REWRITER_SYSTEM: &str = "You improve system prompts for an AI health coach. \
Reply with the complete revised system prompt only: no preamble, no commentary, no code fences. \
Do not use curly braces.";

/// Build the rewrite request for the current best trial.
pub fn build_rewrite_prompt(best: &TrialResult, scenarios: &ScenarioSet, examples: usize) -> String {
    let current = best.candidate.system_prompt().unwrap_or_default();

    let mut ranked: Vec<(&ScenarioItem, &EvaluationScore)> = scenarios
        .iter()
        .zip(best.per_scenario_scores.iter())
        .collect();
    ranked.sort_by(|a, b| a.1.value().total_cmp(&b.1.value()));

    let feedback = ranked
        .iter()
        .take(examples)
        .map(|(scenario, score)| {
            format!(
                "- User said: \"{}\" (context: {})\n  Score: {:.2}. Judge: {}",
                scenario.input,
                if scenario.context.is_empty() {
                    "None"
                } else {
                    scenario.context.as_str()
                },
                score.value(),
                truncate(&score.rationale, 300)
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "CURRENT SYSTEM PROMPT:\n{current}\n\n\
         AVERAGE SCORE: {score:.3} (0.0-1.0)\n\n\
         Responses are judged equally on actionability, personalization, safety, \
         and emotional acknowledgment.\n\n\
         WEAKEST SCENARIOS:\n{feedback}\n\n\
         Write an improved system prompt that keeps what works and fixes these weaknesses.",
        score = best.aggregate_score(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluation::TraceScope;
    use crate::generator::GenerationError;
    use crate::results::EvaluationKind;
    use crate::telemetry::TelemetryClient;
    use promptlab_core::LlmResponse;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Scores responses by how many times "walk" appears.
    struct KeywordMetric;

    #[async_trait]
    impl Metric for KeywordMetric {
        async fn score(&self, _scenario: &ScenarioItem, response: &str) -> EvaluationScore {
            EvaluationScore::new(response.matches("walk").count() as f64 * 0.25, "keyword")
        }
    }

    /// Echoes the system prompt, sleeping longer for earlier scenarios.
    struct SystemEchoGenerator;

    #[async_trait]
    impl ResponseGenerator for SystemEchoGenerator {
        async fn generate(
            &self,
            candidate: &PromptCandidate,
            scenario: &ScenarioItem,
        ) -> Result<String, GenerationError> {
            let delay = match scenario.id.as_str() {
                "a" => 30,
                "b" => 10,
                _ => 0,
            };
            tokio::time::sleep(Duration::from_millis(delay)).await;
            Ok(format!(
                "{} {}",
                candidate.system_prompt().unwrap_or_default(),
                scenario.input
            ))
        }
    }

    /// Returns scripted rewrites in order, then fails.
    struct ScriptedRewriter {
        replies: Mutex<Vec<&'static str>>,
    }

    impl ScriptedRewriter {
        fn new(mut replies: Vec<&'static str>) -> Self {
            replies.reverse();
            Self {
                replies: Mutex::new(replies),
            }
        }
    }

    #[async_trait]
    impl CompletionModel for ScriptedRewriter {
        fn model_name(&self) -> &str {
            "rewriter"
        }

        async fn complete(&self, _request: LlmRequest) -> Result<LlmResponse, LlmError> {
            self.replies
                .lock()
                .unwrap()
                .pop()
                .map(LlmResponse::new)
                .ok_or(LlmError::NoContent)
        }
    }

    /// Never answers; only the rewrite timeout ends the call.
    struct HangingRewriter;

    #[async_trait]
    impl CompletionModel for HangingRewriter {
        fn model_name(&self) -> &str {
            "hanging"
        }

        async fn complete(&self, _request: LlmRequest) -> Result<LlmResponse, LlmError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Err(LlmError::NoContent)
        }
    }

    /// Fails for scenario "b", echoes the input otherwise.
    struct FlakyGenerator;

    #[async_trait]
    impl ResponseGenerator for FlakyGenerator {
        async fn generate(
            &self,
            _candidate: &PromptCandidate,
            scenario: &ScenarioItem,
        ) -> Result<String, GenerationError> {
            if scenario.id == "b" {
                return Err(GenerationError::Timeout(90_000));
            }
            Ok(scenario.input.clone())
        }
    }

    fn no_progress(_: EvalProgress) {}

    fn seed() -> PromptCandidate {
        PromptCandidate::from_system_and_user("Be kind.", "{input}").unwrap()
    }

    fn scenarios() -> ScenarioSet {
        ScenarioSet::new(vec![
            ScenarioItem::new("a", "walk", "", ""),
            ScenarioItem::new("b", "run", "", ""),
            ScenarioItem::new("c", "walk walk", "", ""),
        ])
        .unwrap()
    }

    fn request<'a>(
        seed: &'a PromptCandidate,
        scenarios: &'a ScenarioSet,
        budget: usize,
    ) -> OptimizationRequest<'a> {
        OptimizationRequest {
            seed,
            scenarios,
            metric: &KeywordMetric,
            generator: &SystemEchoGenerator,
            trial_budget: budget,
            on_progress: &no_progress,
            tracer: None,
        }
    }

    #[tokio::test]
    async fn test_trial_evaluator_realigns_by_index() {
        let seed = seed();
        let scenarios = scenarios();
        let req = request(&seed, &scenarios, 1);
        let trial = req.evaluator(3).evaluate(1, &seed).await;

        assert_eq!(trial.score_values(), vec![0.25, 0.0, 0.5]);
    }

    #[tokio::test]
    async fn test_trial_evaluator_traces_every_scenario() {
        let telemetry = TelemetryClient::in_memory("p");
        let tracer = ScenarioTracer::new(
            &telemetry,
            TraceScope::new("optimization_evaluation", "optimization-x", EvaluationKind::Optimization),
        );
        let seed = seed();
        let scenarios = scenarios();
        let req = OptimizationRequest {
            generator: &FlakyGenerator,
            tracer: Some(&tracer),
            ..request(&seed, &scenarios, 1)
        };

        let trial = req.evaluator(2).evaluate(1, &seed).await;
        assert_eq!(trial.score_values(), vec![0.25, 0.0, 0.5]);

        telemetry.flush().await.unwrap();
        let mut traces = telemetry.committed();
        assert_eq!(traces.len(), scenarios.len());
        traces.sort_by_key(|t| t.metadata.scenario_index);
        let failed = traces[1].output.as_ref().unwrap();
        assert_eq!(failed.response, "");
        assert!(failed.error.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_rewrite_times_out() {
        let optimizer = MetaPromptOptimizer::new(
            Arc::new(HangingRewriter),
            MetaPromptConfig::default().with_rewrite_timeout(Duration::from_secs(5)),
        );
        let seed = seed();
        let scenarios = scenarios();
        let trial = TrialResult::new(
            seed.clone(),
            vec![EvaluationScore::new(0.5, "ok"); scenarios.len()],
        );

        let err = optimizer.propose(&trial, &scenarios).await.unwrap_err();
        assert!(matches!(err, OptimizationError::Timeout(5000)));

        // The search keeps the seed trial and stops
        let outcome = optimizer
            .optimize(request(&seed, &scenarios, 3))
            .await
            .unwrap();
        assert_eq!(outcome.len(), 1);
        assert_eq!(outcome.best().candidate, seed);
    }

    #[test]
    fn test_outcome_ranks_descending() {
        let trial = |v: f64| TrialResult::new(seed(), vec![EvaluationScore::new(v, "")]);
        let outcome =
            OptimizationOutcome::from_trials(vec![trial(0.2), trial(0.9), trial(0.5)]).unwrap();

        let scores: Vec<f64> = outcome.trials().iter().map(|t| t.aggregate_score()).collect();
        assert_eq!(scores, vec![0.9, 0.5, 0.2]);
        assert_eq!(outcome.best().aggregate_score(), 0.9);
        assert!(matches!(
            OptimizationOutcome::from_trials(vec![]),
            Err(OptimizationError::NoTrials)
        ));
    }

    #[tokio::test]
    async fn test_meta_prompt_runs_within_budget() {
        let rewriter = Arc::new(ScriptedRewriter::new(vec![
            "Suggest a walk.",
            "```\nAlways suggest a walk, then another walk.\n```",
        ]));
        let optimizer = MetaPromptOptimizer::new(rewriter, MetaPromptConfig::default());
        let seed = seed();
        let scenarios = scenarios();

        let outcome = optimizer
            .optimize(request(&seed, &scenarios, 3))
            .await
            .unwrap();

        assert_eq!(outcome.len(), 3);
        let best = outcome.best();
        assert!(outcome
            .trials()
            .iter()
            .all(|t| best.aggregate_score() >= t.aggregate_score()));
        assert_eq!(
            best.candidate.system_prompt(),
            Some("Always suggest a walk, then another walk.")
        );
        assert!(outcome
            .trials()
            .iter()
            .all(|t| t.per_scenario_scores.len() == scenarios.len()));
    }

    #[tokio::test]
    async fn test_meta_prompt_stops_early_on_failed_rewrite() {
        let optimizer = MetaPromptOptimizer::new(
            Arc::new(ScriptedRewriter::new(vec!["Use {unknown} here."])),
            MetaPromptConfig::default(),
        );
        let seed = seed();
        let scenarios = scenarios();

        let outcome = optimizer
            .optimize(request(&seed, &scenarios, 5))
            .await
            .unwrap();

        assert_eq!(outcome.len(), 1);
        assert_eq!(outcome.best().candidate, seed);
    }

    #[tokio::test]
    async fn test_meta_prompt_rejects_bad_requests() {
        let optimizer = MetaPromptOptimizer::new(
            Arc::new(ScriptedRewriter::new(vec![])),
            MetaPromptConfig::default(),
        );
        let seed = seed();
        let scenarios = scenarios();
        let empty = ScenarioSet::empty();

        assert!(matches!(
            optimizer.optimize(request(&seed, &scenarios, 0)).await,
            Err(OptimizationError::ZeroBudget)
        ));
        assert!(matches!(
            optimizer.optimize(request(&seed, &empty, 3)).await,
            Err(OptimizationError::NoScenarios)
        ));
    }

    #[test]
    fn test_rewrite_prompt_lists_weakest_scenarios() {
        let scenarios = scenarios();
        let best = TrialResult::new(
            seed(),
            vec![
                EvaluationScore::new(0.9, "great"),
                EvaluationScore::new(0.1, "ignored the run"),
                EvaluationScore::new(0.5, "fine"),
            ],
        );

        let prompt = build_rewrite_prompt(&best, &scenarios, 1);
        assert!(prompt.contains("CURRENT SYSTEM PROMPT:\nBe kind."));
        assert!(prompt.contains("AVERAGE SCORE: 0.500"));
        assert!(prompt.contains("ignored the run"));
        assert!(!prompt.contains("great"));
    }
}
