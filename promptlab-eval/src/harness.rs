//! Top-level orchestration of baseline and optimization runs.
//!
//! The [`EvalHarness`] owns the metric, the generator, and the shared
//! [`EvalContext`]. Each run produces a finalized [`ExperimentRecord`];
//! failures inside a run end up in the record rather than being returned.

use crate::baseline::BaselineRunner;
use crate::context::EvalContext;
use crate::evaluation::{ScenarioTracer, TraceScope};
use crate::generator::ResponseGenerator;
use crate::judge::Metric;
use crate::optimizer::{OptimizationError, OptimizationRequest, Optimizer};
use crate::prompt::{PromptCandidate, TemplateError};
use crate::registry::{DatasetHandle, RegistryError};
use crate::report::ReportError;
use crate::results::{EvaluationKind, ExperimentRecord};
use crate::scenario::{ScenarioError, ScenarioSet};
use crate::telemetry::TelemetryError;
use promptlab_core::{ConfigError, LlmError};
use std::sync::Arc;
use thiserror::Error;

/// Trace name for evaluations made during optimization.
pub const OPTIMIZATION_TRACE_NAME: &str = "optimization_evaluation";

/// Errors that stop the harness before or after a run.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum HarnessError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Scenario(#[from] ScenarioError),

    #[error("Invalid prompt: {0}")]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Telemetry(#[from] TelemetryError),

    #[error(transparent)]
    Report(#[from] ReportError),

    #[error("Optimization failed: {0}")]
    Optimization(#[from] OptimizationError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),
}

/// Progress events emitted during a run.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum EvalProgress {
    /// Scenarios loaded, evaluation starting.
    Started {
        /// Scenarios per trial.
        total: usize,
        /// Maximum number of trials (1 for a baseline).
        trials: usize,
    },
    /// One scenario of a trial was scored.
    ScenarioCompleted {
        trial: usize,
        completed: usize,
        total: usize,
        score: f64,
    },
    /// Every scenario of a trial was scored.
    TrialCompleted { trial: usize, aggregate: f64 },
}

/// Configuration for the harness.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct HarnessConfig {
    /// Maximum trials per optimization run (default: 3)
    pub trial_budget: usize,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self { trial_budget: 3 }
    }
}

impl HarnessConfig {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_trial_budget(mut self, trial_budget: usize) -> Self {
        self.trial_budget = trial_budget;
        self
    }
}

/// Runs baselines and optimizations against a shared context.
///
/// # Example
///
/// ```no_run
/// use promptlab_core::{LlmClient, LlmConfig};
/// use promptlab_eval::{
///     BuiltinScenarios, EvalContext, EvalHarness, HarnessConfig, JudgeConfig, JudgeMetric,
///     LlmResponseGenerator, PromptCandidate, ScenarioSource,
/// };
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = Arc::new(LlmClient::from_api_key("api-key", LlmConfig::default())?);
/// let harness = EvalHarness::new(
///     EvalContext::in_memory("healthic-optimization"),
///     Arc::new(JudgeMetric::new(client.clone(), JudgeConfig::default())),
///     Arc::new(LlmResponseGenerator::new(client)),
///     HarnessConfig::default(),
/// );
///
/// let scenarios = BuiltinScenarios.load().await?;
/// let record = harness.baseline(&PromptCandidate::default_seed()?, &scenarios).await;
/// println!("{:?}", record.best_trial().map(|t| t.aggregate_score()));
/// # Ok(())
/// # }
/// ```
pub struct EvalHarness {
    context: EvalContext,
    metric: Arc<dyn Metric>,
    generator: Arc<dyn ResponseGenerator>,
    config: HarnessConfig,
}

impl EvalHarness {
    pub fn new(
        context: EvalContext,
        metric: Arc<dyn Metric>,
        generator: Arc<dyn ResponseGenerator>,
        config: HarnessConfig,
    ) -> Self {
        Self {
            context,
            metric,
            generator,
            config,
        }
    }

    pub fn context(&self) -> &EvalContext {
        &self.context
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Register the scenarios as a named dataset (idempotent).
    pub async fn register_dataset(
        &self,
        name: &str,
        description: &str,
        scenarios: &ScenarioSet,
    ) -> Result<DatasetHandle, RegistryError> {
        let handle = self
            .context
            .registry
            .get_or_create(name, description)
            .await?;
        let added = self
            .context
            .registry
            .insert(&handle, scenarios.items())
            .await?;
        log::info!(
            "Dataset '{}' ready with {} items ({} new)",
            handle.name,
            scenarios.len(),
            added
        );
        Ok(handle)
    }

    /// Evaluate `seed` once across every scenario.
    pub async fn baseline(&self, seed: &PromptCandidate, scenarios: &ScenarioSet) -> ExperimentRecord {
        self.baseline_with_progress(seed, scenarios, |_| {}).await
    }

    pub async fn baseline_with_progress<F>(
        &self,
        seed: &PromptCandidate,
        scenarios: &ScenarioSet,
        on_progress: F,
    ) -> ExperimentRecord
    where
        F: Fn(EvalProgress) + Send + Sync,
    {
        let mut record = ExperimentRecord::start(EvaluationKind::Baseline, seed.clone(), scenarios.len());
        log::info!(
            "Running baseline {} over {} scenarios",
            record.experiment_id(),
            scenarios.len()
        );

        let trial = BaselineRunner::new(&self.context, record.experiment_id())
            .run_with_progress(
                seed,
                scenarios,
                self.metric.as_ref(),
                self.generator.as_ref(),
                on_progress,
            )
            .await;

        if let Err(e) = record.push_trial(trial) {
            log::error!("{}", e);
        }
        finalize(&mut record, None);
        record
    }

    /// Search for a better prompt with `optimizer`.
    pub async fn optimize(
        &self,
        optimizer: &dyn Optimizer,
        seed: &PromptCandidate,
        scenarios: &ScenarioSet,
    ) -> ExperimentRecord {
        self.optimize_with_progress(optimizer, seed, scenarios, |_| {})
            .await
    }

    /// Same as [`optimize`](Self::optimize), reporting progress events.
    ///
    /// An optimizer error is logged and recorded; the record keeps no trials
    /// and has no best candidate. Outcomes that exceed the trial budget are
    /// cut down to it.
    pub async fn optimize_with_progress<F>(
        &self,
        optimizer: &dyn Optimizer,
        seed: &PromptCandidate,
        scenarios: &ScenarioSet,
        on_progress: F,
    ) -> ExperimentRecord
    where
        F: Fn(EvalProgress) + Send + Sync,
    {
        let budget = self.config.trial_budget;
        let mut record =
            ExperimentRecord::start(EvaluationKind::Optimization, seed.clone(), scenarios.len());
        log::info!(
            "Running optimization {} with '{}' (budget {})",
            record.experiment_id(),
            optimizer.name(),
            budget
        );

        let tracer = ScenarioTracer::new(
            &self.context.telemetry,
            TraceScope::new(
                OPTIMIZATION_TRACE_NAME,
                record.experiment_id(),
                EvaluationKind::Optimization,
            ),
        );

        on_progress(EvalProgress::Started {
            total: scenarios.len(),
            trials: budget,
        });

        let result = optimizer
            .optimize(OptimizationRequest {
                seed,
                scenarios,
                metric: self.metric.as_ref(),
                generator: self.generator.as_ref(),
                trial_budget: budget,
                on_progress: &on_progress,
                tracer: Some(&tracer),
            })
            .await
            .and_then(|mut outcome| {
                if outcome.len() > budget {
                    log::warn!(
                        "Optimizer '{}' returned {} trials for a budget of {}; keeping the best {}",
                        optimizer.name(),
                        outcome.len(),
                        budget,
                        budget
                    );
                    outcome.truncate(budget);
                }
                check_alignment(outcome.trials(), scenarios.len())?;
                Ok(outcome)
            });

        let error = match result {
            Ok(outcome) => {
                for trial in outcome.into_trials() {
                    if let Err(e) = record.push_trial(trial) {
                        log::error!("{}", e);
                    }
                }
                None
            }
            Err(e) => {
                log::error!("Optimization {} failed: {}", record.experiment_id(), e);
                Some(e.to_string())
            }
        };

        match self.context.telemetry.flush().await {
            Ok(count) => log::debug!("Flushed {} optimization traces", count),
            Err(e) => log::warn!("Failed to flush optimization traces: {}", e),
        }

        finalize(&mut record, error);
        record
    }
}

fn check_alignment(
    trials: &[crate::results::TrialResult],
    expected: usize,
) -> Result<(), OptimizationError> {
    for (i, trial) in trials.iter().enumerate() {
        let got = trial.per_scenario_scores.len();
        if got != expected {
            return Err(OptimizationError::Misaligned {
                trial: i + 1,
                expected,
                got,
            });
        }
    }
    Ok(())
}

fn finalize(record: &mut ExperimentRecord, error: Option<String>) {
    let result = match error {
        Some(message) => record.fail(message),
        None => record.complete(),
    };
    if let Err(e) = result {
        log::error!("{}", e);
    }
}
