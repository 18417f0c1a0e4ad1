//! # Promptlab Eval
//!
//! Scenario-based evaluation and optimization of a health-coach system
//! prompt.
//!
//! ## Overview
//!
//! - **Scenarios**: fixed user messages with context, from the bundled set,
//!   a JSON file, or the dataset registry
//! - **Prompts**: validated templates with `{context}` and `{input}` slots
//! - **Judge**: rubric-based LLM scoring with strict parsing and fallbacks
//! - **Baseline**: sequential evaluation of one prompt
//! - **Optimizer**: pluggable search over prompt candidates within a budget
//! - **Reports**: Markdown plus JSON records, and per-scenario traces
//!
//! ## Architecture
//!
//! ```text
//! promptlab-core (LLM client, config, errors)
//!     ↓
//! promptlab-eval (scenarios, judge, runners, reports)  ← this crate
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use promptlab_core::{LlmClient, LlmConfig};
//! use promptlab_eval::{
//!     BuiltinScenarios, EvalContext, EvalHarness, HarnessConfig, JudgeConfig, JudgeMetric,
//!     LlmResponseGenerator, MetaPromptConfig, MetaPromptOptimizer, PromptCandidate,
//!     ResultReporter, ScenarioSource,
//! };
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = Arc::new(LlmClient::from_api_key("api-key", LlmConfig::default())?);
//! let harness = EvalHarness::new(
//!     EvalContext::in_memory("healthic-optimization"),
//!     Arc::new(JudgeMetric::new(client.clone(), JudgeConfig::default())),
//!     Arc::new(LlmResponseGenerator::new(client.clone())),
//!     HarnessConfig::default(),
//! );
//!
//! let scenarios = BuiltinScenarios.load().await?;
//! let optimizer = MetaPromptOptimizer::new(client, MetaPromptConfig::default());
//! let record = harness
//!     .optimize(&optimizer, &PromptCandidate::default_seed()?, &scenarios)
//!     .await;
//!
//! ResultReporter::default().write(&record)?;
//! # Ok(())
//! # }
//! ```

pub mod baseline;
pub mod context;
pub mod evaluation;
pub mod generator;
pub mod harness;
pub mod judge;
pub mod optimizer;
pub mod prompt;
pub mod registry;
pub mod report;
pub mod results;
pub mod scenario;
pub mod telemetry;

// Re-export public API
pub use baseline::{BaselineRunner, BASELINE_TRACE_NAME};
pub use context::EvalContext;
pub use evaluation::{evaluate_scenario, ScenarioOutcome, ScenarioTracer, TraceScope};
pub use generator::{GenerationError, LlmResponseGenerator, ResponseGenerator};
pub use harness::{EvalHarness, EvalProgress, HarnessConfig, HarnessError};
pub use judge::{JudgeConfig, JudgeError, JudgeMetric, Metric, JUDGE_FALLBACK_SCORE};
pub use optimizer::{
    MetaPromptConfig, MetaPromptOptimizer, OptimizationError, OptimizationOutcome,
    OptimizationRequest, Optimizer, TrialEvaluator,
};
pub use prompt::{
    Placeholder, PromptCandidate, PromptMessage, Role, Template, TemplateError,
    DEFAULT_SYSTEM_PROMPT, DEFAULT_USER_TEMPLATE,
};
pub use registry::{
    dated_dataset_name, DatasetHandle, DatasetRegistry, InMemoryRegistry, JsonDirRegistry,
    RegistryError,
};
pub use report::{print_summary, ResultReporter, ReportError};
pub use results::{
    summarize, EvaluationKind, EvaluationScore, ExperimentRecord, RecordError, RunStatus,
    ScoreSummary, TrialResult,
};
pub use scenario::{
    BuiltinScenarios, JsonFileScenarios, RegistryScenarios, ScenarioError, ScenarioItem,
    ScenarioSet, ScenarioSource,
};
pub use telemetry::{TelemetryClient, TelemetryError, TraceRecord};
