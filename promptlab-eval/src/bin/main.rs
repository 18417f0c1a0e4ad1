//! Prompt evaluation CLI for the Healthic health coach.
//!
//! Runs a baseline evaluation of the current system prompt, or searches for
//! an improved prompt and writes the results to a Markdown report.

use chrono::Local;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use promptlab_core::{ConfigError, LlmClient, LlmConfig, DEFAULT_MODEL};
use promptlab_eval::registry::DEFAULT_DATASET_DESCRIPTION;
use promptlab_eval::{
    dated_dataset_name, print_summary, BuiltinScenarios, EvalContext, EvalHarness, EvalProgress,
    ExperimentRecord, HarnessConfig, HarnessError, JsonDirRegistry, JsonFileScenarios,
    JudgeConfig, JudgeMetric, LlmResponseGenerator, MetaPromptConfig, MetaPromptOptimizer,
    PromptCandidate, RegistryScenarios, ResultReporter, RunStatus, ScenarioSet, ScenarioSource,
    TelemetryClient,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

/// Environment file loaded from the working directory when present.
const DEFAULT_ENV_FILE: &str = ".env.local";

/// Fallback variable for the API key.
const FALLBACK_API_KEY_VAR: &str = "GOOGLE_GENAI_API_KEY";

const DEFAULT_OPTIMIZATION_REPORT: &str = "docs/optimization-results.md";
const DEFAULT_BASELINE_REPORT: &str = "docs/baseline-results.md";

/// Evaluate and optimize the Healthic coach system prompt.
#[derive(Parser, Debug)]
#[command(name = "promptlab")]
#[command(about = "Evaluate and optimize the Healthic coach system prompt")]
#[command(version)]
struct Args {
    /// Run a baseline evaluation of the current prompt instead of optimizing
    #[arg(long)]
    baseline: bool,

    /// JSON file of scenarios (default: the bundled scenarios)
    #[arg(long, short = 's', conflicts_with = "from_dataset")]
    scenarios: Option<PathBuf>,

    /// Load scenarios from a previously registered dataset
    #[arg(long)]
    from_dataset: Option<String>,

    /// Name to register the scenarios under (default: healthic-optimization-YYYYMMDD)
    #[arg(long)]
    dataset: Option<String>,

    /// Maximum optimization trials
    #[arg(long, default_value = "3")]
    trials: usize,

    /// Concurrent scenario evaluations per trial
    #[arg(long, default_value = "2")]
    workers: usize,

    /// Report path (default: docs/optimization-results.md, or
    /// docs/baseline-results.md with --baseline)
    #[arg(long, short = 'o')]
    output: Option<PathBuf>,

    /// Directory for traces and registered datasets
    #[arg(long, default_value = "runs")]
    telemetry_dir: PathBuf,

    /// Project name used to group traces
    #[arg(long, default_value = "healthic-optimization")]
    project: String,

    /// Model that generates coach responses and prompt rewrites
    #[arg(long, default_value = DEFAULT_MODEL)]
    model: String,

    /// Model that judges responses (default: same as --model)
    #[arg(long)]
    judge_model: Option<String>,

    /// LLM request timeout in seconds
    #[arg(long, default_value = "30")]
    llm_timeout: u64,

    /// Maximum retries for transient LLM failures
    #[arg(long, default_value = "1")]
    max_retries: u32,

    /// Gemini API key (falls back to GOOGLE_GENAI_API_KEY)
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Environment file to load (default: .env.local if present)
    #[arg(long)]
    env_file: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    /// Validate CLI arguments.
    fn validate(&self) -> Result<(), String> {
        if self.trials == 0 {
            return Err("trials must be greater than 0".to_string());
        }
        if self.workers == 0 {
            return Err("workers must be greater than 0".to_string());
        }
        if self.llm_timeout == 0 {
            return Err("llm-timeout must be greater than 0".to_string());
        }
        if self.project.trim().is_empty() {
            return Err("project must not be empty".to_string());
        }
        Ok(())
    }

    /// Build the LlmConfig for a model.
    fn llm_config(&self, model: &str) -> LlmConfig {
        LlmConfig::default()
            .with_model(model)
            .with_timeout(Duration::from_secs(self.llm_timeout))
            .with_max_retries(self.max_retries)
            .with_retry_base_delay_ms(1000)
    }

    fn judge_model(&self) -> &str {
        self.judge_model.as_deref().unwrap_or(&self.model)
    }

    fn report_path(&self) -> PathBuf {
        self.output.clone().unwrap_or_else(|| {
            PathBuf::from(if self.baseline {
                DEFAULT_BASELINE_REPORT
            } else {
                DEFAULT_OPTIMIZATION_REPORT
            })
        })
    }

    fn dataset_name(&self) -> String {
        self.dataset
            .clone()
            .unwrap_or_else(|| dated_dataset_name(Local::now().date_naive()))
    }
}

/// Load environment variables from a file without overriding existing ones.
///
/// A missing default file is skipped; a missing explicit file is an error.
fn load_env_file(explicit: Option<&Path>) -> Result<Option<PathBuf>, ConfigError> {
    let path = explicit
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_ENV_FILE));

    match dotenvy::from_path(&path) {
        Ok(()) => Ok(Some(path)),
        Err(e) if e.not_found() && explicit.is_none() => Ok(None),
        Err(e) => Err(ConfigError::EnvFile {
            path: path.display().to_string(),
            message: e.to_string(),
        }),
    }
}

/// Pick the API key from the flag, then the environment.
fn resolve_api_key(
    explicit: Option<&str>,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<String, ConfigError> {
    explicit
        .map(str::to_string)
        .or_else(|| lookup("GEMINI_API_KEY"))
        .or_else(|| lookup(FALLBACK_API_KEY_VAR))
        .filter(|key| !key.trim().is_empty())
        .ok_or_else(|| {
            ConfigError::MissingCredential(format!(
                "set GEMINI_API_KEY or {} (or pass --api-key)",
                FALLBACK_API_KEY_VAR
            ))
        })
}

fn progress_bar() -> ProgressBar {
    let bar = ProgressBar::new(0);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
        .map(|style| style.progress_chars("#>-"))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    bar.set_style(style);
    bar
}

fn on_progress(bar: &ProgressBar, progress: EvalProgress) {
    match progress {
        EvalProgress::Started { total, trials } => {
            bar.set_length((total * trials) as u64);
            bar.set_message("Evaluating...");
        }
        EvalProgress::ScenarioCompleted { trial, score, .. } => {
            bar.inc(1);
            bar.set_message(format!("trial {}: last score {:.2}", trial, score));
        }
        EvalProgress::TrialCompleted { trial, aggregate } => {
            bar.println(format!("Trial {} average score: {:.3}", trial, aggregate));
        }
        _ => {} // Handle future variants gracefully
    }
}

/// Load scenarios from the selected source.
async fn load_scenarios(args: &Args, context: &EvalContext) -> Result<ScenarioSet, HarnessError> {
    let set = if let Some(name) = &args.from_dataset {
        RegistryScenarios::lookup(context.registry.as_ref(), name)
            .await?
            .load()
            .await?
    } else if let Some(path) = &args.scenarios {
        JsonFileScenarios::new(path.clone()).load().await?
    } else {
        BuiltinScenarios.load().await?
    };
    Ok(set)
}

async fn run(args: &Args) -> Result<ExitCode, HarnessError> {
    if let Some(path) = load_env_file(args.env_file.as_deref())? {
        log::info!("Loaded environment from {}", path.display());
    }
    let api_key = resolve_api_key(args.api_key.as_deref(), |name| std::env::var(name).ok())?;

    let generation_config = args.llm_config(&args.model);
    let judge_config = args.llm_config(args.judge_model());
    let generation_client = Arc::new(LlmClient::from_api_key(
        api_key.clone(),
        generation_config.clone(),
    )?);
    let judge_client = Arc::new(LlmClient::from_api_key(api_key, judge_config.clone())?);

    let context = EvalContext::new(
        Arc::new(TelemetryClient::jsonl(&args.telemetry_dir, &args.project)),
        Arc::new(JsonDirRegistry::new(args.telemetry_dir.join("datasets"))),
    );

    let scenarios = load_scenarios(args, &context).await?;
    if scenarios.is_empty() {
        eprintln!("Error: no scenarios to evaluate");
        return Ok(ExitCode::FAILURE);
    }

    let seed = PromptCandidate::default_seed()?;
    let harness = EvalHarness::new(
        context,
        Arc::new(JudgeMetric::new(
            judge_client,
            JudgeConfig::default().with_timeout(judge_config.total_budget()),
        )),
        Arc::new(
            LlmResponseGenerator::new(generation_client.clone())
                .with_timeout(generation_config.total_budget()),
        ),
        HarnessConfig::new().with_trial_budget(args.trials),
    );

    if args.from_dataset.is_none() {
        let name = args.dataset_name();
        if let Err(e) = harness
            .register_dataset(&name, DEFAULT_DATASET_DESCRIPTION, &scenarios)
            .await
        {
            log::warn!("Could not register dataset '{}': {}", name, e);
        }
    }

    eprintln!("=== Healthic Prompt {} ===", if args.baseline { "Baseline" } else { "Optimizer" });
    eprintln!("Started: {}", Local::now().format("%Y-%m-%d %H:%M:%S"));
    eprintln!("Scenarios: {}", scenarios.len());
    eprintln!("Model: {} (judge: {})", args.model, args.judge_model());
    if !args.baseline {
        eprintln!("Trials: {}, workers: {}", args.trials, args.workers);
    }
    eprintln!();

    let bar = progress_bar();
    let record: ExperimentRecord = if args.baseline {
        harness
            .baseline_with_progress(&seed, &scenarios, |p| on_progress(&bar, p))
            .await
    } else {
        let optimizer = MetaPromptOptimizer::new(
            generation_client,
            MetaPromptConfig::default()
                .with_workers(args.workers)
                .with_rewrite_timeout(generation_config.total_budget()),
        );
        harness
            .optimize_with_progress(&optimizer, &seed, &scenarios, |p| on_progress(&bar, p))
            .await
    };
    bar.finish_with_message("Complete");

    print_summary(&record);

    let reporter = ResultReporter::new(args.report_path());
    let path = reporter.write(&record)?;
    println!("Results saved to: {}", path.display());
    if let Some(traces) = harness.context().telemetry.trace_path() {
        println!("Traces: {}", traces.display());
    }

    Ok(match record.status() {
        RunStatus::Failed(_) => ExitCode::FAILURE,
        _ => ExitCode::SUCCESS,
    })
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Initialize logging
    if args.verbose {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    } else {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    }

    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        return ExitCode::FAILURE;
    }

    match run(&args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
