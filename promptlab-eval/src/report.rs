//! Markdown and JSON reporting for experiment records.

use crate::prompt::PromptCandidate;
use crate::results::{summarize, EvaluationKind, ExperimentRecord, RunStatus, ScoreSummary};
use chrono::{DateTime, SecondsFormat, Utc};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default location of the Markdown report.
pub const DEFAULT_REPORT_PATH: &str = "docs/optimization-results.md";

/// Errors from writing a report.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ReportError {
    #[error("Failed to write report {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to serialize experiment record: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Writes experiment records as Markdown plus a JSON sidecar.
#[derive(Debug, Clone)]
pub struct ResultReporter {
    output: PathBuf,
}

impl Default for ResultReporter {
    fn default() -> Self {
        Self::new(DEFAULT_REPORT_PATH)
    }
}

impl ResultReporter {
    pub fn new(output: impl Into<PathBuf>) -> Self {
        Self {
            output: output.into(),
        }
    }

    /// Path of the Markdown report.
    pub fn output(&self) -> &Path {
        &self.output
    }

    /// Path of the JSON record written beside the report.
    pub fn json_path(&self) -> PathBuf {
        self.output.with_extension("json")
    }

    /// Render the report, stamped with the current time.
    pub fn render(&self, record: &ExperimentRecord) -> String {
        render_at(record, Utc::now())
    }

    /// Write the Markdown report and JSON record, creating parent
    /// directories as needed. Returns the Markdown path.
    pub fn write(&self, record: &ExperimentRecord) -> Result<PathBuf, ReportError> {
        let json = serde_json::to_string_pretty(record)?;
        write_file(&self.output, &self.render(record))?;
        write_file(&self.json_path(), &json)?;
        Ok(self.output.clone())
    }
}

fn write_file(path: &Path, contents: &str) -> Result<(), ReportError> {
    let io_error = |source| ReportError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(io_error)?;
    }
    std::fs::write(path, contents).map_err(io_error)
}

/// Render a record as Markdown with an explicit generation time.
pub fn render_at(record: &ExperimentRecord, generated: DateTime<Utc>) -> String {
    let mut doc = String::new();
    let title = match record.kind() {
        EvaluationKind::Baseline => "Baseline Evaluation Results",
        EvaluationKind::Optimization => "Prompt Optimization Results",
    };

    // Writing to a String cannot fail
    let _ = writeln!(doc, "# {}\n", title);
    let _ = writeln!(
        doc,
        "Generated: {}\n",
        generated.to_rfc3339_opts(SecondsFormat::Secs, true)
    );
    let _ = writeln!(doc, "Experiment: `{}`\n", record.experiment_id());
    let _ = writeln!(doc, "Scenarios: {}\n", record.scenario_count());
    match record.status() {
        RunStatus::Running => {
            let _ = writeln!(doc, "Status: running\n");
        }
        RunStatus::Completed => {
            let _ = writeln!(doc, "Status: completed\n");
        }
        RunStatus::Failed(error) => {
            let _ = writeln!(doc, "Status: failed ({})\n", error);
        }
    }

    let _ = writeln!(doc, "## Original Prompt\n");
    push_code_block(&mut doc, &prompt_text(record.seed()));

    if record.kind() == EvaluationKind::Optimization {
        if let Some(best) = record.best_trial() {
            let _ = writeln!(doc, "## Optimized Prompt\n");
            push_code_block(&mut doc, &prompt_text(&best.candidate));
            let _ = writeln!(doc, "Best score: {:.3}\n", best.aggregate_score());
        }
    }

    match record.kind() {
        EvaluationKind::Baseline => {
            let _ = writeln!(doc, "## Baseline Scores\n");
            if let Some(trial) = record.trials().first() {
                for (i, score) in trial.per_scenario_scores.iter().enumerate() {
                    let _ = writeln!(
                        doc,
                        "- Scenario {}: {:.2} ({})",
                        i + 1,
                        score.value(),
                        one_line(&score.rationale)
                    );
                }
                let _ = writeln!(doc);
                push_summary(&mut doc, &trial.summary());
            }
        }
        EvaluationKind::Optimization => {
            let _ = writeln!(doc, "## Optimization History\n");
            let _ = writeln!(doc, "Trials ranked by average score, best first.\n");
            if record.trials().is_empty() {
                let _ = writeln!(doc, "No trials completed.\n");
            }
            for (i, trial) in record.trials().iter().enumerate() {
                let _ = writeln!(doc, "### Rank {}", i + 1);
                let summary = trial.summary();
                let _ = writeln!(
                    doc,
                    "Score: {:.3} (min {:.2}, max {:.2})\n",
                    summary.mean, summary.min, summary.max
                );
            }
        }
    }

    doc
}

fn push_summary(doc: &mut String, summary: &ScoreSummary) {
    let _ = writeln!(
        doc,
        "Average: {:.2}, Min: {:.2}, Max: {:.2}\n",
        summary.mean, summary.min, summary.max
    );
}

fn prompt_text(candidate: &PromptCandidate) -> String {
    candidate
        .system_text()
        .unwrap_or_else(|| candidate.to_display_text())
}

fn one_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Fence `text` with enough backticks that nothing inside can close it.
fn push_code_block(doc: &mut String, text: &str) {
    let longest_run = text
        .split(|c| c != '`')
        .map(str::len)
        .max()
        .unwrap_or(0);
    let fence = "`".repeat(longest_run.max(2) + 1);
    let _ = writeln!(doc, "{}\n{}\n{}\n", fence, text.trim_end(), fence);
}

/// Print a score summary for a finished record to stdout.
pub fn print_summary(record: &ExperimentRecord) {
    println!();
    println!("{}", "=".repeat(60));
    match record.kind() {
        EvaluationKind::Baseline => {
            let scores = record
                .trials()
                .first()
                .map(|t| t.score_values())
                .unwrap_or_default();
            let summary = summarize(&scores);
            println!("Baseline Average Score: {:.2}", summary.mean);
            println!("   Min: {:.2}, Max: {:.2}", summary.min, summary.max);
        }
        EvaluationKind::Optimization => {
            let summary = record.trial_summary();
            println!("Optimization trials: {}", summary.count);
            match record.best_trial() {
                Some(best) => println!("Best Score: {:.3}", best.aggregate_score()),
                None => println!("No best candidate"),
            }
            if summary.count > 0 {
                println!(
                    "   Trial mean: {:.2}, Min: {:.2}, Max: {:.2}",
                    summary.mean, summary.min, summary.max
                );
            }
        }
    }
    if let RunStatus::Failed(error) = record.status() {
        println!("Run failed: {}", error);
    }
    println!("{}", "=".repeat(60));
}
