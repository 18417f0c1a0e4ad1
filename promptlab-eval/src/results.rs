//! Evaluation results and experiment records.
//!
//! This module contains the output types for evaluation runs, designed for
//! JSON serialization and programmatic consumption.

use crate::prompt::PromptCandidate;
use chrono::{DateTime, Utc};
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use thiserror::Error;

/// Score recorded for a scenario whose response could not be generated.
pub const GENERATION_FALLBACK_SCORE: f64 = 0.0;

/// A bounded quality score plus the judge's explanation.
///
/// The value is only set through [`new`](Self::new), deserialization
/// included, so it always lies within `[0.0, 1.0]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawScore")]
pub struct EvaluationScore {
    value: f64,
    pub rationale: String,
}

#[derive(Deserialize)]
struct RawScore {
    value: f64,
    rationale: String,
}

impl From<RawScore> for EvaluationScore {
    fn from(raw: RawScore) -> Self {
        EvaluationScore::new(raw.value, raw.rationale)
    }
}

impl EvaluationScore {
    /// Create a score, clamping `value` into `[0.0, 1.0]`.
    ///
    /// NaN clamps to 0.0.
    pub fn new(value: f64, rationale: impl Into<String>) -> Self {
        Self {
            value: clamp_unit(value),
            rationale: rationale.into(),
        }
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    /// The score recorded when the response could not be generated.
    pub fn generation_failed(error: impl std::fmt::Display) -> Self {
        Self::new(
            GENERATION_FALLBACK_SCORE,
            format!("generation failed: {}", error),
        )
    }
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Mean, minimum and maximum of a score list.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreSummary {
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    pub count: usize,
}

/// Summarize scores. An empty slice summarizes to all zeros.
///
/// Baseline and optimization reporting both go through this function.
pub fn summarize(scores: &[f64]) -> ScoreSummary {
    if scores.is_empty() {
        return ScoreSummary {
            mean: 0.0,
            min: 0.0,
            max: 0.0,
            count: 0,
        };
    }

    let sum: f64 = scores.iter().sum();
    let min = scores.iter().copied().fold(f64::INFINITY, f64::min);
    let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    ScoreSummary {
        mean: sum / scores.len() as f64,
        min,
        max,
        count: scores.len(),
    }
}

/// One candidate evaluated across the full scenario set.
///
/// `per_scenario_scores[i]` belongs to scenario `i` of the set it was
/// evaluated on. The aggregate is always derived from those scores.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TrialResult {
    pub candidate: PromptCandidate,
    pub per_scenario_scores: Vec<EvaluationScore>,
}

impl TrialResult {
    pub fn new(candidate: PromptCandidate, per_scenario_scores: Vec<EvaluationScore>) -> Self {
        Self {
            candidate,
            per_scenario_scores,
        }
    }

    /// Arithmetic mean of the per-scenario scores (0 when empty).
    pub fn aggregate_score(&self) -> f64 {
        self.summary().mean
    }

    pub fn summary(&self) -> ScoreSummary {
        summarize(&self.score_values())
    }

    pub fn score_values(&self) -> Vec<f64> {
        self.per_scenario_scores.iter().map(EvaluationScore::value).collect()
    }
}

impl Serialize for TrialResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("TrialResult", 3)?;
        state.serialize_field("candidate", &self.candidate)?;
        state.serialize_field("per_scenario_scores", &self.per_scenario_scores)?;
        state.serialize_field("aggregate_score", &self.aggregate_score())?;
        state.end()
    }
}

/// Sort trials by aggregate score, best first. Ties keep their input order.
pub fn rank_trials(trials: &mut [TrialResult]) {
    trials.sort_by(|a, b| b.aggregate_score().total_cmp(&a.aggregate_score()));
}

/// Which path produced an experiment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationKind {
    Baseline,
    Optimization,
}

impl EvaluationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EvaluationKind::Baseline => "baseline",
            EvaluationKind::Optimization => "optimization",
        }
    }
}

/// How an experiment ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "error", rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed(String),
}

/// Errors from mutating an experiment record.
#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum RecordError {
    #[error("Experiment {0} is already finalized")]
    Finalized(String),
}

/// The append-only log of one baseline or optimization run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentRecord {
    experiment_id: String,
    kind: EvaluationKind,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    seed: PromptCandidate,
    scenario_count: usize,
    trials: Vec<TrialResult>,
    status: RunStatus,
}

impl ExperimentRecord {
    /// Start a record with an id of the form `<kind>-YYYYMMDD-HHMMSS`.
    pub fn start(kind: EvaluationKind, seed: PromptCandidate, scenario_count: usize) -> Self {
        let started_at = Utc::now();
        let experiment_id = format!("{}-{}", kind.as_str(), started_at.format("%Y%m%d-%H%M%S"));
        Self::with_id(experiment_id, kind, seed, scenario_count, started_at)
    }

    pub fn with_id(
        experiment_id: impl Into<String>,
        kind: EvaluationKind,
        seed: PromptCandidate,
        scenario_count: usize,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            experiment_id: experiment_id.into(),
            kind,
            started_at,
            finished_at: None,
            seed,
            scenario_count,
            trials: Vec::new(),
            status: RunStatus::Running,
        }
    }

    pub fn experiment_id(&self) -> &str {
        &self.experiment_id
    }

    pub fn kind(&self) -> EvaluationKind {
        self.kind
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    pub fn seed(&self) -> &PromptCandidate {
        &self.seed
    }

    pub fn scenario_count(&self) -> usize {
        self.scenario_count
    }

    pub fn trials(&self) -> &[TrialResult] {
        &self.trials
    }

    pub fn status(&self) -> &RunStatus {
        &self.status
    }

    pub fn is_finalized(&self) -> bool {
        self.finished_at.is_some()
    }

    /// Append a trial. Fails once the record is finalized.
    pub fn push_trial(&mut self, trial: TrialResult) -> Result<(), RecordError> {
        if self.is_finalized() {
            return Err(RecordError::Finalized(self.experiment_id.clone()));
        }
        self.trials.push(trial);
        Ok(())
    }

    /// Mark the run as completed.
    pub fn complete(&mut self) -> Result<(), RecordError> {
        self.finalize(RunStatus::Completed)
    }

    /// Mark the run as failed, keeping any trials gathered so far.
    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), RecordError> {
        self.finalize(RunStatus::Failed(error.into()))
    }

    fn finalize(&mut self, status: RunStatus) -> Result<(), RecordError> {
        if self.is_finalized() {
            return Err(RecordError::Finalized(self.experiment_id.clone()));
        }
        self.status = status;
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    /// Highest-scoring trial; the earliest wins a tie.
    pub fn best_trial(&self) -> Option<&TrialResult> {
        self.trials.iter().reduce(|best, trial| {
            if trial.aggregate_score() > best.aggregate_score() {
                trial
            } else {
                best
            }
        })
    }

    /// Summary over the aggregate score of each trial.
    pub fn trial_summary(&self) -> ScoreSummary {
        let aggregates: Vec<f64> = self.trials.iter().map(|t| t.aggregate_score()).collect();
        summarize(&aggregates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn candidate() -> PromptCandidate {
        PromptCandidate::from_system_and_user("Be a coach", "{input}").unwrap()
    }

    fn trial(values: &[f64]) -> TrialResult {
        TrialResult::new(
            candidate(),
            values
                .iter()
                .map(|v| EvaluationScore::new(*v, "r"))
                .collect(),
        )
    }

    #[rstest]
    #[case::above(1.7, 1.0)]
    #[case::below(-0.3, 0.0)]
    #[case::inside(0.42, 0.42)]
    #[case::upper_edge(1.0, 1.0)]
    #[case::lower_edge(0.0, 0.0)]
    #[case::nan(f64::NAN, 0.0)]
    #[case::infinite(f64::INFINITY, 1.0)]
    fn test_score_clamping(#[case] raw: f64, #[case] expected: f64) {
        assert_eq!(EvaluationScore::new(raw, "").value(), expected);
    }

    #[rstest]
    #[case::above(r#"{"value": 3.5, "rationale": "r"}"#, 1.0)]
    #[case::below(r#"{"value": -2.0, "rationale": "r"}"#, 0.0)]
    #[case::inside(r#"{"value": 0.25, "rationale": "r"}"#, 0.25)]
    fn test_deserialized_score_is_clamped(#[case] json: &str, #[case] expected: f64) {
        let score: EvaluationScore = serde_json::from_str(json).unwrap();
        assert_eq!(score.value(), expected);
        assert_eq!(score.rationale, "r");
    }

    #[test]
    fn test_generation_failed_score() {
        let score = EvaluationScore::generation_failed("Request timed out after 30000ms");
        assert_eq!(score.value(), GENERATION_FALLBACK_SCORE);
        assert!(score.rationale.contains("timed out"));
    }

    #[test]
    fn test_summarize() {
        let summary = summarize(&[0.2, 0.8, 0.5]);
        assert!((summary.mean - 0.5).abs() < 1e-12);
        assert_eq!(summary.min, 0.2);
        assert_eq!(summary.max, 0.8);
        assert_eq!(summary.count, 3);
    }

    #[test]
    fn test_summarize_empty() {
        let summary = summarize(&[]);
        assert_eq!(summary.mean, 0.0);
        assert_eq!(summary.min, 0.0);
        assert_eq!(summary.max, 0.0);
        assert_eq!(summary.count, 0);
    }

    #[test]
    fn test_aggregate_is_mean() {
        let trial = trial(&[1.0, 0.0, 0.5, 0.5]);
        assert_eq!(trial.aggregate_score(), 0.5);
        assert_eq!(TrialResult::new(candidate(), vec![]).aggregate_score(), 0.0);
    }

    #[test]
    fn test_trial_serializes_aggregate() {
        let json = serde_json::to_value(trial(&[0.25, 0.75])).unwrap();
        assert_eq!(json["aggregate_score"], 0.5);

        // The stored aggregate is ignored on the way back in
        let parsed: TrialResult = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.aggregate_score(), 0.5);
    }

    #[test]
    fn test_rank_trials_descending_and_stable() {
        let mut trials = vec![trial(&[0.3]), trial(&[0.9]), trial(&[0.3]), trial(&[0.6])];
        trials[2].per_scenario_scores[0].rationale = "second 0.3".to_string();
        rank_trials(&mut trials);

        let scores: Vec<f64> = trials.iter().map(|t| t.aggregate_score()).collect();
        assert_eq!(scores, vec![0.9, 0.6, 0.3, 0.3]);
        assert_eq!(trials[3].per_scenario_scores[0].rationale, "second 0.3");
    }

    #[test]
    fn test_record_is_append_only_until_finalized() {
        let mut record = ExperimentRecord::start(EvaluationKind::Baseline, candidate(), 1);
        assert!(record.experiment_id().starts_with("baseline-"));
        assert_eq!(record.status(), &RunStatus::Running);

        record.push_trial(trial(&[0.4])).unwrap();
        record.complete().unwrap();

        assert!(record.is_finalized());
        assert!(matches!(
            record.push_trial(trial(&[0.9])),
            Err(RecordError::Finalized(_))
        ));
        assert!(record.fail("late").is_err());
        assert_eq!(record.trials().len(), 1);
        assert_eq!(record.status(), &RunStatus::Completed);
    }

    #[test]
    fn test_failed_record_keeps_partial_trials() {
        let mut record = ExperimentRecord::start(EvaluationKind::Optimization, candidate(), 2);
        record.push_trial(trial(&[0.4, 0.6])).unwrap();
        record.fail("optimizer crashed").unwrap();

        assert_eq!(record.status(), &RunStatus::Failed("optimizer crashed".into()));
        assert_eq!(record.trial_summary().mean, 0.5);
    }

    #[test]
    fn test_best_trial_prefers_earliest_on_tie() {
        let mut record = ExperimentRecord::start(EvaluationKind::Optimization, candidate(), 1);
        assert!(record.best_trial().is_none());

        let mut first = trial(&[0.7]);
        first.per_scenario_scores[0].rationale = "first".to_string();
        record.push_trial(trial(&[0.2])).unwrap();
        record.push_trial(first).unwrap();
        record.push_trial(trial(&[0.7])).unwrap();

        let best = record.best_trial().unwrap();
        assert_eq!(best.per_scenario_scores[0].rationale, "first");
    }

    #[test]
    fn test_record_serialization() {
        let mut record = ExperimentRecord::start(EvaluationKind::Baseline, candidate(), 1);
        record.push_trial(trial(&[0.8])).unwrap();
        record.complete().unwrap();

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["kind"], "baseline");
        assert_eq!(json["status"]["status"], "completed");
        assert_eq!(json["trials"][0]["aggregate_score"], 0.8);
    }
}
