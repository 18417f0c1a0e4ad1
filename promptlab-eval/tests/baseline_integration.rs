//! Integration tests for baseline runs with scripted models.

mod common;

use common::{judged_response, three_scenarios, CallKind, Reply, ScriptedModel};
use promptlab_core::{CompletionModel, LlmError};
use promptlab_eval::{
    EvalContext, EvalHarness, EvaluationKind, HarnessConfig, JudgeConfig, JudgeMetric,
    LlmResponseGenerator, PromptCandidate, RunStatus, JUDGE_FALLBACK_SCORE,
};
use std::sync::Arc;
use std::time::Duration;

fn harness(model: Arc<dyn CompletionModel>) -> EvalHarness {
    EvalHarness::new(
        EvalContext::in_memory("healthic-optimization"),
        Arc::new(JudgeMetric::new(
            model.clone(),
            JudgeConfig::default().with_timeout(Duration::from_secs(10)),
        )),
        Arc::new(LlmResponseGenerator::new(model).with_timeout(Duration::from_secs(5))),
        HarnessConfig::default(),
    )
}

#[tokio::test(start_paused = true)]
async fn test_baseline_with_timed_out_scenario() {
    let model = Arc::new(ScriptedModel::new(|kind, request| match kind {
        CallKind::Generate if request.prompt_text().contains("5K") => Reply::Hang,
        CallKind::Generate => Reply::text("Let's start with a 20 minute walk after dinner."),
        _ => Reply::judgment(0.8, "specific and kind"),
    }));
    let harness = harness(model.clone());
    let scenarios = three_scenarios();

    let record = harness
        .baseline(&PromptCandidate::default_seed().unwrap(), &scenarios)
        .await;

    assert_eq!(record.kind(), EvaluationKind::Baseline);
    assert_eq!(record.status(), &RunStatus::Completed);

    let trial = &record.trials()[0];
    assert_eq!(trial.per_scenario_scores.len(), 3);
    assert_eq!(trial.score_values(), vec![0.8, 0.0, 0.8]);
    assert!(trial.per_scenario_scores[1].rationale.contains("timed out"));
    assert!((trial.aggregate_score() - 1.6 / 3.0).abs() < 1e-12);

    // The timed-out scenario is never judged
    assert_eq!(model.calls_of(CallKind::Judge), 2);

    let traces = harness.context().telemetry.committed();
    assert_eq!(traces.len(), 3);
    let failed = traces[1].output.as_ref().unwrap();
    assert_eq!(failed.response, "");
    assert_eq!(failed.score, 0.0);
    assert!(failed.error.is_some());
}

#[tokio::test]
async fn test_malformed_judgment_does_not_stop_run() {
    let model = Arc::new(ScriptedModel::new(|kind, request| match kind {
        CallKind::Judge if judged_response(request).contains("sleep") => {
            Reply::text("```json\nScore: 8/10, nice job\n```")
        }
        CallKind::Judge => Reply::text("```json\n{\"score\": 1.7, \"reason\": \"excellent\"}\n```"),
        _ => Reply::text(format!("Coach reply about {}", request.prompt_text())),
    }));
    let harness = harness(model);

    let record = harness
        .baseline(&PromptCandidate::default_seed().unwrap(), &three_scenarios())
        .await;

    let scores = &record.trials()[0].per_scenario_scores;
    assert_eq!(scores.len(), 3);
    assert_eq!(scores[0].value(), 1.0);
    assert_eq!(scores[1].value(), 1.0);
    assert_eq!(scores[2].value(), JUDGE_FALLBACK_SCORE);
    assert!(scores[2].rationale.starts_with("judge parse error"));
}

#[tokio::test]
async fn test_all_generations_failing_keeps_alignment() {
    let model = Arc::new(ScriptedModel::new(|kind, _request| match kind {
        CallKind::Generate => Reply::Error(LlmError::InvalidRequest(
            "API key not valid".to_string(),
        )),
        _ => Reply::judgment(0.9, "unused"),
    }));
    let harness = harness(model.clone());

    let record = harness
        .baseline(&PromptCandidate::default_seed().unwrap(), &three_scenarios())
        .await;

    let trial = &record.trials()[0];
    assert_eq!(trial.per_scenario_scores.len(), 3);
    assert!(trial.per_scenario_scores.iter().all(|s| s.value() == 0.0));
    assert_eq!(trial.aggregate_score(), 0.0);
    assert_eq!(model.calls_of(CallKind::Judge), 0);
    assert_eq!(harness.context().telemetry.committed().len(), 3);
}
