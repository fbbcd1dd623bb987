use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio_test::{assert_err, assert_ok};
use tsuzuri::collaborators::{DirectoryScanner, EchoGenerator, FileExporter};
use tsuzuri::config::PipelineConfig;
use tsuzuri::pipeline::{
    content_pipeline, DRAFT, OUTLINE, PROMOTION, REVIEW_DRAFT, REVIEW_EDIT, REVIEW_OUTLINE,
};
use tsuzuri::prelude::*;
use tsuzuri::{Generator, RunSnapshot, Validation};

/// Answers with "<stage> v<n>", counting calls per stage.
///
/// Stages listed in `empty` always answer with blank text; stages listed in
/// `broken` fail with a configuration error.
#[derive(Debug, Default)]
struct Scripted {
    calls: Mutex<HashMap<String, u32>>,
    empty: Vec<&'static str>,
    broken: Vec<&'static str>,
}

impl Scripted {
    fn calls(&self, stage: &str) -> u32 {
        self.calls
            .lock()
            .expect("lock")
            .get(stage)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl Generator for Scripted {
    async fn generate(&self, prompt_context: &Map<String, Value>) -> Result<String, WorkflowError> {
        let stage = prompt_context
            .get("stage")
            .and_then(Value::as_str)
            .unwrap_or("?")
            .to_string();
        let n = {
            let mut calls = self.calls.lock().expect("lock");
            let n = calls.entry(stage.clone()).or_insert(0);
            *n += 1;
            *n
        };
        if self.broken.contains(&stage.as_str()) {
            return Err(WorkflowError::Configuration("model not configured".to_string()));
        }
        if self.empty.contains(&stage.as_str()) {
            return Ok("   ".to_string());
        }
        Ok(format!("{} v{}", stage, n))
    }
}

fn pipeline(
    config: &PipelineConfig,
    generator: Arc<dyn Generator>,
    export_dir: &Path,
) -> Arc<WorkflowDefinition> {
    Arc::new(
        content_pipeline(
            config,
            generator,
            Arc::new(DirectoryScanner::new()),
            Arc::new(FileExporter::new(export_dir)),
        )
        .expect("valid pipeline"),
    )
}

#[tokio::test]
async fn test_each_revise_reruns_the_reviewed_loop_once() {
    let dir = tempfile::tempdir().expect("tempdir");
    let generator = Arc::new(Scripted::default());
    let mut run = Orchestrator::new(pipeline(
        &PipelineConfig::default(),
        generator.clone(),
        dir.path(),
    ));

    let report = run.handle_turn("start topic X").await.expect("turn");
    assert_eq!(run.state().get_str("topic"), Some("start topic X"));
    assert_eq!(report.checkpoint, Some(StepName::new(REVIEW_OUTLINE)));
    assert_eq!(generator.calls(OUTLINE), 1);

    for expected in ["outline v2", "outline v3"] {
        let report = run.handle_turn("revise").await.expect("turn");
        assert_eq!(report.outputs.len(), 1);
        assert_eq!(report.outputs[0].text, expected);
        assert_eq!(report.checkpoint, Some(StepName::new(REVIEW_OUTLINE)));
        assert_eq!(run.state().get_str("outline"), Some(expected));
        assert_eq!(run.state().get_str("outline_feedback"), Some(""));
    }

    let report = run.handle_turn("approve").await.expect("turn");
    assert_eq!(report.outputs[0].stage, StepName::new(DRAFT));
    assert_eq!(report.checkpoint, Some(StepName::new(REVIEW_DRAFT)));
    assert_eq!(generator.calls(OUTLINE), 3);
    assert_eq!(generator.calls(DRAFT), 1);
}

#[tokio::test]
async fn test_unrecognized_input_reprompts_without_moving() {
    let dir = tempfile::tempdir().expect("tempdir");
    let generator = Arc::new(Scripted::default());
    let mut run = Orchestrator::new(pipeline(
        &PipelineConfig::default(),
        generator.clone(),
        dir.path(),
    ));
    run.handle_turn("bread").await.expect("turn");
    let before = run.snapshot();

    let report = run
        .handle_turn("what do you think about rye?")
        .await
        .expect("turn");

    assert!(report.reprompt.is_some());
    assert!(report.outputs.is_empty());
    assert_eq!(report.status, RunStatus::AwaitingInput);
    assert_eq!(run.snapshot(), before);
    assert_eq!(generator.calls(OUTLINE), 1);
}

#[tokio::test]
async fn test_exhausted_loop_is_marked_unvalidated() {
    let dir = tempfile::tempdir().expect("tempdir");
    let generator = Arc::new(Scripted {
        empty: vec![OUTLINE],
        ..Scripted::default()
    });
    let mut run = Orchestrator::new(pipeline(
        &PipelineConfig::default(),
        generator.clone(),
        dir.path(),
    ));

    let report = run.handle_turn("bread").await.expect("turn");

    assert_eq!(generator.calls(OUTLINE), 3);
    assert!(report.has_unvalidated());
    assert!(matches!(
        report.outputs[0].validation,
        Validation::NotValidated { attempts: 3, .. }
    ));
    assert!(report.outputs[0].to_string().contains("[NOT VALIDATED]"));
    assert_eq!(report.error, None);
    assert_eq!(report.checkpoint, Some(StepName::new(REVIEW_OUTLINE)));
}

#[tokio::test]
async fn test_fatal_loop_surfaces_error_and_keeps_cursor() {
    let dir = tempfile::tempdir().expect("tempdir");
    let generator = Arc::new(Scripted {
        broken: vec![OUTLINE],
        ..Scripted::default()
    });
    let mut run = Orchestrator::new(pipeline(
        &PipelineConfig::default(),
        generator.clone(),
        dir.path(),
    ));

    let report = run.handle_turn("bread").await.expect("turn");

    assert_eq!(generator.calls(OUTLINE), 1);
    assert!(matches!(report.error, Some(WorkflowError::Configuration(_))));
    assert_eq!(run.cursor(), 0);
    assert_eq!(report.status, RunStatus::AwaitingInput);
}

#[tokio::test]
async fn test_missing_context_dir_is_a_turn_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = PipelineConfig {
        context_dir: Some(dir.path().join("no-such-notes")),
        ..PipelineConfig::default()
    };
    let generator = Arc::new(Scripted::default());
    let mut run = Orchestrator::new(pipeline(&config, generator.clone(), dir.path()));

    let report = run.handle_turn("bread").await.expect("turn");

    assert!(matches!(report.error, Some(WorkflowError::NotFound { .. })));
    assert_eq!(run.cursor(), 0);
    assert_eq!(generator.calls(OUTLINE), 0);
    assert!(report.prompt.is_some());
}

#[tokio::test]
async fn test_full_run_exports_edit_and_promotion() {
    let notes = tempfile::tempdir().expect("tempdir");
    std::fs::write(notes.path().join("facts.md"), "Matcha is powdered.").expect("write");
    let out = tempfile::tempdir().expect("tempdir");
    let config = PipelineConfig {
        context_dir: Some(notes.path().to_path_buf()),
        ..PipelineConfig::default()
    };
    let mut run = Orchestrator::new(pipeline(&config, Arc::new(EchoGenerator), out.path()));

    assert_ok!(run.handle_turn("Tea Ceremony").await);
    assert!(run
        .state()
        .get_str("outline")
        .is_some_and(|o| o.contains("Matcha is powdered.")));
    assert_ok!(run.handle_turn("approve").await);
    let report = assert_ok!(run.handle_turn("lgtm").await);
    assert_eq!(report.checkpoint, Some(StepName::new(REVIEW_EDIT)));

    let report = assert_ok!(run.handle_turn("option 1").await);
    assert_eq!(report.outputs[0].stage, StepName::new(PROMOTION));
    assert_eq!(report.checkpoint, Some(StepName::new(REVIEW_EDIT)));

    let report = assert_ok!(run.handle_turn("approve").await);
    assert_eq!(report.status, RunStatus::Completed);
    assert!(matches!(
        report.outputs.last().map(|o| &o.validation),
        Some(Validation::Exported)
    ));

    let exported =
        std::fs::read_to_string(out.path().join("tea-ceremony.md")).expect("exported file");
    assert!(exported.contains("Edit the draft"));
    assert!(exported.contains("promotional blurb"));

    let err = assert_err!(run.handle_turn("approve").await);
    assert_eq!(err, WorkflowError::RunClosed);
}

#[tokio::test]
async fn test_out_of_range_option_reprompts() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut run = Orchestrator::new(pipeline(
        &PipelineConfig::default(),
        Arc::new(EchoGenerator),
        dir.path(),
    ));
    for turn in ["bread", "approve", "approve"] {
        run.handle_turn(turn).await.expect("turn");
    }

    let report = run.handle_turn("option 2").await.expect("turn");

    assert!(report.reprompt.is_some());
    assert!(!run.state().has("promotion"));
}

#[tokio::test]
async fn test_resume_continues_from_snapshot() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("run.json");
    let generator = Arc::new(Scripted::default());
    let definition = pipeline(&PipelineConfig::default(), generator.clone(), dir.path());

    let mut first = Orchestrator::new(Arc::clone(&definition));
    first.handle_turn("bread").await.expect("turn");
    assert_ok!(first.snapshot().save(&path).await);
    drop(first);

    let saved = assert_ok!(RunSnapshot::load(&path).await);
    let mut resumed = assert_ok!(Orchestrator::resume(definition, saved));
    assert_eq!(
        resumed.current_checkpoint(),
        Some(StepName::new(REVIEW_OUTLINE))
    );

    let report = resumed.handle_turn("approve").await.expect("turn");

    assert_eq!(report.checkpoint, Some(StepName::new(REVIEW_DRAFT)));
    assert_eq!(resumed.state().get_str("outline"), Some("outline v1"));
    assert_eq!(generator.calls(DRAFT), 1);
}

#[tokio::test]
async fn test_decline_discards_the_run() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut run = Orchestrator::new(pipeline(
        &PipelineConfig::default(),
        Arc::new(EchoGenerator),
        dir.path(),
    ));
    run.handle_turn("bread").await.expect("turn");

    let report = run.handle_turn("cancel").await.expect("turn");

    assert_eq!(report.status, RunStatus::Cancelled);
    assert!(run.state().is_empty());
    assert_eq!(run.prompt(), None);
}

#[tokio::test]
async fn test_topic_starting_with_a_keyword_is_captured() {
    let dir = tempfile::tempdir().expect("tempdir");
    let generator = Arc::new(Scripted::default());
    let mut run = Orchestrator::new(pipeline(
        &PipelineConfig::default(),
        generator.clone(),
        dir.path(),
    ));

    let report = run
        .handle_turn("Stop motion animation for beginners")
        .await
        .expect("turn");

    assert_eq!(report.status, RunStatus::AwaitingInput);
    assert_eq!(report.reprompt, None);
    assert_eq!(
        run.state().get_str("topic"),
        Some("Stop motion animation for beginners")
    );
    assert_eq!(report.checkpoint, Some(StepName::new(REVIEW_OUTLINE)));
    assert_eq!(generator.calls(OUTLINE), 1);
}
