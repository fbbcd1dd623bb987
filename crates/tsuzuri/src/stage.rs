//! Stages: the units a workflow definition is made of.

use crate::executor::run_producer;
use crate::retry_loop::{RetryLoop, TerminalReason};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tsuzuri_core::{Exporter, Producer, StateKey, StepName, WorkflowError, WorkflowState};

/// A point where the run suspends until the reviewer answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    name: StepName,
    prompt: String,
    reviews: Option<StepName>,
    feedback_key: Option<StateKey>,
    capture_key: Option<StateKey>,
    options: Vec<StepName>,
}

impl Checkpoint {
    /// Creates a checkpoint that shows `prompt` while waiting.
    pub fn new(name: impl Into<StepName>, prompt: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prompt: prompt.into(),
            reviews: None,
            feedback_key: None,
            capture_key: None,
            options: Vec::new(),
        }
    }

    /// Sets the stage re-run on `revise`.
    pub fn reviews(mut self, stage: impl Into<StepName>) -> Self {
        self.reviews = Some(stage.into());
        self
    }

    /// Sets the key that receives revision feedback.
    pub fn feedback_key(mut self, key: impl Into<StateKey>) -> Self {
        self.feedback_key = Some(key.into());
        self
    }

    /// Accepts freeform input into `key` and advances.
    pub fn capture(mut self, key: impl Into<StateKey>) -> Self {
        self.capture_key = Some(key.into());
        self
    }

    /// Appends an optional stage selectable by number.
    pub fn option(mut self, stage: impl Into<StepName>) -> Self {
        self.options.push(stage.into());
        self
    }

    /// Returns the checkpoint name.
    pub fn name(&self) -> &StepName {
        &self.name
    }

    /// Returns the stage re-run on `revise`, if any.
    pub fn reviewed_stage(&self) -> Option<&StepName> {
        self.reviews.as_ref()
    }

    /// Returns the feedback key, if any.
    pub fn feedback(&self) -> Option<&StateKey> {
        self.feedback_key.as_ref()
    }

    /// Returns the capture key, if any.
    pub fn capture_key(&self) -> Option<&StateKey> {
        self.capture_key.as_ref()
    }

    /// Returns the optional stages in selection order.
    pub fn options(&self) -> &[StepName] {
        &self.options
    }

    /// Renders the prompt shown to the reviewer, listing options.
    pub fn render_prompt(&self) -> String {
        let mut prompt = self.prompt.clone();
        for (i, option) in self.options.iter().enumerate() {
            prompt.push_str(&format!("\n  {}. {}", i + 1, option));
        }
        prompt
    }
}

/// A producer run exactly once, with no loop to absorb failures.
#[derive(Debug)]
pub struct SingleShot {
    producer: Box<dyn Producer>,
    timeout: Option<Duration>,
}

impl SingleShot {
    /// Wraps a producer.
    pub fn new(producer: impl Producer + 'static, timeout: Option<Duration>) -> Self {
        Self {
            producer: Box::new(producer),
            timeout,
        }
    }
}

/// Hands finished content to an [`Exporter`].
#[derive(Debug)]
pub struct ExportStage {
    name: StepName,
    content_keys: Vec<StateKey>,
    name_key: StateKey,
    exporter: Arc<dyn Exporter>,
}

impl ExportStage {
    /// Exports the non-blank values of `content_keys`, joined by blank
    /// lines, under the name stored at `name_key`.
    pub fn new(
        name: impl Into<StepName>,
        content_keys: Vec<StateKey>,
        name_key: impl Into<StateKey>,
        exporter: Arc<dyn Exporter>,
    ) -> Self {
        Self {
            name: name.into(),
            content_keys,
            name_key: name_key.into(),
            exporter,
        }
    }

    async fn run(&self, state: &WorkflowState) -> Result<StageOutput, WorkflowError> {
        let content = self
            .content_keys
            .iter()
            .filter(|k| state.has_content(k.as_str()))
            .filter_map(|k| state.get(k.as_str()).map(render_value))
            .collect::<Vec<_>>()
            .join("\n\n");
        let name = state
            .get_str(self.name_key.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(self.name.as_str())
            .to_string();

        if content.is_empty() {
            return Err(WorkflowError::WriteFailure {
                name,
                details: "nothing to export".to_string(),
            });
        }

        self.exporter.export(&content, &name).await?;
        info!(stage = %self.name, export = %name, "content exported");
        Ok(StageOutput {
            stage: self.name.clone(),
            text: format!("Exported '{}'.", name),
            validation: Validation::Exported,
        })
    }
}

/// One named unit of a workflow.
#[derive(Debug)]
pub enum Stage {
    /// A retry loop.
    Loop(RetryLoop),
    /// A single producer invocation.
    Single(SingleShot),
    /// A reviewer checkpoint.
    Checkpoint(Checkpoint),
    /// A terminal export.
    Export(ExportStage),
}

impl Stage {
    /// Returns the stage name.
    pub fn name(&self) -> StepName {
        match self {
            Stage::Loop(l) => l.name().clone(),
            Stage::Single(s) => s.producer.name(),
            Stage::Checkpoint(c) => c.name.clone(),
            Stage::Export(e) => e.name.clone(),
        }
    }

    /// Returns the checkpoint if this stage is one.
    pub fn as_checkpoint(&self) -> Option<&Checkpoint> {
        match self {
            Stage::Checkpoint(c) => Some(c),
            _ => None,
        }
    }

    /// Returns the key this stage writes, if any.
    pub fn output_key(&self) -> Option<StateKey> {
        match self {
            Stage::Loop(l) => l.producer().output_key(),
            Stage::Single(s) => s.producer.output_key(),
            Stage::Checkpoint(_) | Stage::Export(_) => None,
        }
    }

    /// Executes a non-checkpoint stage.
    ///
    /// Loops never fail here except fatally: exhaustion comes back as an
    /// unvalidated output carrying the last known value.
    pub async fn execute(&self, state: &mut WorkflowState) -> Result<StageOutput, WorkflowError> {
        match self {
            Stage::Loop(retry_loop) => {
                let run = retry_loop.run(state).await;
                let text = self.current_text(state);
                let validation = match run.terminal_reason {
                    TerminalReason::Accepted => Validation::Accepted {
                        attempts: run.attempts(),
                    },
                    TerminalReason::Exhausted => Validation::NotValidated {
                        attempts: run.attempts(),
                        reason: run
                            .last_failure
                            .as_ref()
                            .map(ToString::to_string)
                            .unwrap_or_default(),
                    },
                    TerminalReason::Fatal => {
                        return Err(run.error().unwrap_or_else(|| {
                            WorkflowError::ExhaustedRetries {
                                stage: run.stage.clone(),
                                attempts: run.attempts(),
                            }
                        }))
                    }
                };
                Ok(StageOutput {
                    stage: retry_loop.name().clone(),
                    text,
                    validation,
                })
            }
            Stage::Single(single) => {
                let result = run_producer(single.producer.as_ref(), state, single.timeout).await;
                if let Some(err) = result.raised_error {
                    return Err(err);
                }
                let text = match &result.output_key {
                    Some(_) => self.current_text(state),
                    None => result.output_value.as_ref().map(render_value).unwrap_or_default(),
                };
                Ok(StageOutput {
                    stage: result.step_name,
                    text,
                    validation: Validation::SingleShot,
                })
            }
            Stage::Export(export) => export.run(state).await,
            Stage::Checkpoint(c) => Err(WorkflowError::Configuration(format!(
                "checkpoint '{}' cannot be executed",
                c.name
            ))),
        }
    }

    fn current_text(&self, state: &WorkflowState) -> String {
        self.output_key()
            .and_then(|k| state.get(k.as_str()).map(render_value))
            .unwrap_or_default()
    }
}

/// How far a stage output can be trusted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "validation", rename_all = "snake_case")]
pub enum Validation {
    /// A loop accepted the output.
    Accepted {
        /// Producer invocations used.
        attempts: u32,
    },
    /// A loop gave up; the text is the last known value.
    NotValidated {
        /// Producer invocations used.
        attempts: u32,
        /// Last failure.
        reason: String,
    },
    /// A single-shot step; nothing to validate.
    SingleShot,
    /// Content was exported.
    Exported,
}

/// A stage result surfaced to the reviewer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageOutput {
    /// The stage that produced it.
    pub stage: StepName,
    /// The text to show.
    pub text: String,
    /// Whether the text passed validation.
    pub validation: Validation,
}

impl StageOutput {
    /// Returns `true` for outputs of exhausted loops.
    pub fn is_unvalidated(&self) -> bool {
        matches!(self.validation, Validation::NotValidated { .. })
    }
}

impl fmt::Display for StageOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "== {} ==", self.stage)?;
        if let Validation::NotValidated { attempts, reason } = &self.validation {
            writeln!(
                f,
                "[NOT VALIDATED] best-effort result after {} attempts ({})",
                attempts, reason
            )?;
        }
        write!(f, "{}", self.text)
    }
}

/// Renders a state value for display and export.
pub fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;
    use tsuzuri_core::{ExportStatus, LoopConfig};

    #[derive(Debug, Default)]
    struct MemoryExporter {
        written: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl Exporter for MemoryExporter {
        async fn export(&self, content: &str, name: &str) -> Result<ExportStatus, WorkflowError> {
            if let Ok(mut written) = self.written.lock() {
                written.push((name.to_string(), content.to_string()));
            }
            Ok(ExportStatus::Success)
        }
    }

    #[derive(Debug)]
    struct Constant(&'static str);

    #[async_trait]
    impl Producer for Constant {
        async fn produce(&self, _state: &WorkflowState) -> Result<Value, WorkflowError> {
            Ok(json!(self.0))
        }

        fn name(&self) -> StepName {
            StepName::new("constant")
        }

        fn output_key(&self) -> Option<StateKey> {
            Some(StateKey::new("text"))
        }
    }

    #[test]
    fn test_checkpoint_prompt_lists_options() {
        let checkpoint = Checkpoint::new("review", "Approve or revise?")
            .option("promotion")
            .option("summary");
        assert_eq!(
            checkpoint.render_prompt(),
            "Approve or revise?\n  1. promotion\n  2. summary"
        );
    }

    #[tokio::test]
    async fn test_exhausted_loop_output_is_marked() {
        let retry_loop = RetryLoop::presence(
            "draft",
            Constant(""),
            LoopConfig::default().with_max_iterations(2),
        )
        .expect("loop");
        let stage = Stage::Loop(retry_loop);
        let mut state = WorkflowState::new();

        let output = stage.execute(&mut state).await.expect("non-fatal");

        assert!(output.is_unvalidated());
        assert!(output.to_string().contains("[NOT VALIDATED]"));
    }

    #[tokio::test]
    async fn test_single_shot_output() {
        let stage = Stage::Single(SingleShot::new(Constant("hi"), None));
        let mut state = WorkflowState::new();

        let output = stage.execute(&mut state).await.expect("single shot");
        assert_eq!(output.text, "hi");
        assert_eq!(output.validation, Validation::SingleShot);
        assert_eq!(state.get_str("text"), Some("hi"));
    }

    #[tokio::test]
    async fn test_export_joins_content_and_uses_name_key() {
        let exporter = Arc::new(MemoryExporter::default());
        let stage = Stage::Export(ExportStage::new(
            "export",
            vec![StateKey::new("edited"), StateKey::new("promotion")],
            "topic",
            exporter.clone(),
        ));
        let mut state = WorkflowState::new();
        state.set("topic", "Rust async");
        state.set("edited", "Body");

        let output = stage.execute(&mut state).await.expect("export");

        assert_eq!(output.validation, Validation::Exported);
        let written = exporter.written.lock().map(|w| w.clone()).unwrap_or_default();
        assert_eq!(
            written,
            vec![("Rust async".to_string(), "Body".to_string())]
        );
    }

    #[tokio::test]
    async fn test_export_without_content_fails() {
        let stage = Stage::Export(ExportStage::new(
            "export",
            vec![StateKey::new("edited")],
            "topic",
            Arc::new(MemoryExporter::default()),
        ));
        let err = stage
            .execute(&mut WorkflowState::new())
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::WriteFailure { .. }));
    }

    #[test]
    fn test_render_value() {
        assert_eq!(render_value(&json!("plain")), "plain");
        assert_eq!(render_value(&Value::Null), "");
        assert_eq!(render_value(&json!(["a"])), "[\n  \"a\"\n]");
    }
}
