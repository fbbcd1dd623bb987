//! Turn-driven execution of a workflow definition.

use crate::router::Transition;
use crate::snapshot::RunSnapshot;
use crate::stage::{Stage, StageOutput};
use crate::workflow::WorkflowDefinition;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};
use tsuzuri_core::{ExternalTurn, StepName, WorkflowError, WorkflowState};

/// Where a run is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Suspended at a checkpoint.
    AwaitingInput,
    /// The main sequence ran to its end.
    Completed,
    /// The reviewer ended the run; its state was discarded.
    Cancelled,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::AwaitingInput => write!(f, "awaiting_input"),
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Everything the reviewer gets back for one turn.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnReport {
    /// The turn as interpreted.
    pub turn: ExternalTurn,
    /// Outputs of the stages that ran, in order.
    pub outputs: Vec<StageOutput>,
    /// Status after the turn.
    pub status: RunStatus,
    /// The checkpoint now waiting, if any.
    pub checkpoint: Option<StepName>,
    /// The prompt of that checkpoint.
    pub prompt: Option<String>,
    /// Set when the input was not understood and nothing ran.
    pub reprompt: Option<String>,
    /// A stage or collaborator failure; the run stays at the same checkpoint.
    pub error: Option<WorkflowError>,
}

impl TurnReport {
    /// Returns `true` if any output is an unvalidated best-effort result.
    pub fn has_unvalidated(&self) -> bool {
        self.outputs.iter().any(StageOutput::is_unvalidated)
    }
}

/// Owns one run: its definition, state and cursor.
///
/// Turns are processed one at a time through `&mut self`, and only the stage
/// currently executing holds the state.
#[derive(Debug)]
pub struct Orchestrator {
    definition: Arc<WorkflowDefinition>,
    state: WorkflowState,
    cursor: usize,
    status: RunStatus,
}

impl Orchestrator {
    /// Starts a fresh run at the first checkpoint.
    pub fn new(definition: Arc<WorkflowDefinition>) -> Self {
        Self {
            definition,
            state: WorkflowState::new(),
            cursor: 0,
            status: RunStatus::AwaitingInput,
        }
    }

    /// Restores a suspended run.
    ///
    /// A waiting run must resume at a checkpoint of this definition.
    pub fn resume(
        definition: Arc<WorkflowDefinition>,
        snapshot: RunSnapshot,
    ) -> Result<Self, WorkflowError> {
        if snapshot.status == RunStatus::AwaitingInput {
            let at_checkpoint = definition
                .stage(snapshot.cursor)
                .and_then(Stage::as_checkpoint)
                .is_some();
            if !at_checkpoint {
                return Err(WorkflowError::Persistence(format!(
                    "cursor {} does not point at a checkpoint",
                    snapshot.cursor
                )));
            }
        }
        info!(cursor = snapshot.cursor, status = %snapshot.status, "resuming run");
        Ok(Self {
            definition,
            state: snapshot.state,
            cursor: snapshot.cursor,
            status: snapshot.status,
        })
    }

    /// Captures the run as a flat record.
    pub fn snapshot(&self) -> RunSnapshot {
        RunSnapshot {
            cursor: self.cursor,
            status: self.status,
            state: self.state.clone(),
        }
    }

    /// Returns the run state.
    pub fn state(&self) -> &WorkflowState {
        &self.state
    }

    /// Returns the index of the current stage.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Returns the run status.
    pub fn status(&self) -> RunStatus {
        self.status
    }

    /// Returns the checkpoint the run is waiting at.
    pub fn current_checkpoint(&self) -> Option<StepName> {
        if self.status != RunStatus::AwaitingInput {
            return None;
        }
        self.definition
            .stage(self.cursor)
            .and_then(Stage::as_checkpoint)
            .map(|c| c.name().clone())
    }

    /// Returns the prompt of the checkpoint the run is waiting at.
    pub fn prompt(&self) -> Option<String> {
        if self.status != RunStatus::AwaitingInput {
            return None;
        }
        self.definition
            .stage(self.cursor)
            .and_then(Stage::as_checkpoint)
            .map(|c| c.render_prompt())
    }

    /// Processes one reviewer turn to completion.
    ///
    /// Fails only with [`WorkflowError::RunClosed`]; stage failures are
    /// reported in [`TurnReport::error`] with the cursor left in place.
    pub async fn handle_turn(&mut self, raw_input: &str) -> Result<TurnReport, WorkflowError> {
        if self.status != RunStatus::AwaitingInput {
            return Err(WorkflowError::RunClosed);
        }
        let checkpoint = self.cursor;
        let turn = self.definition.router().interpret(checkpoint, raw_input);
        let transition = self
            .definition
            .router()
            .route(checkpoint, &turn.interpreted_intent);
        info!(
            checkpoint = ?self.current_checkpoint(),
            intent = %turn.interpreted_intent,
            "handling turn"
        );

        let mut outputs = Vec::new();
        let mut reprompt = None;
        let result = match transition {
            Transition::Reprompt { reason } => {
                reprompt = Some(reason);
                Ok(())
            }
            Transition::Terminate => {
                info!("run cancelled by reviewer");
                self.state = WorkflowState::new();
                self.status = RunStatus::Cancelled;
                Ok(())
            }
            Transition::Capture { key, value, to } => {
                self.state.set(key, value);
                self.drive(to, &mut outputs).await
            }
            Transition::Advance { to } => self.drive(to, &mut outputs).await,
            Transition::Rerun { from, feedback } => {
                if let Some((key, text)) = feedback {
                    self.state.set(key, text);
                }
                self.drive(from, &mut outputs).await
            }
            Transition::Branch { stage } => self.branch(&stage, &mut outputs).await,
        };

        let error = result.err();
        if let Some(e) = &error {
            warn!(error = %e, "turn failed; staying at checkpoint");
            self.cursor = checkpoint;
            self.status = RunStatus::AwaitingInput;
        }

        Ok(TurnReport {
            turn,
            outputs,
            status: self.status,
            checkpoint: self.current_checkpoint(),
            prompt: self.prompt(),
            reprompt,
            error,
        })
    }

    /// Executes the main sequence from `start` until the next checkpoint or
    /// the end.
    async fn drive(
        &mut self,
        start: usize,
        outputs: &mut Vec<StageOutput>,
    ) -> Result<(), WorkflowError> {
        let definition = Arc::clone(&self.definition);
        let mut idx = start;
        loop {
            let Some(stage) = definition.stage(idx) else {
                info!("workflow completed");
                self.cursor = definition.len();
                self.status = RunStatus::Completed;
                return Ok(());
            };
            if let Some(checkpoint) = stage.as_checkpoint() {
                info!(checkpoint = %checkpoint.name(), "suspending for review");
                self.cursor = idx;
                self.status = RunStatus::AwaitingInput;
                return Ok(());
            }
            info!(stage = %stage.name(), "executing stage");
            outputs.push(stage.execute(&mut self.state).await?);
            idx += 1;
        }
    }

    async fn branch(
        &mut self,
        name: &StepName,
        outputs: &mut Vec<StageOutput>,
    ) -> Result<(), WorkflowError> {
        let definition = Arc::clone(&self.definition);
        let stage = definition
            .optional_stage(name.as_str())
            .ok_or_else(|| WorkflowError::StageNotFound(name.clone()))?;
        info!(stage = %name, "executing optional stage");
        outputs.push(stage.execute(&mut self.state).await?);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry_loop::RetryLoop;
    use crate::stage::Checkpoint;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicU32, Ordering};
    use tsuzuri_core::{LoopConfig, Producer, StateKey};

    /// Numbers its outputs so re-runs are visible.
    #[derive(Debug)]
    struct Counting {
        name: &'static str,
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Producer for Counting {
        async fn produce(&self, state: &WorkflowState) -> Result<Value, WorkflowError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            let topic = state.get_str("topic").unwrap_or("?");
            Ok(json!(format!("{} #{} on {}", self.name, n, topic)))
        }

        fn name(&self) -> StepName {
            StepName::new(self.name)
        }

        fn output_key(&self) -> Option<StateKey> {
            Some(StateKey::new(self.name))
        }
    }

    fn definition(calls: &Arc<AtomicU32>) -> Arc<WorkflowDefinition> {
        let outline = RetryLoop::presence(
            "outline",
            Counting {
                name: "outline",
                calls: calls.clone(),
            },
            LoopConfig::default(),
        )
        .expect("loop");
        Arc::new(
            WorkflowDefinition::builder()
                .checkpoint(Checkpoint::new("await_topic", "Topic?").capture("topic"))
                .retry_loop(outline)
                .checkpoint(
                    Checkpoint::new("review_outline", "Approve?")
                        .reviews("outline")
                        .feedback_key("outline_feedback"),
                )
                .build()
                .expect("valid workflow"),
        )
    }

    #[tokio::test]
    async fn test_capture_runs_loop_and_suspends() {
        let calls = Arc::new(AtomicU32::new(0));
        let mut run = Orchestrator::new(definition(&calls));

        let report = run.handle_turn("rust async").await.expect("turn");

        assert_eq!(report.outputs.len(), 1);
        assert_eq!(report.outputs[0].text, "outline #1 on rust async");
        assert_eq!(report.status, RunStatus::AwaitingInput);
        assert_eq!(report.checkpoint, Some(StepName::new("review_outline")));
        assert_eq!(run.cursor(), 2);
    }

    #[tokio::test]
    async fn test_revise_overwrites_output_and_feedback() {
        let calls = Arc::new(AtomicU32::new(0));
        let mut run = Orchestrator::new(definition(&calls));
        run.handle_turn("rust").await.expect("turn");

        let report = run.handle_turn("revise: add examples").await.expect("turn");

        assert_eq!(report.outputs[0].text, "outline #2 on rust");
        assert_eq!(run.state().get_str("outline"), Some("outline #2 on rust"));
        assert_eq!(run.state().get_str("outline_feedback"), Some("add examples"));
        assert_eq!(run.cursor(), 2);
    }

    #[tokio::test]
    async fn test_unrecognized_input_keeps_cursor() {
        let calls = Arc::new(AtomicU32::new(0));
        let mut run = Orchestrator::new(definition(&calls));
        run.handle_turn("rust").await.expect("turn");
        let before = run.snapshot();

        let report = run.handle_turn("hmm, not sure").await.expect("turn");

        assert!(report.reprompt.is_some());
        assert!(report.outputs.is_empty());
        assert_eq!(run.snapshot(), before);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_approve_completes() {
        let calls = Arc::new(AtomicU32::new(0));
        let mut run = Orchestrator::new(definition(&calls));
        run.handle_turn("rust").await.expect("turn");

        let report = run.handle_turn("approve").await.expect("turn");

        assert_eq!(report.status, RunStatus::Completed);
        assert_eq!(report.prompt, None);
        assert!(matches!(
            run.handle_turn("approve").await,
            Err(WorkflowError::RunClosed)
        ));
    }

    #[tokio::test]
    async fn test_decline_discards_state() {
        let calls = Arc::new(AtomicU32::new(0));
        let mut run = Orchestrator::new(definition(&calls));
        run.handle_turn("rust").await.expect("turn");

        let report = run.handle_turn("cancel").await.expect("turn");

        assert_eq!(report.status, RunStatus::Cancelled);
        assert!(run.state().is_empty());
    }

    #[tokio::test]
    async fn test_resume_rejects_non_checkpoint_cursor() {
        let calls = Arc::new(AtomicU32::new(0));
        let definition = definition(&calls);
        let snapshot = RunSnapshot {
            cursor: 1,
            status: RunStatus::AwaitingInput,
            state: WorkflowState::new(),
        };
        assert!(matches!(
            Orchestrator::resume(definition, snapshot),
            Err(WorkflowError::Persistence(_))
        ));
    }
}
