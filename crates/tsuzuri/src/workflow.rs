//! Workflow definitions and their builder.

use crate::retry_loop::RetryLoop;
use crate::router::Router;
use crate::snapshot::is_reserved;
use crate::stage::{Checkpoint, ExportStage, SingleShot, Stage};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::time::Duration;
use tsuzuri_core::{Producer, StepName, WorkflowError};

/// An ordered sequence of stages plus optional branch stages.
///
/// The main sequence always starts with a checkpoint, so a fresh run waits
/// for its first turn.
pub struct WorkflowDefinition {
    stages: Vec<Stage>,
    optional: HashMap<StepName, Stage>,
    router: Router,
}

impl fmt::Debug for WorkflowDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowDefinition")
            .field(
                "stages",
                &self.stages.iter().map(Stage::name).collect::<Vec<_>>(),
            )
            .field("optional", &self.optional.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl WorkflowDefinition {
    /// Creates a new workflow builder.
    pub fn builder() -> WorkflowBuilder {
        WorkflowBuilder::new()
    }

    /// Returns the main sequence.
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Returns the stage at `index` in the main sequence.
    pub fn stage(&self, index: usize) -> Option<&Stage> {
        self.stages.get(index)
    }

    /// Returns an optional stage by name.
    pub fn optional_stage(&self, name: &str) -> Option<&Stage> {
        self.optional.get(name)
    }

    /// Returns the router built for this definition.
    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Returns the number of stages in the main sequence.
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Returns `true` if the main sequence is empty.
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

/// Builder for constructing [`WorkflowDefinition`] instances.
#[derive(Default)]
pub struct WorkflowBuilder {
    stages: Vec<Stage>,
    optional: Vec<Stage>,
}

impl WorkflowBuilder {
    /// Creates a new empty builder.
    pub fn new() -> Self {
        Self {
            stages: Vec::new(),
            optional: Vec::new(),
        }
    }

    /// Appends a stage to the main sequence.
    pub fn stage(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    /// Appends a retry loop.
    pub fn retry_loop(self, retry_loop: RetryLoop) -> Self {
        self.stage(Stage::Loop(retry_loop))
    }

    /// Appends a single-shot producer.
    pub fn single<P: Producer + 'static>(self, producer: P, timeout: Option<Duration>) -> Self {
        self.stage(Stage::Single(SingleShot::new(producer, timeout)))
    }

    /// Appends a checkpoint.
    pub fn checkpoint(self, checkpoint: Checkpoint) -> Self {
        self.stage(Stage::Checkpoint(checkpoint))
    }

    /// Appends an export stage.
    pub fn export(self, export: ExportStage) -> Self {
        self.stage(Stage::Export(export))
    }

    /// Registers a stage that only runs when selected at a checkpoint.
    pub fn optional(mut self, stage: Stage) -> Self {
        self.optional.push(stage);
        self
    }

    /// Validates and builds the definition.
    pub fn build(self) -> Result<WorkflowDefinition, WorkflowError> {
        match self.stages.first() {
            None => {
                return Err(WorkflowError::Configuration(
                    "workflow must contain at least one stage".to_string(),
                ))
            }
            Some(first) if first.as_checkpoint().is_none() => {
                return Err(WorkflowError::Configuration(format!(
                    "first stage '{}' must be a checkpoint",
                    first.name()
                )))
            }
            Some(_) => {}
        }

        let mut seen = HashSet::new();
        for stage in self.stages.iter().chain(self.optional.iter()) {
            if !seen.insert(stage.name()) {
                return Err(WorkflowError::Configuration(format!(
                    "duplicate stage name '{}'",
                    stage.name()
                )));
            }
            if let Stage::Loop(retry_loop) = stage {
                retry_loop.config().validate()?;
            }
            check_keys(stage)?;
        }

        let mut optional = HashMap::new();
        for stage in self.optional {
            if stage.as_checkpoint().is_some() {
                return Err(WorkflowError::Configuration(format!(
                    "optional stage '{}' cannot be a checkpoint",
                    stage.name()
                )));
            }
            optional.insert(stage.name(), stage);
        }

        for (idx, stage) in self.stages.iter().enumerate() {
            if let Some(checkpoint) = stage.as_checkpoint() {
                validate_checkpoint(&self.stages, idx, checkpoint, &optional)?;
            }
        }

        let router = Router::from_stages(&self.stages);
        Ok(WorkflowDefinition {
            stages: self.stages,
            optional,
            router,
        })
    }
}

/// State keys written by a stage must not collide with snapshot fields.
fn check_keys(stage: &Stage) -> Result<(), WorkflowError> {
    let checkpoint = stage.as_checkpoint();
    let written = stage
        .output_key()
        .into_iter()
        .chain(checkpoint.and_then(Checkpoint::capture_key).cloned())
        .chain(checkpoint.and_then(Checkpoint::feedback).cloned());
    for key in written {
        if is_reserved(key.as_str()) {
            return Err(WorkflowError::Configuration(format!(
                "stage '{}' writes reserved key '{}'",
                stage.name(),
                key
            )));
        }
    }
    Ok(())
}

/// A checkpoint may only revise a stage that leads straight back to it, and
/// may only offer registered optional stages.
fn validate_checkpoint(
    stages: &[Stage],
    idx: usize,
    checkpoint: &Checkpoint,
    optional: &HashMap<StepName, Stage>,
) -> Result<(), WorkflowError> {
    if let Some(reviewed) = checkpoint.reviewed_stage() {
        let from = stages[..idx]
            .iter()
            .rposition(|s| s.name() == *reviewed)
            .ok_or_else(|| WorkflowError::StageNotFound(reviewed.clone()))?;
        if stages[from].as_checkpoint().is_some()
            || stages[from + 1..idx]
                .iter()
                .any(|s| s.as_checkpoint().is_some())
        {
            return Err(WorkflowError::Configuration(format!(
                "checkpoint '{}' cannot revise '{}': another checkpoint lies between them",
                checkpoint.name(),
                reviewed
            )));
        }
    }
    for option in checkpoint.options() {
        if !optional.contains_key(option) {
            return Err(WorkflowError::StageNotFound(option.clone()));
        }
    }
    Ok(())
}
