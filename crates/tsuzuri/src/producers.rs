//! Producers backed by collaborators.

use async_trait::async_trait;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tsuzuri_core::{
    ContextScanner, Generator, Producer, StateKey, StepName, WorkflowError, WorkflowState,
};

/// Asks a [`Generator`] for text built from selected state entries.
///
/// The prompt context holds every present input key plus `instruction` and
/// `stage`.
#[derive(Debug, Clone)]
pub struct PromptProducer {
    name: StepName,
    output_key: StateKey,
    instruction: String,
    inputs: Vec<StateKey>,
    generator: Arc<dyn Generator>,
}

impl PromptProducer {
    /// Creates a producer writing to `output_key`.
    pub fn new(
        name: impl Into<StepName>,
        output_key: impl Into<StateKey>,
        instruction: impl Into<String>,
        generator: Arc<dyn Generator>,
    ) -> Self {
        Self {
            name: name.into(),
            output_key: output_key.into(),
            instruction: instruction.into(),
            inputs: Vec::new(),
            generator,
        }
    }

    /// Adds a state key to the prompt context.
    pub fn input(mut self, key: impl Into<StateKey>) -> Self {
        self.inputs.push(key.into());
        self
    }
}

#[async_trait]
impl Producer for PromptProducer {
    async fn produce(&self, state: &WorkflowState) -> Result<Value, WorkflowError> {
        let mut prompt_context = state.project(&self.inputs);
        prompt_context.insert(
            "instruction".to_string(),
            Value::String(self.instruction.clone()),
        );
        prompt_context.insert(
            "stage".to_string(),
            Value::String(self.name.to_string()),
        );

        let text = self
            .generator
            .generate(&prompt_context)
            .await
            .map_err(|e| attribute(e, &self.name))?;
        Ok(Value::String(text))
    }

    fn name(&self) -> StepName {
        self.name.clone()
    }

    fn output_key(&self) -> Option<StateKey> {
        Some(self.output_key.clone())
    }
}

/// Rewrites generator errors so they name the step that made the request.
fn attribute(error: WorkflowError, step: &StepName) -> WorkflowError {
    match error {
        WorkflowError::Unreachable { details, .. } => WorkflowError::unreachable(step.clone(), details),
        WorkflowError::ProducerFailure { details, .. } => WorkflowError::producer(step.clone(), details),
        other => other,
    }
}

/// Gathers directory context into one state entry.
#[derive(Debug, Clone)]
pub struct ScanStep {
    name: StepName,
    path: PathBuf,
    output_key: StateKey,
    scanner: Arc<dyn ContextScanner>,
}

impl ScanStep {
    /// Creates a step scanning `path` into `output_key`.
    pub fn new(
        name: impl Into<StepName>,
        path: impl Into<PathBuf>,
        output_key: impl Into<StateKey>,
        scanner: Arc<dyn ContextScanner>,
    ) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            output_key: output_key.into(),
            scanner,
        }
    }
}

#[async_trait]
impl Producer for ScanStep {
    async fn produce(&self, _state: &WorkflowState) -> Result<Value, WorkflowError> {
        let scanned = self.scanner.scan(&self.path).await?;
        Ok(Value::String(scanned.context_text))
    }

    fn name(&self) -> StepName {
        self.name.clone()
    }

    fn output_key(&self) -> Option<StateKey> {
        Some(self.output_key.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{DirectoryScanner, EchoGenerator};
    use serde_json::{json, Map};

    #[derive(Debug)]
    struct Down;

    #[async_trait]
    impl Generator for Down {
        async fn generate(&self, _ctx: &Map<String, Value>) -> Result<String, WorkflowError> {
            Err(WorkflowError::unreachable("generator", "503"))
        }
    }

    #[tokio::test]
    async fn test_prompt_includes_only_declared_inputs() {
        let producer = PromptProducer::new("outline", "outline", "Outline it.", Arc::new(EchoGenerator))
            .input("topic")
            .input("outline_feedback");
        let mut state = WorkflowState::new();
        state.set("topic", "sourdough");
        state.set("secret", "do not leak");

        let value = producer.produce(&state).await.expect("produce");

        assert_eq!(value, json!("Outline it.\n\n[topic]\nsourdough"));
    }

    #[tokio::test]
    async fn test_errors_name_the_step() {
        let producer = PromptProducer::new("draft", "draft", "Draft it.", Arc::new(Down));
        let err = producer.produce(&WorkflowState::new()).await.unwrap_err();
        assert_eq!(err, WorkflowError::unreachable("draft", "503"));
    }

    #[tokio::test]
    async fn test_scan_step_missing_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        let step = ScanStep::new(
            "gather_context",
            dir.path().join("nope"),
            "context",
            Arc::new(DirectoryScanner::new()),
        );
        let err = step.produce(&WorkflowState::new()).await.unwrap_err();
        assert!(matches!(err, WorkflowError::NotFound { .. }));
    }
}
