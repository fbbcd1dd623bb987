//! Pipeline configuration stored as TOML.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tsuzuri_core::{Backoff, LoopConfig, WorkflowError};

/// Configuration for the content pipeline.
///
/// Missing fields take their defaults, so an empty file is a valid config.
///
/// ```toml
/// max_iterations = 4
/// context_dir = "notes"
/// backoff = { kind = "fixed", delay = 500 }
///
/// [generator]
/// command = ["llm", "--model", "local"]
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Producer invocations allowed per loop.
    pub max_iterations: u32,
    /// Per-invocation timeout in seconds.
    pub attempt_timeout_secs: u64,
    /// Delay between loop iterations, in milliseconds.
    pub backoff: Backoff,
    /// Consecutive identical producer failures that end a loop early.
    pub fatal_after: Option<u32>,
    /// Directory scanned for context before outlining.
    pub context_dir: Option<PathBuf>,
    /// Directory exports are written to.
    pub export_dir: PathBuf,
    /// Generation backend.
    pub generator: GeneratorConfig,
    /// Per-stage instructions.
    pub prompts: PromptConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_iterations: 3,
            attempt_timeout_secs: 120,
            backoff: Backoff::None,
            fatal_after: None,
            context_dir: None,
            export_dir: PathBuf::from("output"),
            generator: GeneratorConfig::default(),
            prompts: PromptConfig::default(),
        }
    }
}

/// External generation command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Argv of the command (e.g. `["llm", "-m", "local"]`). Empty selects the
    /// offline echo generator.
    pub command: Vec<String>,
}

/// Instructions handed to each generating stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptConfig {
    /// Instruction for the outline loop.
    pub outline: String,
    /// Instruction for the draft loop.
    pub draft: String,
    /// Instruction for the edit loop.
    pub edit: String,
    /// Instruction for the optional promotion loop.
    pub promotion: String,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            outline: "Write a structured outline for a piece on the topic. \
                      Use the context and reviewer feedback if given."
                .to_string(),
            draft: "Write a full draft that follows the approved outline. \
                    Address the reviewer feedback if given."
                .to_string(),
            edit: "Edit the draft for clarity, flow and correctness. \
                   Address the reviewer feedback if given."
                .to_string(),
            promotion: "Write a short promotional blurb for the edited piece.".to_string(),
        }
    }
}

impl PipelineConfig {
    /// Rejects settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), WorkflowError> {
        if self.attempt_timeout_secs == 0 {
            return Err(WorkflowError::Configuration(
                "attempt_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.export_dir.as_os_str().is_empty() {
            return Err(WorkflowError::Configuration(
                "export_dir must not be empty".to_string(),
            ));
        }
        if let Some(program) = self.generator.command.first() {
            if program.trim().is_empty() {
                return Err(WorkflowError::Configuration(
                    "generator.command must start with a program".to_string(),
                ));
            }
        }
        self.loop_config().validate()
    }

    /// Returns the loop settings shared by every generating stage.
    pub fn loop_config(&self) -> LoopConfig {
        LoopConfig {
            max_iterations: self.max_iterations,
            attempt_timeout: Some(self.attempt_timeout()),
            backoff: self.backoff.clone(),
            fatal_after: self.fatal_after,
        }
    }

    /// Returns the per-invocation timeout.
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }

    /// Renders the config as TOML.
    pub fn to_toml(&self) -> Result<String, WorkflowError> {
        toml::to_string_pretty(self)
            .map_err(|e| WorkflowError::Configuration(format!("serialize config: {}", e)))
    }
}

/// Loads config from a TOML file.
///
/// If the file is missing, returns [`PipelineConfig::default()`].
pub fn load_config(path: &Path) -> Result<PipelineConfig, WorkflowError> {
    if !path.exists() {
        let config = PipelineConfig::default();
        config.validate()?;
        return Ok(config);
    }
    let contents = std::fs::read_to_string(path)
        .map_err(|e| WorkflowError::Configuration(format!("read {}: {}", path.display(), e)))?;
    let config: PipelineConfig = toml::from_str(&contents)
        .map_err(|e| WorkflowError::Configuration(format!("parse {}: {}", path.display(), e)))?;
    config.validate()?;
    Ok(config)
}
