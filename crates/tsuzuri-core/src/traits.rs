//! Collaborator traits at the edges of the engine.

use crate::error::WorkflowError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt::Debug;
use std::path::Path;

/// Text generation capability.
///
/// Implementations may do anything internally (parallel lookups, remote
/// calls); the engine only sees one awaited result.
///
/// # Examples
///
/// ```
/// use tsuzuri_core::{Generator, WorkflowError};
/// use async_trait::async_trait;
/// use serde_json::{Map, Value};
///
/// #[derive(Debug)]
/// struct Canned;
///
/// #[async_trait]
/// impl Generator for Canned {
///     async fn generate(&self, _prompt: &Map<String, Value>) -> Result<String, WorkflowError> {
///         Ok("1. Introduction".to_string())
///     }
/// }
/// ```
#[async_trait]
pub trait Generator: Send + Sync + Debug {
    /// Generates text for the prompt context.
    ///
    /// Returns [`WorkflowError::Unreachable`] when the capability is down.
    async fn generate(&self, prompt_context: &Map<String, Value>) -> Result<String, WorkflowError>;
}

/// Concatenated text gathered from a directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScannedContext {
    /// The combined contents.
    pub context_text: String,
    /// Files that contributed.
    pub files: usize,
}

/// Supplementary context gathering.
#[async_trait]
pub trait ContextScanner: Send + Sync + Debug {
    /// Reads every file under `path`.
    ///
    /// Returns [`WorkflowError::NotFound`] if the directory does not exist.
    async fn scan(&self, path: &Path) -> Result<ScannedContext, WorkflowError>;
}

/// Result of a successful export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExportStatus {
    /// The content was written.
    Success,
}

/// Durable storage for finished content.
#[async_trait]
pub trait Exporter: Send + Sync + Debug {
    /// Writes `content` under `name`.
    ///
    /// Returns [`WorkflowError::WriteFailure`] if the write fails.
    async fn export(&self, content: &str, name: &str) -> Result<ExportStatus, WorkflowError>;
}
