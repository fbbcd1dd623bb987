//! Workflow error types.

use crate::step::StepName;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Flat classification of everything that can go wrong in a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The producer could not deliver a usable result.
    ProducerFailure,
    /// The validator itself failed.
    ValidatorFault,
    /// A loop hit its iteration bound without acceptance.
    ExhaustedRetries,
    /// A collaborator could not find its input.
    NotFound,
    /// A collaborator could not write its output.
    WriteFailure,
    /// The generation capability is down.
    Unreachable,
    /// The run itself is misconfigured or in the wrong status.
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::ProducerFailure => "producer_failure",
            ErrorKind::ValidatorFault => "validator_fault",
            ErrorKind::ExhaustedRetries => "exhausted_retries",
            ErrorKind::NotFound => "not_found",
            ErrorKind::WriteFailure => "write_failure",
            ErrorKind::Unreachable => "unreachable",
            ErrorKind::Internal => "internal",
        };
        write!(f, "{}", s)
    }
}

/// Errors that can occur during workflow execution.
///
/// Payloads are plain strings so errors can be cloned into step results and
/// loop records.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum WorkflowError {
    /// A producer returned an error or unusable output.
    #[error("Producer failed in step '{step_name}': {details}")]
    ProducerFailure {
        /// The step that failed.
        step_name: StepName,
        /// Details about the failure.
        details: String,
    },

    /// The generation capability could not be reached.
    #[error("Generation unreachable in step '{step_name}': {details}")]
    Unreachable {
        /// The step that tried to reach it.
        step_name: StepName,
        /// Details about the failure.
        details: String,
    },

    /// A producer exceeded its per-attempt timeout.
    #[error("Timeout occurred in step: {step_name}")]
    Timeout {
        /// The step that timed out.
        step_name: StepName,
    },

    /// A validator faulted while checking state.
    #[error("Validator '{validator}' faulted: {details}")]
    ValidatorFault {
        /// The validator that faulted.
        validator: String,
        /// Details about the fault.
        details: String,
    },

    /// A loop ran out of iterations without acceptance.
    #[error("Stage '{stage}' exhausted {attempts} attempts without acceptance")]
    ExhaustedRetries {
        /// The loop stage.
        stage: StepName,
        /// Attempts made.
        attempts: u32,
    },

    /// A collaborator input did not exist.
    #[error("Not found: {path}")]
    NotFound {
        /// The missing path.
        path: String,
    },

    /// A collaborator failed to write output.
    #[error("Write failed for '{name}': {details}")]
    WriteFailure {
        /// The name of the artifact being written.
        name: String,
        /// Details about the failure.
        details: String,
    },

    /// A referenced stage was not found in the workflow.
    #[error("Stage not found: {0}")]
    StageNotFound(StepName),

    /// The workflow configuration is invalid.
    #[error("Invalid workflow configuration: {0}")]
    Configuration(String),

    /// A run snapshot could not be saved or restored.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// A turn arrived after the run completed or was cancelled.
    #[error("Run is closed")]
    RunClosed,
}

impl WorkflowError {
    /// Creates a producer failure for the given step.
    pub fn producer(step_name: impl Into<StepName>, details: impl Into<String>) -> Self {
        Self::ProducerFailure {
            step_name: step_name.into(),
            details: details.into(),
        }
    }

    /// Creates an unreachable error for the given step.
    pub fn unreachable(step_name: impl Into<StepName>, details: impl Into<String>) -> Self {
        Self::Unreachable {
            step_name: step_name.into(),
            details: details.into(),
        }
    }

    /// Returns the taxonomy bucket of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            WorkflowError::ProducerFailure { .. } | WorkflowError::Timeout { .. } => {
                ErrorKind::ProducerFailure
            }
            WorkflowError::Unreachable { .. } => ErrorKind::Unreachable,
            WorkflowError::ValidatorFault { .. } => ErrorKind::ValidatorFault,
            WorkflowError::ExhaustedRetries { .. } => ErrorKind::ExhaustedRetries,
            WorkflowError::NotFound { .. } => ErrorKind::NotFound,
            WorkflowError::WriteFailure { .. } => ErrorKind::WriteFailure,
            WorkflowError::StageNotFound(_)
            | WorkflowError::Configuration(_)
            | WorkflowError::Persistence(_)
            | WorkflowError::RunClosed => ErrorKind::Internal,
        }
    }

    /// Returns `true` if a retry loop may absorb this error.
    pub fn is_retryable(&self) -> bool {
        self.kind() != ErrorKind::Internal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = WorkflowError::producer("outline", "empty response");
        assert_eq!(
            error.to_string(),
            "Producer failed in step 'outline': empty response"
        );

        let error = WorkflowError::ExhaustedRetries {
            stage: StepName::new("draft"),
            attempts: 3,
        };
        assert_eq!(
            error.to_string(),
            "Stage 'draft' exhausted 3 attempts without acceptance"
        );
    }

    #[test]
    fn test_error_kind() {
        assert_eq!(
            WorkflowError::Timeout {
                step_name: StepName::new("slow")
            }
            .kind(),
            ErrorKind::ProducerFailure
        );
        assert_eq!(
            WorkflowError::unreachable("draft", "connection refused").kind(),
            ErrorKind::Unreachable
        );
        assert_eq!(
            WorkflowError::NotFound {
                path: "/nope".to_string()
            }
            .kind(),
            ErrorKind::NotFound
        );
    }

    #[test]
    fn test_retryable() {
        assert!(WorkflowError::producer("s", "x").is_retryable());
        assert!(WorkflowError::unreachable("s", "x").is_retryable());
        assert!(!WorkflowError::Configuration("bad key".to_string()).is_retryable());
        assert!(!WorkflowError::RunClosed.is_retryable());
    }

    #[test]
    fn test_error_kind_display() {
        assert_eq!(ErrorKind::ValidatorFault.to_string(), "validator_fault");
        assert_eq!(ErrorKind::WriteFailure.to_string(), "write_failure");
    }
}
