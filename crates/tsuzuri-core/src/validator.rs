//! Acceptance predicates evaluated after each producer run.

use crate::error::{ErrorKind, WorkflowError};
use crate::state::{StateKey, WorkflowState};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Debug};
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Why a validator rejected the state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum Rejection {
    /// The declared key is absent.
    MissingKey(StateKey),
    /// The declared key is present but blank.
    EmptyValue(StateKey),
    /// The validator itself failed.
    Fault(String),
    /// A custom predicate said no.
    Other(String),
}

impl Rejection {
    /// Returns [`ErrorKind::ValidatorFault`] for faults, `None` otherwise.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Rejection::Fault(_) => Some(ErrorKind::ValidatorFault),
            _ => None,
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::MissingKey(key) => write!(f, "'{}' is missing", key),
            Rejection::EmptyValue(key) => write!(f, "'{}' is empty", key),
            Rejection::Fault(details) => write!(f, "validator fault: {}", details),
            Rejection::Other(reason) => write!(f, "{}", reason),
        }
    }
}

/// Verdict of one validator check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    /// Whether the state was accepted.
    pub accepted: bool,
    /// Why it was rejected.
    pub reason: Option<Rejection>,
}

impl ValidationOutcome {
    /// An accepting outcome.
    pub fn accept() -> Self {
        Self {
            accepted: true,
            reason: None,
        }
    }

    /// A rejecting outcome.
    pub fn reject(reason: Rejection) -> Self {
        Self {
            accepted: false,
            reason: Some(reason),
        }
    }

    /// A rejection caused by the validator failing.
    pub fn fault(details: impl Into<String>) -> Self {
        Self::reject(Rejection::Fault(details.into()))
    }

    /// Returns `true` if the rejection came from a validator fault.
    pub fn is_fault(&self) -> bool {
        self.reason
            .as_ref()
            .and_then(Rejection::kind)
            .is_some_and(|k| k == ErrorKind::ValidatorFault)
    }
}

/// A read-only acceptance check over workflow state.
///
/// Implementors write [`Validator::evaluate`]; callers use
/// [`Validator::check`], which never fails: errors and panics inside
/// `evaluate` become a faulted rejection.
pub trait Validator: Send + Sync + Debug {
    /// Evaluates the state.
    fn evaluate(&self, state: &WorkflowState) -> Result<ValidationOutcome, WorkflowError>;

    /// Returns the validator name used in logs and faults.
    fn name(&self) -> String;

    /// Evaluates the state, turning any failure into a rejection.
    fn check(&self, state: &WorkflowState) -> ValidationOutcome {
        match catch_unwind(AssertUnwindSafe(|| self.evaluate(state))) {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => ValidationOutcome::fault(e.to_string()),
            Err(_) => ValidationOutcome::fault(format!("validator '{}' panicked", self.name())),
        }
    }
}

/// Accepts iff the key is present and non-blank.
///
/// # Examples
///
/// ```
/// use tsuzuri_core::{PresenceValidator, Validator, WorkflowState};
///
/// let validator = PresenceValidator::new("outline");
/// let mut state = WorkflowState::new();
/// assert!(!validator.check(&state).accepted);
///
/// state.set("outline", "1. intro");
/// assert!(validator.check(&state).accepted);
/// ```
#[derive(Debug, Clone)]
pub struct PresenceValidator {
    key: StateKey,
}

impl PresenceValidator {
    /// Creates a validator for the given key.
    pub fn new(key: impl Into<StateKey>) -> Self {
        Self { key: key.into() }
    }

    /// Returns the checked key.
    pub fn key(&self) -> &StateKey {
        &self.key
    }
}

impl Validator for PresenceValidator {
    fn evaluate(&self, state: &WorkflowState) -> Result<ValidationOutcome, WorkflowError> {
        let outcome = if !state.has(self.key.as_str()) {
            ValidationOutcome::reject(Rejection::MissingKey(self.key.clone()))
        } else if !state.has_content(self.key.as_str()) {
            ValidationOutcome::reject(Rejection::EmptyValue(self.key.clone()))
        } else {
            ValidationOutcome::accept()
        };
        Ok(outcome)
    }

    fn name(&self) -> String {
        format!("presence({})", self.key)
    }
}

/// Validator backed by a closure.
pub struct FnValidator<F> {
    name: String,
    predicate: F,
}

impl<F> FnValidator<F>
where
    F: Fn(&WorkflowState) -> Result<ValidationOutcome, WorkflowError> + Send + Sync,
{
    /// Wraps a closure as a validator.
    pub fn new(name: impl Into<String>, predicate: F) -> Self {
        Self {
            name: name.into(),
            predicate,
        }
    }
}

impl<F> Debug for FnValidator<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnValidator")
            .field("name", &self.name)
            .finish()
    }
}

impl<F> Validator for FnValidator<F>
where
    F: Fn(&WorkflowState) -> Result<ValidationOutcome, WorkflowError> + Send + Sync,
{
    fn evaluate(&self, state: &WorkflowState) -> Result<ValidationOutcome, WorkflowError> {
        (self.predicate)(state)
    }

    fn name(&self) -> String {
        self.name.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presence_missing_and_empty() {
        let validator = PresenceValidator::new("draft");
        let mut state = WorkflowState::new();

        let outcome = validator.check(&state);
        assert!(!outcome.accepted);
        assert_eq!(
            outcome.reason,
            Some(Rejection::MissingKey(StateKey::new("draft")))
        );

        state.set("draft", "");
        let outcome = validator.check(&state);
        assert_eq!(
            outcome.reason,
            Some(Rejection::EmptyValue(StateKey::new("draft")))
        );
    }

    #[test]
    fn test_presence_is_idempotent() {
        let validator = PresenceValidator::new("draft");
        let mut state = WorkflowState::new();
        state.set("draft", "text");

        let first = validator.check(&state);
        for _ in 0..5 {
            assert_eq!(validator.check(&state), first);
        }
        assert!(first.accepted);
    }

    #[test]
    fn test_error_becomes_fault() {
        let validator = FnValidator::new("broken", |_state: &WorkflowState| {
            Err(WorkflowError::Configuration("no rules loaded".to_string()))
        });
        let outcome = validator.check(&WorkflowState::new());

        assert!(!outcome.accepted);
        assert!(outcome.is_fault());
    }

    #[test]
    fn test_panic_becomes_fault() {
        let validator = FnValidator::new("panicky", |state: &WorkflowState| {
            let words: Vec<&str> = state.get_str("x").into_iter().collect();
            let _first = words[0];
            Ok(ValidationOutcome::accept())
        });
        let outcome = validator.check(&WorkflowState::new());

        assert!(!outcome.accepted);
        assert!(outcome.is_fault());
        assert_eq!(
            outcome.reason,
            Some(Rejection::Fault("validator 'panicky' panicked".to_string()))
        );
    }

    #[test]
    fn test_rejection_display() {
        assert_eq!(
            Rejection::EmptyValue(StateKey::new("outline")).to_string(),
            "'outline' is empty"
        );
        assert_eq!(Rejection::Fault("x".to_string()).kind(), Some(ErrorKind::ValidatorFault));
        assert_eq!(Rejection::Other("too short".to_string()).kind(), None);
    }
}
