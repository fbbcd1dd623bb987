//! Core traits and types for the tsuzuri delegation engine.
//!
//! This crate provides the vocabulary without runtime dependencies.
//! Library authors should depend on this crate to implement custom
//! producers, validators and collaborators.
//!
//! # Core Types
//!
//! - [`WorkflowState`] - Run-scoped key/value store shared by every stage
//! - [`Producer`] - A unit of work that writes one declared key
//! - [`Validator`] - A read-only acceptance check
//! - [`LoopConfig`] - Iteration bound, timeout and backoff of a retry loop
//! - [`ExternalTurn`] / [`Intent`] - Reviewer input and its interpretation
//! - [`WorkflowError`] - Error types for workflow execution
//!
//! # Collaborators
//!
//! - [`Generator`] - Text generation capability
//! - [`ContextScanner`] - Supplementary context gathering
//! - [`Exporter`] - Durable storage for finished content

mod error;
mod intent;
mod state;
mod step;
mod traits;
mod validator;

pub use error::{ErrorKind, WorkflowError};
pub use intent::{ExternalTurn, Intent, IntentKind};
pub use state::{is_blank, StateKey, WorkflowState};
pub use step::{Backoff, BackoffError, LoopConfig, Producer, StepName, StepResult};
pub use traits::{ContextScanner, ExportStatus, Exporter, Generator, ScannedContext};
pub use validator::{FnValidator, PresenceValidator, Rejection, ValidationOutcome, Validator};
