//! A retry-until-valid delegation engine with human review checkpoints.
//!
//! Generating stages run as [`RetryLoop`]s: a producer writes one state key,
//! a validator checks it, and the producer is re-run on rejection up to a
//! bound. An [`Orchestrator`] sequences loops and suspends at
//! [`Checkpoint`]s, where each reviewer turn is routed through an explicit
//! transition table.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use tsuzuri::collaborators::{DirectoryScanner, EchoGenerator, FileExporter};
//! use tsuzuri::config::PipelineConfig;
//! use tsuzuri::pipeline::content_pipeline;
//! use tsuzuri::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), WorkflowError> {
//!     let definition = content_pipeline(
//!         &PipelineConfig::default(),
//!         Arc::new(EchoGenerator),
//!         Arc::new(DirectoryScanner::new()),
//!         Arc::new(FileExporter::new("output")),
//!     )?;
//!
//!     let mut run = Orchestrator::new(Arc::new(definition));
//!     let report = run.handle_turn("the history of tea").await?;
//!     assert_eq!(report.status, RunStatus::AwaitingInput);
//!     assert!(run.state().has_content("outline"));
//!     Ok(())
//! }
//! ```

pub mod collaborators;
pub mod config;
mod executor;
pub mod logging;
mod orchestrator;
pub mod pipeline;
pub mod producers;
mod retry_loop;
mod router;
mod snapshot;
mod stage;
mod workflow;

// Re-export core types
pub use tsuzuri_core::*;

pub use executor::run_producer;
pub use orchestrator::{Orchestrator, RunStatus, TurnReport};
pub use retry_loop::{AttemptFailure, LoopRun, RetryLoop, TerminalReason};
pub use router::{Route, Router, Transition};
pub use snapshot::{RunSnapshot, CURSOR_KEY, STATUS_KEY};
pub use stage::{render_value, Checkpoint, ExportStage, SingleShot, Stage, StageOutput, Validation};
pub use workflow::{WorkflowBuilder, WorkflowDefinition};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::{
        Checkpoint, Intent, LoopConfig, Orchestrator, Producer, RetryLoop, RunStatus, StateKey,
        StepName, TurnReport, Validator, WorkflowDefinition, WorkflowError, WorkflowState,
    };
}
