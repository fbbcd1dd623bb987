//! The outline, draft, edit and promotion pipeline.

use crate::config::PipelineConfig;
use crate::producers::{PromptProducer, ScanStep};
use crate::retry_loop::RetryLoop;
use crate::stage::{Checkpoint, ExportStage, Stage};
use crate::workflow::WorkflowDefinition;
use std::sync::Arc;
use tsuzuri_core::{ContextScanner, Exporter, Generator, StateKey, WorkflowError};

/// Checkpoint that seeds a run with its topic.
pub const AWAIT_TOPIC: &str = "await_topic";
/// Optional directory scan ahead of outlining.
pub const GATHER_CONTEXT: &str = "gather_context";
/// Outline loop.
pub const OUTLINE: &str = "outline";
/// Checkpoint reviewing the outline.
pub const REVIEW_OUTLINE: &str = "review_outline";
/// Draft loop.
pub const DRAFT: &str = "draft";
/// Checkpoint reviewing the draft.
pub const REVIEW_DRAFT: &str = "review_draft";
/// Edit loop, writing `edited`.
pub const EDIT: &str = "edit";
/// Final checkpoint before export.
pub const REVIEW_EDIT: &str = "review_edit";
/// Branch offered as option 1 at [`REVIEW_EDIT`].
pub const PROMOTION: &str = "promotion";
/// Writes the edited piece and any promotion.
pub const EXPORT: &str = "export";

/// Builds the content pipeline.
///
/// ```text
/// await_topic -> [gather_context] -> outline -> review_outline -> draft
///   -> review_draft -> edit -> review_edit (1: promotion) -> export
/// ```
///
/// `gather_context` is present only when `config.context_dir` is set. Each
/// generating stage is a presence-validated retry loop reading the topic,
/// the previous stage's output and its own reviewer feedback.
pub fn content_pipeline(
    config: &PipelineConfig,
    generator: Arc<dyn Generator>,
    scanner: Arc<dyn ContextScanner>,
    exporter: Arc<dyn Exporter>,
) -> Result<WorkflowDefinition, WorkflowError> {
    config.validate()?;
    let loop_config = config.loop_config();
    let prompt = |name: &str, output: &str, instruction: &str| {
        PromptProducer::new(name, output, instruction, Arc::clone(&generator))
    };

    let outline = prompt(OUTLINE, "outline", &config.prompts.outline)
        .input("topic")
        .input("context")
        .input("outline_feedback");
    let draft = prompt(DRAFT, "draft", &config.prompts.draft)
        .input("topic")
        .input("outline")
        .input("draft_feedback");
    let edit = prompt(EDIT, "edited", &config.prompts.edit)
        .input("topic")
        .input("draft")
        .input("edit_feedback");
    let promotion = prompt(PROMOTION, "promotion", &config.prompts.promotion)
        .input("topic")
        .input("edited");

    let mut builder = WorkflowDefinition::builder().checkpoint(
        Checkpoint::new(AWAIT_TOPIC, "What should we write about?").capture("topic"),
    );
    if let Some(dir) = &config.context_dir {
        builder = builder.single(
            ScanStep::new(GATHER_CONTEXT, dir, "context", scanner),
            Some(config.attempt_timeout()),
        );
    }

    builder
        .retry_loop(RetryLoop::presence(OUTLINE, outline, loop_config.clone())?)
        .checkpoint(
            Checkpoint::new(REVIEW_OUTLINE, "Approve the outline, or revise it with feedback.")
                .reviews(OUTLINE)
                .feedback_key("outline_feedback"),
        )
        .retry_loop(RetryLoop::presence(DRAFT, draft, loop_config.clone())?)
        .checkpoint(
            Checkpoint::new(REVIEW_DRAFT, "Approve the draft, or revise it with feedback.")
                .reviews(DRAFT)
                .feedback_key("draft_feedback"),
        )
        .retry_loop(RetryLoop::presence(EDIT, edit, loop_config.clone())?)
        .checkpoint(
            Checkpoint::new(
                REVIEW_EDIT,
                "Approve to export, revise the edit with feedback, or pick an option.",
            )
            .reviews(EDIT)
            .feedback_key("edit_feedback")
            .option(PROMOTION),
        )
        .export(ExportStage::new(
            EXPORT,
            vec![StateKey::new("edited"), StateKey::new("promotion")],
            "topic",
            exporter,
        ))
        .optional(Stage::Loop(RetryLoop::presence(
            PROMOTION,
            promotion,
            loop_config,
        )?))
        .build()
}
