//! A short review session driven by scripted turns.
//!
//! The producer writes a haiku; the validator only accepts three lines, so
//! the first attempt is rejected and the loop retries.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tsuzuri::prelude::*;
use tsuzuri::{FnValidator, Rejection, ValidationOutcome};

#[derive(Debug, Default)]
struct HaikuStep {
    attempts: AtomicU32,
}

#[async_trait]
impl Producer for HaikuStep {
    async fn produce(&self, state: &WorkflowState) -> Result<Value, WorkflowError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        let topic = state.get_str("topic").unwrap_or("nothing");
        let feedback = state.get_str("haiku_feedback").unwrap_or("");
        if attempt == 0 {
            return Ok(json!(format!("{} in one line", topic)));
        }
        Ok(json!(format!(
            "{}\nquietly turning pages\nautumn {}",
            topic,
            if feedback.is_empty() { "light" } else { feedback }
        )))
    }

    fn name(&self) -> StepName {
        StepName::new("haiku")
    }

    fn output_key(&self) -> Option<StateKey> {
        Some(StateKey::new("haiku"))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let three_lines = FnValidator::new("three_lines", |state: &WorkflowState| {
        let lines = state.get_str("haiku").map_or(0, |h| h.lines().count());
        Ok(if lines == 3 {
            ValidationOutcome::accept()
        } else {
            ValidationOutcome::reject(Rejection::Other(format!("{} lines", lines)))
        })
    });

    let definition = WorkflowDefinition::builder()
        .checkpoint(Checkpoint::new("ask", "Topic?").capture("topic"))
        .retry_loop(RetryLoop::new(
            "haiku",
            HaikuStep::default(),
            three_lines,
            LoopConfig::default(),
        ))
        .checkpoint(
            Checkpoint::new("review", "Approve or revise the haiku.")
                .reviews("haiku")
                .feedback_key("haiku_feedback"),
        )
        .build()?;

    let mut run = Orchestrator::new(Arc::new(definition));
    for turn in ["an old library", "revise: rain", "approve"] {
        println!("> {}", turn);
        let report = run.handle_turn(turn).await?;
        for output in &report.outputs {
            println!("{}\n", output);
        }
        if let Some(prompt) = &report.prompt {
            println!("{}", prompt);
        }
    }
    println!("Finished: {}", run.status());

    Ok(())
}
