//! Runs a single producer against the state.

use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};
use tsuzuri_core::{Producer, StepResult, WorkflowError, WorkflowState};

/// Invokes the producer and merges its value into the state.
///
/// The producer only borrows the state immutably while it runs; the write
/// happens here, after it returned successfully. On failure or timeout the
/// state is left exactly as it was.
pub async fn run_producer(
    producer: &dyn Producer,
    state: &mut WorkflowState,
    attempt_timeout: Option<Duration>,
) -> StepResult {
    let name = producer.name();
    let output_key = producer.output_key();

    let produced = match attempt_timeout {
        Some(limit) => match timeout(limit, producer.produce(state)).await {
            Ok(result) => result,
            Err(_) => Err(WorkflowError::Timeout {
                step_name: name.clone(),
            }),
        },
        None => producer.produce(state).await,
    };

    match produced {
        Ok(value) => {
            if let Some(key) = &output_key {
                debug!(step = %name, key = %key, "writing step output");
                state.set(key.clone(), value.clone());
            }
            StepResult::succeeded(name, output_key, value)
        }
        Err(e) => {
            warn!(step = %name, error = %e, "producer failed");
            StepResult::failed(name, output_key, e)
        }
    }
}
