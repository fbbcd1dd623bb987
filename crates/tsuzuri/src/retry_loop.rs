//! Bounded producer/validator loop.

use crate::executor::run_producer;
use serde::Serialize;
use std::fmt;
use tracing::{debug, info, warn};
use tsuzuri_core::{
    LoopConfig, PresenceValidator, Producer, Rejection, StepName, Validator, WorkflowError,
    WorkflowState,
};

/// Why a loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalReason {
    /// The validator accepted the state.
    Accepted,
    /// The iteration bound was reached without acceptance.
    Exhausted,
    /// A failure that retrying cannot fix.
    Fatal,
}

impl fmt::Display for TerminalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminalReason::Accepted => write!(f, "accepted"),
            TerminalReason::Exhausted => write!(f, "exhausted"),
            TerminalReason::Fatal => write!(f, "fatal"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopState {
    Running,
    Done(TerminalReason),
}

/// The most recent reason an iteration did not end the loop.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptFailure {
    /// The producer raised an error.
    Producer(WorkflowError),
    /// The validator rejected the state.
    Rejected(Rejection),
}

impl fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptFailure::Producer(e) => write!(f, "{}", e),
            AttemptFailure::Rejected(r) => write!(f, "rejected: {}", r),
        }
    }
}

/// Record of one loop execution.
///
/// `iteration_count` counts rejected iterations (producer failures
/// included), so an immediately accepted loop reports `0`.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopRun {
    /// The loop stage.
    pub stage: StepName,
    /// Rejected iterations.
    pub iteration_count: u32,
    /// The configured bound.
    pub max_iterations: u32,
    /// Why the loop stopped.
    pub terminal_reason: TerminalReason,
    /// What went wrong on the last rejected iteration.
    pub last_failure: Option<AttemptFailure>,
}

impl LoopRun {
    /// Returns `true` if the loop ended in acceptance.
    pub fn is_accepted(&self) -> bool {
        self.terminal_reason == TerminalReason::Accepted
    }

    /// Producer invocations made, including the accepted one.
    pub fn attempts(&self) -> u32 {
        match self.terminal_reason {
            TerminalReason::Accepted => self.iteration_count + 1,
            _ => self.iteration_count,
        }
    }

    /// Converts a non-accepted run into the error that describes it.
    pub fn error(&self) -> Option<WorkflowError> {
        match (&self.terminal_reason, &self.last_failure) {
            (TerminalReason::Accepted, _) => None,
            (TerminalReason::Fatal, Some(AttemptFailure::Producer(e))) => Some(e.clone()),
            _ => Some(WorkflowError::ExhaustedRetries {
                stage: self.stage.clone(),
                attempts: self.attempts(),
            }),
        }
    }
}

/// Runs a producer until a validator accepts, at most `max_iterations` times.
///
/// Producer failures count as rejections and are retried within the bound.
/// Non-retryable errors, and optionally a streak of identical failures,
/// end the loop as [`TerminalReason::Fatal`].
pub struct RetryLoop {
    name: StepName,
    producer: Box<dyn Producer>,
    validator: Box<dyn Validator>,
    config: LoopConfig,
}

impl fmt::Debug for RetryLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryLoop")
            .field("name", &self.name)
            .field("producer", &self.producer.name())
            .field("validator", &self.validator.name())
            .field("config", &self.config)
            .finish()
    }
}

impl RetryLoop {
    /// Creates a loop from its parts.
    pub fn new(
        name: impl Into<StepName>,
        producer: impl Producer + 'static,
        validator: impl Validator + 'static,
        config: LoopConfig,
    ) -> Self {
        Self {
            name: name.into(),
            producer: Box::new(producer),
            validator: Box::new(validator),
            config,
        }
    }

    /// Creates a loop that accepts once the producer's key has content.
    ///
    /// Fails if the producer declares no output key.
    pub fn presence(
        name: impl Into<StepName>,
        producer: impl Producer + 'static,
        config: LoopConfig,
    ) -> Result<Self, WorkflowError> {
        let key = producer.output_key().ok_or_else(|| {
            WorkflowError::Configuration(format!(
                "producer '{}' declares no output key to validate",
                producer.name()
            ))
        })?;
        Ok(Self::new(name, producer, PresenceValidator::new(key), config))
    }

    /// Returns the loop name.
    pub fn name(&self) -> &StepName {
        &self.name
    }

    /// Returns the loop configuration.
    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    /// Returns the wrapped producer.
    pub fn producer(&self) -> &dyn Producer {
        self.producer.as_ref()
    }

    /// Executes the loop against the state.
    pub async fn run(&self, state: &mut WorkflowState) -> LoopRun {
        let max_iterations = self.config.max_iterations;
        let mut iteration = 0u32;
        let mut status = LoopState::Running;
        let mut last_failure = None;
        let mut streak: Option<(String, u32)> = None;

        while iteration < max_iterations && status == LoopState::Running {
            debug!(
                stage = %self.name,
                attempt = iteration + 1,
                max_iterations,
                "invoking producer"
            );
            let result =
                run_producer(self.producer.as_ref(), state, self.config.attempt_timeout).await;

            if let Some(err) = result.raised_error {
                iteration += 1;
                if !err.is_retryable() || self.extend_streak(&mut streak, &err) {
                    warn!(stage = %self.name, error = %err, "producer failure is fatal");
                    status = LoopState::Done(TerminalReason::Fatal);
                } else if iteration == max_iterations {
                    status = LoopState::Done(TerminalReason::Exhausted);
                }
                last_failure = Some(AttemptFailure::Producer(err));
                self.pause_if_running(status, iteration).await;
                continue;
            }
            streak = None;

            let outcome = self.validator.check(state);
            if outcome.accepted {
                info!(stage = %self.name, attempt = iteration + 1, "output accepted");
                status = LoopState::Done(TerminalReason::Accepted);
                break;
            }

            iteration += 1;
            let reason = outcome
                .reason
                .unwrap_or_else(|| Rejection::Other("rejected".to_string()));
            info!(
                stage = %self.name,
                iteration,
                max_iterations,
                reason = %reason,
                "output rejected"
            );
            last_failure = Some(AttemptFailure::Rejected(reason));
            if iteration == max_iterations {
                status = LoopState::Done(TerminalReason::Exhausted);
            }
            self.pause_if_running(status, iteration).await;
        }

        let terminal_reason = match status {
            LoopState::Done(reason) => reason,
            LoopState::Running => TerminalReason::Exhausted,
        };
        if terminal_reason == TerminalReason::Exhausted {
            warn!(stage = %self.name, iterations = iteration, "retry loop exhausted");
        }

        LoopRun {
            stage: self.name.clone(),
            iteration_count: iteration,
            max_iterations,
            terminal_reason,
            last_failure,
        }
    }

    /// Tracks consecutive identical producer failures; returns `true` once
    /// the configured streak length is reached.
    fn extend_streak(&self, streak: &mut Option<(String, u32)>, err: &WorkflowError) -> bool {
        let Some(limit) = self.config.fatal_after else {
            return false;
        };
        let message = err.to_string();
        let count = match streak.take() {
            Some((prev, n)) if prev == message => n + 1,
            _ => 1,
        };
        *streak = Some((message, count));
        count >= limit
    }

    async fn pause_if_running(&self, status: LoopState, iteration: u32) {
        if status != LoopState::Running {
            return;
        }
        if let Some(delay) = self.config.backoff.delay_for_iteration(iteration - 1) {
            debug!(stage = %self.name, delay_ms = delay.as_millis() as u64, "backing off");
            tokio::time::sleep(delay).await;
        }
    }
}
