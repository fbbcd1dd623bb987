//! Producer trait and related types.

use crate::error::WorkflowError;
use crate::state::{StateKey, WorkflowState};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::{self, Debug};
use std::time::Duration;

/// Type-safe step and stage name wrapper.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepName(String);

impl StepName {
    /// Creates a new StepName.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the step name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StepName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for StepName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for StepName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for StepName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::borrow::Borrow<str> for StepName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for StepName {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for StepName {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// Outcome of one producer invocation.
///
/// On success `output_value` holds what was written under `output_key` (or
/// the discarded value of a step that declares no key). On failure the state
/// was left untouched and `raised_error` says why.
#[derive(Debug, Clone, PartialEq)]
pub struct StepResult {
    /// The step that ran.
    pub step_name: StepName,
    /// The key the step declared, if any.
    pub output_key: Option<StateKey>,
    /// The produced value, absent on failure.
    pub output_value: Option<Value>,
    /// The failure, absent on success.
    pub raised_error: Option<WorkflowError>,
}

impl StepResult {
    /// Creates a successful result.
    pub fn succeeded(step_name: StepName, output_key: Option<StateKey>, value: Value) -> Self {
        Self {
            step_name,
            output_key,
            output_value: Some(value),
            raised_error: None,
        }
    }

    /// Creates a failed result.
    pub fn failed(step_name: StepName, output_key: Option<StateKey>, error: WorkflowError) -> Self {
        Self {
            step_name,
            output_key,
            output_value: None,
            raised_error: Some(error),
        }
    }

    /// Returns `true` if the producer succeeded.
    pub fn is_success(&self) -> bool {
        self.raised_error.is_none()
    }
}

/// A unit of work that reads state and produces one value.
///
/// Producers only ever see a shared reference to the state. The engine
/// writes the returned value under [`Producer::output_key`], so a failing
/// producer can never leave a partial write behind.
///
/// # Examples
///
/// ```
/// use tsuzuri_core::{Producer, StateKey, StepName, WorkflowError, WorkflowState};
/// use async_trait::async_trait;
/// use serde_json::Value;
///
/// #[derive(Debug)]
/// struct Shout;
///
/// #[async_trait]
/// impl Producer for Shout {
///     async fn produce(&self, state: &WorkflowState) -> Result<Value, WorkflowError> {
///         let topic = state.get_str("topic").unwrap_or_default();
///         Ok(Value::String(topic.to_uppercase()))
///     }
///
///     fn name(&self) -> StepName {
///         StepName::new("shout")
///     }
///
///     fn output_key(&self) -> Option<StateKey> {
///         Some(StateKey::new("shouted"))
///     }
/// }
/// ```
#[async_trait]
pub trait Producer: Send + Sync + Debug {
    /// Produces the step's value from the current state.
    ///
    /// Generation failures should be reported as
    /// [`WorkflowError::ProducerFailure`] or [`WorkflowError::Unreachable`].
    async fn produce(&self, state: &WorkflowState) -> Result<Value, WorkflowError>;

    /// Returns the step name.
    fn name(&self) -> StepName;

    /// Returns the single key this step writes, or `None` for steps whose
    /// value is only surfaced.
    fn output_key(&self) -> Option<StateKey>;
}

/// Delay schedule between retry loop iterations.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backoff {
    /// Re-run immediately.
    #[default]
    None,
    /// Fixed delay between iterations.
    Fixed {
        /// Delay between each iteration.
        #[serde(with = "millis")]
        delay: Duration,
    },
    /// Exponential backoff with configurable parameters.
    Exponential {
        /// Delay before the second iteration.
        #[serde(with = "millis")]
        initial_delay: Duration,
        /// Maximum delay cap.
        #[serde(with = "millis")]
        max_delay: Duration,
        /// Multiplier for each iteration.
        multiplier: u32,
    },
}

/// Error returned when [`Backoff`] configuration is invalid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffError(pub &'static str);

impl std::fmt::Display for BackoffError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for BackoffError {}

impl Backoff {
    /// Creates a fixed backoff.
    pub fn fixed(delay: Duration) -> Self {
        Backoff::Fixed { delay }
    }

    /// Creates an exponential backoff with `multiplier=2` and `max_delay=60s`.
    pub fn exponential(initial_delay: Duration) -> Self {
        Backoff::Exponential {
            initial_delay,
            max_delay: Duration::from_secs(60),
            multiplier: 2,
        }
    }

    /// Creates an exponential backoff with custom settings.
    pub fn exponential_backoff(
        initial_delay: Duration,
        max_delay: Duration,
        multiplier: u32,
    ) -> Result<Self, BackoffError> {
        let backoff = Backoff::Exponential {
            initial_delay,
            max_delay,
            multiplier,
        };
        backoff.validate()?;
        Ok(backoff)
    }

    /// Checks the parameters of an exponential backoff.
    pub fn validate(&self) -> Result<(), BackoffError> {
        if let Backoff::Exponential {
            initial_delay,
            max_delay,
            multiplier,
        } = self
        {
            if *multiplier == 0 {
                return Err(BackoffError("multiplier must be greater than 0"));
            }
            if *multiplier > 10 {
                return Err(BackoffError(
                    "multiplier must be 10 or less to avoid overflow",
                ));
            }
            if max_delay < initial_delay {
                return Err(BackoffError("max_delay must be >= initial_delay"));
            }
        }
        Ok(())
    }

    /// Calculates the delay after the given 0-indexed rejected iteration.
    pub fn delay_for_iteration(&self, iteration: u32) -> Option<Duration> {
        match self {
            Backoff::None => None,
            Backoff::Fixed { delay } => Some(*delay),
            Backoff::Exponential {
                initial_delay,
                max_delay,
                multiplier,
            } => {
                let factor = (*multiplier as u64).saturating_pow(iteration);
                let delay = (initial_delay.as_millis() as u64).saturating_mul(factor);
                Some(Duration::from_millis(
                    delay.min(max_delay.as_millis() as u64),
                ))
            }
        }
    }
}

/// Configuration for a retry loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopConfig {
    /// Upper bound on producer invocations. Default: 3.
    pub max_iterations: u32,
    /// Time allowed for each producer invocation. `None` means no timeout.
    pub attempt_timeout: Option<Duration>,
    /// Delay between iterations. Default: none.
    pub backoff: Backoff,
    /// End the loop as fatal after this many consecutive identical producer
    /// failures. Default: disabled.
    pub fatal_after: Option<u32>,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: 3,
            attempt_timeout: Some(Duration::from_secs(120)),
            backoff: Backoff::None,
            fatal_after: None,
        }
    }
}

impl LoopConfig {
    /// Returns a config with the given iteration bound.
    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Checks that the loop can make progress.
    pub fn validate(&self) -> Result<(), WorkflowError> {
        if self.max_iterations == 0 {
            return Err(WorkflowError::Configuration(
                "max_iterations must be greater than 0".to_string(),
            ));
        }
        if self.fatal_after == Some(0) {
            return Err(WorkflowError::Configuration(
                "fatal_after must be greater than 0".to_string(),
            ));
        }
        self.backoff
            .validate()
            .map_err(|e| WorkflowError::Configuration(e.to_string()))
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
