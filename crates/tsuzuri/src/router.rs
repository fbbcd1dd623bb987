//! Transition table from (checkpoint, intent) to the next move.

use crate::stage::Stage;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;
use tsuzuri_core::{ExternalTurn, Intent, IntentKind, StateKey, StepName};

/// A table entry: what a checkpoint does with one kind of intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Continue the main sequence at `to`.
    Advance {
        /// Index of the next stage.
        to: usize,
    },
    /// Re-run the main sequence from `from`.
    Rerun {
        /// Index of the reviewed stage.
        from: usize,
        /// Where revision feedback is stored.
        feedback_key: Option<StateKey>,
    },
    /// Store freeform input and continue at `to`.
    Capture {
        /// Where the input is stored.
        key: StateKey,
        /// Index of the next stage.
        to: usize,
    },
    /// Run one of these optional stages.
    Options(Vec<StepName>),
    /// End the run and discard its state.
    Terminate,
}

/// A resolved move for one concrete turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Continue the main sequence at `to`.
    Advance {
        /// Index of the next stage.
        to: usize,
    },
    /// Optionally store feedback, then re-run from `from`.
    Rerun {
        /// Index of the reviewed stage.
        from: usize,
        /// Feedback to store before re-running.
        feedback: Option<(StateKey, String)>,
    },
    /// Store `value` under `key`, then continue at `to`.
    Capture {
        /// Where the input is stored.
        key: StateKey,
        /// The input.
        value: String,
        /// Index of the next stage.
        to: usize,
    },
    /// Run the named optional stage and come back.
    Branch {
        /// The optional stage.
        stage: StepName,
    },
    /// End the run.
    Terminate,
    /// Stay put and ask again.
    Reprompt {
        /// Why the input was not accepted.
        reason: String,
    },
}

/// The delegation router.
///
/// A pure lookup: it holds nothing but the table built from the stage list,
/// so the same cursor and intent always give the same transition.
#[derive(Debug, Clone, Default)]
pub struct Router {
    table: BTreeMap<(usize, IntentKind), Route>,
    checkpoints: HashMap<usize, StepName>,
}

impl Router {
    /// Builds the table for a validated main sequence.
    pub fn from_stages(stages: &[Stage]) -> Self {
        let positions: HashMap<StepName, usize> = stages
            .iter()
            .enumerate()
            .map(|(i, s)| (s.name(), i))
            .collect();
        let mut router = Router::default();

        for (idx, stage) in stages.iter().enumerate() {
            let Some(checkpoint) = stage.as_checkpoint() else {
                continue;
            };
            router.checkpoints.insert(idx, checkpoint.name().clone());
            let next = idx + 1;

            match checkpoint.capture_key() {
                Some(key) => {
                    router.table.insert(
                        (idx, IntentKind::Freeform),
                        Route::Capture {
                            key: key.clone(),
                            to: next,
                        },
                    );
                }
                None => {
                    router
                        .table
                        .insert((idx, IntentKind::Approve), Route::Advance { to: next });
                }
            }
            if let Some(from) = checkpoint
                .reviewed_stage()
                .and_then(|name| positions.get(name))
            {
                router.table.insert(
                    (idx, IntentKind::Revise),
                    Route::Rerun {
                        from: *from,
                        feedback_key: checkpoint.feedback().cloned(),
                    },
                );
            }
            if !checkpoint.options().is_empty() {
                router.table.insert(
                    (idx, IntentKind::SelectOption),
                    Route::Options(checkpoint.options().to_vec()),
                );
            }
            router
                .table
                .insert((idx, IntentKind::Decline), Route::Terminate);
        }

        router
    }

    /// Returns the route for a table key.
    pub fn lookup(&self, cursor: usize, kind: IntentKind) -> Option<&Route> {
        self.table.get(&(cursor, kind))
    }

    /// Iterates over every table entry.
    pub fn entries(&self) -> impl Iterator<Item = (&(usize, IntentKind), &Route)> {
        self.table.iter()
    }

    /// Interprets raw input in the context of the checkpoint under `cursor`.
    ///
    /// A capture checkpoint takes any input longer than one word verbatim,
    /// so a topic such as "stop motion animation" is not read as a command.
    pub fn interpret(&self, cursor: usize, raw_input: &str) -> ExternalTurn {
        let captures = matches!(
            self.lookup(cursor, IntentKind::Freeform),
            Some(Route::Capture { .. })
        );
        let text = raw_input.trim();
        if captures && text.split_whitespace().nth(1).is_some() {
            return ExternalTurn {
                raw_input: raw_input.to_string(),
                interpreted_intent: Intent::Freeform {
                    text: text.to_string(),
                },
            };
        }
        ExternalTurn::new(raw_input)
    }

    /// Resolves the transition for an intent at the checkpoint under `cursor`.
    pub fn route(&self, cursor: usize, intent: &Intent) -> Transition {
        let Some(checkpoint) = self.checkpoints.get(&cursor) else {
            return Transition::Reprompt {
                reason: format!("no checkpoint at position {}", cursor),
            };
        };

        let transition = match (self.lookup(cursor, intent.kind()), intent) {
            (Some(Route::Advance { to }), _) => Transition::Advance { to: *to },
            (Some(Route::Terminate), _) => Transition::Terminate,
            (
                Some(Route::Rerun { from, feedback_key }),
                Intent::Revise { feedback },
            ) => Transition::Rerun {
                from: *from,
                feedback: feedback_key.clone().map(|k| (k, feedback.clone())),
            },
            (Some(Route::Capture { key, to }), Intent::Freeform { text }) if !text.is_empty() => {
                Transition::Capture {
                    key: key.clone(),
                    value: text.clone(),
                    to: *to,
                }
            }
            (Some(Route::Options(options)), Intent::SelectOption { n }) => {
                match n.checked_sub(1).and_then(|i| options.get(i)) {
                    Some(stage) => Transition::Branch {
                        stage: stage.clone(),
                    },
                    None => Transition::Reprompt {
                        reason: format!(
                            "option {} does not exist; choose 1-{}",
                            n,
                            options.len()
                        ),
                    },
                }
            }
            _ => Transition::Reprompt {
                reason: format!(
                    "'{}' is not understood at '{}'; expected {}",
                    intent,
                    checkpoint,
                    self.expected(cursor).join(", ")
                ),
            },
        };

        debug!(cursor, intent = %intent, transition = ?transition, "routed turn");
        transition
    }

    fn expected(&self, cursor: usize) -> Vec<&'static str> {
        self.table
            .keys()
            .filter(|(c, _)| *c == cursor)
            .map(|(_, kind)| match kind {
                IntentKind::Approve => "approve",
                IntentKind::Revise => "revise [feedback]",
                IntentKind::SelectOption => "an option number",
                IntentKind::Decline => "cancel",
                IntentKind::Freeform => "your input",
            })
            .collect()
    }
}
