//! Reviewer turns and their interpretation.

use serde::{Deserialize, Serialize};
use std::fmt;

const APPROVE_WORDS: &[&str] = &[
    "approve", "approved", "accept", "yes", "y", "ok", "okay", "lgtm", "continue", "proceed",
    "next",
];
const REVISE_WORDS: &[&str] = &["revise", "revision", "redo", "rewrite", "retry", "again"];
const DECLINE_WORDS: &[&str] = &[
    "decline", "reject", "no", "n", "cancel", "stop", "quit", "exit", "abort",
];
const SELECT_WORDS: &[&str] = &["option", "select", "choose", "pick"];

/// What the reviewer meant by a turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "intent", rename_all = "snake_case")]
pub enum Intent {
    /// Accept the current result and move on.
    Approve,
    /// Re-run the reviewed stage, optionally with feedback.
    Revise {
        /// Text following the revise keyword.
        feedback: String,
    },
    /// Pick a numbered option (1-based).
    SelectOption {
        /// The chosen option.
        n: usize,
    },
    /// Stop the run.
    Decline,
    /// Anything else.
    Freeform {
        /// The trimmed input.
        text: String,
    },
}

/// The discriminant of an [`Intent`], used as a transition table key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IntentKind {
    /// See [`Intent::Approve`].
    Approve,
    /// See [`Intent::Revise`].
    Revise,
    /// See [`Intent::SelectOption`].
    SelectOption,
    /// See [`Intent::Decline`].
    Decline,
    /// See [`Intent::Freeform`].
    Freeform,
}

impl Intent {
    /// Returns the discriminant.
    pub fn kind(&self) -> IntentKind {
        match self {
            Intent::Approve => IntentKind::Approve,
            Intent::Revise { .. } => IntentKind::Revise,
            Intent::SelectOption { .. } => IntentKind::SelectOption,
            Intent::Decline => IntentKind::Decline,
            Intent::Freeform { .. } => IntentKind::Freeform,
        }
    }

    /// Interprets raw reviewer input.
    ///
    /// The first word decides: approval, revision, decline and selection
    /// keywords are recognized case-insensitively, a bare number selects
    /// that option, and anything else is freeform.
    ///
    /// # Examples
    ///
    /// ```
    /// use tsuzuri_core::Intent;
    ///
    /// assert_eq!(Intent::interpret("LGTM!"), Intent::Approve);
    /// assert_eq!(Intent::interpret("option 2"), Intent::SelectOption { n: 2 });
    /// assert_eq!(
    ///     Intent::interpret("revise: shorter intro"),
    ///     Intent::Revise { feedback: "shorter intro".to_string() }
    /// );
    /// ```
    pub fn interpret(raw: &str) -> Self {
        let text = raw.trim();
        let (head, rest) = match text.split_once(char::is_whitespace) {
            Some((head, rest)) => (head, rest.trim()),
            None => (text, ""),
        };
        let word = head
            .trim_end_matches(|c: char| c.is_ascii_punctuation())
            .to_lowercase();

        if let Some(n) = parse_option_number(&word) {
            if rest.is_empty() {
                return Intent::SelectOption { n };
            }
        }
        if SELECT_WORDS.contains(&word.as_str()) {
            if let Some(n) = parse_option_number(rest) {
                return Intent::SelectOption { n };
            }
        }
        if APPROVE_WORDS.contains(&word.as_str()) {
            return Intent::Approve;
        }
        if DECLINE_WORDS.contains(&word.as_str()) {
            return Intent::Decline;
        }
        if REVISE_WORDS.contains(&word.as_str()) {
            let feedback = rest.trim_start_matches(|c: char| c == ':' || c == '-').trim();
            return Intent::Revise {
                feedback: feedback.to_string(),
            };
        }

        Intent::Freeform {
            text: text.to_string(),
        }
    }
}

fn parse_option_number(s: &str) -> Option<usize> {
    s.trim()
        .trim_start_matches('#')
        .trim_end_matches(|c: char| c.is_ascii_punctuation())
        .parse()
        .ok()
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Intent::Approve => write!(f, "approve"),
            Intent::Revise { .. } => write!(f, "revise"),
            Intent::SelectOption { n } => write!(f, "select_option({})", n),
            Intent::Decline => write!(f, "decline"),
            Intent::Freeform { .. } => write!(f, "freeform"),
        }
    }
}

/// One exchange with the reviewer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalTurn {
    /// Input exactly as received.
    pub raw_input: String,
    /// How the input was understood.
    pub interpreted_intent: Intent,
}

impl ExternalTurn {
    /// Creates a turn by interpreting the raw input.
    pub fn new(raw_input: impl Into<String>) -> Self {
        let raw_input = raw_input.into();
        let interpreted_intent = Intent::interpret(&raw_input);
        Self {
            raw_input,
            interpreted_intent,
        }
    }
}
