//! Turn messages and sessions produced by the mediator.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the two alternating speakers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Proposes and revises.
    #[serde(rename = "S1")]
    A,
    /// Critiques.
    #[serde(rename = "S2")]
    B,
}

impl Role {
    /// Speaker label used in prompts and transcripts.
    pub fn label(self) -> &'static str {
        match self {
            Role::A => "S1",
            Role::B => "S2",
        }
    }

    /// Prefix a resonance tag must carry to count as this role's marker.
    pub fn tag_prefix(self) -> &'static str {
        match self {
            Role::A => "S1-",
            Role::B => "S2-",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// What a turn is asking its speaker to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnPhase {
    Propose,
    Critique,
    Revise,
}

impl fmt::Display for TurnPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TurnPhase::Propose => "propose",
            TurnPhase::Critique => "critique",
            TurnPhase::Revise => "revise",
        };
        f.write_str(name)
    }
}

/// A single appended turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnMessage {
    /// 1-based, monotonic.
    pub turn: u32,
    pub speaker: Role,
    pub phase: TurnPhase,
    pub text: String,
    /// Friction score in [0, 1].
    pub strain: f64,
    /// `None` when the modal/event pair has no signal.
    pub signal: Option<i64>,
    pub resonance: Vec<String>,
}

/// Ordered turns of one mediated run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub messages: Vec<TurnMessage>,
    #[serde(default)]
    pub stopped_on_strain: bool,
}

impl Session {
    /// Creates an empty session.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a message. Turn indices must increase by one.
    pub fn push(&mut self, message: TurnMessage) {
        debug_assert_eq!(message.turn as usize, self.messages.len() + 1);
        self.messages.push(message);
    }

    /// The most recent message, if any.
    pub fn last(&self) -> Option<&TurnMessage> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
