//! Two-role turn mediation.
//!
//! Role A opens with a proposal; role B critiques and role A revises, turn
//! after turn, until the budget runs out or a turn's strain crosses the
//! threshold. A strain stop is a normal end, not a failure.

use crate::config::{RolesConfig, SessionDefaults};
use crate::kernel::{EventKind, SignalSource};
use crate::strain::strain_score;
use crate::transcript::{Record, TranscriptSink};
use lattice_proto::{Responder, Role, Session, TurnMessage, TurnPhase};
use tracing::{debug, info, warn};

/// Parameters of one mediated run.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionRequest {
    pub prompt: String,
    pub modal: String,
    pub event: String,
    pub event_kind: EventKind,
    /// Total turns including the opening proposal.
    pub turns: u32,
    pub strain_threshold: f64,
}

impl SessionRequest {
    /// A request using the built-in session defaults.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self::with_defaults(prompt, &SessionDefaults::default())
    }

    /// A request using configured session defaults.
    pub fn with_defaults(prompt: impl Into<String>, defaults: &SessionDefaults) -> Self {
        Self {
            prompt: prompt.into(),
            modal: defaults.modal.clone(),
            event: defaults.event.clone(),
            event_kind: defaults.event_kind,
            turns: defaults.turns,
            strain_threshold: defaults.strain_threshold,
        }
    }

    pub fn turns(mut self, turns: u32) -> Self {
        self.turns = turns;
        self
    }

    pub fn strain_threshold(mut self, threshold: f64) -> Self {
        self.strain_threshold = threshold;
        self
    }

    pub fn event(mut self, modal: impl Into<String>, event: impl Into<String>, kind: EventKind) -> Self {
        self.modal = modal.into();
        self.event = event.into();
        self.event_kind = kind;
        self
    }
}

/// Where the mediator is in the turn protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediatorState {
    Propose,
    Critique,
    Revise,
    Stopped,
}

impl MediatorState {
    /// Speaker and phase for the next turn, `None` once stopped.
    pub fn turn(self) -> Option<(Role, TurnPhase)> {
        match self {
            MediatorState::Propose => Some((Role::A, TurnPhase::Propose)),
            MediatorState::Critique => Some((Role::B, TurnPhase::Critique)),
            MediatorState::Revise => Some((Role::A, TurnPhase::Revise)),
            MediatorState::Stopped => None,
        }
    }

    /// State after a turn that did not stop the session.
    pub fn advance(self) -> Self {
        match self {
            MediatorState::Propose | MediatorState::Revise => MediatorState::Critique,
            MediatorState::Critique => MediatorState::Revise,
            MediatorState::Stopped => MediatorState::Stopped,
        }
    }
}

/// Runs alternating-role sessions against a [`Responder`].
pub struct TurnMediator<R, S> {
    responder: R,
    source: S,
    roles: RolesConfig,
    transcript: Option<Box<dyn TranscriptSink>>,
}

impl<R: Responder, S: SignalSource> TurnMediator<R, S> {
    pub fn new(responder: R, source: S, roles: RolesConfig) -> Self {
        Self {
            responder,
            source,
            roles,
            transcript: None,
        }
    }

    /// Attaches the sink that receives every record of this mediator's runs.
    pub fn with_transcript(mut self, sink: Box<dyn TranscriptSink>) -> Self {
        self.transcript = Some(sink);
        self
    }

    fn provider_for(&self, role: Role) -> &str {
        match role {
            Role::A => &self.roles.role_a,
            Role::B => &self.roles.role_b,
        }
    }

    fn record(&self, record: &Record) {
        if let Some(sink) = &self.transcript {
            sink.write_record(record);
        }
    }

    /// Runs one session to completion.
    ///
    /// At least the opening proposal always runs. Every appended message is
    /// checked against the threshold, the first one included.
    pub async fn run_session(&self, request: &SessionRequest) -> Session {
        let signal = self
            .source
            .signal(&request.modal, &request.event, request.event_kind);
        if signal.is_none() {
            warn!(
                modal = %request.modal,
                event = %request.event,
                kind = %request.event_kind,
                "Signal not found; continuing without one"
            );
        }
        let resonance = self.source.resonance(signal);
        let context = self.source.context();

        self.record(&Record::session_start(
            &request.prompt,
            &request.modal,
            &request.event,
            request.turns,
            request.strain_threshold,
            signal,
        ));
        info!(
            turns = request.turns,
            threshold = request.strain_threshold,
            signal = ?signal,
            role_a = %self.roles.role_a,
            role_b = %self.roles.role_b,
            "Starting mediated session"
        );

        let budget = request.turns.max(1);
        let mut session = Session::new();
        let mut state = MediatorState::Propose;

        while let Some((speaker, phase)) = state.turn() {
            let turn = session.len() as u32 + 1;
            let prompt = match session.last() {
                None => opening_prompt(&request.prompt, signal, &resonance),
                Some(last) => follow_up_prompt(speaker, request, signal, &resonance, last),
            };

            let provider = self.provider_for(speaker);
            debug!(turn, speaker = %speaker, phase = %phase, provider, "Requesting turn");
            let text = self.responder.respond(provider, &prompt, &context).await;

            let strain = strain_score(signal, &resonance);
            let message = TurnMessage {
                turn,
                speaker,
                phase,
                text,
                strain,
                signal,
                resonance: resonance.clone(),
            };
            self.record(&Record::turn(&message));
            session.push(message);

            state = if strain > request.strain_threshold {
                info!(turn, strain, threshold = request.strain_threshold, "Strain threshold exceeded, stopping");
                session.stopped_on_strain = true;
                MediatorState::Stopped
            } else if turn >= budget {
                MediatorState::Stopped
            } else {
                state.advance()
            };
        }

        self.record(&Record::session_end(&session));
        info!(
            turns = session.len(),
            stopped_on_strain = session.stopped_on_strain,
            "Session complete"
        );
        session
    }
}

fn signal_label(signal: Option<i64>) -> String {
    signal.map_or_else(|| "absent".to_string(), |s| s.to_string())
}

fn opening_prompt(prompt: &str, signal: Option<i64>, resonance: &[String]) -> String {
    format!(
        "{}: Propose an on-brand concept.\n(Signal={}, Resonance={:?})\n{}",
        Role::A,
        signal_label(signal),
        resonance,
        prompt
    )
}

fn follow_up_prompt(
    speaker: Role,
    request: &SessionRequest,
    signal: Option<i64>,
    resonance: &[String],
    last: &TurnMessage,
) -> String {
    let instruction = match speaker {
        Role::B => "Critique & refine (ethical, relational, clarity)",
        Role::A => "Revise proposal (concise, concrete, visual tokens)",
    };
    format!(
        "{instruction}.\nBRAND CONTEXT: {}/{}, Signal={}, Resonance={:?}\nLAST MESSAGE ({}): {}\nRespond with one short paragraph + 3 bullet improvements.",
        request.modal,
        request.event,
        signal_label(signal),
        resonance,
        last.speaker,
        last.text
    )
}
