//! # lattice-adapters
//!
//! Drives third-party command-line programs and routes role prompts to them.
//!
//! This crate provides:
//! - `ProcessInvoker`: pipes-only execution under a deadline
//! - `PtyDriver`: in-process pseudo-terminal execution that can answer
//!   cursor-position queries
//! - `ScriptWrapper`: pseudo-terminal via the external `script` utility
//! - `ResponseClassifier` and `EscalationController`: ordered strategy retry
//! - `ProviderAdapter`: provider routing and context priming

mod classifier;
mod error;
mod escalation;
mod process_invoker;
mod provider;
mod pty_driver;
mod script_wrapper;

pub use classifier::ResponseClassifier;
pub use error::InvokeError;
pub use escalation::{
    AttemptRecord, AttemptRunner, CliAttemptRunner, Escalation, EscalationController,
};
pub use process_invoker::{ProcessCommand, ProcessInvoker};
pub use provider::{Provider, ProviderAdapter, prime_prompt};
pub use pty_driver::{CURSOR_QUERY, CURSOR_REPLY, PtyDriver, PtyEnd, PtyOutcome, clean_pty_output};
pub use script_wrapper::ScriptWrapper;
