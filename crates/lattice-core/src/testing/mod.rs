//! Testing utilities for deterministic sessions without live CLIs.

pub mod scripted_responder;

pub use scripted_responder::{ResponseRecord, ScriptedResponder};
