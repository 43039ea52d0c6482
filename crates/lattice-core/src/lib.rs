//! # lattice-core
//!
//! Session mediation for Lattice.
//!
//! This crate provides:
//! - Layered configuration (YAML file, then environment overrides)
//! - Kernel lookups for signals and resonance tags
//! - Per-turn strain scoring
//! - The two-role turn mediator and its JSONL transcript
//!
//! Provider execution lives in `lattice-adapters`; the mediator only sees
//! the [`lattice_proto::Responder`] trait.

mod config;
mod kernel;
mod mediator;
mod strain;
mod transcript;

pub mod testing;

pub use config::{
    ConfigError, ConfigWarning, LatticeConfig, PrimaryCliConfig, RolesConfig,
    SecondaryCliConfig, SessionDefaults,
};
pub use kernel::{EventKind, Kernel, KernelError, SignalSource};
pub use mediator::{MediatorState, SessionRequest, TurnMediator};
pub use strain::strain_score;
pub use transcript::{JsonlTranscript, Record, TranscriptSink};
