//! # lattice-proto
//!
//! Shared types, error definitions, and traits for the Lattice workspace.
//!
//! This crate provides the foundational abstractions used across all Lattice
//! crates, including:
//! - Invocation requests, per-attempt results, and execution strategies
//! - Classification outcomes for ambiguous process results
//! - Turn messages and sessions produced by the mediator
//! - The `Responder` seam between the mediator and provider adapters

mod error;
mod invocation;
mod responder;
mod turn;

pub use error::Error;
pub use invocation::{
    ClassificationOutcome, DEFAULT_TIMEOUT, ExecutionStrategy, InvocationRequest, InvocationResult,
};
pub use responder::Responder;
pub use turn::{Role, Session, TurnMessage, TurnPhase};
