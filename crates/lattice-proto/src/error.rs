//! Error types shared across Lattice crates.

/// Errors that cross crate boundaries before being rendered as text.
///
/// Process-level failures never appear here: the escalation layer turns
/// them into descriptive strings. What remains are caller mistakes that
/// must be reported without a retry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The provider id did not match any known provider or alias.
    #[error("Unknown provider '{0}'.")]
    UnknownProvider(String),

    /// A forced strategy name did not parse.
    #[error("Unknown execution strategy '{0}'.")]
    UnknownStrategy(String),
}

impl Error {
    /// Renders the error as the tagged text handed to callers above the
    /// provider boundary.
    pub fn to_boundary_text(&self) -> String {
        format!("[LLM_ERROR] {self}")
    }
}
