use lattice_proto::InvocationResult;
use std::time::Duration;

/// Failure of a single attempt to run a program.
///
/// Non-zero exits and stderr output are not errors; they come back as an
/// [`InvocationResult`] for the classifier to judge.
#[derive(Debug, thiserror::Error)]
pub enum InvokeError {
    #[error("Failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The deadline passed. Whatever the process printed before it was
    /// killed is kept in `partial`.
    #[error("Timed out after {}s", .after.as_secs())]
    Timeout {
        after: Duration,
        partial: Box<InvocationResult>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("PTY error: {0}")]
    Pty(String),
}

impl InvokeError {
    /// The result to classify for this failure.
    ///
    /// Timeouts yield their partial output; other failures become an exitless
    /// result carrying the error message on stderr.
    pub fn into_result(self) -> InvocationResult {
        match self {
            InvokeError::Timeout { partial, .. } => *partial,
            other => InvocationResult {
                exit_code: None,
                stdout: String::new(),
                stderr: other.to_string(),
                elapsed: Duration::ZERO,
                timed_out: false,
            },
        }
    }
}
