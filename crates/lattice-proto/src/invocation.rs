//! Invocation types: what to run, how to run it, and what came back.

use crate::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Default per-attempt deadline.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// How a single attempt obtains (or avoids) a terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutionStrategy {
    /// Plain pipes, no terminal at all.
    Direct,
    /// In-process pseudo-terminal. With `inject`, a cursor reply is
    /// pre-seeded and mid-stream cursor queries are answered.
    EmbeddedPty { inject: bool },
    /// Pseudo-terminal obtained through the external `script` wrapper.
    /// With `inject`, a cursor reply is piped into the program's stdin.
    ExternalPtyWrapper { inject: bool },
}

impl ExecutionStrategy {
    /// The full escalation chain, most conservative first.
    pub fn default_chain() -> Vec<Self> {
        vec![
            Self::Direct,
            Self::EmbeddedPty { inject: false },
            Self::EmbeddedPty { inject: true },
            Self::ExternalPtyWrapper { inject: true },
        ]
    }

    /// Whether the child sees a terminal on its standard streams.
    pub fn is_pty(self) -> bool {
        !matches!(self, Self::Direct)
    }

    /// Environment overrides for this strategy, using the caller's process
    /// environment for values that may be inherited.
    pub fn env_overrides(self, program: &str) -> Vec<(String, String)> {
        self.env_overrides_with(program, |key| std::env::var(key).ok())
    }

    /// Environment overrides for this strategy, resolving inheritable values
    /// through `lookup`.
    ///
    /// Without a terminal the program is told it has a dumb one and no
    /// colors; under a pty it keeps the caller's `TERM` and may color.
    pub fn env_overrides_with<F>(self, program: &str, lookup: F) -> Vec<(String, String)>
    where
        F: Fn(&str) -> Option<String>,
    {
        let (term, no_color, clicolor) = if self.is_pty() {
            (
                lookup("TERM").unwrap_or_else(|| "xterm-256color".to_string()),
                "0",
                "1",
            )
        } else {
            ("dumb".to_string(), "1", "0")
        };

        let noninteractive_key = format!("{}_NONINTERACTIVE", program_env_prefix(program));
        let noninteractive = lookup(&noninteractive_key).unwrap_or_else(|| "1".to_string());

        vec![
            ("TERM".to_string(), term),
            ("NO_COLOR".to_string(), no_color.to_string()),
            ("CLICOLOR".to_string(), clicolor.to_string()),
            (
                "CI".to_string(),
                lookup("CI").unwrap_or_else(|| "1".to_string()),
            ),
            (noninteractive_key, noninteractive),
        ]
    }
}

/// Upper-cased basename of a program path with non-alphanumerics mapped to `_`.
fn program_env_prefix(program: &str) -> String {
    let base = program.rsplit('/').next().unwrap_or(program);
    base.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

impl fmt::Display for ExecutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Direct => "direct",
            Self::EmbeddedPty { inject: false } => "pty",
            Self::EmbeddedPty { inject: true } => "pty-inject",
            Self::ExternalPtyWrapper { inject: false } => "script",
            Self::ExternalPtyWrapper { inject: true } => "script-inject",
        };
        f.write_str(name)
    }
}

impl FromStr for ExecutionStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "direct" => Ok(Self::Direct),
            "pty" => Ok(Self::EmbeddedPty { inject: false }),
            "pty-inject" => Ok(Self::EmbeddedPty { inject: true }),
            "script" => Ok(Self::ExternalPtyWrapper { inject: false }),
            "script-inject" => Ok(Self::ExternalPtyWrapper { inject: true }),
            other => Err(Error::UnknownStrategy(other.to_string())),
        }
    }
}

/// One request to drive the wrapped program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationRequest {
    pub prompt: String,
    pub provider: String,
    pub forced_strategy: Option<ExecutionStrategy>,
    pub timeout: Duration,
}

impl InvocationRequest {
    /// Creates a request with no forced strategy and the default timeout.
    pub fn new(prompt: impl Into<String>, provider: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            provider: provider.into(),
            forced_strategy: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Pins the request to a single strategy, bypassing escalation.
    pub fn with_strategy(mut self, strategy: ExecutionStrategy) -> Self {
        self.forced_strategy = Some(strategy);
        self
    }

    /// Overrides the per-attempt deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Captured outcome of one attempt. Never mutated after construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationResult {
    /// Exit code, `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
    /// Whether the attempt hit its deadline and was killed.
    pub timed_out: bool,
}

impl InvocationResult {
    /// Whether the process exited on its own with code 0.
    pub fn exited_cleanly(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }

    /// True when neither stream carried any text.
    pub fn is_silent(&self) -> bool {
        self.stdout.trim().is_empty() && self.stderr.trim().is_empty()
    }
}

/// Classification of an attempt's result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationOutcome {
    Success,
    /// Zero exit, empty output, no error marker.
    BenignWarning,
    /// The program needs a real terminal.
    TerminalIncompatibility,
    GenericError,
    Timeout,
}

impl ClassificationOutcome {
    /// Whether escalation stops on this outcome.
    pub fn is_accepted(self) -> bool {
        matches!(self, Self::Success | Self::BenignWarning)
    }
}

impl fmt::Display for ClassificationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Success => "success",
            Self::BenignWarning => "benign_warning",
            Self::TerminalIncompatibility => "terminal_incompatibility",
            Self::GenericError => "generic_error",
            Self::Timeout => "timeout",
        };
        f.write_str(name)
    }
}
