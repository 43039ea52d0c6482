//! Judges a single attempt's result.

use lattice_proto::{ClassificationOutcome, InvocationResult};
use regex::Regex;
use std::sync::OnceLock;

static NOTICE_LINE: OnceLock<Option<Regex>> = OnceLock::new();

/// Lines a CLI prints about its own upgrades.
fn notice_line() -> Option<&'static Regex> {
    NOTICE_LINE
        .get_or_init(|| {
            Regex::new(
                r"(?i)(update available|new version|upgrade available|npm (i|install) -g|brew upgrade)",
            )
            .ok()
        })
        .as_ref()
}

const DEFAULT_MARKERS: [&str; 3] = ["could not be read", "not a terminal", "not a tty"];
const TERMINAL_VOCABULARY: [&str; 4] = ["cursor", "tty", "terminal", "pty"];

/// Maps exit code and output to a [`ClassificationOutcome`].
#[derive(Debug, Clone)]
pub struct ResponseClassifier {
    markers: Vec<String>,
}

impl ResponseClassifier {
    /// Classifier for a program whose own error tag is `[<label>_error]`.
    pub fn new(label: &str) -> Self {
        let mut markers = vec![format!("[{}_error]", label.to_ascii_lowercase())];
        markers.extend(DEFAULT_MARKERS.iter().map(|m| (*m).to_string()));
        Self { markers }
    }

    /// Adds markers; matching is case-insensitive.
    pub fn with_markers<I, S>(mut self, markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.markers.extend(
            markers
                .into_iter()
                .map(|m| m.into().to_ascii_lowercase())
                .filter(|m| !m.is_empty()),
        );
        self
    }

    /// Classifies a result. Timed-out results are always [`ClassificationOutcome::Timeout`].
    pub fn classify(&self, result: &InvocationResult) -> ClassificationOutcome {
        if result.timed_out {
            return ClassificationOutcome::Timeout;
        }
        self.classify_parts(result.exit_code, &result.stdout, &result.stderr)
    }

    /// Rules, first match wins:
    /// 1. stderr made only of upgrade notices is dropped when the exit is 0
    /// 2. an error marker means `TerminalIncompatibility` if terminal
    ///    vocabulary is also present, else `GenericError`
    /// 3. exit 0 with stdout is `Success`
    /// 4. exit 0 without stdout is `BenignWarning`
    /// 5. anything else is `GenericError`
    pub fn classify_parts(
        &self,
        exit_code: Option<i32>,
        stdout: &str,
        stderr: &str,
    ) -> ClassificationOutcome {
        let stderr = self.effective_stderr(exit_code, stderr);
        let combined = format!("{stdout}\n{stderr}").to_lowercase();

        if self.markers.iter().any(|m| combined.contains(m.as_str())) {
            return if has_terminal_word(&combined) {
                ClassificationOutcome::TerminalIncompatibility
            } else {
                ClassificationOutcome::GenericError
            };
        }

        match exit_code {
            Some(0) if !stdout.trim().is_empty() => ClassificationOutcome::Success,
            Some(0) => ClassificationOutcome::BenignWarning,
            _ => ClassificationOutcome::GenericError,
        }
    }

    /// `stderr` with upgrade-notice-only content removed on a clean exit.
    pub fn effective_stderr<'a>(&self, exit_code: Option<i32>, stderr: &'a str) -> &'a str {
        if exit_code == Some(0) && is_notice_only(stderr) {
            ""
        } else {
            stderr
        }
    }
}

/// Whole-word match, so "empty" does not count as "pty".
fn has_terminal_word(text: &str) -> bool {
    text.split(|c: char| !c.is_ascii_alphanumeric())
        .any(|word| TERMINAL_VOCABULARY.contains(&word))
}

fn is_notice_only(stderr: &str) -> bool {
    let Some(notice) = notice_line() else {
        return false;
    };
    let mut lines = stderr.lines().filter(|l| !l.trim().is_empty()).peekable();
    lines.peek().is_some() && lines.all(|l| notice.is_match(l))
}
