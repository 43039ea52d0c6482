//! Provider routing and context priming.

use crate::classifier::ResponseClassifier;
use crate::error::InvokeError;
use crate::escalation::{AttemptRunner, CliAttemptRunner, EscalationController};
use crate::process_invoker::{ProcessCommand, ProcessInvoker};
use async_trait::async_trait;
use lattice_core::{LatticeConfig, SecondaryCliConfig};
use lattice_proto::{DEFAULT_TIMEOUT, Error, InvocationRequest, Responder};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

const SECONDARY_MOCK_CHARS: usize = 140;
const MOCK_CHARS: usize = 160;

/// A parsed provider id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Provider {
    /// `codex`, driven through the escalation chain.
    PrimaryCli,
    /// `gemini`, `google` or `vertex`.
    SecondaryCli,
    /// `mock` or `dummy`; keeps the id as given (lower-cased) for its tag.
    Mock(String),
}

impl FromStr for Provider {
    type Err = Error;

    /// Case-insensitive. An empty id means the primary CLI.
    fn from_str(id: &str) -> Result<Self, Self::Err> {
        let id = id.trim().to_ascii_lowercase();
        match id.as_str() {
            "" | "codex" => Ok(Provider::PrimaryCli),
            "gemini" | "google" | "vertex" => Ok(Provider::SecondaryCli),
            "mock" | "dummy" => Ok(Provider::Mock(id)),
            _ => Err(Error::UnknownProvider(id)),
        }
    }
}

/// The context-primed prompt: role line, pretty JSON context, task
/// instructions, then the task itself.
pub fn prime_prompt(prompt: &str, context: &serde_json::Value) -> String {
    let context =
        serde_json::to_string_pretty(context).unwrap_or_else(|_| context.to_string());
    format!(
        "You are a brand agent. Here is the brand's identity context:\n\n{context}\n\nNow complete the following task with this tone, structure, and memory:\n\n{prompt}\n"
    )
}

fn preview(text: &str, chars: usize) -> String {
    text.chars().take(chars).collect()
}

/// Routes prompts to the configured providers.
pub struct ProviderAdapter<R = CliAttemptRunner> {
    primary: EscalationController<R>,
    primary_timeout: Duration,
    secondary: SecondaryCliConfig,
}

impl ProviderAdapter<CliAttemptRunner> {
    /// Adapter driving the real CLIs described by `config`.
    pub fn from_config(config: &LatticeConfig) -> Self {
        let primary = EscalationController::new(
            CliAttemptRunner::from_config(&config.primary),
            ResponseClassifier::new(&config.primary.label)
                .with_markers(config.primary.error_markers.iter().cloned()),
            config.primary.strategy_chain(),
            config.primary.label.clone(),
        );
        Self::new(primary, config.secondary.clone()).with_primary_timeout(config.primary.timeout())
    }
}

impl<R: AttemptRunner> ProviderAdapter<R> {
    pub fn new(primary: EscalationController<R>, secondary: SecondaryCliConfig) -> Self {
        Self {
            primary,
            primary_timeout: DEFAULT_TIMEOUT,
            secondary,
        }
    }

    /// Per-attempt deadline for primary CLI requests.
    pub fn with_primary_timeout(mut self, timeout: Duration) -> Self {
        self.primary_timeout = timeout;
        self
    }

    pub fn primary(&self) -> &EscalationController<R> {
        &self.primary
    }

    /// Responds through a parsed provider.
    pub async fn respond_with(
        &self,
        provider: &Provider,
        prompt: &str,
        context: &serde_json::Value,
    ) -> String {
        match provider {
            Provider::PrimaryCli => {
                let request = InvocationRequest::new(prime_prompt(prompt, context), "codex")
                    .with_timeout(self.primary_timeout);
                self.primary.invoke(&request).await
            }
            Provider::SecondaryCli => self.run_secondary(&prime_prompt(prompt, context)).await,
            Provider::Mock(id) => format!(
                "[MOCK/{}] {}…",
                id.to_ascii_uppercase(),
                preview(prompt, MOCK_CHARS)
            ),
        }
    }

    /// Argument mode, then stdin mode (or the reverse when configured).
    async fn run_secondary(&self, primed: &str) -> String {
        let cfg = &self.secondary;
        if cfg.mock {
            return format!("[S2/GEMINI MOCK] {}…", preview(primed, SECONDARY_MOCK_CHARS));
        }

        let invoker = ProcessInvoker::new(cfg.timeout());
        let base = ProcessCommand::new(&cfg.command)
            .args(cfg.args.iter().cloned())
            .envs(secondary_env(|key| std::env::var(key).ok()));
        let by_arg = base.clone().arg(primed);
        let by_stdin = base.stdin(primed.as_bytes().to_vec());
        let modes = if cfg.stdin_mode {
            [("stdin", by_stdin), ("arg", by_arg)]
        } else {
            [("arg", by_arg), ("stdin", by_stdin)]
        };

        let tag = format!("[{}_ERROR]", cfg.label.to_ascii_uppercase());
        // The last error any mode printed wins over a message for a silent failure.
        let mut printed_error: Option<String> = None;
        let mut fallback_error: Option<String> = None;

        for (mode, command) in modes {
            debug!(command = %cfg.command, mode, "Invoking secondary CLI");
            match invoker.execute(&command).await {
                Ok(result) if result.exited_cleanly() && !result.stdout.is_empty() => {
                    return result.stdout;
                }
                Ok(result) if result.exited_cleanly() => {
                    debug!(mode, "Secondary CLI returned no output");
                }
                Ok(result) => {
                    warn!(mode, exit_code = ?result.exit_code, "Secondary CLI failed");
                    match [result.stderr.trim(), result.stdout.trim()]
                        .into_iter()
                        .find(|s| !s.is_empty())
                    {
                        Some(text) => printed_error = Some(text.to_string()),
                        None => {
                            fallback_error = Some(format!("{} returned non-zero exit", cfg.label));
                        }
                    }
                }
                Err(InvokeError::Timeout { .. }) => {
                    warn!(mode, "Secondary CLI timed out");
                    fallback_error = Some(format!("Timeout while waiting for {}.", cfg.label));
                }
                Err(e) => {
                    warn!(mode, error = %e, "Secondary CLI could not run");
                    printed_error = Some(e.to_string());
                }
            }
        }

        match printed_error.or(fallback_error) {
            Some(error) => format!("{tag} {error}"),
            None => format!("[WARN] {} returned empty output", cfg.label),
        }
    }
}

/// Keeps color and interactivity off unless the caller set them.
fn secondary_env<F>(lookup: F) -> Vec<(String, String)>
where
    F: Fn(&str) -> Option<String>,
{
    [
        ("TERM", "xterm-256color"),
        ("CI", "1"),
        ("NO_COLOR", "1"),
        ("CLICOLOR", "0"),
    ]
    .into_iter()
    .map(|(key, default)| {
        (
            key.to_string(),
            lookup(key).unwrap_or_else(|| default.to_string()),
        )
    })
    .collect()
}

#[async_trait]
impl<R: AttemptRunner> Responder for ProviderAdapter<R> {
    async fn respond(&self, provider: &str, prompt: &str, context: &serde_json::Value) -> String {
        match provider.parse::<Provider>() {
            Ok(parsed) => self.respond_with(&parsed, prompt, context).await,
            Err(e) => {
                warn!(provider, "Unknown provider");
                e.to_boundary_text()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_proto::{ExecutionStrategy, InvocationResult};
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Echoes the prompt it was given as a successful attempt.
    #[derive(Default)]
    struct EchoRunner {
        prompts: Mutex<Vec<String>>,
        timeouts: Mutex<Vec<Duration>>,
    }

    #[async_trait]
    impl AttemptRunner for EchoRunner {
        async fn run(
            &self,
            _strategy: ExecutionStrategy,
            request: &InvocationRequest,
        ) -> Result<InvocationResult, InvokeError> {
            self.prompts.lock().unwrap().push(request.prompt.clone());
            self.timeouts.lock().unwrap().push(request.timeout);
            Ok(InvocationResult {
                exit_code: Some(0),
                stdout: "primary answer".to_string(),
                stderr: String::new(),
                elapsed: Duration::from_millis(1),
                timed_out: false,
            })
        }
    }

    fn adapter(secondary: SecondaryCliConfig) -> ProviderAdapter<EchoRunner> {
        ProviderAdapter::new(
            EscalationController::new(
                EchoRunner::default(),
                ResponseClassifier::new("Codex"),
                ExecutionStrategy::default_chain(),
                "Codex",
            ),
            secondary,
        )
    }

    fn sh_secondary(script: &str) -> SecondaryCliConfig {
        SecondaryCliConfig {
            command: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string(), "secondary".to_string()],
            timeout_secs: 10,
            ..SecondaryCliConfig::default()
        }
    }

    #[test]
    fn test_provider_parsing() {
        assert_eq!("codex".parse::<Provider>().unwrap(), Provider::PrimaryCli);
        assert_eq!("".parse::<Provider>().unwrap(), Provider::PrimaryCli);
        assert_eq!("CODEX".parse::<Provider>().unwrap(), Provider::PrimaryCli);
        for alias in ["gemini", "Google", "vertex"] {
            assert_eq!(alias.parse::<Provider>().unwrap(), Provider::SecondaryCli);
        }
        assert_eq!(
            "Dummy".parse::<Provider>().unwrap(),
            Provider::Mock("dummy".to_string())
        );
        assert_eq!(
            "claude".parse::<Provider>(),
            Err(Error::UnknownProvider("claude".to_string()))
        );
    }

    #[test]
    fn test_priming_order() {
        let primed = prime_prompt("Write a tagline", &json!({"name": "Acme"}));
        let role = primed.find("You are a brand agent").unwrap();
        let ctx = primed.find("\"name\": \"Acme\"").unwrap();
        let task = primed.find("Now complete the following task").unwrap();
        let prompt = primed.find("Write a tagline").unwrap();
        assert!(role < ctx && ctx < task && task < prompt);
        assert!(primed.ends_with("Write a tagline\n"));
    }

    #[tokio::test]
    async fn test_unknown_provider_text() {
        let out = adapter(SecondaryCliConfig::default())
            .respond("claude", "x", &json!({}))
            .await;
        assert_eq!(out, "[LLM_ERROR] Unknown provider 'claude'.");
    }

    #[tokio::test]
    async fn test_mock_is_deterministic_and_unprimed() {
        let adapter = adapter(SecondaryCliConfig::default());
        let long = "y".repeat(300);
        let out = adapter.respond("mock", &long, &json!({"a": 1})).await;
        assert_eq!(out, format!("[MOCK/MOCK] {}…", "y".repeat(160)));
        assert_eq!(out, adapter.respond("MOCK", &long, &json!({})).await);
        assert_eq!(adapter.primary().chain().len(), 4);
    }

    #[tokio::test]
    async fn test_primary_receives_primed_prompt() {
        let adapter = adapter(SecondaryCliConfig::default());
        let out = adapter.respond("codex", "Spring campaign", &json!({"tone": "warm"})).await;
        assert_eq!(out, "primary answer");
        let prompts = adapter.primary().runner_prompts();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].starts_with("You are a brand agent."));
        assert!(prompts[0].contains("\"tone\": \"warm\""));
    }

    #[tokio::test]
    async fn test_primary_uses_configured_timeout() {
        let adapter = adapter(SecondaryCliConfig::default())
            .with_primary_timeout(Duration::from_secs(12));
        adapter.respond("codex", "x", &json!({})).await;
        assert_eq!(
            *adapter.primary().runner().timeouts.lock().unwrap(),
            vec![Duration::from_secs(12)]
        );
    }

    #[tokio::test]
    async fn test_secondary_mock() {
        let secondary = SecondaryCliConfig {
            mock: true,
            ..SecondaryCliConfig::default()
        };
        let out = adapter(secondary).respond("gemini", "task", &json!({})).await;
        assert!(out.starts_with("[S2/GEMINI MOCK] You are a brand agent."));
        assert!(out.ends_with('…'));
        assert_eq!(out.chars().count(), "[S2/GEMINI MOCK] ".chars().count() + 140 + 1);
    }

    #[tokio::test]
    async fn test_secondary_arg_mode() {
        let out = adapter(sh_secondary("echo \"got ${#1} chars\""))
            .respond("gemini", "hello", &json!({}))
            .await;
        assert!(out.starts_with("got "), "unexpected: {out}");
    }

    #[tokio::test]
    async fn test_secondary_falls_back_to_stdin() {
        // Fails when given an argument, echoes stdin otherwise.
        let script = "if [ $# -gt 0 ]; then echo 'no args please' >&2; exit 2; fi; grep -o 'stdin task'";
        let out = adapter(sh_secondary(script))
            .respond("google", "stdin task", &json!({}))
            .await;
        assert_eq!(out, "stdin task");
    }

    #[tokio::test]
    async fn test_secondary_error_tag() {
        let out = adapter(sh_secondary("echo broken >&2; exit 1"))
            .respond("vertex", "x", &json!({}))
            .await;
        assert_eq!(out, "[GEMINI_ERROR] broken");
    }

    #[tokio::test]
    async fn test_secondary_keeps_printed_error_over_silent_failure() {
        // Prints its error in argument mode, fails silently on stdin.
        let script = "if [ $# -gt 0 ]; then echo 'quota exceeded' >&2; fi; cat >/dev/null; exit 3";
        let out = adapter(sh_secondary(script))
            .respond("gemini", "x", &json!({}))
            .await;
        assert_eq!(out, "[GEMINI_ERROR] quota exceeded");
    }

    #[tokio::test]
    async fn test_secondary_empty_output() {
        let out = adapter(sh_secondary("cat >/dev/null; exit 0"))
            .respond("gemini", "x", &json!({}))
            .await;
        assert_eq!(out, "[WARN] Gemini returned empty output");
    }

    impl EscalationController<EchoRunner> {
        fn runner_prompts(&self) -> Vec<String> {
            self.runner().prompts.lock().unwrap().clone()
        }
    }
}
