//! Ordered strategy retry for the primary CLI.
//!
//! Strategies run one at a time, most conservative first, and the first
//! accepted attempt ends the run. Every failure mode becomes text at this
//! boundary; callers never see an error type.

use crate::classifier::ResponseClassifier;
use crate::error::InvokeError;
use crate::process_invoker::{ProcessCommand, ProcessInvoker};
use crate::pty_driver::PtyDriver;
use crate::script_wrapper::ScriptWrapper;
use async_trait::async_trait;
use lattice_core::PrimaryCliConfig;
use lattice_proto::{ClassificationOutcome, ExecutionStrategy, InvocationRequest, InvocationResult};
use serde::Serialize;
use tracing::{debug, info, warn};

/// Runs one attempt with one strategy, bounded by the request's timeout.
#[async_trait]
pub trait AttemptRunner: Send + Sync {
    async fn run(
        &self,
        strategy: ExecutionStrategy,
        request: &InvocationRequest,
    ) -> Result<InvocationResult, InvokeError>;
}

/// One attempt in the diagnostic log.
#[derive(Debug, Clone, Serialize)]
pub struct AttemptRecord {
    pub strategy: ExecutionStrategy,
    pub result: InvocationResult,
    pub outcome: ClassificationOutcome,
}

/// Final text of an escalation plus every attempt that led to it.
#[derive(Debug, Clone, Serialize)]
pub struct Escalation {
    pub text: String,
    pub attempts: Vec<AttemptRecord>,
}

impl Escalation {
    /// The attempt whose result was returned, if any was accepted.
    pub fn accepted(&self) -> Option<&AttemptRecord> {
        self.attempts.last().filter(|a| a.outcome.is_accepted())
    }
}

/// Drives the strategy chain for one program.
pub struct EscalationController<R> {
    runner: R,
    classifier: ResponseClassifier,
    chain: Vec<ExecutionStrategy>,
    label: String,
}

impl<R: AttemptRunner> EscalationController<R> {
    pub fn new(
        runner: R,
        classifier: ResponseClassifier,
        chain: Vec<ExecutionStrategy>,
        label: impl Into<String>,
    ) -> Self {
        Self {
            runner,
            classifier,
            chain,
            label: label.into(),
        }
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    pub fn chain(&self) -> &[ExecutionStrategy] {
        &self.chain
    }

    /// Returns the accepted output or tagged error text. Never fails.
    pub async fn invoke(&self, request: &InvocationRequest) -> String {
        self.invoke_detailed(request).await.text
    }

    /// Like [`invoke`](Self::invoke), keeping the attempt log.
    ///
    /// A forced strategy is the whole chain. A first attempt that exits
    /// cleanly without any output on either stream earns exactly one more
    /// attempt; only a `Success` there beats the empty-output marker.
    ///
    /// When every attempt fails, the reported text is the last error any
    /// attempt actually printed. A message for the final outcome is used
    /// only when no failing attempt printed anything.
    pub async fn invoke_detailed(&self, request: &InvocationRequest) -> Escalation {
        let strategies = match request.forced_strategy {
            Some(strategy) => vec![strategy],
            None => self.chain.clone(),
        };

        let mut attempts: Vec<AttemptRecord> = Vec::with_capacity(strategies.len());
        let mut printed_error: Option<String> = None;
        let mut fallback_error: Option<String> = None;
        let mut silent_retry = false;

        for (index, strategy) in strategies.iter().copied().enumerate() {
            debug!(
                attempt = index + 1,
                %strategy,
                provider = %request.provider,
                timeout_ms = request.timeout.as_millis() as u64,
                "Starting attempt"
            );
            let result = match self.runner.run(strategy, request).await {
                Ok(result) => result,
                Err(e) => {
                    warn!(%strategy, error = %e, "Attempt failed to run");
                    e.into_result()
                }
            };
            let outcome = self.classifier.classify(&result);
            info!(
                %strategy,
                %outcome,
                exit_code = ?result.exit_code,
                elapsed_ms = result.elapsed.as_millis() as u64,
                "Attempt classified"
            );

            if !outcome.is_accepted() {
                if let Some(text) = self.printed_error(&result, outcome) {
                    printed_error = Some(text);
                }
                fallback_error = Some(self.outcome_message(outcome));
            }
            let silent = result.is_silent();
            let stdout = result.stdout.clone();
            attempts.push(AttemptRecord {
                strategy,
                result,
                outcome,
            });

            if silent_retry {
                let text = if outcome == ClassificationOutcome::Success {
                    stdout
                } else {
                    self.empty_marker()
                };
                return Escalation { text, attempts };
            }

            match outcome {
                ClassificationOutcome::Success => {
                    return Escalation {
                        text: stdout,
                        attempts,
                    };
                }
                ClassificationOutcome::BenignWarning => {
                    if index == 0 && silent && strategies.len() > 1 {
                        debug!(%strategy, "First attempt was silent, trying one more");
                        silent_retry = true;
                        continue;
                    }
                    return Escalation {
                        text: self.empty_marker(),
                        attempts,
                    };
                }
                ClassificationOutcome::TerminalIncompatibility
                | ClassificationOutcome::GenericError
                | ClassificationOutcome::Timeout => {}
            }
        }

        let message = printed_error
            .or(fallback_error)
            .unwrap_or_else(|| self.outcome_message(ClassificationOutcome::GenericError));
        warn!(label = %self.label, attempts = attempts.len(), "All strategies failed");
        Escalation {
            text: format!("[{}_ERROR] {}", self.label.to_ascii_uppercase(), message),
            attempts,
        }
    }

    fn empty_marker(&self) -> String {
        format!("[WARN] {} returned empty output", self.label)
    }

    /// stderr, else stdout. Partial output of a timed-out attempt is not an error.
    fn printed_error(&self, result: &InvocationResult, outcome: ClassificationOutcome) -> Option<String> {
        if outcome == ClassificationOutcome::Timeout {
            return None;
        }
        let stderr = self
            .classifier
            .effective_stderr(result.exit_code, &result.stderr)
            .trim();
        [stderr, result.stdout.trim()]
            .into_iter()
            .find(|s| !s.is_empty())
            .map(str::to_string)
    }

    fn outcome_message(&self, outcome: ClassificationOutcome) -> String {
        match outcome {
            ClassificationOutcome::Timeout => format!("Timeout while waiting for {}.", self.label),
            _ => format!("{} returned non-zero exit", self.label),
        }
    }
}

/// Runs real attempts against the primary CLI.
#[derive(Debug, Clone)]
pub struct CliAttemptRunner {
    program: String,
    args: Vec<String>,
    wrapper: ScriptWrapper,
}

impl CliAttemptRunner {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            wrapper: ScriptWrapper::default(),
        }
    }

    pub fn from_config(config: &PrimaryCliConfig) -> Self {
        Self::new(&config.command, config.args.clone())
            .with_wrapper(ScriptWrapper::new(&config.wrapper_command))
    }

    pub fn with_wrapper(mut self, wrapper: ScriptWrapper) -> Self {
        self.wrapper = wrapper;
        self
    }

    fn argv(&self, prompt: &str) -> Vec<String> {
        let mut argv = self.args.clone();
        argv.push(prompt.to_string());
        argv
    }
}

#[async_trait]
impl AttemptRunner for CliAttemptRunner {
    async fn run(
        &self,
        strategy: ExecutionStrategy,
        request: &InvocationRequest,
    ) -> Result<InvocationResult, InvokeError> {
        let env = strategy.env_overrides(&self.program);
        let prompt = request.prompt.as_str();
        match strategy {
            ExecutionStrategy::Direct => {
                let command = ProcessCommand::new(&self.program)
                    .args(self.argv(prompt))
                    .envs(env);
                ProcessInvoker::new(request.timeout).execute(&command).await
            }
            ExecutionStrategy::EmbeddedPty { inject } => {
                let outcome = PtyDriver::new(request.timeout)
                    .inject(inject)
                    .run(&self.program, &self.argv(prompt), &env)
                    .await?;
                debug!(end = ?outcome.end, queries = outcome.queries_answered, "PTY attempt ended");
                Ok(outcome.result)
            }
            ExecutionStrategy::ExternalPtyWrapper { inject } => {
                self.wrapper
                    .run(
                        &ProcessInvoker::new(request.timeout),
                        &self.program,
                        &self.args,
                        prompt,
                        inject,
                        env,
                    )
                    .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    enum Step {
        Ok(Option<i32>, &'static str, &'static str),
        TimedOut(&'static str),
        SpawnFails,
    }

    /// Replays one step per strategy and records the order of calls.
    struct ScriptedRunner {
        steps: HashMap<ExecutionStrategy, Step>,
        calls: Mutex<Vec<ExecutionStrategy>>,
        timeouts: Mutex<Vec<Duration>>,
    }

    impl ScriptedRunner {
        fn new(steps: Vec<(ExecutionStrategy, Step)>) -> Self {
            Self {
                steps: steps.into_iter().collect(),
                calls: Mutex::new(Vec::new()),
                timeouts: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<ExecutionStrategy> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl AttemptRunner for ScriptedRunner {
        async fn run(
            &self,
            strategy: ExecutionStrategy,
            request: &InvocationRequest,
        ) -> Result<InvocationResult, InvokeError> {
            self.calls.lock().unwrap().push(strategy);
            self.timeouts.lock().unwrap().push(request.timeout);
            let result = |exit_code, stdout: &str, stderr: &str, timed_out| InvocationResult {
                exit_code,
                stdout: stdout.to_string(),
                stderr: stderr.to_string(),
                elapsed: Duration::from_millis(1),
                timed_out,
            };
            match self.steps.get(&strategy) {
                Some(Step::Ok(code, out, err)) => Ok(result(*code, out, err, false)),
                Some(Step::TimedOut(out)) => Err(InvokeError::Timeout {
                    after: Duration::from_secs(1),
                    partial: Box::new(result(None, out, "", true)),
                }),
                Some(Step::SpawnFails) | None => Err(InvokeError::Spawn {
                    program: "codex".to_string(),
                    source: std::io::Error::from(std::io::ErrorKind::NotFound),
                }),
            }
        }
    }

    const DIRECT: ExecutionStrategy = ExecutionStrategy::Direct;
    const PTY: ExecutionStrategy = ExecutionStrategy::EmbeddedPty { inject: false };
    const PTY_INJECT: ExecutionStrategy = ExecutionStrategy::EmbeddedPty { inject: true };
    const SCRIPT_INJECT: ExecutionStrategy = ExecutionStrategy::ExternalPtyWrapper { inject: true };

    fn controller(steps: Vec<(ExecutionStrategy, Step)>) -> EscalationController<ScriptedRunner> {
        EscalationController::new(
            ScriptedRunner::new(steps),
            ResponseClassifier::new("Codex"),
            ExecutionStrategy::default_chain(),
            "Codex",
        )
    }

    fn request() -> InvocationRequest {
        InvocationRequest::new("p", "codex")
    }

    const CURSOR_ERR: Step = Step::Ok(Some(1), "", "Error: The cursor position could not be read");

    #[tokio::test]
    async fn test_first_success_stops_chain() {
        let c = controller(vec![(DIRECT, Step::Ok(Some(0), "Hello", ""))]);
        let out = c.invoke_detailed(&request()).await;
        assert_eq!(out.text, "Hello");
        assert_eq!(c.runner.calls(), vec![DIRECT]);
        assert_eq!(out.accepted().map(|a| a.strategy), Some(DIRECT));
    }

    #[tokio::test]
    async fn test_escalates_through_terminal_errors() {
        let c = controller(vec![
            (DIRECT, CURSOR_ERR),
            (PTY, CURSOR_ERR),
            (PTY_INJECT, Step::Ok(Some(0), "Hello", "")),
        ]);
        let out = c.invoke_detailed(&request()).await;
        assert_eq!(out.text, "Hello");
        assert_eq!(c.runner.calls(), vec![DIRECT, PTY, PTY_INJECT]);
        let outcomes: Vec<_> = out.attempts.iter().map(|a| a.outcome).collect();
        assert_eq!(
            outcomes,
            vec![
                ClassificationOutcome::TerminalIncompatibility,
                ClassificationOutcome::TerminalIncompatibility,
                ClassificationOutcome::Success
            ]
        );
    }

    #[tokio::test]
    async fn test_exhaustion_reports_last_error() {
        let c = controller(vec![
            (DIRECT, CURSOR_ERR),
            (PTY, CURSOR_ERR),
            (PTY_INJECT, CURSOR_ERR),
            (SCRIPT_INJECT, Step::Ok(Some(2), "", "script: not found")),
        ]);
        let out = c.invoke(&request()).await;
        assert_eq!(out, "[CODEX_ERROR] script: not found");
        assert_eq!(c.runner.calls().len(), 4);
    }

    #[tokio::test]
    async fn test_timeout_message() {
        let c = EscalationController::new(
            ScriptedRunner::new(vec![(DIRECT, Step::TimedOut("half an answer"))]),
            ResponseClassifier::new("Codex"),
            vec![DIRECT],
            "Codex",
        );
        assert_eq!(
            c.invoke(&request()).await,
            "[CODEX_ERROR] Timeout while waiting for Codex."
        );
    }

    #[tokio::test]
    async fn test_spawn_failure_escalates() {
        let c = controller(vec![
            (DIRECT, Step::SpawnFails),
            (PTY, Step::Ok(Some(0), "from pty", "")),
        ]);
        let out = c.invoke_detailed(&request()).await;
        assert_eq!(out.text, "from pty");
        assert_eq!(out.attempts[0].outcome, ClassificationOutcome::GenericError);
        assert!(out.attempts[0].result.stderr.contains("Failed to start 'codex'"));
    }

    #[tokio::test]
    async fn test_forced_strategy_runs_alone() {
        let c = controller(vec![(PTY_INJECT, CURSOR_ERR)]);
        let out = c.invoke(&request().with_strategy(PTY_INJECT)).await;
        assert_eq!(
            out,
            "[CODEX_ERROR] Error: The cursor position could not be read"
        );
        assert_eq!(c.runner.calls(), vec![PTY_INJECT]);
    }

    #[tokio::test]
    async fn test_silent_first_attempt_gets_one_retry() {
        let c = controller(vec![
            (DIRECT, Step::Ok(Some(0), "", "")),
            (PTY, Step::Ok(Some(0), "late answer", "")),
        ]);
        assert_eq!(c.invoke(&request()).await, "late answer");
        assert_eq!(c.runner.calls(), vec![DIRECT, PTY]);
    }

    #[tokio::test]
    async fn test_silent_retry_failure_returns_empty_marker() {
        let c = controller(vec![(DIRECT, Step::Ok(Some(0), "", "")), (PTY, CURSOR_ERR)]);
        assert_eq!(
            c.invoke(&request()).await,
            "[WARN] Codex returned empty output"
        );
        assert_eq!(c.runner.calls(), vec![DIRECT, PTY]);
    }

    #[tokio::test]
    async fn test_benign_after_notice_is_accepted() {
        let c = controller(vec![(
            DIRECT,
            Step::Ok(Some(0), "", "Update available! Run brew upgrade codex"),
        )]);
        let out = c.invoke_detailed(&request()).await;
        assert_eq!(out.text, "[WARN] Codex returned empty output");
        assert_eq!(c.runner.calls(), vec![DIRECT]);
    }

    #[tokio::test]
    async fn test_forced_silent_attempt_is_not_retried() {
        let c = controller(vec![(DIRECT, Step::Ok(Some(0), "", ""))]);
        assert_eq!(
            c.invoke(&request().with_strategy(DIRECT)).await,
            "[WARN] Codex returned empty output"
        );
        assert_eq!(c.runner.calls(), vec![DIRECT]);
    }

    #[tokio::test]
    async fn test_error_falls_back_to_stdout() {
        let c = EscalationController::new(
            ScriptedRunner::new(vec![(DIRECT, Step::Ok(Some(1), "bad flag", ""))]),
            ResponseClassifier::new("Codex"),
            vec![DIRECT],
            "Codex",
        );
        assert_eq!(c.invoke(&request()).await, "[CODEX_ERROR] bad flag");
    }

    #[tokio::test]
    async fn test_exhaustion_keeps_printed_error_over_silent_failures() {
        let c = controller(vec![
            (DIRECT, CURSOR_ERR),
            (PTY, Step::Ok(Some(1), "", "")),
            (PTY_INJECT, Step::Ok(Some(1), "", "")),
            (SCRIPT_INJECT, Step::Ok(Some(1), "", "")),
        ]);
        assert_eq!(
            c.invoke(&request()).await,
            "[CODEX_ERROR] Error: The cursor position could not be read"
        );
    }

    #[tokio::test]
    async fn test_exhaustion_keeps_printed_error_over_final_timeout() {
        let c = controller(vec![
            (DIRECT, CURSOR_ERR),
            (PTY, CURSOR_ERR),
            (PTY_INJECT, CURSOR_ERR),
            (SCRIPT_INJECT, Step::TimedOut("")),
        ]);
        let out = c.invoke(&request()).await;
        assert!(out.contains("cursor position could not be read"), "unexpected: {out}");
    }

    #[tokio::test]
    async fn test_silent_failures_use_outcome_message() {
        let c = controller(vec![
            (DIRECT, Step::Ok(Some(1), "", "")),
            (PTY, Step::Ok(Some(1), "", "")),
            (PTY_INJECT, Step::Ok(Some(1), "", "")),
            (SCRIPT_INJECT, Step::TimedOut("")),
        ]);
        assert_eq!(
            c.invoke(&request()).await,
            "[CODEX_ERROR] Timeout while waiting for Codex."
        );
    }

    #[tokio::test]
    async fn test_request_timeout_reaches_every_attempt() {
        let c = controller(vec![(DIRECT, CURSOR_ERR), (PTY, Step::Ok(Some(0), "ok", ""))]);
        let out = c
            .invoke(&request().with_timeout(Duration::from_secs(7)))
            .await;
        assert_eq!(out, "ok");
        assert_eq!(
            *c.runner.timeouts.lock().unwrap(),
            vec![Duration::from_secs(7), Duration::from_secs(7)]
        );
    }
}
