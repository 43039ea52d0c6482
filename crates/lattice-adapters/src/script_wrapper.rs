//! Pseudo-terminal through the external `script(1)` utility.
//!
//! Used when an in-process pty is unavailable or disabled. The program runs
//! inside a shell command line handed to `script`, so the prompt is quoted
//! exactly once.

use crate::error::InvokeError;
use crate::process_invoker::{ProcessCommand, ProcessInvoker};
use crate::pty_driver::clean_pty_output;
use lattice_proto::InvocationResult;
use std::io;
use tracing::debug;

/// Shell prefix that feeds a cursor reply into the program's stdin.
const REPLY_PREFIX: &str = r"printf '\033[1;1R' | ";

/// Builds and runs `script` invocations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptWrapper {
    wrapper: String,
}

impl Default for ScriptWrapper {
    fn default() -> Self {
        Self::new("script")
    }
}

impl ScriptWrapper {
    pub fn new(wrapper: impl Into<String>) -> Self {
        Self {
            wrapper: wrapper.into(),
        }
    }

    /// The shell command line run inside the wrapper.
    ///
    /// # Errors
    ///
    /// Fails when a word cannot be shell-quoted (it contains a NUL byte).
    pub fn shell_command(
        program: &str,
        args: &[String],
        prompt: &str,
        inject: bool,
    ) -> Result<String, InvokeError> {
        let mut words = Vec::with_capacity(args.len() + 2);
        for word in std::iter::once(program)
            .chain(args.iter().map(String::as_str))
            .chain(std::iter::once(prompt))
        {
            words.push(quote(program, word)?);
        }
        let line = words.join(" ");
        Ok(if inject {
            format!("{REPLY_PREFIX}{line}")
        } else {
            line
        })
    }

    /// The wrapper invocation for this platform.
    ///
    /// Linux util-linux: `script -qec <cmd> /dev/null`.
    /// BSD and macOS: `script -q /dev/null sh -c <cmd>`.
    pub fn command(&self, shell_command: String) -> ProcessCommand {
        let cmd = ProcessCommand::new(&self.wrapper);
        if cfg!(target_os = "linux") {
            cmd.args(["-qec".to_string(), shell_command, "/dev/null".to_string()])
        } else {
            cmd.args([
                "-q".to_string(),
                "/dev/null".to_string(),
                "sh".to_string(),
                "-c".to_string(),
                shell_command,
            ])
        }
    }

    /// Runs `program` under the wrapper and cleans its terminal output.
    ///
    /// # Errors
    ///
    /// Whatever [`ProcessInvoker::execute`] returns, plus a quoting failure.
    pub async fn run(
        &self,
        invoker: &ProcessInvoker,
        program: &str,
        args: &[String],
        prompt: &str,
        inject: bool,
        env: Vec<(String, String)>,
    ) -> Result<InvocationResult, InvokeError> {
        let line = Self::shell_command(program, args, prompt, inject)?;
        debug!(wrapper = %self.wrapper, inject, "Running under script wrapper");

        let result = invoker.execute(&self.command(line).envs(env)).await;
        match result {
            Ok(result) => Ok(clean(result)),
            Err(InvokeError::Timeout { after, partial }) => Err(InvokeError::Timeout {
                after,
                partial: Box::new(clean(*partial)),
            }),
            Err(other) => Err(other),
        }
    }
}

fn clean(result: InvocationResult) -> InvocationResult {
    InvocationResult {
        stdout: clean_pty_output(result.stdout.as_bytes()),
        stderr: clean_pty_output(result.stderr.as_bytes()),
        ..result
    }
}

fn quote(program: &str, word: &str) -> Result<String, InvokeError> {
    shlex::try_quote(word)
        .map(|quoted| quoted.into_owned())
        .map_err(|e| InvokeError::Spawn {
            program: program.to_string(),
            source: io::Error::new(io::ErrorKind::InvalidInput, e.to_string()),
        })
}
