//! Pipes-only process execution under a deadline.
//!
//! The child gets no terminal: stdin is either the supplied bytes or
//! `/dev/null`, and stdout/stderr are read concurrently so neither pipe can
//! fill up and stall the other. The child leads its own process group, so a
//! timeout kills everything it started.

use crate::error::InvokeError;
use lattice_proto::InvocationResult;
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// How long to wait for pipe readers after the process group was killed.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// A program, its arguments, and what to hand it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessCommand {
    pub program: String,
    pub args: Vec<String>,
    /// Merged over the caller's environment for the child only.
    pub env: Vec<(String, String)>,
    /// Written to stdin, which is then closed.
    pub stdin: Option<Vec<u8>>,
}

impl ProcessCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn envs<I>(mut self, env: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        self.env.extend(env);
        self
    }

    pub fn stdin(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(input.into());
        self
    }
}

/// Runs commands without a terminal.
#[derive(Debug, Clone, Copy)]
pub struct ProcessInvoker {
    timeout: Duration,
}

impl Default for ProcessInvoker {
    fn default() -> Self {
        Self::new(lattice_proto::DEFAULT_TIMEOUT)
    }
}

impl ProcessInvoker {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Runs `command` to completion or until the deadline.
    ///
    /// Any exit code is `Ok`. Output is trimmed.
    ///
    /// # Errors
    ///
    /// `Spawn` when the program cannot be started, `Timeout` when the process
    /// group outlives the deadline (it is killed and reaped first), and `Io`
    /// when waiting on the child fails.
    pub async fn execute(&self, command: &ProcessCommand) -> Result<InvocationResult, InvokeError> {
        let started = Instant::now();
        let deadline = tokio::time::Instant::now() + self.timeout;

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .envs(command.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(if command.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true);

        debug!(
            command = %command.program,
            args = ?command.args,
            timeout_secs = self.timeout.as_secs(),
            "Spawning process"
        );

        let mut child = cmd.spawn().map_err(|source| InvokeError::Spawn {
            program: command.program.clone(),
            source,
        })?;
        let pid = child.id();

        if let Some(input) = command.stdin.clone()
            && let Some(mut stdin) = child.stdin.take()
        {
            // The child may exit without reading; a broken pipe is not our failure.
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(&input).await {
                    debug!(error = %e, "Stdin write did not complete");
                }
            });
        }

        let mut stdout_task = tokio::spawn(read_all(child.stdout.take()));
        let mut stderr_task = tokio::spawn(read_all(child.stderr.take()));

        let status = match tokio::time::timeout_at(deadline, child.wait()).await {
            Ok(Ok(status)) => Some(status),
            Ok(Err(e)) => {
                warn!(command = %command.program, error = %e, "Waiting on process failed");
                abandon(pid, [&stdout_task, &stderr_task]);
                return Err(e.into());
            }
            Err(_) => None,
        };

        // A descendant can hold the pipes open after the child exits, so the
        // drain shares the same deadline.
        let drained = match status {
            Some(_) => tokio::time::timeout_at(deadline, async {
                tokio::join!(&mut stdout_task, &mut stderr_task)
            })
            .await
            .ok(),
            None => None,
        };

        if let (Some(status), Some((stdout, stderr))) = (status, drained) {
            return Ok(InvocationResult {
                exit_code: status.code(),
                stdout: decode(&stdout.unwrap_or_default()),
                stderr: decode(&stderr.unwrap_or_default()),
                elapsed: started.elapsed(),
                timed_out: false,
            });
        }

        warn!(
            command = %command.program,
            timeout_secs = self.timeout.as_secs(),
            "Process timed out, killing process group"
        );
        kill_group(pid);
        if status.is_none()
            && tokio::time::timeout(DRAIN_GRACE, child.wait()).await.is_err()
        {
            let _ = child.start_kill();
        }

        let (stdout, stderr) = collect_partial(stdout_task, stderr_task).await;
        Err(InvokeError::Timeout {
            after: self.timeout,
            partial: Box::new(InvocationResult {
                exit_code: None,
                stdout,
                stderr,
                elapsed: started.elapsed(),
                timed_out: true,
            }),
        })
    }
}

/// Sends SIGKILL to the process group led by `pid`.
pub(crate) fn kill_group(pid: Option<u32>) {
    if let Some(pid) = pid {
        let pgid = Pid::from_raw(pid as i32);
        debug!(%pgid, "Sending SIGKILL to process group");
        let _ = killpg(pgid, Signal::SIGKILL);
    }
}

/// Kills the process group and stops its pipe readers.
fn abandon(pid: Option<u32>, readers: [&JoinHandle<Vec<u8>>; 2]) {
    kill_group(pid);
    for reader in readers {
        reader.abort();
    }
}

async fn read_all<R: AsyncRead + Unpin>(pipe: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe
        && let Err(e) = pipe.read_to_end(&mut buf).await
    {
        debug!(error = %e, "Pipe read ended with error");
    }
    buf
}

async fn collect_partial(
    mut stdout_task: JoinHandle<Vec<u8>>,
    mut stderr_task: JoinHandle<Vec<u8>>,
) -> (String, String) {
    match tokio::time::timeout(DRAIN_GRACE, async {
        tokio::join!(&mut stdout_task, &mut stderr_task)
    })
    .await
    {
        Ok((stdout, stderr)) => (
            decode(&stdout.unwrap_or_default()),
            decode(&stderr.unwrap_or_default()),
        ),
        Err(_) => {
            stdout_task.abort();
            stderr_task.abort();
            (String::new(), String::new())
        }
    }
}

fn decode(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).trim().to_string()
}
