//! In-process pseudo-terminal execution.
//!
//! Some programs refuse to run, or stall, without a terminal: they query the
//! cursor position with `ESC[6n` and wait for an `ESC[row;colR` reply. The
//! driver gives them a pty and, when injecting, both pre-seeds a reply and
//! answers every query seen in the live output.
//!
//! Reads happen on a dedicated thread (pty reads block) and reach the async
//! side through a channel, multiplexed against the deadline with
//! `tokio::select!`.

use crate::error::InvokeError;
use crate::process_invoker::kill_group;
use lattice_proto::InvocationResult;
use portable_pty::{Child, CommandBuilder, PtySize, native_pty_system};
use std::io::{self, Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Cursor-position query.
pub const CURSOR_QUERY: &[u8] = b"\x1b[6n";

/// Reply to [`CURSOR_QUERY`]: row 1, column 1.
pub const CURSOR_REPLY: &[u8] = b"\x1b[1;1R";

/// How the terminal echoes [`CURSOR_REPLY`] back when it lands in the input queue.
const CARET_ECHO: &[u8] = b"^[[1;1R";

/// How long to wait for the child to be reapable after its output ends.
const EXIT_GRACE: Duration = Duration::from_secs(2);

const PTY_ROWS: u16 = 24;
const PTY_COLS: u16 = 200;

/// How a pty run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PtyEnd {
    Eof,
    /// At least one cursor query was answered before EOF.
    QueryAnsweredThenEof,
    Timeout,
}

/// Result of one pty run.
#[derive(Debug, Clone)]
pub struct PtyOutcome {
    pub end: PtyEnd,
    /// Cleaned output, reported as stdout; stderr is always empty.
    pub result: InvocationResult,
    pub queries_answered: usize,
}

/// Runs a program attached to a fresh pseudo-terminal.
#[derive(Debug, Clone, Copy)]
pub struct PtyDriver {
    timeout: Duration,
    pre_seed: bool,
    answer_queries: bool,
}

impl PtyDriver {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            pre_seed: false,
            answer_queries: false,
        }
    }

    /// Enables both the pre-seeded reply and mid-stream query answering.
    pub fn inject(self, inject: bool) -> Self {
        self.pre_seed(inject).answer_queries(inject)
    }

    /// Writes [`CURSOR_REPLY`] into the terminal before reading.
    pub fn pre_seed(mut self, enabled: bool) -> Self {
        self.pre_seed = enabled;
        self
    }

    /// Answers every [`CURSOR_QUERY`] found in the output.
    pub fn answer_queries(mut self, enabled: bool) -> Self {
        self.answer_queries = enabled;
        self
    }

    /// Runs `program` until its output ends or the deadline passes.
    ///
    /// A timeout is not an error: the outcome says [`PtyEnd::Timeout`] and
    /// keeps the partial output. The child's session is killed and the child
    /// reaped on every path out of this function.
    ///
    /// # Errors
    ///
    /// `Pty` when the terminal cannot be allocated or wired up, `Spawn` when
    /// the program cannot be started.
    pub async fn run(
        &self,
        program: &str,
        args: &[String],
        env: &[(String, String)],
    ) -> Result<PtyOutcome, InvokeError> {
        let started = Instant::now();
        let pair = native_pty_system()
            .openpty(PtySize {
                rows: PTY_ROWS,
                cols: PTY_COLS,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| InvokeError::Pty(e.to_string()))?;

        let mut builder = CommandBuilder::new(program);
        builder.args(args);
        for (key, value) in env {
            builder.env(key, value);
        }
        if let Ok(cwd) = std::env::current_dir() {
            builder.cwd(cwd);
        }

        debug!(
            command = %program,
            args = ?args,
            pre_seed = self.pre_seed,
            answer_queries = self.answer_queries,
            "Spawning program on pty"
        );

        let child = pair
            .slave
            .spawn_command(builder)
            .map_err(|e| InvokeError::Spawn {
                program: program.to_string(),
                source: io::Error::other(e.to_string()),
            })?;
        // Our copy of the subordinate side must close or EOF never arrives.
        drop(pair.slave);

        // portable-pty starts the child in its own session, so its pid is
        // also its process group id.
        let pid = child.process_id();
        let mut child = scopeguard::guard(child, move |mut child| {
            if matches!(child.try_wait(), Ok(None)) {
                kill_group(pid);
                let _ = child.kill();
            }
            let _ = child.wait();
        });

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| InvokeError::Pty(e.to_string()))?;
        let mut writer = pair
            .master
            .take_writer()
            .map_err(|e| InvokeError::Pty(e.to_string()))?;

        if self.pre_seed {
            write_reply(&mut *writer);
        }

        let should_terminate = Arc::new(AtomicBool::new(false));
        let (output_tx, mut output_rx) = mpsc::channel::<OutputEvent>(256);
        spawn_reader(reader, output_tx, Arc::clone(&should_terminate));

        let deadline = tokio::time::Instant::now() + self.timeout;
        let mut output = Vec::new();
        let mut scanner = QueryScanner::default();
        let mut queries_answered = 0;

        let timed_out = loop {
            tokio::select! {
                event = output_rx.recv() => match event {
                    Some(OutputEvent::Data(data)) => {
                        if self.answer_queries {
                            let found = scanner.feed(&data);
                            for _ in 0..found {
                                write_reply(&mut *writer);
                            }
                            if found > 0 {
                                debug!(found, "Answered cursor query");
                            }
                            queries_answered += found;
                        }
                        output.extend_from_slice(&data);
                    }
                    Some(OutputEvent::Eof) | None => break false,
                },
                () = tokio::time::sleep_until(deadline) => break true,
            }
        };

        should_terminate.store(true, Ordering::SeqCst);

        let exit_code = if timed_out {
            warn!(
                command = %program,
                timeout_secs = self.timeout.as_secs(),
                "PTY run timed out, killing child session"
            );
            kill_group(pid);
            let _ = child.kill();
            let _ = wait_for_exit(&mut **child, EXIT_GRACE).await;
            None
        } else {
            match wait_for_exit(&mut **child, EXIT_GRACE).await {
                Ok(Some(status)) => Some(status.exit_code() as i32),
                Ok(None) => {
                    warn!(command = %program, "Output ended but child did not exit");
                    None
                }
                Err(e) => {
                    debug!(error = %e, "Failed to query child status");
                    None
                }
            }
        };

        let end = if timed_out {
            PtyEnd::Timeout
        } else if queries_answered > 0 {
            PtyEnd::QueryAnsweredThenEof
        } else {
            PtyEnd::Eof
        };
        debug!(?end, exit_code, queries_answered, bytes = output.len(), "PTY run finished");

        Ok(PtyOutcome {
            end,
            result: InvocationResult {
                exit_code,
                stdout: clean_pty_output(&output),
                stderr: String::new(),
                elapsed: started.elapsed(),
                timed_out,
            },
            queries_answered,
        })
    }
}

#[derive(Debug)]
enum OutputEvent {
    Data(Vec<u8>),
    Eof,
}

fn spawn_reader(
    mut reader: Box<dyn Read + Send>,
    output_tx: mpsc::Sender<OutputEvent>,
    should_terminate: Arc<AtomicBool>,
) {
    std::thread::spawn(move || {
        let mut buf = [0u8; 4096];
        loop {
            if should_terminate.load(Ordering::SeqCst) {
                break;
            }
            match reader.read(&mut buf) {
                Ok(0) => {
                    let _ = output_tx.blocking_send(OutputEvent::Eof);
                    break;
                }
                Ok(n) => {
                    if output_tx
                        .blocking_send(OutputEvent::Data(buf[..n].to_vec()))
                        .is_err()
                    {
                        break;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    std::thread::sleep(Duration::from_millis(10));
                }
                // EIO once the child side closes: end of stream, not a failure.
                Err(e) => {
                    debug!(error = %e, "PTY reader stopped");
                    let _ = output_tx.blocking_send(OutputEvent::Eof);
                    break;
                }
            }
        }
    });
}

fn write_reply(writer: &mut dyn Write) {
    if let Err(e) = writer.write_all(CURSOR_REPLY).and_then(|()| writer.flush()) {
        debug!(error = %e, "Could not write cursor reply");
    }
}

async fn wait_for_exit(
    child: &mut (dyn Child + Send + Sync),
    max_wait: Duration,
) -> io::Result<Option<portable_pty::ExitStatus>> {
    let start = Instant::now();
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if start.elapsed() >= max_wait {
            return Ok(None);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Counts cursor queries across chunk boundaries.
#[derive(Debug, Default)]
struct QueryScanner {
    tail: Vec<u8>,
}

impl QueryScanner {
    /// Returns how many queries complete inside `chunk`.
    fn feed(&mut self, chunk: &[u8]) -> usize {
        let mut window = std::mem::take(&mut self.tail);
        window.extend_from_slice(chunk);

        let found = window
            .windows(CURSOR_QUERY.len())
            .filter(|w| *w == CURSOR_QUERY)
            .count();

        // Shorter than a full query, so nothing already counted is kept.
        let keep = CURSOR_QUERY.len() - 1;
        self.tail = window[window.len().saturating_sub(keep)..].to_vec();
        found
    }
}

/// Turns raw terminal bytes into plain text.
///
/// Removes synthetic cursor replies and their caret echo, strips ANSI
/// sequences, normalizes CRLF, and trims.
pub fn clean_pty_output(raw: &[u8]) -> String {
    let without_replies = remove_all(&remove_all(raw, CURSOR_REPLY), CARET_ECHO);
    let stripped = strip_ansi_escapes::strip(&without_replies);
    String::from_utf8_lossy(&stripped)
        .replace("\r\n", "\n")
        .trim()
        .to_string()
}

fn remove_all(haystack: &[u8], needle: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(haystack.len());
    let mut i = 0;
    while i < haystack.len() {
        if haystack[i..].starts_with(needle) {
            i += needle.len();
        } else {
            out.push(haystack[i]);
            i += 1;
        }
    }
    out
}
