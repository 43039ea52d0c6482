//! Append-only session transcripts.
//!
//! A transcript is owned by whoever starts a session and lives for exactly
//! one run. The mediator only sees the [`TranscriptSink`] trait, so callers
//! decide where records go.

use lattice_proto::{Session, TurnMessage};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Mutex;

/// A timestamped record in the JSONL transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    /// Unix timestamp in milliseconds when the record was written.
    pub ts: i64,

    /// Record type discriminator (`session.start`, `turn`, `session.end`).
    pub event: String,

    pub data: serde_json::Value,
}

impl Record {
    /// Creates a record with the current timestamp.
    pub fn new(event: impl Into<String>, data: impl Serialize) -> Self {
        Self {
            ts: chrono::Utc::now().timestamp_millis(),
            event: event.into(),
            data: serde_json::to_value(data).unwrap_or(serde_json::Value::Null),
        }
    }

    pub fn turn(message: &TurnMessage) -> Self {
        Self::new("turn", message)
    }

    pub fn session_start(
        prompt: &str,
        modal: &str,
        event: &str,
        turns: u32,
        strain_threshold: f64,
        signal: Option<i64>,
    ) -> Self {
        Self::new(
            "session.start",
            serde_json::json!({
                "prompt": prompt,
                "modal": modal,
                "event": event,
                "turns": turns,
                "strain_threshold": strain_threshold,
                "signal": signal,
            }),
        )
    }

    pub fn session_end(session: &Session) -> Self {
        Self::new(
            "session.end",
            serde_json::json!({
                "turns": session.len(),
                "stopped_on_strain": session.stopped_on_strain,
            }),
        )
    }
}

/// Destination for transcript records.
pub trait TranscriptSink: Send + Sync {
    fn write_record(&self, record: &Record);
}

/// Writes one JSON record per line.
///
/// Each record is written immediately so a crashed run still leaves every
/// completed turn on disk. Write failures are ignored: the transcript must
/// never interrupt a session.
pub struct JsonlTranscript<W> {
    writer: Mutex<W>,
}

impl<W: Write> JsonlTranscript<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    /// Flushes the underlying writer.
    pub fn flush(&self) -> io::Result<()> {
        self.writer
            .lock()
            .map_err(|_| io::Error::other("Failed to acquire writer lock"))?
            .flush()
    }
}

impl JsonlTranscript<File> {
    /// Creates (or truncates) the transcript file for a new run.
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self::new(File::create(path)?))
    }
}

impl<W: Write + Send> TranscriptSink for JsonlTranscript<W> {
    fn write_record(&self, record: &Record) {
        if let Ok(mut writer) = self.writer.lock()
            && let Ok(json) = serde_json::to_string(record)
        {
            let _ = writeln!(writer, "{}", json);
        }
    }
}
