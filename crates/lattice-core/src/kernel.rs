//! Kernel lookups: signals for modal/event pairs and resonance tags.
//!
//! The kernel is a JSON document shaped like:
//!
//! ```json
//! {
//!   "brand_identity_kernel": {
//!     "modal_domains": {
//!       "visual": { "inputs": { "see_logo": 3 }, "outputs": { "amplify_brand_colours": 7 } }
//!     },
//!     "resonance_map": { "S1-visual": [2, 3, 7], "S2-ethics": [7, 11] }
//!   }
//! }
//! ```
//!
//! Only the lookups the mediator needs are interpreted; everything else in
//! the document is carried verbatim as priming context.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tracing::debug;

const ROOT_KEY: &str = "brand_identity_kernel";

/// Which side of a modal domain an event belongs to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Inputs,
    #[default]
    Outputs,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Inputs => "inputs",
            EventKind::Outputs => "outputs",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = KernelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "inputs" | "input" => Ok(EventKind::Inputs),
            "outputs" | "output" => Ok(EventKind::Outputs),
            other => Err(KernelError::Shape(format!(
                "event kind must be 'inputs' or 'outputs', got '{other}'"
            ))),
        }
    }
}

/// Pure lookups consumed by the mediator.
pub trait SignalSource: Send + Sync {
    /// Signal for a modal/event pair. `None` means the pair is absent, which
    /// is distinct from a legitimate signal of zero.
    fn signal(&self, modal: &str, event: &str, kind: EventKind) -> Option<i64>;

    /// Resonance tags for a signal, in the order the source lists them.
    /// Absent signals resonate with nothing.
    fn resonance(&self, signal: Option<i64>) -> Vec<String>;

    /// The document handed to providers as priming context.
    fn context(&self) -> serde_json::Value;
}

/// A parsed kernel document.
#[derive(Debug, Clone)]
pub struct Kernel {
    document: serde_json::Value,
    /// Tag to signals, in document order.
    resonance_map: Vec<(String, Vec<i64>)>,
}

impl Kernel {
    /// Loads a kernel from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, KernelError> {
        let path_ref = path.as_ref();
        debug!(path = %path_ref.display(), "Loading kernel");
        let content = std::fs::read_to_string(path_ref)?;
        let document: serde_json::Value = serde_json::from_str(&content)?;
        Self::from_value(document)
    }

    /// Wraps an already-parsed document.
    pub fn from_value(document: serde_json::Value) -> Result<Self, KernelError> {
        let root = document
            .get(ROOT_KEY)
            .ok_or_else(|| KernelError::Shape(format!("missing top-level '{ROOT_KEY}'")))?;

        if !root.get("modal_domains").is_some_and(|v| v.is_object()) {
            return Err(KernelError::Shape(
                "'modal_domains' must be an object".to_string(),
            ));
        }

        let resonance_map = match root.get("resonance_map") {
            Some(map) => serde_json::from_value::<serde_json::Map<String, serde_json::Value>>(
                map.clone(),
            )?
            .into_iter()
            .map(|(tag, signals)| Ok((tag, serde_json::from_value(signals)?)))
            .collect::<Result<Vec<(String, Vec<i64>)>, serde_json::Error>>()?,
            None => Vec::new(),
        };

        Ok(Self {
            document,
            resonance_map,
        })
    }

    fn domains(&self) -> Option<&serde_json::Map<String, serde_json::Value>> {
        self.document
            .get(ROOT_KEY)
            .and_then(|root| root.get("modal_domains"))
            .and_then(|d| d.as_object())
    }

    /// Names of all modal domains.
    pub fn modal_names(&self) -> Vec<String> {
        self.domains()
            .map(|d| d.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Event names of one side of a modal domain.
    pub fn events(&self, modal: &str, kind: EventKind) -> Vec<String> {
        self.domains()
            .and_then(|d| d.get(modal))
            .and_then(|m| m.get(kind.as_str()))
            .and_then(|events| events.as_object())
            .map(|events| events.keys().cloned().collect())
            .unwrap_or_default()
    }
}

impl SignalSource for Kernel {
    fn signal(&self, modal: &str, event: &str, kind: EventKind) -> Option<i64> {
        self.domains()?
            .get(modal)?
            .get(kind.as_str())?
            .get(event)?
            .as_i64()
    }

    fn resonance(&self, signal: Option<i64>) -> Vec<String> {
        let Some(signal) = signal else {
            return Vec::new();
        };
        self.resonance_map
            .iter()
            .filter(|(_, signals)| signals.contains(&signal))
            .map(|(tag, _)| tag.clone())
            .collect()
    }

    fn context(&self) -> serde_json::Value {
        self.document.clone()
    }
}

/// Kernel loading errors.
#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Malformed kernel: {0}")]
    Shape(String),
}
