//! A responder that replays scripted text and records every call.

use async_trait::async_trait;
use lattice_proto::Responder;
use std::sync::{Arc, Mutex};

/// One call made against a [`ScriptedResponder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseRecord {
    pub provider: String,
    pub prompt: String,
}

/// Returns scripted responses in order, cycling when exhausted.
///
/// With no script it echoes `[<provider>] <first prompt line>`. Clones share
/// the same call log.
#[derive(Debug, Clone, Default)]
pub struct ScriptedResponder {
    responses: Arc<Vec<String>>,
    calls: Arc<Mutex<Vec<ResponseRecord>>>,
}

impl ScriptedResponder {
    pub fn new(responses: Vec<String>) -> Self {
        Self {
            responses: Arc::new(responses),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Responder that echoes instead of replaying a script.
    pub fn echo() -> Self {
        Self::default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn calls(&self) -> Vec<ResponseRecord> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Responder for ScriptedResponder {
    async fn respond(&self, provider: &str, prompt: &str, _context: &serde_json::Value) -> String {
        let index = {
            let mut calls = match self.calls.lock() {
                Ok(calls) => calls,
                Err(poisoned) => poisoned.into_inner(),
            };
            calls.push(ResponseRecord {
                provider: provider.to_string(),
                prompt: prompt.to_string(),
            });
            calls.len() - 1
        };

        if self.responses.is_empty() {
            let first_line = prompt.lines().next().unwrap_or_default();
            format!("[{provider}] {first_line}")
        } else {
            self.responses[index % self.responses.len()].clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cycles_script_and_records_calls() {
        let responder = ScriptedResponder::new(vec!["one".into(), "two".into()]);
        let ctx = serde_json::Value::Null;

        assert_eq!(responder.respond("codex", "a", &ctx).await, "one");
        assert_eq!(responder.respond("gemini", "b", &ctx).await, "two");
        assert_eq!(responder.respond("codex", "c", &ctx).await, "one");

        let calls = responder.clone().calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[1].provider, "gemini");
        assert_eq!(calls[2].prompt, "c");
    }

    #[tokio::test]
    async fn test_echo_uses_first_line() {
        let responder = ScriptedResponder::echo();
        let out = responder
            .respond("mock", "line one\nline two", &serde_json::Value::Null)
            .await;
        assert_eq!(out, "[mock] line one");
        assert_eq!(responder.call_count(), 1);
    }
}
