//! The seam between the mediator and whatever produces responses.

use async_trait::async_trait;

/// Produces a response for a prompt on behalf of a named provider.
///
/// Implementations never fail: process errors, timeouts and unknown
/// providers come back as tagged text, and callers must pass that text
/// through rather than re-interpret it.
#[async_trait]
pub trait Responder: Send + Sync {
    /// Responds to `prompt`, primed with the serialized `context`.
    async fn respond(&self, provider: &str, prompt: &str, context: &serde_json::Value) -> String;
}

#[async_trait]
impl<T: Responder + ?Sized> Responder for std::sync::Arc<T> {
    async fn respond(&self, provider: &str, prompt: &str, context: &serde_json::Value) -> String {
        (**self).respond(provider, prompt, context).await
    }
}
