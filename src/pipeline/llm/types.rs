use std::sync::Arc;

use super::LlmError;

/// Language-model client abstraction (allows mocking).
pub trait LlmClient {
    /// Send one prompt with a system instruction and return the raw text reply.
    fn generate(&self, model: &str, prompt: &str, system: &str) -> Result<String, LlmError>;
}

impl<T: LlmClient + ?Sized> LlmClient for Box<T> {
    fn generate(&self, model: &str, prompt: &str, system: &str) -> Result<String, LlmError> {
        (**self).generate(model, prompt, system)
    }
}

impl<T: LlmClient + ?Sized> LlmClient for Arc<T> {
    fn generate(&self, model: &str, prompt: &str, system: &str) -> Result<String, LlmError> {
        (**self).generate(model, prompt, system)
    }
}

/// Shared handle used by the extractor and the query assistant.
pub type SharedLlmClient = Arc<dyn LlmClient + Send + Sync>;
