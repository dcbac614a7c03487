use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::types::LlmClient;
use super::LlmError;

/// Ollama HTTP client for local LLM inference.
pub struct OllamaClient {
    base_url: String,
    client: reqwest::blocking::Client,
    timeout_secs: u64,
}

impl OllamaClient {
    /// Create a new OllamaClient pointing at a local Ollama instance.
    pub fn new(base_url: &str, timeout_secs: u64) -> Result<Self, LlmError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| LlmError::HttpClient(e.to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            timeout_secs,
        })
    }
}

/// Request body for Ollama /api/generate
#[derive(Serialize)]
struct OllamaGenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    system: &'a str,
    stream: bool,
}

/// Response body from Ollama /api/generate
#[derive(Deserialize)]
struct OllamaGenerateResponse {
    response: String,
}

impl LlmClient for OllamaClient {
    fn generate(&self, model: &str, prompt: &str, system: &str) -> Result<String, LlmError> {
        let url = format!("{}/api/generate", self.base_url);
        let body = OllamaGenerateRequest {
            model,
            prompt,
            system,
            stream: false,
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .map_err(|e| LlmError::from_reqwest(e, &self.base_url, self.timeout_secs))?;

        if !response.status().is_success() {
            return Err(LlmError::from_failed_response(
                response,
                &self.base_url,
                self.timeout_secs,
            ));
        }

        let parsed: OllamaGenerateResponse = response
            .json()
            .map_err(|e| LlmError::from_body(e, &self.base_url, self.timeout_secs))?;

        Ok(parsed.response)
    }
}
