//! Language-model collaborator.
//!
//! A synchronous text-in/text-out boundary. Clients enforce the
//! caller-supplied timeout and classify failures; retries live in the
//! callers, never inside a client.

pub mod types;
pub mod anthropic;
pub mod ollama;
pub mod mock;

pub use types::*;
pub use anthropic::AnthropicClient;
pub use ollama::OllamaClient;
pub use mock::{MockLlmClient, ScriptedLlmClient};

use std::sync::Arc;

use thiserror::Error;

use crate::config::{ConfigError, LlmProvider, LlmSettings};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    #[error("Model service is not reachable at {0}")]
    Connection(String),

    #[error("Request timed out after {0}s")]
    Timeout(u64),

    #[error("Rate limited by model service (status {status})")]
    RateLimited { status: u16 },

    #[error("Model service error (status {status}): {body}")]
    Server { status: u16, body: String },

    #[error("Model service rejected request (status {status}): {body}")]
    Api { status: u16, body: String },

    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("Unexpected response envelope: {0}")]
    ResponseParsing(String),
}

impl LlmError {
    /// Network, timeout, rate-limit and server-side failures may succeed on retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LlmError::Connection(_)
                | LlmError::Timeout(_)
                | LlmError::RateLimited { .. }
                | LlmError::Server { .. }
        )
    }

    /// Map a non-success HTTP status to an error.
    pub(crate) fn from_status(status: u16, body: String) -> Self {
        match status {
            429 => LlmError::RateLimited { status },
            500..=599 => LlmError::Server { status, body },
            _ => LlmError::Api { status, body },
        }
    }

    pub(crate) fn from_reqwest(e: reqwest::Error, base_url: &str, timeout_secs: u64) -> Self {
        if e.is_timeout() {
            LlmError::Timeout(timeout_secs)
        } else if e.is_connect() {
            LlmError::Connection(base_url.to_string())
        } else {
            LlmError::HttpClient(e.to_string())
        }
    }

    /// Failure while reading or decoding a reply body. A stalled body is a timeout.
    pub(crate) fn from_body(e: reqwest::Error, base_url: &str, timeout_secs: u64) -> Self {
        if e.is_timeout() || e.is_connect() {
            Self::from_reqwest(e, base_url, timeout_secs)
        } else {
            LlmError::ResponseParsing(e.to_string())
        }
    }

    /// Map a non-success response, reading its body for the message.
    pub(crate) fn from_failed_response(
        response: reqwest::blocking::Response,
        base_url: &str,
        timeout_secs: u64,
    ) -> Self {
        let status = response.status().as_u16();
        match response.text() {
            Ok(body) => Self::from_status(status, body),
            Err(e) if e.is_timeout() => LlmError::Timeout(timeout_secs),
            Err(e) => {
                tracing::debug!(status, base_url, error = %e, "Error body unreadable");
                Self::from_status(status, String::new())
            }
        }
    }
}

/// Build the client selected by the settings.
pub fn build_client(settings: &LlmSettings) -> Result<SharedLlmClient, ConfigError> {
    match settings.provider {
        LlmProvider::Anthropic => {
            let key = settings
                .api_key
                .as_deref()
                .ok_or(ConfigError::MissingApiKey("ANTHROPIC_API_KEY"))?;
            let client = AnthropicClient::new(
                &settings.anthropic_url,
                key,
                settings.timeout_secs,
                settings.max_response_tokens,
            )
            .map_err(|e| ConfigError::Invalid {
                key: "FINTREND_ANTHROPIC_URL".into(),
                value: e.to_string(),
            })?;
            Ok(Arc::new(client))
        }
        LlmProvider::Ollama => {
            let client = OllamaClient::new(&settings.ollama_url, settings.timeout_secs).map_err(
                |e| ConfigError::Invalid {
                    key: "FINTREND_OLLAMA_URL".into(),
                    value: e.to_string(),
                },
            )?;
            Ok(Arc::new(client))
        }
    }
}

#[cfg(test)]
pub(crate) mod test_server {
    use std::io::{Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::time::Duration;

    /// Serve one request: send the status line, headers and `partial_body`,
    /// then hold the connection open without finishing the body.
    pub(crate) fn stalling_server(status_line: &str, partial_body: &str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let head = format!(
            "{status_line}\r\ncontent-type: application/json\r\ncontent-length: {}\r\n\r\n{partial_body}",
            partial_body.len() + 256
        );
        std::thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                read_request(&mut stream);
                let _ = stream.write_all(head.as_bytes());
                let _ = stream.flush();
                std::thread::sleep(Duration::from_secs(5));
            }
        });
        format!("http://{addr}")
    }

    fn read_request(stream: &mut TcpStream) {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = match stream.read(&mut chunk) {
                Ok(0) | Err(_) => return,
                Ok(n) => n,
            };
            buf.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&buf);
            if let Some(end) = text.find("\r\n\r\n") {
                let length = text[..end]
                    .lines()
                    .filter_map(|l| l.split_once(':'))
                    .find(|(k, _)| k.trim().eq_ignore_ascii_case("content-length"))
                    .and_then(|(_, v)| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if buf.len() >= end + 4 + length {
                    return;
                }
            }
        }
    }
}
