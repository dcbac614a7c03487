use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::types::LlmClient;
use super::LlmError;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic Messages API client.
pub struct AnthropicClient {
    base_url: String,
    api_key: String,
    client: reqwest::blocking::Client,
    timeout_secs: u64,
    max_tokens: u32,
}

impl AnthropicClient {
    pub fn new(
        base_url: &str,
        api_key: &str,
        timeout_secs: u64,
        max_tokens: u32,
    ) -> Result<Self, LlmError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| LlmError::HttpClient(e.to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            client,
            timeout_secs,
            max_tokens,
        })
    }
}

/// Request body for /v1/messages
#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: [Message<'a>; 1],
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

/// Response body from /v1/messages
#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

/// Concatenate the text blocks of a reply.
fn collect_text(response: MessagesResponse) -> Result<String, LlmError> {
    let text: String = response
        .content
        .into_iter()
        .filter(|b| b.kind == "text")
        .filter_map(|b| b.text)
        .collect::<Vec<_>>()
        .join("");
    if text.is_empty() {
        return Err(LlmError::ResponseParsing("no text content in reply".into()));
    }
    Ok(text)
}

impl LlmClient for AnthropicClient {
    fn generate(&self, model: &str, prompt: &str, system: &str) -> Result<String, LlmError> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = MessagesRequest {
            model,
            max_tokens: self.max_tokens,
            system,
            messages: [Message {
                role: "user",
                content: prompt,
            }],
        };

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
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

        let parsed: MessagesResponse = response
            .json()
            .map_err(|e| LlmError::from_body(e, &self.base_url, self.timeout_secs))?;

        collect_text(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::llm::test_server::stalling_server;

    #[test]
    fn constructor_trims_trailing_slash() {
        let client = AnthropicClient::new("https://api.anthropic.com/", "k", 60, 1024).unwrap();
        assert_eq!(client.base_url, "https://api.anthropic.com");
        assert_eq!(client.timeout_secs, 60);
        assert_eq!(client.max_tokens, 1024);
    }

    #[test]
    fn request_serializes_single_user_message() {
        let body = MessagesRequest {
            model: "m",
            max_tokens: 10,
            system: "sys",
            messages: [Message {
                role: "user",
                content: "hello",
            }],
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["messages"][0]["content"], "hello");
        assert_eq!(json["system"], "sys");
    }

    #[test]
    fn text_blocks_are_joined() {
        let response: MessagesResponse = serde_json::from_str(
            r#"{"content":[{"type":"text","text":"{\"a\":"},{"type":"text","text":"1}"}]}"#,
        )
        .unwrap();
        assert_eq!(collect_text(response).unwrap(), "{\"a\":1}");
    }

    #[test]
    fn reply_without_text_is_an_error() {
        let response: MessagesResponse =
            serde_json::from_str(r#"{"content":[{"type":"tool_use"}]}"#).unwrap();
        assert!(matches!(
            collect_text(response),
            Err(LlmError::ResponseParsing(_))
        ));
    }

    #[test]
    fn unreachable_host_is_transient() {
        // Port 9 (discard) on localhost is normally closed.
        let client = AnthropicClient::new("http://127.0.0.1:9", "k", 2, 16).unwrap();
        let err = client.generate("m", "p", "s").unwrap_err();
        assert!(err.is_transient(), "unexpected error: {err:?}");
    }

    #[test]
    fn stalled_reply_body_is_a_transient_timeout() {
        let url = stalling_server("HTTP/1.1 200 OK", r#"{"content":[{"type":"text","#);
        let client = AnthropicClient::new(&url, "k", 1, 16).unwrap();
        let err = client.generate("m", "p", "s").unwrap_err();
        assert_eq!(err, LlmError::Timeout(1));
        assert!(err.is_transient());
    }

    #[test]
    fn stalled_error_body_is_a_transient_timeout() {
        let url = stalling_server("HTTP/1.1 400 Bad Request", r#"{"error":"#);
        let client = AnthropicClient::new(&url, "k", 1, 16).unwrap();
        let err = client.generate("m", "p", "s").unwrap_err();
        assert_eq!(err, LlmError::Timeout(1));
    }
}
