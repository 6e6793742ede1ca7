//! Chat-completion oracle used by the critic panel, the jury, the brain and the reconciler.
//!
//! Oracle output is untrusted free text. Nothing here interprets it beyond pulling the
//! first choice's content out of the response envelope.

use crate::core::error::SynthesisError;
use reqwest::blocking::Client as HttpClient;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::{BufRead, BufReader};
use std::time::Duration;
use tracing::debug;

pub const ORACLE_KEY_ENV: &str = "XAI_API_KEY";
pub const DEFAULT_ENDPOINT: &str = "https://api.x.ai/v1/chat/completions";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub stream: bool,
}

impl ChatRequest {
    pub fn new(model: &str, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.to_string(),
            messages,
            temperature: 0.0,
            stream: false,
        }
    }

    /// The system prompt, if any. Useful for routing in scripted oracles.
    pub fn system_prompt(&self) -> Option<&str> {
        self.messages
            .iter()
            .find(|m| m.role == "system")
            .map(|m| m.content.as_str())
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

pub trait ScoringOracle: Send + Sync {
    /// Send one chat exchange and return the first choice's text.
    fn complete(&self, request: &ChatRequest) -> Result<String, SynthesisError>;
}

/// Extract `choices[0].message.content` from a buffered response body.
pub fn first_choice_content(body: &str) -> Result<String, SynthesisError> {
    let response: ChatResponse = serde_json::from_str(body).map_err(|e| {
        SynthesisError::OracleOutputMalformed(format!("unreadable completion envelope: {}", e))
    })?;
    response
        .choices
        .into_iter()
        .next()
        .map(|c| c.message.content)
        .ok_or_else(|| SynthesisError::OracleOutputMalformed("completion has no choices".into()))
}

/// Concatenate `choices[0].delta.content` across server-sent `data:` lines until
/// `data: [DONE]`. Lines that are not `data:` events, or whose payload does not parse,
/// are skipped.
pub fn collect_stream<R: BufRead>(reader: R) -> Result<String, SynthesisError> {
    let mut out = String::new();
    for line in reader.lines() {
        let line = line?;
        let Some(data) = line.trim().strip_prefix("data:") else {
            continue;
        };
        let data = data.trim();
        if data == "[DONE]" {
            break;
        }
        let Ok(chunk) = serde_json::from_str::<Value>(data) else {
            continue;
        };
        if let Some(piece) = chunk
            .pointer("/choices/0/delta/content")
            .and_then(|v| v.as_str())
        {
            out.push_str(piece);
        }
    }
    Ok(out)
}

pub struct HttpOracle {
    client: HttpClient,
    endpoint: String,
    api_key: String,
    stream: bool,
}

impl HttpOracle {
    pub fn new(
        endpoint: &str,
        api_key: &str,
        timeout: Duration,
        stream: bool,
    ) -> Result<Self, SynthesisError> {
        if api_key.trim().is_empty() {
            return Err(SynthesisError::MissingCredential(ORACLE_KEY_ENV.to_string()));
        }
        let client = HttpClient::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            api_key: api_key.trim().to_string(),
            stream,
        })
    }

    pub fn from_env(endpoint: &str, timeout: Duration, stream: bool) -> Result<Self, SynthesisError> {
        let key = std::env::var(ORACLE_KEY_ENV)
            .map_err(|_| SynthesisError::MissingCredential(ORACLE_KEY_ENV.to_string()))?;
        Self::new(endpoint, &key, timeout, stream)
    }
}

impl ScoringOracle for HttpOracle {
    fn complete(&self, request: &ChatRequest) -> Result<String, SynthesisError> {
        let mut request = request.clone();
        request.stream = self.stream;
        debug!(model = %request.model, stream = request.stream, "oracle request");
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()?
            .error_for_status()?;
        if self.stream {
            collect_stream(BufReader::new(response))
        } else {
            first_choice_content(&response.text()?)
        }
    }
}
