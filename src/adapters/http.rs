//! HTTP extractor for OpenAI-compatible chat-completions endpoints.
//!
//! Endpoint: POST {endpoint}
//! Auth: optional Bearer token
//!
//! The schema is passed as a `json_schema` response format. Rate limits,
//! server errors and timeouts are transport failures; a reply that is not
//! valid JSON is a schema violation.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use super::{GenerationOutcome, GenerativeExtractor, TransportError};

const SYSTEM_PROMPT: &str = "You extract structured battle reports from tabletop wargame \
video transcripts. Reply with a single JSON object that matches the provided schema.";

/// Chat-completions client
pub struct HttpExtractor {
    endpoint: String,
    model: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    response_format: Value,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

impl HttpExtractor {
    /// Create a new client
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            endpoint: endpoint.into(),
            model: model.into(),
            api_key,
            client,
        })
    }
}

/// Remove a surrounding markdown code fence, if the model added one
fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the language tag line ("```json")
    let body = rest.split_once('\n').map_or("", |(_, body)| body);
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// Interpret the model's reply text
fn parse_reply(content: &str) -> GenerationOutcome {
    match serde_json::from_str::<Value>(strip_code_fence(content)) {
        Ok(value) => GenerationOutcome::Parsed(value),
        Err(e) => GenerationOutcome::SchemaViolation(format!("reply is not valid JSON: {}", e)),
    }
}

#[async_trait]
impl GenerativeExtractor for HttpExtractor {
    fn name(&self) -> &str {
        "http"
    }

    async fn generate(&self, prompt: &str, schema: &Value) -> Result<GenerationOutcome, TransportError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            response_format: json!({
                "type": "json_schema",
                "json_schema": { "name": "battle_report", "schema": schema }
            }),
            temperature: 0.0,
        };

        let mut builder = self.client.post(&self.endpoint).json(&request);
        if let Some(ref key) = self.api_key {
            builder = builder.header("Authorization", format!("Bearer {}", key));
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError(format!("request timed out: {}", e))
            } else {
                TransportError(format!("request failed: {}", e))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(TransportError(format!("extractor error ({}): {}", status, text)));
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| TransportError(format!("malformed response body: {}", e)))?;

        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default();

        debug!(model = %self.model, bytes = content.len(), "Extractor replied");

        if content.trim().is_empty() {
            return Ok(GenerationOutcome::SchemaViolation("reply was empty".to_string()));
        }
        Ok(parse_reply(&content))
    }
}
