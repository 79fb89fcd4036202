//! Tone analyzers used by the reference host.
//!
//! - `KeywordAnalyzer`: offline word-list check, always available.
//! - `OllamaAnalyzer`: asks a local Ollama model for a tone flag and rewrites.
//!
//! Both produce the host's positional suggestion list: a tone flag followed
//! by zero or more suggestions.

use crate::config::OllamaConfig;
use crate::host::prompt::{self, POLITE_REWRITE_SYSTEM_PROMPT};
use crate::models::AnalyzeRequest;
use anyhow::{Context, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Upper bound on raw model output that gets normalized.
pub const MAX_RAW_OUTPUT: usize = 900_000;

/// Words that mark a body as impolite for the keyword analyzer.
const RUDE_WORDS: &[&str] = &["idiot", "stupid"];

/// Produces a suggestion list for one request.
pub trait Analyzer: Send + Sync {
    /// Short name used in diagnostics.
    fn name(&self) -> &'static str;

    fn analyze<'a>(&'a self, request: &'a AnalyzeRequest) -> BoxFuture<'a, Result<Vec<String>>>;
}

/// Offline analyzer based on a fixed word list.
#[derive(Debug, Default)]
pub struct KeywordAnalyzer;

impl KeywordAnalyzer {
    fn classify(text: &str) -> Vec<String> {
        let lower = text.to_lowercase();
        let rude = RUDE_WORDS.iter().any(|w| lower.contains(w));

        let list: &[&str] = if rude {
            &[
                "Impolite",
                "Please soften the expression.",
                "Consider acknowledging the recipient's view.",
            ]
        } else {
            &["Polite", "Adding a brief thanks at the end can help."]
        };
        list.iter().map(|s| s.to_string()).collect()
    }
}

impl Analyzer for KeywordAnalyzer {
    fn name(&self) -> &'static str {
        "keyword"
    }

    fn analyze<'a>(&'a self, request: &'a AnalyzeRequest) -> BoxFuture<'a, Result<Vec<String>>> {
        let text = if request.body.trim().is_empty() {
            request.target_text()
        } else {
            request.body.as_str()
        };
        let list = Self::classify(text);
        async move { Ok(list) }.boxed()
    }
}

/// Message in an Ollama chat request.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

/// Ollama chat API request.
#[derive(Debug, Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
}

/// Ollama chat API response.
#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: ChatMessage,
}

/// Analyzer backed by an Ollama chat endpoint.
pub struct OllamaAnalyzer {
    config: OllamaConfig,
    http_client: reqwest::Client,
}

impl OllamaAnalyzer {
    pub fn new(config: OllamaConfig) -> Result<Self> {
        info!(
            "Initializing Ollama analyzer with model {} at {}",
            config.model, config.url
        );

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            config,
            http_client,
        })
    }

    /// Send one chat turn and return the raw reply text.
    async fn chat(&self, user: String) -> Result<String> {
        let url = format!("{}/api/chat", self.config.url.trim_end_matches('/'));

        let request = OllamaChatRequest {
            model: self.config.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: POLITE_REWRITE_SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: user,
                },
            ],
            stream: false,
            options: OllamaOptions {
                temperature: self.config.temperature,
            },
        };

        let response = self
            .http_client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    anyhow::anyhow!("Request timed out after {}s", self.config.timeout_seconds)
                } else if e.is_connect() {
                    anyhow::anyhow!("Cannot connect to Ollama at {}", self.config.url)
                } else {
                    anyhow::anyhow!("Failed to send request: {}", e)
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("Ollama API error {}: {}", status, body));
        }

        let chat_response: OllamaChatResponse = response
            .json()
            .await
            .context("Failed to parse Ollama response")?;

        Ok(chat_response.message.content)
    }
}

impl Analyzer for OllamaAnalyzer {
    fn name(&self) -> &'static str {
        "ollama"
    }

    fn analyze<'a>(&'a self, request: &'a AnalyzeRequest) -> BoxFuture<'a, Result<Vec<String>>> {
        async move {
            let user = prompt::user_message(request.target_text(), &request.context);
            let raw = self.chat(user).await?;
            debug!("Model returned {} bytes", raw.len());

            if raw.is_empty() {
                warn!("Model returned nothing; using fallback suggestions");
                return Ok(fallback_suggestions());
            }
            Ok(normalize_suggestions(cap_output(&raw, MAX_RAW_OUTPUT)))
        }
        .boxed()
    }
}

/// Suggestions used when the analyzer produced no output at all.
pub fn fallback_suggestions() -> Vec<String> {
    vec![
        "Polite".to_string(),
        "Could you clarify this point?".to_string(),
        "I would appreciate your feedback when you have a moment.".to_string(),
    ]
}

/// Truncate `raw` to at most `max` bytes on a character boundary.
pub fn cap_output(raw: &str, max: usize) -> &str {
    if raw.len() <= max {
        return raw;
    }
    let mut end = max;
    while !raw.is_char_boundary(end) {
        end -= 1;
    }
    &raw[..end]
}

/// Strip a surrounding Markdown code fence, if any.
fn strip_code_fence(text: &str) -> &str {
    let text = text.trim();
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // Drop the info string (e.g. "json") on the opening line.
    let rest = match rest.find('\n') {
        Some(pos) => &rest[pos + 1..],
        None => rest,
    };
    rest.trim_end().trim_end_matches("```").trim()
}

fn value_to_item(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

/// Turn raw model output into a suggestion list.
///
/// A JSON array is taken as-is, an object contributes its `suggestions`
/// array, and anything else becomes a single item holding the raw text.
pub fn normalize_suggestions(raw: &str) -> Vec<String> {
    let text = strip_code_fence(raw);
    if text.is_empty() {
        return vec!["Error".to_string(), "Empty response".to_string()];
    }

    let parsed = match serde_json::from_str::<Value>(text) {
        Ok(Value::Array(items)) => Some(items),
        Ok(Value::Object(mut map)) => match map.remove("suggestions") {
            Some(Value::Array(items)) => Some(items),
            _ => None,
        },
        _ => None,
    };

    match parsed {
        Some(items) => items.into_iter().map(value_to_item).collect(),
        None => vec![text.to_string()],
    }
}
