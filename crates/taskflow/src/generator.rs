//! Task generation through an OpenAI-compatible chat completions endpoint.
//!
//! Generated tasks are returned to the caller as-is and never persisted;
//! the only contract enforced here is that the model answers with a JSON array.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

use crate::config::GeneratorConfig;

#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error("task generation is not configured")]
    NotConfigured,
    #[error("generator request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("generator returned {status}: {body}")]
    Upstream { status: u16, body: String },
    #[error("{0}")]
    Invalid(String),
}

#[async_trait]
pub trait TaskGenerator: Send + Sync {
    /// Raw model output for `prompt`, targeting `date`.
    async fn generate(&self, prompt: &str, date: &str) -> Result<String, GeneratorError>;
}

const SYSTEM_PROMPT: &str = "You plan tasks for a personal task manager. \
Answer with a JSON array only, no prose. Each element is an object with the fields \
title (string), description (string), priority (\"high\", \"medium\" or \"low\"), \
category (string), date (YYYY-MM-DD), startTime and endTime (ISO 8601 timestamps) \
and duration (minutes).";

pub struct HttpTaskGenerator {
    endpoint: String,
    model: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

impl HttpTaskGenerator {
    /// The API key is read from the environment variable named in the config;
    /// a missing key is allowed for local endpoints.
    pub fn from_config(config: &GeneratorConfig) -> Result<Self, GeneratorError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        let api_key = std::env::var(&config.api_key_env).ok().filter(|k| !k.is_empty());
        if api_key.is_none() {
            tracing::warn!(env = %config.api_key_env, "no generator API key set");
        }
        Ok(Self {
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            api_key,
            client,
        })
    }
}

#[async_trait]
impl TaskGenerator for HttpTaskGenerator {
    async fn generate(&self, prompt: &str, date: &str) -> Result<String, GeneratorError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": format!("Date: {}\n\n{}", date, prompt) }
            ]
        });
        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }
        let res = request.send().await?;
        let status = res.status();
        let text = res.text().await?;
        if !status.is_success() {
            return Err(GeneratorError::Upstream {
                status: status.as_u16(),
                body: text,
            });
        }
        let parsed: ChatResponse = serde_json::from_str(&text).map_err(|e| GeneratorError::Upstream {
            status: status.as_u16(),
            body: format!("unreadable completion: {}", e),
        })?;
        Ok(parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default())
    }
}

/// Models like to wrap JSON in a Markdown fence.
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = match rest.find('\n') {
        Some(i) => &rest[i + 1..],
        None => rest,
    };
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

pub fn parse_generated_tasks(raw: &str) -> Result<Vec<Value>, GeneratorError> {
    let value: Value = serde_json::from_str(strip_code_fence(raw))
        .map_err(|e| GeneratorError::Invalid(format!("Generated tasks are not valid JSON: {}", e)))?;
    match value {
        Value::Array(tasks) => Ok(tasks),
        _ => Err(GeneratorError::Invalid(
            "Generated tasks must be a JSON array".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_array_parses() {
        let tasks = parse_generated_tasks(r#"[{"title": "a"}, {"title": "b"}]"#).unwrap();
        assert_eq!(tasks.len(), 2);
    }

    #[test]
    fn fenced_array_parses() {
        let raw = "```json\n[{\"title\": \"a\"}]\n```";
        assert_eq!(parse_generated_tasks(raw).unwrap()[0]["title"], "a");
    }

    #[test]
    fn object_is_rejected() {
        assert!(matches!(
            parse_generated_tasks(r#"{"title": "a"}"#),
            Err(GeneratorError::Invalid(_))
        ));
    }

    #[test]
    fn prose_is_rejected() {
        assert!(parse_generated_tasks("Sure! Here are your tasks").is_err());
    }
}
