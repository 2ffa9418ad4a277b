use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::config::LlmConfig;

/// Minimal client for an OpenAI-compatible `/chat/completions` endpoint that
/// always asks for a JSON object back.
#[derive(Debug, Clone)]
pub struct ChatClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    content: Option<String>,
}

impl ChatClient {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = config.resolve_api_key()?;
        let base_url = config.base_url.trim_end_matches('/');

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(180))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http,
            endpoint: format!("{}/chat/completions", base_url),
            api_key,
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Send one system + user exchange and parse the reply as JSON
    pub async fn complete_json(&self, system: &str, prompt: &str) -> Result<Value> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage { role: "system", content: system },
                ChatMessage { role: "user", content: prompt },
            ],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            response_format: ResponseFormat { kind: "json_object" },
        };

        tracing::debug!(model = %self.model, "Sending chat completion request");

        let response = self.http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .context("Chat completion request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Chat completion returned HTTP {}: {}", status, body);
        }

        let body: ChatResponse = response.json().await
            .context("Failed to decode chat completion response")?;

        let content = body.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| anyhow::anyhow!("Chat completion returned no content"))?;

        parse_json_reply(&content)
    }
}

/// Parse a model reply as JSON, tolerating a surrounding markdown code fence
pub fn parse_json_reply(content: &str) -> Result<Value> {
    let trimmed = content.trim();
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.trim_end().strip_suffix("```"))
        .unwrap_or(trimmed);

    serde_json::from_str(unfenced.trim()).context("Model reply was not valid JSON")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_json_reply_plain_and_fenced() {
        assert_eq!(parse_json_reply(r#"{"a": 1}"#).unwrap()["a"], 1);
        assert_eq!(parse_json_reply("```json\n{\"a\": 2}\n```").unwrap()["a"], 2);
        assert_eq!(parse_json_reply("```\n[1, 2]\n```").unwrap()[1], 2);
        assert!(parse_json_reply("not json").is_err());
    }

    #[test]
    fn test_new_builds_endpoint() {
        let config = LlmConfig {
            base_url: "https://api.example.com/v1/".to_string(),
            api_key: Some("k".to_string()),
            ..LlmConfig::default()
        };
        let client = ChatClient::new(&config).unwrap();
        assert_eq!(client.endpoint, "https://api.example.com/v1/chat/completions");
        assert_eq!(client.model(), "gpt-4.1-mini");
    }
}
