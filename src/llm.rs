//! Egress to the external chat-style LLM endpoint (§6 "Egress: LLM
//! endpoint"). Modeled as a trait so the deterministic fallback paths in
//! C5/C9/C10 can be tested without a live endpoint, same pattern as the
//! teacher's `ChClient` trait boundary around ClickHouse.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Non-streaming completion: system + user prompt in, text out.
    async fn complete(&self, system: &str, user: &str) -> anyhow::Result<String>;
}

/// Production implementation: a generic OpenAI-compatible chat completion
/// endpoint, reached over `reqwest`. Deterministic, low-temperature per
/// §6 ("deterministic low-temperature sampling (<= 0.2)").
pub struct HttpChatClient {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    temperature: f32,
}

impl HttpChatClient {
    pub fn new(endpoint: String, model: String, api_key: Option<String>, temperature: f32) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(20))
            .build()
            .expect("reqwest client");
        Self { client, endpoint, model, api_key, temperature }
    }
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageOut,
}

#[derive(Deserialize)]
struct ChatMessageOut {
    content: String,
}

#[async_trait]
impl ChatClient for HttpChatClient {
    async fn complete(&self, system: &str, user: &str) -> anyhow::Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
        });

        let mut req = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req.send().await.map_err(|e| anyhow::anyhow!("llm request failed: {e}"))?;
        if !resp.status().is_success() {
            anyhow::bail!("llm endpoint returned {}", resp.status());
        }
        let parsed: ChatCompletionResponse = resp
            .json()
            .await
            .map_err(|e| anyhow::anyhow!("llm response decode failed: {e}"))?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| anyhow::anyhow!("llm returned no choices"))
    }
}

/// A `ChatClient` that always fails — used when no endpoint is configured
/// so every call site exercises its deterministic fallback path, per §6
/// "must degrade gracefully".
pub struct UnavailableChatClient;

#[async_trait]
impl ChatClient for UnavailableChatClient {
    async fn complete(&self, _system: &str, _user: &str) -> anyhow::Result<String> {
        anyhow::bail!("llm endpoint not configured")
    }
}
