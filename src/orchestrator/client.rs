use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;
use tracing::info;

/// Upstream model invocation. Parsing the reply is the orchestrator's
/// concern; implementations only move text.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn invoke(
        &self,
        endpoint: &str,
        model_id: &str,
        api_key: &str,
        prompt: &str,
        timeout: Duration,
    ) -> Result<String>;
}

/// OpenAI-compatible chat-completions client; the unified upstream
/// gateway speaks this format for every pooled model.
#[derive(Clone)]
pub struct HttpModelClient {
    client: Client,
}

impl HttpModelClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ModelClient for HttpModelClient {
    async fn invoke(
        &self,
        endpoint: &str,
        model_id: &str,
        api_key: &str,
        prompt: &str,
        timeout: Duration,
    ) -> Result<String> {
        let req_body = json!({
            "model": model_id,
            "messages": [
                {"role": "user", "content": prompt}
            ],
            "temperature": 0.7,
            "max_tokens": 1200
        });

        info!("Calling model {} at {}", model_id, endpoint);

        let res = self
            .client
            .post(endpoint)
            .header("Authorization", format!("Bearer {}", api_key))
            .json(&req_body)
            .timeout(timeout)
            .send()
            .await
            .context("model request failed")?;

        if !res.status().is_success() {
            let status = res.status();
            let err_text = res.text().await.unwrap_or_default();
            anyhow::bail!("model API error: status={}, body={}", status, &err_text[..err_text.len().min(500)]);
        }

        let resp_json: serde_json::Value = res.json().await.context("decoding model response")?;

        let content = resp_json["choices"][0]["message"]["content"]
            .as_str()
            .context("no content in model response")?;

        Ok(content.to_string())
    }
}
