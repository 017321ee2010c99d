//! OpenAI-compatible HTTP provider (`/chat/completions`, `/embeddings`).

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::{GenerateParams, LlmProvider, ProviderConfig, ProviderError};

pub struct OpenAiProvider {
    client: reqwest::Client,
    base_url: String,
    model: String,
    embedding_model: String,
    api_key: String,
    timeout: Duration,
}

impl OpenAiProvider {
    pub fn new(config: &ProviderConfig, api_key: String) -> Result<Self, ProviderError> {
        let timeout = Duration::from_millis(config.request_timeout_ms);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Unavailable(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            embedding_model: config.embedding_model.clone(),
            api_key,
            timeout,
        })
    }

    fn map_send_error(&self, e: reqwest::Error) -> ProviderError {
        if e.is_timeout() {
            ProviderError::Timeout(self.timeout)
        } else {
            ProviderError::Network(e.to_string())
        }
    }

    async fn post(&self, path: &str, body: serde_json::Value) -> Result<serde_json::Value, ProviderError> {
        let url = format!("{}/{}", self.base_url, path);
        debug!(url = %url, model = %self.model, "Provider request");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status, body));
        }

        response
            .json()
            .await
            .map_err(|e| ProviderError::MalformedResponse(e.to_string()))
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        &self.model
    }

    async fn generate(
        &self,
        prompt: &str,
        params: &GenerateParams,
    ) -> Result<String, ProviderError> {
        let mut messages = Vec::new();
        if let Some(system) = &params.system_prompt {
            messages.push(serde_json::json!({ "role": "system", "content": system }));
        }
        messages.push(serde_json::json!({ "role": "user", "content": prompt }));

        let request_body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": params.temperature,
            "max_tokens": params.max_tokens,
        });

        let resp_json = self.post("chat/completions", request_body).await?;
        resp_json["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| {
                ProviderError::MalformedResponse("missing choices[0].message.content".to_string())
            })
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let request_body = serde_json::json!({
            "model": self.embedding_model,
            "input": text,
        });

        let resp_json = self.post("embeddings", request_body).await?;
        let values = resp_json["data"][0]["embedding"].as_array().ok_or_else(|| {
            ProviderError::MalformedResponse("missing data[0].embedding".to_string())
        })?;

        values
            .iter()
            .map(|v| {
                v.as_f64()
                    .map(|x| x as f32)
                    .ok_or_else(|| ProviderError::MalformedResponse("non-numeric embedding".into()))
            })
            .collect()
    }
}
