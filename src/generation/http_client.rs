//! HTTP 生成服务客户端
//!
//! 请求：POST {endpoint}，JSON `{ text, density, max_cards }`
//! 响应：JSON `{ cards: [{ front, back }] }`

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, error};

use super::{CardRequest, GenerationClient, GenerationError};
use crate::model::Flashcard;

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    cards: Vec<Flashcard>,
}

/// 基于 reqwest 的生成服务客户端
pub struct HttpGenerationClient {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    model: Option<String>,
}

impl HttpGenerationClient {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<String>,
        model: Option<String>,
        request_timeout: Duration,
    ) -> Result<Self, GenerationError> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| GenerationError::Upstream(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key,
            model,
        })
    }

    fn build_payload(&self, request: &CardRequest) -> serde_json::Value {
        json!({
            "model": self.model,
            "text": request.text,
            "density": request.density.as_str(),
            "max_cards": request.max_cards,
        })
    }
}

#[async_trait]
impl GenerationClient for HttpGenerationClient {
    async fn generate_cards(&self, request: &CardRequest) -> Result<Vec<Flashcard>, GenerationError> {
        debug!(
            "[LLM] 生成请求: chunk={}, chars={}, density={}",
            request.chunk_index,
            request.text.len(),
            request.density
        );

        let mut builder = self.client.post(&self.endpoint).json(&self.build_payload(request));
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {}", key));
        }

        let response = builder
            .send()
            .await
            .map_err(|e| GenerationError::Upstream(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!(
                "[LLM] 生成失败: chunk={}, status={}, error={}",
                request.chunk_index, status, error_text
            );
            return Err(GenerationError::Upstream(format!(
                "status={}, error={}",
                status, error_text
            )));
        }

        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| GenerationError::Upstream(format!("invalid response body: {}", e)))?;
        Ok(body.cards)
    }
}
