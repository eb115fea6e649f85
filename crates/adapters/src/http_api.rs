// SPDX-License-Identifier: MIT

//! HTTP API adapter style (§4.D): POST an OpenAI-compatible chat-completion
//! payload with bearer auth; provider errors surface with HTTP status in
//! `EngineResult::metadata`.

use crate::{Engine, EngineMetadata, EngineRequest, EngineResult};
use async_trait::async_trait;
use forge_core::{CoreError, CoreResult};
use forge_wire::{ApiRequest, ApiResponse};
use std::time::Duration;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(180);

pub struct HttpApiEngine {
    metadata: EngineMetadata,
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpApiEngine {
    pub fn new(metadata: EngineMetadata, base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self { metadata, base_url: base_url.into(), api_key, client: reqwest::Client::new() }
    }

    async fn call(&self, req: &EngineRequest) -> CoreResult<EngineResult> {
        let prompt = req
            .prompt_text()
            .map_err(|e| CoreError::Dependency(format!("cannot read prompt files: {e}")))?;
        let model = req.model.clone().or_else(|| self.metadata.default_model.clone()).unwrap_or_else(|| "default".into());
        let body = ApiRequest::new(model, prompt, 0.0);
        let timeout = req.timeout.unwrap_or(DEFAULT_TIMEOUT);

        let mut builder = self.client.post(format!("{}/chat/completions", self.base_url)).json(&body).timeout(timeout);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| if e.is_timeout() { CoreError::Timeout(e.to_string()) } else { CoreError::EngineFailure(e.to_string()) })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            let mut metadata = serde_json::Map::new();
            metadata.insert("http_status".into(), serde_json::Value::from(status.as_u16()));
            return Ok(EngineResult {
                success: false,
                stdout: String::new(),
                stderr: body_text.clone(),
                error: Some(format!("provider returned HTTP {status}: {body_text}")),
                tokens_used: None,
                cost: None,
                metadata,
            });
        }

        let parsed: ApiResponse = response
            .json()
            .await
            .map_err(|e| CoreError::EngineFailure(format!("malformed provider response: {e}")))?;

        Ok(EngineResult {
            success: true,
            stdout: parsed.stdout().unwrap_or_default().to_string(),
            stderr: String::new(),
            error: None,
            tokens_used: Some(parsed.tokens_used()),
            cost: None,
            metadata: serde_json::Map::new(),
        })
    }
}

#[async_trait]
impl Engine for HttpApiEngine {
    fn metadata(&self) -> &EngineMetadata {
        &self.metadata
    }

    async fn check_availability(&self) -> CoreResult<()> {
        self.client
            .get(&self.base_url)
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map(|_| ())
            .map_err(|e| CoreError::Dependency(format!("{} unreachable: {e}", self.base_url)))
    }

    async fn plan(&self, req: &EngineRequest) -> CoreResult<EngineResult> {
        self.call(req).await
    }

    async fn execute(&self, req: &EngineRequest) -> CoreResult<EngineResult> {
        self.call(req).await
    }

    async fn qa(&self, req: &EngineRequest) -> CoreResult<EngineResult> {
        self.call(req).await
    }
}
