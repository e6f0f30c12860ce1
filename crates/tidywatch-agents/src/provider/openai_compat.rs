//! OpenAI-compatible chat-completions plugin.
//!
//! Works with Ollama (`/v1`), llama.cpp server, vLLM and hosted gateways that
//! speak the `/chat/completions` dialect. Images travel as base64 data URLs.

use std::env;

use async_trait::async_trait;
use base64::Engine as _;
use coordination::{Capability, CapabilitySet, ConfigError, ProviderSpec};
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::{Provider, ProviderRequest, ProviderResponse};
use crate::errors::ProviderError;

/// Response bodies are truncated to this many characters in errors.
const MAX_ERROR_BODY: usize = 512;
const DEFAULT_TEMPERATURE: f64 = 0.2;

pub struct OpenAiCompatProvider {
    id: String,
    base_url: String,
    api_key: Option<String>,
    capabilities: CapabilitySet,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    pub fn from_spec(spec: &ProviderSpec, client: reqwest::Client) -> Result<Self, ConfigError> {
        let base_url = spec
            .base_url
            .as_deref()
            .map(|u| u.trim_end_matches('/').to_string())
            .filter(|u| !u.is_empty())
            .ok_or_else(|| ConfigError::invalid(format!("provider '{}' has no base_url", spec.id)))?;

        let api_key = match &spec.api_key_env {
            Some(var) => {
                let key = env::var(var).ok().filter(|k| !k.is_empty());
                if key.is_none() {
                    warn!(provider = %spec.id, var = %var, "API key variable is not set");
                }
                key
            }
            None => None,
        };

        let mut capabilities = spec.capabilities.clone();
        capabilities.insert(Capability::MetadataInput);

        Ok(Self {
            id: spec.id.clone(),
            base_url,
            api_key,
            capabilities,
            client,
        })
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }
}

/// MIME type from magic bytes; PNG is the sanitizer's output format.
pub fn sniff_mime(bytes: &[u8]) -> &'static str {
    if bytes.starts_with(&[0x89, b'P', b'N', b'G']) {
        "image/png"
    } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        "image/jpeg"
    } else {
        "application/octet-stream"
    }
}

/// Build the `/chat/completions` request body.
pub fn build_body(model: &str, request: &ProviderRequest) -> Value {
    let mut messages = Vec::new();
    if let Some(system) = &request.system {
        messages.push(json!({ "role": "system", "content": system }));
    }
    let user = match &request.image {
        Some(image) => {
            let data = base64::engine::general_purpose::STANDARD.encode(image);
            json!({
                "role": "user",
                "content": [
                    { "type": "text", "text": request.prompt },
                    {
                        "type": "image_url",
                        "image_url": { "url": format!("data:{};base64,{data}", sniff_mime(image)) }
                    }
                ]
            })
        }
        None => json!({ "role": "user", "content": request.prompt }),
    };
    messages.push(user);

    let mut body = json!({
        "model": model,
        "messages": messages,
        "temperature": DEFAULT_TEMPERATURE,
    });
    if let Some(max_tokens) = request.max_tokens {
        body["max_tokens"] = json!(max_tokens);
    }
    body
}

/// Pull the assistant text out of a completion response.
pub fn parse_completion(model: &str, body: &Value) -> Result<ProviderResponse, ProviderError> {
    let text = body["choices"][0]["message"]["content"]
        .as_str()
        .ok_or_else(|| ProviderError::InvalidResponse("missing choices[0].message.content".into()))?;
    Ok(ProviderResponse {
        text: text.to_string(),
        model: body["model"].as_str().unwrap_or(model).to_string(),
        tokens_used: body["usage"]["total_tokens"].as_u64(),
    })
}

fn truncate(body: String) -> String {
    if body.chars().count() <= MAX_ERROR_BODY {
        body
    } else {
        body.chars().take(MAX_ERROR_BODY).collect()
    }
}

async fn error_for_status(response: reqwest::Response) -> ProviderError {
    let status = response.status();
    if status.as_u16() == 429 {
        let retry_after_secs = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok());
        return ProviderError::RateLimited { retry_after_secs };
    }
    let body = response.text().await.unwrap_or_default();
    ProviderError::Http {
        status: status.as_u16(),
        body: truncate(body),
    }
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn capabilities(&self) -> CapabilitySet {
        self.capabilities.clone()
    }

    async fn analyze(&self, model: &str, request: &ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        if request.image.is_some() && !self.capabilities.contains(&Capability::Vision) {
            return Err(ProviderError::Unsupported(format!("{} cannot accept images", self.id)));
        }
        let url = format!("{}/chat/completions", self.base_url);
        debug!(provider = %self.id, model, url = %url, has_image = request.image.is_some(), "sending completion");

        let response = self
            .authorize(self.client.post(&url))
            .json(&build_body(model, request))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(error_for_status(response).await);
        }
        let body: Value = response.json().await?;
        parse_completion(model, &body)
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        let url = format!("{}/models", self.base_url);
        let response = self.authorize(self.client.get(&url)).send().await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(error_for_status(response).await)
        }
    }
}
