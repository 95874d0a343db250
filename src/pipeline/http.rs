//! [`ModelClient`] for OpenAI-compatible `/v1/chat/completions` endpoints.
//!
//! Works against llama.cpp's server, vLLM, LM Studio and hosted APIs. When a
//! response schema is supplied the request carries
//! `response_format: {"type": "json_schema", …}` so servers that support
//! grammar-constrained decoding emit JSON directly.

use crate::config::ModelEndpoint;
use crate::error::ExtractError;
use crate::pipeline::encode::data_url;
use crate::pipeline::llm::{CompletionRequest, ModelClient};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tracing::debug;

pub struct HttpModelClient {
    client: reqwest::Client,
    endpoint: ModelEndpoint,
    max_tokens: usize,
    temperature: f32,
}

impl HttpModelClient {
    /// Build a client for `endpoint`.
    ///
    /// # Errors
    /// [`ExtractError::Configuration`] when the endpoint requires an API key
    /// and none is set. No network traffic happens here.
    pub fn new(
        endpoint: ModelEndpoint,
        max_tokens: usize,
        temperature: f32,
    ) -> Result<Self, ExtractError> {
        let has_key = endpoint.api_key.as_deref().is_some_and(|k| !k.trim().is_empty());
        if endpoint.require_api_key && !has_key {
            return Err(ExtractError::Configuration(format!(
                "endpoint {} requires an API key but none was provided",
                endpoint.base_url
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(endpoint.timeout_secs))
            .build()
            .map_err(|e| ExtractError::Configuration(format!("HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint,
            max_tokens,
            temperature,
        })
    }

    /// JSON body of a chat-completions request.
    pub fn request_body(&self, request: &CompletionRequest) -> Value {
        let mut content = vec![json!({ "type": "text", "text": request.prompt })];
        for image in &request.images {
            content.push(json!({
                "type": "image_url",
                "image_url": { "url": data_url(image) },
            }));
        }

        let mut messages = Vec::with_capacity(2);
        if let Some(ref sys) = request.system_prompt {
            messages.push(json!({ "role": "system", "content": sys }));
        }
        messages.push(json!({ "role": "user", "content": content }));

        let mut body = json!({
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
            "messages": messages,
        });
        if let Some(ref model) = self.endpoint.model {
            body["model"] = json!(model);
        }
        if let Some(ref schema) = request.response_schema {
            let name = schema
                .get("title")
                .and_then(Value::as_str)
                .unwrap_or("extraction");
            body["response_format"] = json!({
                "type": "json_schema",
                "json_schema": { "name": name, "schema": schema, "strict": true },
            });
        }
        body
    }
}

#[async_trait]
impl ModelClient for HttpModelClient {
    async fn complete(&self, request: CompletionRequest) -> Result<String, ExtractError> {
        let start = Instant::now();
        let body = self.request_body(&request);

        let mut builder = self.client.post(self.endpoint.completions_url()).json(&body);
        if let Some(ref key) = self.endpoint.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| ExtractError::Upstream {
            status: None,
            body: if e.is_timeout() {
                format!("request timed out after {}s", self.endpoint.timeout_secs)
            } else {
                e.to_string()
            },
        })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| ExtractError::Upstream {
            status: Some(status.as_u16()),
            body: e.to_string(),
        })?;

        if !status.is_success() {
            return Err(ExtractError::Upstream {
                status: Some(status.as_u16()),
                body: text,
            });
        }

        let content = message_content(&text).ok_or_else(|| ExtractError::Upstream {
            status: Some(status.as_u16()),
            body: format!("response has no choices[0].message.content: {text}"),
        })?;

        debug!(
            "Endpoint call: {} chars in {:?}",
            content.len(),
            start.elapsed()
        );
        Ok(content)
    }
}

/// `choices[0].message.content` of a chat-completions response.
fn message_content(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    value
        .get("choices")?
        .get(0)?
        .get("message")?
        .get("content")?
        .as_str()
        .map(str::to_string)
}
