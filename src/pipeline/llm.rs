//! Model Client: one prompt (plus optional images) in, raw text out.
//!
//! [`ModelClient`] is the seam between the pipeline and the outside world.
//! Two implementations ship with the crate:
//!
//! * [`ProviderClient`]: any `edgequake_llm` provider (OpenAI, Anthropic,
//!   Gemini, Ollama, …). Structured output is requested by appending the JSON
//!   Schema to the system prompt.
//! * [`crate::pipeline::http::HttpModelClient`]: a direct OpenAI-compatible
//!   endpoint with native `response_format: json_schema` support.
//!
//! Tests substitute scripted fakes. No client retries: a failed page is
//! dropped by the map stage, and retry policy belongs to the caller.

use crate::config::ExtractionConfig;
use crate::error::ExtractError;
use crate::prompts::schema_instruction;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// A single completion request.
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub prompt: String,
    pub system_prompt: Option<String>,
    pub images: Vec<ImageData>,
    /// JSON Schema the response should follow. A request, not a guarantee.
    pub response_schema: Option<Value>,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    pub fn system(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    pub fn image(mut self, image: ImageData) -> Self {
        self.images.push(image);
        self
    }

    pub fn schema(mut self, schema: Value) -> Self {
        self.response_schema = Some(schema);
        self
    }
}

/// Issues completion requests against an external vision-language model.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Send one request and return the model's raw text.
    ///
    /// # Errors
    /// [`ExtractError::Upstream`] for network failures, timeouts and
    /// non-success responses.
    async fn complete(&self, request: CompletionRequest) -> Result<String, ExtractError>;
}

/// [`ModelClient`] backed by an `edgequake_llm` provider.
pub struct ProviderClient {
    provider: Arc<dyn LLMProvider>,
    options: CompletionOptions,
    timeout: Duration,
}

impl ProviderClient {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &ExtractionConfig) -> Self {
        Self {
            provider,
            options: build_options(config),
            timeout: Duration::from_secs(config.api_timeout_secs),
        }
    }

    /// Resolve a provider from the config, then the environment.
    pub fn from_config(config: &ExtractionConfig) -> Result<Self, ExtractError> {
        let provider = resolve_provider(config)?;
        Ok(Self::new(provider, config))
    }
}

#[async_trait]
impl ModelClient for ProviderClient {
    async fn complete(&self, request: CompletionRequest) -> Result<String, ExtractError> {
        let start = Instant::now();

        let system_prompt = match (&request.system_prompt, &request.response_schema) {
            (Some(sys), Some(schema)) => Some(format!("{sys}\n\n{}", schema_instruction(schema))),
            (None, Some(schema)) => Some(schema_instruction(schema)),
            (sys, None) => sys.clone(),
        };

        let mut messages = Vec::with_capacity(2);
        if let Some(sys) = system_prompt {
            messages.push(ChatMessage::system(sys));
        }
        messages.push(ChatMessage::user_with_images(
            request.prompt.as_str(),
            request.images,
        ));

        let response = tokio::time::timeout(
            self.timeout,
            self.provider.chat(&messages, Some(&self.options)),
        )
        .await
        .map_err(|_| ExtractError::Upstream {
            status: None,
            body: format!("request timed out after {}s", self.timeout.as_secs()),
        })?
        .map_err(|e| ExtractError::Upstream {
            status: None,
            body: e.to_string(),
        })?;

        debug!(
            "Model call: {} input tokens, {} output tokens, {:?}",
            response.prompt_tokens,
            response.completion_tokens,
            start.elapsed()
        );
        Ok(response.content)
    }
}

fn build_options(config: &ExtractionConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}

fn create_vision_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, ExtractError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        ExtractError::Configuration(format!("provider '{provider_name}': {e}"))
    })
}

/// Resolve the LLM provider, most specific first:
///
/// 1. a pre-built `config.provider`;
/// 2. `config.provider_name` (+ `config.model`);
/// 3. `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL` from the environment;
/// 4. `ProviderFactory::from_env()` auto-detection.
///
/// Fails with [`ExtractError::Configuration`] before any network call when
/// nothing usable is configured.
fn resolve_provider(config: &ExtractionConfig) -> Result<Arc<dyn LLMProvider>, ExtractError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or("gpt-4.1-mini");
        return create_vision_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_vision_provider(&prov, &model);
        }
    }

    let (llm_provider, _embedding) = ProviderFactory::from_env().map_err(|e| {
        ExtractError::Configuration(format!(
            "no LLM provider could be auto-detected from the environment. \
             Set OPENAI_API_KEY / ANTHROPIC_API_KEY, pass a provider name, \
             or configure a model endpoint. ({e})"
        ))
    })?;
    Ok(llm_provider)
}
