//! Configuration types for document extraction.
//!
//! All pipeline behaviour is controlled through [`ExtractionConfig`], built
//! via its [`ExtractionConfigBuilder`]. Credentials and the endpoint URL live
//! in [`ModelEndpoint`] and are handed to the model client constructor, never
//! read from process-wide state inside the pipeline.

use crate::archive::OutputArchive;
use crate::error::ExtractError;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Upper bound for [`ExtractionConfig::max_rendered_pixels`]; pdfium takes
/// the edge as an `i32`.
pub const MAX_RENDERED_PIXELS: u32 = 16_384;

/// Configuration for an extraction request.
///
/// # Example
/// ```rust
/// use edgequake_extract::{ExtractionConfig, MergeStrategy};
///
/// let config = ExtractionConfig::builder()
///     .merge_strategy(MergeStrategy::Incremental)
///     .api_timeout_secs(30)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ExtractionConfig {
    /// Longest edge, in pixels, of a rasterised PDF page. Default: 2000.
    pub max_rendered_pixels: u32,

    /// Normaliser budget for images that are the subject of the request
    /// (an uploaded photo, a rendered page). Default: 2048.
    pub primary_max_dimension: u32,

    /// Normaliser budget for supporting figures attached next to extracted
    /// text in the hybrid PDF flow. Default: 1024.
    pub figure_max_dimension: u32,

    /// Upper bound on in-flight model calls during the map stage.
    /// `None` (default) issues every page at once.
    pub concurrency: Option<usize>,

    /// How per-page partial extractions are consolidated. Default: Batch.
    pub merge_strategy: MergeStrategy,

    /// LLM model identifier for the provider route.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Direct OpenAI-compatible endpoint. Takes precedence over every
    /// provider setting when present.
    pub endpoint: Option<ModelEndpoint>,

    /// Sampling temperature. Default: 0.0.
    pub temperature: f32,

    /// Maximum tokens the model may generate per call. Default: 1000.
    pub max_tokens: usize,

    /// Per-call timeout in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Progress events for pages and merge steps.
    pub progress_callback: Option<ProgressCallback>,

    /// Where raw outputs are persisted after a successful request.
    pub archive: Option<Arc<dyn OutputArchive>>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            max_rendered_pixels: 2000,
            primary_max_dimension: 2048,
            figure_max_dimension: 1024,
            concurrency: None,
            merge_strategy: MergeStrategy::default(),
            model: None,
            provider_name: None,
            provider: None,
            endpoint: None,
            temperature: 0.0,
            max_tokens: 1000,
            api_timeout_secs: 60,
            download_timeout_secs: 120,
            password: None,
            progress_callback: None,
            archive: None,
        }
    }
}

impl fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("primary_max_dimension", &self.primary_max_dimension)
            .field("figure_max_dimension", &self.figure_max_dimension)
            .field("concurrency", &self.concurrency)
            .field("merge_strategy", &self.merge_strategy)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("endpoint", &self.endpoint)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("archive", &self.archive.as_ref().map(|_| "<dyn OutputArchive>"))
            .finish()
    }
}

impl ExtractionConfig {
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }

    /// Normaliser budget for an image in the given role.
    pub fn max_dimension(&self, role: ImageRole) -> u32 {
        match role {
            ImageRole::Primary => self.primary_max_dimension,
            ImageRole::Figure => self.figure_max_dimension,
        }
    }
}

/// Builder for [`ExtractionConfig`].
#[derive(Debug)]
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl ExtractionConfigBuilder {
    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.clamp(100, MAX_RENDERED_PIXELS);
        self
    }

    pub fn primary_max_dimension(mut self, px: u32) -> Self {
        self.config.primary_max_dimension = px;
        self
    }

    pub fn figure_max_dimension(mut self, px: u32) -> Self {
        self.config.figure_max_dimension = px;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = Some(n.max(1));
        self
    }

    pub fn merge_strategy(mut self, strategy: MergeStrategy) -> Self {
        self.config.merge_strategy = strategy;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn endpoint(mut self, endpoint: ModelEndpoint) -> Self {
        self.config.endpoint = Some(endpoint);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    pub fn archive(mut self, archive: Arc<dyn OutputArchive>) -> Self {
        self.config.archive = Some(archive);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, ExtractError> {
        let c = &self.config;
        if c.primary_max_dimension < 64 || c.figure_max_dimension < 64 {
            return Err(ExtractError::InvalidConfig(format!(
                "image budgets must be ≥ 64 px, got primary={} figure={}",
                c.primary_max_dimension, c.figure_max_dimension
            )));
        }
        if c.figure_max_dimension > c.primary_max_dimension {
            return Err(ExtractError::InvalidConfig(format!(
                "figure budget ({}) must not exceed primary budget ({})",
                c.figure_max_dimension, c.primary_max_dimension
            )));
        }
        if c.api_timeout_secs == 0 {
            return Err(ExtractError::InvalidConfig(
                "API timeout must be ≥ 1 second".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Model endpoint ───────────────────────────────────────────────────────

/// Connection settings for an OpenAI-compatible chat-completions endpoint
/// (llama.cpp server, vLLM, LM Studio, OpenAI itself).
#[derive(Clone, Serialize, Deserialize)]
pub struct ModelEndpoint {
    /// Base URL without the `/v1/chat/completions` suffix.
    pub base_url: String,
    pub api_key: Option<String>,
    /// Fail with [`ExtractError::Configuration`] when `api_key` is absent.
    pub require_api_key: bool,
    pub model: Option<String>,
    pub timeout_secs: u64,
}

impl ModelEndpoint {
    pub const DEFAULT_BASE_URL: &'static str = "http://127.0.0.1:8081";

    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
            require_api_key: false,
            model: None,
            timeout_secs: 60,
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn requiring_api_key(mut self) -> Self {
        self.require_api_key = true;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn completions_url(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

impl Default for ModelEndpoint {
    fn default() -> Self {
        Self::new(Self::DEFAULT_BASE_URL)
    }
}

impl fmt::Debug for ModelEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelEndpoint")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("require_api_key", &self.require_api_key)
            .field("model", &self.model)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// How N per-page partial extractions become one record.
///
/// | Strategy | Model calls | Notes |
/// |----------|-------------|-------|
/// | `Batch` | 1 | all partials in one consolidation prompt |
/// | `Incremental` | N−1 | left fold, strictly sequential |
/// | `Deterministic` | 0 | local rule set only |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    #[default]
    Batch,
    Incremental,
    Deterministic,
}

/// Which normaliser budget applies to an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageRole {
    /// The image is the thing being read.
    Primary,
    /// The image supports an already-extracted text layer.
    Figure,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ExtractionConfig::default();
        assert_eq!(config.concurrency, None);
        assert_eq!(config.merge_strategy, MergeStrategy::Batch);
        assert_eq!(config.api_timeout_secs, 60);
        assert!(config.max_dimension(ImageRole::Primary) > config.max_dimension(ImageRole::Figure));
    }

    #[test]
    fn builder_clamps_and_validates() {
        let config = ExtractionConfig::builder()
            .concurrency(0)
            .temperature(9.0)
            .build()
            .unwrap();
        assert_eq!(config.concurrency, Some(1));
        assert_eq!(config.temperature, 2.0);

        let huge = ExtractionConfig::builder()
            .max_rendered_pixels(u32::MAX)
            .build()
            .unwrap();
        assert_eq!(huge.max_rendered_pixels, MAX_RENDERED_PIXELS);
        let tiny = ExtractionConfig::builder().max_rendered_pixels(1).build().unwrap();
        assert_eq!(tiny.max_rendered_pixels, 100);

        let err = ExtractionConfig::builder()
            .primary_max_dimension(512)
            .figure_max_dimension(1024)
            .build()
            .unwrap_err();
        assert!(matches!(err, ExtractError::InvalidConfig(_)));

        let err = ExtractionConfig::builder().api_timeout_secs(0).build().unwrap_err();
        assert!(err.to_string().contains("timeout"));
    }

    #[test]
    fn endpoint_url_and_redaction() {
        let endpoint = ModelEndpoint::new("http://localhost:8081/").with_api_key("sk-secret");
        assert_eq!(
            endpoint.completions_url(),
            "http://localhost:8081/v1/chat/completions"
        );
        let debug = format!("{endpoint:?}");
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("<redacted>"));
    }
}
