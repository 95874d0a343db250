//! Extraction entry points.
//!
//! [`Extractor`] owns the configuration and a [`ModelClient`] and runs the
//! stages in [`crate::pipeline`] for one request at a time:
//!
//! * [`Extractor::extract`]: render, normalise, map, reduce, validate;
//! * [`Extractor::ocr_image`], [`Extractor::ocr_scanned_pdf`] and
//!   [`Extractor::ocr_pdf_hybrid`]: free-text transcription.
//!
//! Every entry point returns `Ok` even when some pages were dropped; the
//! per-page story is in the returned `pages` list and in the logs.

use crate::config::{ExtractionConfig, ImageRole};
use crate::error::{ExtractError, PageError};
use crate::output::{ExtractionOutput, ExtractionStats, PageOutcome, TranscriptionOutput};
use crate::pipeline::http::HttpModelClient;
use crate::pipeline::input::{self, Document};
use crate::pipeline::llm::{CompletionRequest, ModelClient, ProviderClient};
use crate::pipeline::{encode, map, merge, postprocess, render, rules, validate};
use crate::prompts;
use crate::schema::DocumentSchema;
use edgequake_llm::ImageData;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// What to extract and how to ask for it.
#[derive(Debug, Clone)]
pub struct ExtractionTask {
    pub schema: DocumentSchema,
    pub system_prompt: String,
    /// Per-page user prompt; `{page}` becomes the 1-indexed page number.
    pub page_prompt: String,
    /// File-name prefix for archived outputs.
    pub archive_prefix: String,
}

impl ExtractionTask {
    pub fn offer_letter() -> Self {
        Self {
            schema: DocumentSchema::offer_letter(),
            system_prompt: prompts::OFFER_LETTER_SYSTEM_PROMPT.to_string(),
            page_prompt: prompts::PAGE_PROMPT_TEMPLATE.to_string(),
            archive_prefix: "offer_letter".to_string(),
        }
    }

    pub fn national_id() -> Self {
        Self {
            schema: DocumentSchema::national_id(),
            system_prompt: prompts::NATIONAL_ID_SYSTEM_PROMPT.to_string(),
            page_prompt: prompts::NATIONAL_ID_PROMPT.to_string(),
            archive_prefix: "national_id".to_string(),
        }
    }

    /// Caller-defined schema with the generic prompts.
    pub fn generic(schema: DocumentSchema) -> Self {
        Self {
            system_prompt: prompts::generic_system_prompt(&schema),
            page_prompt: prompts::PAGE_PROMPT_TEMPLATE.to_string(),
            archive_prefix: schema.name.clone(),
            schema,
        }
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = system_prompt.into();
        self
    }

    pub fn with_page_prompt(mut self, page_prompt: impl Into<String>) -> Self {
        self.page_prompt = page_prompt.into();
        self
    }
}

/// Prompt overrides for the transcription flows. `None` uses the defaults.
#[derive(Debug, Clone, Default)]
pub struct TranscriptionPrompts {
    pub prompt: Option<String>,
    pub system_prompt: Option<String>,
}

impl TranscriptionPrompts {
    fn system(&self) -> String {
        self.system_prompt
            .clone()
            .unwrap_or_else(|| prompts::DEFAULT_OCR_SYSTEM_PROMPT.to_string())
    }
}

/// Runs extraction and transcription requests against one model client.
pub struct Extractor {
    config: ExtractionConfig,
    client: Arc<dyn ModelClient>,
}

impl Extractor {
    pub fn new(config: ExtractionConfig, client: Arc<dyn ModelClient>) -> Self {
        Self { config, client }
    }

    /// Build the model client described by `config`.
    ///
    /// A configured [`crate::config::ModelEndpoint`] selects the direct HTTP
    /// client (its timeout is replaced by `api_timeout_secs`); otherwise an
    /// `edgequake_llm` provider is resolved.
    ///
    /// # Errors
    /// [`ExtractError::Configuration`] when credentials are missing. No
    /// network call is made.
    pub fn from_config(config: ExtractionConfig) -> Result<Self, ExtractError> {
        let client: Arc<dyn ModelClient> = match config.endpoint {
            Some(ref endpoint) => Arc::new(HttpModelClient::new(
                endpoint.clone().with_timeout_secs(config.api_timeout_secs),
                config.max_tokens,
                config.temperature,
            )?),
            None => Arc::new(ProviderClient::from_config(&config)?),
        };
        Ok(Self::new(config, client))
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    /// Load `input` (path or URL) and run [`Extractor::extract`].
    pub async fn extract_from_path(
        &self,
        input: &str,
        task: &ExtractionTask,
    ) -> Result<ExtractionOutput, ExtractError> {
        let document = input::load(input, self.config.download_timeout_secs).await?;
        self.extract(&document, task).await
    }

    /// Extract one validated record from a document.
    ///
    /// # Errors
    /// Any fatal [`ExtractError`]; dropped pages are not errors unless every
    /// page is dropped ([`ExtractError::NoUsableExtraction`]).
    pub async fn extract(
        &self,
        document: &Document,
        task: &ExtractionTask,
    ) -> Result<ExtractionOutput, ExtractError> {
        let total_start = Instant::now();
        info!(
            "Extracting '{}' from {} ({})",
            task.schema.name,
            document.name(),
            document.media_type().mime()
        );

        let render_start = Instant::now();
        let pages = render::render(document, &self.config).await?;
        let render_duration_ms = render_start.elapsed().as_millis() as u64;

        let mut output = self.extract_pages(pages, task).await?;
        output.stats.render_duration_ms = render_duration_ms;
        output.stats.total_duration_ms = total_start.elapsed().as_millis() as u64;
        Ok(output)
    }

    /// Extract one validated record from already rendered pages.
    pub async fn extract_pages(
        &self,
        pages: Vec<render::Page>,
        task: &ExtractionTask,
    ) -> Result<ExtractionOutput, ExtractError> {
        let total_start = Instant::now();
        let progress = self.config.progress_callback.as_ref();
        let total_pages = pages.len();
        if total_pages == 0 {
            return Err(ExtractError::RenderFailure {
                detail: "no pages to extract from".into(),
            });
        }
        if let Some(cb) = progress {
            cb.on_extraction_start(total_pages);
        }

        // ── Normalise ────────────────────────────────────────────────────
        let (images, mut outcomes) = self.normalize_pages(&pages, total_pages);
        if images.is_empty() {
            return Err(no_usable(total_pages, &outcomes));
        }

        // ── Map ──────────────────────────────────────────────────────────
        let map_start = Instant::now();
        let mapped = map::map_pages(
            self.client.as_ref(),
            images,
            task,
            self.config.concurrency,
            progress,
        )
        .await
        .map_err(|e| match e {
            ExtractError::NoUsableExtraction { first_error, .. } => {
                ExtractError::NoUsableExtraction {
                    total: total_pages,
                    first_error,
                }
            }
            other => other,
        })?;
        let map_duration_ms = map_start.elapsed().as_millis() as u64;
        outcomes.extend(mapped.outcomes);
        outcomes.sort_by_key(|o| o.page_num);

        // ── Reduce ───────────────────────────────────────────────────────
        let reduce_start = Instant::now();
        let merged = merge::reduce(
            self.client.as_ref(),
            &mapped.partials,
            &task.schema,
            self.config.merge_strategy,
            progress,
        )
        .await?;
        let reduce_duration_ms = reduce_start.elapsed().as_millis() as u64;

        // ── Validate ─────────────────────────────────────────────────────
        let mut fields = merged.fields;
        if task.schema.banking_jurisdiction {
            rules::apply_banking_rules(&mut fields);
        }
        let record = validate::validate(&fields, &task.schema)?;

        let processed_pages = mapped.partials.len();
        let stats = ExtractionStats {
            total_pages,
            processed_pages,
            failed_pages: total_pages - processed_pages,
            merge_calls: merged.merge_calls,
            render_duration_ms: 0,
            map_duration_ms,
            reduce_duration_ms,
            total_duration_ms: total_start.elapsed().as_millis() as u64,
        };
        info!(
            "Extraction complete: {}/{} pages, {} merge calls, {}ms total",
            processed_pages, total_pages, stats.merge_calls, stats.total_duration_ms
        );

        self.archive(&task.archive_prefix, &record.to_json_pretty()).await;
        if let Some(cb) = progress {
            cb.on_extraction_complete(total_pages, processed_pages);
        }

        Ok(ExtractionOutput {
            record,
            pages: outcomes,
            stats,
        })
    }

    /// Transcribe a single image.
    ///
    /// # Errors
    /// [`ExtractError::UnsupportedMediaType`] for PDFs; upstream failures
    /// propagate unchanged since there is no other page to fall back on.
    pub async fn ocr_image(
        &self,
        document: &Document,
        overrides: &TranscriptionPrompts,
    ) -> Result<TranscriptionOutput, ExtractError> {
        if document.media_type().is_pdf() {
            return Err(ExtractError::UnsupportedMediaType {
                media_type: document.media_type().mime().to_string(),
            });
        }
        let total_start = Instant::now();

        let pages = render::render(document, &self.config).await?;
        let page = pages.first().ok_or_else(|| ExtractError::RenderFailure {
            detail: format!("'{}' produced no pages", document.name()),
        })?;
        let image = encode::normalize(&page.raster, self.config.max_dimension(ImageRole::Primary))?;

        let request = CompletionRequest::new(
            overrides
                .prompt
                .clone()
                .unwrap_or_else(|| prompts::DEFAULT_OCR_PROMPT.to_string()),
        )
        .system(overrides.system())
        .image(image);

        let map_start = Instant::now();
        let text = self.client.complete(request).await?;
        let map_duration_ms = map_start.elapsed().as_millis() as u64;

        let pages = vec![PageOutcome {
            page_num: 1,
            output_len: text.len(),
            duration_ms: map_duration_ms,
            error: None,
        }];
        let stats = ExtractionStats {
            total_pages: 1,
            processed_pages: 1,
            map_duration_ms,
            total_duration_ms: total_start.elapsed().as_millis() as u64,
            ..Default::default()
        };

        self.archive("ocr", &text).await;
        Ok(TranscriptionOutput { text, pages, stats })
    }

    /// Transcribe every page of a scanned PDF from its rendered images.
    pub async fn ocr_scanned_pdf(
        &self,
        document: &Document,
        overrides: &TranscriptionPrompts,
    ) -> Result<TranscriptionOutput, ExtractError> {
        require_pdf(document)?;
        let total_start = Instant::now();

        let render_start = Instant::now();
        let pages = render::render(document, &self.config).await?;
        let total_pages = pages.len();
        let render_duration_ms = render_start.elapsed().as_millis() as u64;
        if let Some(cb) = self.config.progress_callback.as_ref() {
            cb.on_extraction_start(total_pages);
        }

        let (images, encode_failures) = self.normalize_pages(&pages, total_pages);
        let system = overrides.system();
        let requests = images
            .into_iter()
            .map(|(index, image)| {
                let request = CompletionRequest::new(prompts::scanned_page_prompt(index + 1))
                    .system(system.clone())
                    .image(image);
                (index, request)
            })
            .collect();

        let mut output = self
            .transcribe(requests, total_pages, encode_failures, "scanned_pdf")
            .await?;
        output.stats.render_duration_ms = render_duration_ms;
        output.stats.total_duration_ms = total_start.elapsed().as_millis() as u64;
        Ok(output)
    }

    /// Transcribe a PDF from its text layer, attaching at most one embedded
    /// figure per page at the figure budget.
    pub async fn ocr_pdf_hybrid(
        &self,
        document: &Document,
        overrides: &TranscriptionPrompts,
    ) -> Result<TranscriptionOutput, ExtractError> {
        require_pdf(document)?;
        let total_start = Instant::now();

        let render_start = Instant::now();
        let contents = render::extract_text_and_figures(document, &self.config).await?;
        let total_pages = contents.len();
        let render_duration_ms = render_start.elapsed().as_millis() as u64;
        if let Some(cb) = self.config.progress_callback.as_ref() {
            cb.on_extraction_start(total_pages);
        }

        let figure_budget = self.config.max_dimension(ImageRole::Figure);
        let user_prompt = overrides.prompt.clone().unwrap_or_default();
        let system = overrides.system();

        let requests = contents
            .iter()
            .map(|content| {
                let figure = content.figures.first().and_then(|figure| {
                    encode::normalize_image(figure, figure_budget)
                        .map_err(|e| warn!("Page {}: figure dropped: {}", content.index + 1, e))
                        .ok()
                });
                let prompt = prompts::hybrid_page_prompt(
                    content.index + 1,
                    &content.text,
                    usize::from(figure.is_some()),
                    &user_prompt,
                );
                let mut request = CompletionRequest::new(prompt).system(system.clone());
                if let Some(image) = figure {
                    request = request.image(image);
                }
                (content.index, request)
            })
            .collect();

        let mut output = self
            .transcribe(requests, total_pages, Vec::new(), "pdf_hybrid")
            .await?;
        output.stats.render_duration_ms = render_duration_ms;
        output.stats.total_duration_ms = total_start.elapsed().as_millis() as u64;
        Ok(output)
    }

    /// Normalise page rasters at the primary budget. Pages that cannot be
    /// encoded are reported as failed outcomes.
    fn normalize_pages(
        &self,
        pages: &[render::Page],
        total_pages: usize,
    ) -> (Vec<(usize, ImageData)>, Vec<PageOutcome>) {
        let max_dimension = self.config.max_dimension(ImageRole::Primary);
        let mut images = Vec::with_capacity(pages.len());
        let mut failures = Vec::new();

        for page in pages {
            match encode::normalize(&page.raster, max_dimension) {
                Ok(image) => images.push((page.index, image)),
                Err(e) => {
                    let error = PageError::from_extract(page.number(), e);
                    warn!("{}", error);
                    if let Some(cb) = self.config.progress_callback.as_ref() {
                        cb.on_page_error(page.number(), total_pages, &error.to_string());
                    }
                    failures.push(PageOutcome {
                        page_num: page.number(),
                        output_len: 0,
                        duration_ms: 0,
                        error: Some(error),
                    });
                }
            }
        }
        debug!("Normalised {}/{} pages", images.len(), pages.len());
        (images, failures)
    }

    /// Run transcription requests concurrently, dropping failed pages.
    async fn transcribe(
        &self,
        requests: Vec<(usize, CompletionRequest)>,
        total_pages: usize,
        mut outcomes: Vec<PageOutcome>,
        archive_prefix: &str,
    ) -> Result<TranscriptionOutput, ExtractError> {
        let client = self.client.as_ref();
        let progress = self.config.progress_callback.as_ref();

        let map_start = Instant::now();
        let results = map::fan_out(requests, self.config.concurrency, |(index, request)| async move {
            if let Some(cb) = progress {
                cb.on_page_start(index + 1, total_pages);
            }
            let start = Instant::now();
            let result = match client.complete(request).await {
                Ok(text) if text.trim().is_empty() => Err(ExtractError::Upstream {
                    status: None,
                    body: "model returned an empty transcription".into(),
                }),
                other => other,
            };
            (index, result, start.elapsed().as_millis() as u64)
        })
        .await;
        let map_duration_ms = map_start.elapsed().as_millis() as u64;

        let mut texts = Vec::with_capacity(results.len());
        for (index, result, duration_ms) in results {
            let page_num = index + 1;
            match result {
                Ok(raw) => {
                    let text = postprocess::clean_markdown(&raw);
                    if let Some(cb) = progress {
                        cb.on_page_complete(page_num, total_pages, text.len());
                    }
                    outcomes.push(PageOutcome {
                        page_num,
                        output_len: text.len(),
                        duration_ms,
                        error: None,
                    });
                    texts.push((page_num, text));
                }
                Err(e) => {
                    let error = PageError::from_extract(page_num, e);
                    warn!("{}; page dropped", error);
                    if let Some(cb) = progress {
                        cb.on_page_error(page_num, total_pages, &error.to_string());
                    }
                    outcomes.push(PageOutcome {
                        page_num,
                        output_len: 0,
                        duration_ms,
                        error: Some(error),
                    });
                }
            }
        }
        outcomes.sort_by_key(|o| o.page_num);

        if texts.is_empty() {
            return Err(no_usable(total_pages, &outcomes));
        }

        let text = postprocess::join_pages(texts.iter().map(|(n, t)| (*n, t.as_str())));
        let processed_pages = texts.len();
        info!(
            "Transcription complete: {}/{} pages in {}ms",
            processed_pages, total_pages, map_duration_ms
        );

        self.archive(archive_prefix, &text).await;
        if let Some(cb) = progress {
            cb.on_extraction_complete(total_pages, processed_pages);
        }

        Ok(TranscriptionOutput {
            text,
            pages: outcomes,
            stats: ExtractionStats {
                total_pages,
                processed_pages,
                failed_pages: total_pages - processed_pages,
                map_duration_ms,
                ..Default::default()
            },
        })
    }

    /// Archive failures are logged, never returned.
    async fn archive(&self, prefix: &str, content: &str) {
        if let Some(ref archive) = self.config.archive {
            match archive.save(prefix, content).await {
                Ok(location) => debug!("Archived output to {}", location),
                Err(e) => warn!("Failed to archive output: {}", e),
            }
        }
    }
}

fn require_pdf(document: &Document) -> Result<(), ExtractError> {
    if document.media_type().is_pdf() {
        Ok(())
    } else {
        Err(ExtractError::UnsupportedMediaType {
            media_type: document.media_type().mime().to_string(),
        })
    }
}

fn no_usable(total: usize, outcomes: &[PageOutcome]) -> ExtractError {
    let first_error = outcomes
        .iter()
        .find_map(|o| o.error.as_ref())
        .map(ToString::to_string)
        .unwrap_or_else(|| "no pages to process".to_string());
    ExtractError::NoUsableExtraction { total, first_error }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelEndpoint;

    #[test]
    fn presets() {
        let offer = ExtractionTask::offer_letter();
        assert!(offer.schema.banking_jurisdiction);
        assert_eq!(prompts::page_prompt(&offer.page_prompt, 2), "Extract details from Page 2.");

        let id = ExtractionTask::national_id();
        assert!(id.system_prompt.contains("YYYY-MM-DD"));

        let generic = ExtractionTask::generic(DocumentSchema::national_id())
            .with_page_prompt("Read page {page}.");
        assert_eq!(generic.archive_prefix, "national_id");
        assert!(generic.system_prompt.contains("'full_name'"));
        assert_eq!(prompts::page_prompt(&generic.page_prompt, 1), "Read page 1.");
    }

    #[test]
    fn endpoint_without_required_key_fails_fast() {
        let config = ExtractionConfig::builder()
            .endpoint(ModelEndpoint::new("https://api.example.com").requiring_api_key())
            .build()
            .unwrap();
        let err = Extractor::from_config(config).err().unwrap();
        assert_eq!(err.kind(), "ConfigurationError");
    }

    #[test]
    fn keyless_local_endpoint_builds() {
        let config = ExtractionConfig::builder()
            .endpoint(ModelEndpoint::default())
            .build()
            .unwrap();
        assert!(Extractor::from_config(config).is_ok());
    }

    #[test]
    fn pdf_flows_reject_images() {
        let doc = Document::with_media_type(vec![0u8; 4], input::MediaType::Image(image::ImageFormat::Png));
        assert!(matches!(
            require_pdf(&doc),
            Err(ExtractError::UnsupportedMediaType { .. })
        ));
    }
}
