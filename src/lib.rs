//! # edgequake-extract
//!
//! Extract validated structured records (and plain transcriptions) from
//! scanned documents and PDFs using Vision Language Models.
//!
//! ## Pipeline Overview
//!
//! ```text
//! Document (PDF or image)
//!  │
//!  ├─ 1. Render     one raster per page (pdfium, spawn_blocking)
//!  ├─ 2. Normalise  longest edge bounded, JPEG q85
//!  ├─ 3. Map        one VLM call per page, all concurrently; failed pages dropped
//!  ├─ 4. Parse      JSON recovered from prose / fences / brace spans
//!  ├─ 5. Reduce     batch, incremental (left fold) or deterministic merge
//!  └─ 6. Validate   defaults, coercion, IBAN vs. BSB jurisdiction rule
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_extract::{Document, ExtractionConfig, ExtractionTask, Extractor, ModelEndpoint};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // A local llama.cpp / vLLM server speaking the OpenAI chat API.
//!     let config = ExtractionConfig::builder()
//!         .endpoint(ModelEndpoint::new("http://127.0.0.1:8081"))
//!         .build()?;
//!     let extractor = Extractor::from_config(config)?;
//!
//!     let bytes = std::fs::read("offer_letter.pdf")?;
//!     let document = Document::new(bytes, "application/pdf")?;
//!     let output = extractor.extract(&document, &ExtractionTask::offer_letter()).await?;
//!
//!     println!("{}", output.record.to_json_pretty());
//!     eprintln!("{}/{} pages used", output.stats.processed_pages, output.stats.total_pages);
//!     Ok(())
//! }
//! ```
//!
//! Without an endpoint, an `edgequake_llm` provider is resolved from
//! `provider_name`/`model` or auto-detected from `OPENAI_API_KEY`,
//! `ANTHROPIC_API_KEY`, `GEMINI_API_KEY` and friends.
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `doc2json` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! ```toml
//! edgequake-extract = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod archive;
pub mod config;
pub mod error;
pub mod extract;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod schema;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use archive::{DirectoryArchive, OutputArchive};
pub use config::{ExtractionConfig, ExtractionConfigBuilder, ImageRole, MergeStrategy, ModelEndpoint};
pub use error::{ExtractError, FieldViolation, PageError};
pub use extract::{ExtractionTask, Extractor, TranscriptionPrompts};
pub use output::{ExtractionOutput, ExtractionStats, PageOutcome, TranscriptionOutput};
pub use pipeline::input::{Document, MediaType};
pub use pipeline::llm::{CompletionRequest, ModelClient};
pub use progress::{ExtractionProgressCallback, NoopProgressCallback, ProgressCallback};
pub use schema::{DocumentSchema, FieldKind, FieldSpec, NationalId, OfferLetter, ValidatedRecord};
