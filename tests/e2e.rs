//! End-to-end tests against a live vision model.
//!
//! These use real documents in `./test_cases/` and make live model calls.
//! They are gated behind the `E2E_ENABLED` environment variable so they do
//! not run in CI unless explicitly requested. The model is taken from
//! `DOC2JSON_BASE_URL` (an OpenAI-compatible server) when set, otherwise
//! from the provider auto-detected in the environment.
//!
//! Run with:
//!   E2E_ENABLED=1 DOC2JSON_BASE_URL=http://127.0.0.1:8081 cargo test --test e2e -- --nocapture
//!
//! PDF inputs additionally need pdfium (`PDFIUM_LIB_PATH` or a system install).

use edgequake_extract::{
    Document, ExtractionConfig, ExtractionTask, Extractor, MergeStrategy, ModelEndpoint,
    OfferLetter, TranscriptionPrompts,
};
use std::path::PathBuf;

// ── Test helpers ─────────────────────────────────────────────────────────────

fn test_cases_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("test_cases")
}

/// Skip this test if E2E_ENABLED is not set or the document at `path` is missing.
macro_rules! e2e_skip_unless_ready {
    ($path:expr) => {{
        if std::env::var("E2E_ENABLED").is_err() {
            println!("SKIP: set E2E_ENABLED=1 to run e2e tests");
            return;
        }
        let p: PathBuf = $path;
        if !p.exists() {
            println!("SKIP: test file not found: {}", p.display());
            return;
        }
        p
    }};
}

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "edgequake_extract=debug".into()),
        )
        .with_test_writer()
        .try_init();
}

fn live_extractor(strategy: MergeStrategy) -> Extractor {
    init_logging();
    let mut builder = ExtractionConfig::builder()
        .merge_strategy(strategy)
        .concurrency(4);
    if let Ok(base_url) = std::env::var("DOC2JSON_BASE_URL") {
        let mut endpoint = ModelEndpoint::new(base_url);
        if let Ok(key) = std::env::var("DOC2JSON_API_KEY") {
            endpoint = endpoint.with_api_key(key);
        }
        builder = builder.endpoint(endpoint);
    }
    Extractor::from_config(builder.build().unwrap()).expect("model client")
}

// ── Structured extraction ────────────────────────────────────────────────────

#[tokio::test]
async fn offer_letter_pdf_all_strategies() {
    let path = e2e_skip_unless_ready!(test_cases_dir().join("offer_letter.pdf"));

    for strategy in [
        MergeStrategy::Batch,
        MergeStrategy::Incremental,
        MergeStrategy::Deterministic,
    ] {
        let output = live_extractor(strategy)
            .extract_from_path(path.to_str().unwrap(), &ExtractionTask::offer_letter())
            .await
            .unwrap_or_else(|e| panic!("{strategy:?}: {e}"));

        println!("[{strategy:?}] {}", output.record.to_json_pretty());
        println!(
            "[{strategy:?}] {}/{} pages, {} merge calls, {} ms",
            output.stats.processed_pages,
            output.stats.total_pages,
            output.stats.merge_calls,
            output.stats.total_duration_ms
        );

        let letter: OfferLetter = output.record.to_typed().unwrap();
        assert!(!letter.student_name.is_empty(), "[{strategy:?}] no student name");
        assert!(
            !(letter.bsb.is_some() && letter.iban.is_some()),
            "[{strategy:?}] both BSB and IBAN survived"
        );
    }
}

#[tokio::test]
async fn national_id_image() {
    let path = e2e_skip_unless_ready!(test_cases_dir().join("national_id.jpg"));

    let output = live_extractor(MergeStrategy::Batch)
        .extract_from_path(path.to_str().unwrap(), &ExtractionTask::national_id())
        .await
        .expect("extraction");

    println!("{}", output.record.to_json_pretty());
    assert_eq!(output.stats.total_pages, 1);
    assert!(output.record.get_str("id_number").is_some());
}

// ── OCR flows ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn scanned_pdf_transcription() {
    let path = e2e_skip_unless_ready!(test_cases_dir().join("offer_letter.pdf"));

    let bytes = std::fs::read(&path).unwrap();
    let document = Document::new(bytes, "application/pdf").unwrap();
    let output = live_extractor(MergeStrategy::Batch)
        .ocr_scanned_pdf(&document, &TranscriptionPrompts::default())
        .await
        .expect("transcription");

    assert!(output.text.starts_with("--- Page 1 ---\n"));
    assert!(!output.text.contains("\n\n\n\n"));
    println!(
        "✓ {} bytes from {} pages",
        output.text.len(),
        output.stats.processed_pages
    );
}
