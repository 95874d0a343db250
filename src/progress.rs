//! Progress events for the map and reduce stages.
//!
//! Inject an [`Arc<dyn ExtractionProgressCallback>`] via
//! [`crate::config::ExtractionConfigBuilder::progress_callback`]. Page events
//! arrive from concurrently running page tasks, so implementations must be
//! `Send + Sync` and guard their own state. Merge-step events are strictly
//! sequential.
//!
//! ```rust
//! use edgequake_extract::{ExtractionProgressCallback, ExtractionConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct Failures(AtomicUsize);
//!
//! impl ExtractionProgressCallback for Failures {
//!     fn on_page_error(&self, page_num: usize, _total: usize, error: &str) {
//!         self.0.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("page {page_num} dropped: {error}");
//!     }
//! }
//!
//! let config = ExtractionConfig::builder()
//!     .progress_callback(Arc::new(Failures(AtomicUsize::new(0))))
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the pipeline as it processes pages and merge steps.
///
/// All methods default to no-ops. Page numbers are 1-indexed.
pub trait ExtractionProgressCallback: Send + Sync {
    /// Called once pages are rendered, before any model call.
    fn on_extraction_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Called just before the model request for a page is sent.
    fn on_page_start(&self, page_num: usize, total_pages: usize) {
        let _ = (page_num, total_pages);
    }

    /// Called when a page produced usable output.
    ///
    /// `output_len` is the number of fields kept for structured extraction,
    /// or the byte length of the transcription for OCR flows.
    fn on_page_complete(&self, page_num: usize, total_pages: usize, output_len: usize) {
        let _ = (page_num, total_pages, output_len);
    }

    /// Called when a page is dropped.
    fn on_page_error(&self, page_num: usize, total_pages: usize, error: &str) {
        let _ = (page_num, total_pages, error);
    }

    /// Called before each model-assisted merge call (`step` is 1-indexed).
    fn on_merge_step(&self, step: usize, total_steps: usize) {
        let _ = (step, total_steps);
    }

    /// Called once after the record is validated (or the transcription assembled).
    fn on_extraction_complete(&self, total_pages: usize, success_count: usize) {
        let _ = (total_pages, success_count);
    }
}

/// Used when no callback is configured.
pub struct NoopProgressCallback;

impl ExtractionProgressCallback for NoopProgressCallback {}

/// Type stored in [`crate::config::ExtractionConfig`].
pub type ProgressCallback = Arc<dyn ExtractionProgressCallback>;
