//! Pipeline stages for document extraction.
//!
//! Each submodule implements one step and is testable on its own; the
//! [`crate::Extractor`] wires them together.
//!
//! ## Data Flow
//!
//! ```text
//! input ─▶ render ─▶ encode ─▶ map ──────────────▶ merge ─▶ validate
//! (bytes)  (pdfium)  (JPEG)    (llm/http + parse)  (rules)  (schema)
//! ```
//!
//! 1. [`input`]: identify the payload (PDF or raster image), load paths and URLs
//! 2. [`render`]: one page image per page; pdfium runs in `spawn_blocking`
//! 3. [`encode`]: bound the longest edge and re-encode as JPEG
//! 4. [`llm`] / [`http`]: the model client seam
//! 5. [`parse`]: recover a JSON object from whatever the model said
//! 6. [`map`]: concurrent per-page extraction, failed pages dropped
//! 7. [`merge`] + [`rules`]: consolidate partials into one record
//! 8. [`validate`]: defaults, coercion and the banking jurisdiction check
//!
//! The OCR flows reuse `input`, `render`, `encode` and `llm`, then finish
//! with [`postprocess`] instead of parsing.

pub mod encode;
pub mod http;
pub mod input;
pub mod llm;
pub mod map;
pub mod merge;
pub mod parse;
pub mod postprocess;
pub mod render;
pub mod rules;
pub mod validate;
