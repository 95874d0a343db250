//! Error types for the edgequake-extract library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`ExtractError`]: **Fatal**: the request cannot produce a result
//!   (unsupported input, nothing rendered, model not configured, every page
//!   failed, the merged record is invalid). Returned as `Err(ExtractError)`
//!   from every [`crate::Extractor`] entry point.
//!
//! * [`PageError`]: **Non-fatal**: a single page failed (upstream error,
//!   unparseable model output) while other pages succeeded. Stored inside
//!   [`crate::output::PageOutcome`] so operators can see which pages
//!   contributed to the final record.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-extract library.
#[derive(Debug, Error)]
pub enum ExtractError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Input file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'")]
    DownloadTimeout { url: String, secs: u64 },

    /// The payload is neither a PDF nor a supported raster image.
    #[error("Unsupported media type '{media_type}': expected application/pdf or image/*")]
    UnsupportedMediaType { media_type: String },

    // ── Rendering ─────────────────────────────────────────────────────────
    /// Page rasterisation produced nothing usable.
    #[error("Rendering failed: {detail}")]
    RenderFailure { detail: String },

    // ── Model errors ──────────────────────────────────────────────────────
    /// Required credentials or provider settings are missing.
    /// Raised before any network call is attempted.
    #[error("Model client is not configured: {0}")]
    Configuration(String),

    /// Network failure, timeout, or non-success status from the model endpoint.
    #[error("Upstream model error{}: {body}", fmt_status(.status))]
    Upstream { status: Option<u16>, body: String },

    /// No JSON object could be recovered from the model output.
    #[error("Could not recover a JSON object from model output ({} bytes): {}", .raw.len(), excerpt(.raw))]
    ParseFailure { raw: String },

    /// Every page failed during the map stage.
    #[error("No usable extraction: all {total} pages failed.\nFirst error: {first_error}")]
    NoUsableExtraction { total: usize, first_error: String },

    // ── Validation ────────────────────────────────────────────────────────
    /// The merged record violates its schema or the banking jurisdiction rule.
    #[error("Record failed validation for schema '{schema}': {}", join_violations(.violations))]
    Validation {
        schema: String,
        violations: Vec<FieldViolation>,
    },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write an archived output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ExtractError {
    /// Short machine-friendly name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            ExtractError::FileNotFound { .. } => "FileNotFound",
            ExtractError::PermissionDenied { .. } => "PermissionDenied",
            ExtractError::DownloadFailed { .. } => "DownloadFailed",
            ExtractError::DownloadTimeout { .. } => "DownloadTimeout",
            ExtractError::UnsupportedMediaType { .. } => "UnsupportedMediaType",
            ExtractError::RenderFailure { .. } => "RenderFailure",
            ExtractError::Configuration(_) => "ConfigurationError",
            ExtractError::Upstream { .. } => "UpstreamError",
            ExtractError::ParseFailure { .. } => "ParseFailure",
            ExtractError::NoUsableExtraction { .. } => "NoUsableExtraction",
            ExtractError::Validation { .. } => "ValidationError",
            ExtractError::OutputWriteFailed { .. } => "OutputWriteFailed",
            ExtractError::InvalidConfig(_) => "InvalidConfig",
            ExtractError::Internal(_) => "Internal",
        }
    }
}

/// One violated field reported by the schema validator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldViolation {
    pub field: String,
    pub reason: String,
}

impl FieldViolation {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for FieldViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.reason)
    }
}

fn fmt_status(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {s})")).unwrap_or_default()
}

fn join_violations(violations: &[FieldViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

fn excerpt(raw: &str) -> String {
    const MAX: usize = 200;
    if raw.chars().count() <= MAX {
        raw.to_string()
    } else {
        let head: String = raw.chars().take(MAX).collect();
        format!("{head}…")
    }
}

/// A non-fatal error for a single page.
///
/// Stored alongside [`crate::output::PageOutcome`] when a page fails.
/// The request continues unless ALL pages fail.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
pub enum PageError {
    /// The model call for this page failed (network, timeout, HTTP status).
    #[error("Page {page}: model call failed: {detail}")]
    ModelFailed { page: usize, detail: String },

    /// The model answered, but no JSON object could be recovered.
    #[error("Page {page}: model output was not parseable JSON")]
    Unparseable { page: usize, raw: String },

    /// Image normalisation failed for this page.
    #[error("Page {page}: image encoding failed: {detail}")]
    EncodeFailed { page: usize, detail: String },
}

impl PageError {
    /// Classify a fatal error raised while processing one page (1-indexed).
    pub fn from_extract(page: usize, err: ExtractError) -> Self {
        match err {
            ExtractError::ParseFailure { raw } => PageError::Unparseable { page, raw },
            ExtractError::RenderFailure { detail } => PageError::EncodeFailed { page, detail },
            other => PageError::ModelFailed {
                page,
                detail: other.to_string(),
            },
        }
    }
}
