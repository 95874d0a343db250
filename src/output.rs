//! Result types returned by the [`crate::Extractor`] entry points.

use crate::error::{ExtractError, PageError};
use crate::schema::ValidatedRecord;
use serde::{Deserialize, Serialize};

/// What happened to one page of the input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageOutcome {
    /// 1-indexed page number.
    pub page_num: usize,
    /// Fields kept after cleaning (structured flows) or output bytes (OCR flows).
    pub output_len: usize,
    pub duration_ms: u64,
    /// `Some` when the page was dropped.
    pub error: Option<PageError>,
}

impl PageOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Counters and per-stage timings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionStats {
    pub total_pages: usize,
    pub processed_pages: usize,
    pub failed_pages: usize,
    /// Model calls issued by the reduce stage.
    pub merge_calls: usize,
    pub render_duration_ms: u64,
    pub map_duration_ms: u64,
    pub reduce_duration_ms: u64,
    pub total_duration_ms: u64,
}

/// Result of a structured extraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionOutput {
    pub record: ValidatedRecord,
    pub pages: Vec<PageOutcome>,
    pub stats: ExtractionStats,
}

impl ExtractionOutput {
    /// Treat any dropped page as an error.
    ///
    /// The pipeline itself tolerates partial failure; callers that need every
    /// page to contribute can opt into strictness here.
    pub fn into_strict(self) -> Result<Self, ExtractError> {
        match self.pages.iter().find_map(|p| p.error.as_ref()) {
            None => Ok(self),
            Some(first) => Err(ExtractError::NoUsableExtraction {
                total: self.stats.total_pages,
                first_error: first.to_string(),
            }),
        }
    }
}

/// Result of a free-text OCR flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionOutput {
    pub text: String,
    pub pages: Vec<PageOutcome>,
    pub stats: ExtractionStats,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn output(pages: Vec<PageOutcome>) -> ExtractionOutput {
        ExtractionOutput {
            record: ValidatedRecord {
                schema: "t".into(),
                fields: Map::new(),
            },
            stats: ExtractionStats {
                total_pages: pages.len(),
                ..Default::default()
            },
            pages,
        }
    }

    #[test]
    fn strict_mode_rejects_dropped_pages() {
        let ok = PageOutcome {
            page_num: 1,
            output_len: 3,
            duration_ms: 10,
            error: None,
        };
        let bad = PageOutcome {
            page_num: 2,
            output_len: 0,
            duration_ms: 10,
            error: Some(PageError::ModelFailed {
                page: 2,
                detail: "timeout".into(),
            }),
        };

        assert!(output(vec![ok.clone()]).into_strict().is_ok());
        let err = output(vec![ok, bad]).into_strict().unwrap_err();
        assert!(err.to_string().contains("Page 2"));
    }
}
