//! Page Renderer: turn a [`Document`] into ordered page rasters.
//!
//! Images pass through as a single page without decoding; decoding and
//! resizing belong to [`crate::pipeline::encode`], which degrades gracefully
//! on undecodable bytes. PDFs are rasterised page by page through pdfium.
//!
//! ## Why spawn_blocking?
//!
//! pdfium is a C++ library with internal global state; calling it from a
//! Tokio worker would stall the executor for the whole rasterisation.
//! `spawn_blocking` moves the work onto the blocking pool.

use crate::config::{ExtractionConfig, MAX_RENDERED_PIXELS};
use crate::error::ExtractError;
use crate::pipeline::input::{Document, MediaType};
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::sync::Arc;
use tracing::{debug, info};

/// Pixel payload of a page.
#[derive(Debug, Clone)]
pub enum Raster {
    /// Already decoded (rendered PDF pages, extracted figures).
    Decoded(DynamicImage),
    /// Encoded bytes as received; decoded lazily by the normaliser.
    Encoded { bytes: Arc<[u8]>, mime_type: String },
}

/// One rendered page. `index` is 0-based; user-facing text uses `number()`.
#[derive(Debug, Clone)]
pub struct Page {
    pub index: usize,
    pub raster: Raster,
}

impl Page {
    pub fn number(&self) -> usize {
        self.index + 1
    }
}

/// Text layer and embedded figures of one PDF page (hybrid flow).
#[derive(Debug, Clone)]
pub struct PageContent {
    pub index: usize,
    pub text: String,
    pub figures: Vec<DynamicImage>,
}

/// Render a document to pages in document order.
///
/// # Errors
/// - [`ExtractError::RenderFailure`] when the payload is empty, pdfium cannot
///   open it, or it yields zero pages.
pub async fn render(
    document: &Document,
    config: &ExtractionConfig,
) -> Result<Vec<Page>, ExtractError> {
    if document.is_empty() {
        return Err(ExtractError::RenderFailure {
            detail: format!("'{}' is empty", document.name()),
        });
    }

    let pages = match document.media_type() {
        MediaType::Image(_) => vec![Page {
            index: 0,
            raster: Raster::Encoded {
                bytes: document.shared_bytes(),
                mime_type: document.media_type().mime().to_string(),
            },
        }],
        MediaType::Pdf => {
            let bytes = document.shared_bytes();
            let max_pixels = config.max_rendered_pixels;
            let password = config.password.clone();

            tokio::task::spawn_blocking(move || {
                render_pdf_blocking(&bytes, max_pixels, password.as_deref())
            })
            .await
            .map_err(|e| ExtractError::Internal(format!("Render task panicked: {}", e)))??
        }
    };

    if pages.is_empty() {
        return Err(ExtractError::RenderFailure {
            detail: format!("'{}' produced no pages", document.name()),
        });
    }
    Ok(pages)
}

/// Extract the text layer and embedded images of every PDF page.
pub async fn extract_text_and_figures(
    document: &Document,
    config: &ExtractionConfig,
) -> Result<Vec<PageContent>, ExtractError> {
    if !document.media_type().is_pdf() {
        return Err(ExtractError::UnsupportedMediaType {
            media_type: document.media_type().mime().to_string(),
        });
    }

    let bytes = document.shared_bytes();
    let password = config.password.clone();
    let contents = tokio::task::spawn_blocking(move || {
        extract_contents_blocking(&bytes, password.as_deref())
    })
    .await
    .map_err(|e| ExtractError::Internal(format!("Text extraction task panicked: {}", e)))??;

    if contents.is_empty() {
        return Err(ExtractError::RenderFailure {
            detail: format!("'{}' produced no pages", document.name()),
        });
    }
    Ok(contents)
}

/// Bind pdfium: `PDFIUM_LIB_PATH` if set, otherwise the system library.
fn bind_pdfium() -> Result<Pdfium, ExtractError> {
    let bindings = match std::env::var("PDFIUM_LIB_PATH") {
        Ok(path) if !path.is_empty() => Pdfium::bind_to_library(&path),
        _ => Pdfium::bind_to_system_library(),
    }
    .map_err(|e| ExtractError::RenderFailure {
        detail: format!(
            "failed to bind pdfium: {:?}. Set PDFIUM_LIB_PATH=/path/to/libpdfium",
            e
        ),
    })?;
    Ok(Pdfium::new(bindings))
}

fn open_failure(e: PdfiumError) -> ExtractError {
    ExtractError::RenderFailure {
        detail: format!("PDF could not be opened: {:?}", e),
    }
}

fn render_pdf_blocking(
    bytes: &[u8],
    max_pixels: u32,
    password: Option<&str>,
) -> Result<Vec<Page>, ExtractError> {
    let pdfium = bind_pdfium()?;
    let document = pdfium
        .load_pdf_from_byte_slice(bytes, password)
        .map_err(open_failure)?;

    let pages = document.pages();
    let total_pages = pages.len() as usize;
    info!("PDF loaded: {} pages", total_pages);

    // The field is public, so the builder clamp may have been bypassed.
    let edge = max_pixels.min(MAX_RENDERED_PIXELS) as i32;
    let render_config = PdfRenderConfig::new()
        .set_target_width(edge)
        .set_maximum_height(edge);

    let mut results = Vec::with_capacity(total_pages);
    for idx in 0..total_pages {
        let page = pages
            .get(idx as u16)
            .map_err(|e| ExtractError::RenderFailure {
                detail: format!("page {}: {:?}", idx + 1, e),
            })?;

        let bitmap = page
            .render_with_config(&render_config)
            .map_err(|e| ExtractError::RenderFailure {
                detail: format!("page {}: {:?}", idx + 1, e),
            })?;

        let image = bitmap.as_image();
        debug!(
            "Rendered page {} → {}x{} px",
            idx + 1,
            image.width(),
            image.height()
        );
        results.push(Page {
            index: idx,
            raster: Raster::Decoded(image),
        });
    }

    Ok(results)
}

fn extract_contents_blocking(
    bytes: &[u8],
    password: Option<&str>,
) -> Result<Vec<PageContent>, ExtractError> {
    let pdfium = bind_pdfium()?;
    let document = pdfium
        .load_pdf_from_byte_slice(bytes, password)
        .map_err(open_failure)?;

    let pages = document.pages();
    let mut results = Vec::with_capacity(pages.len() as usize);

    for (idx, page) in pages.iter().enumerate() {
        let text = page.text().map(|t| t.all()).unwrap_or_default();

        let figures: Vec<DynamicImage> = page
            .objects()
            .iter()
            .filter_map(|object| {
                object
                    .as_image_object()
                    .and_then(|image| image.get_raw_image().ok())
            })
            .collect();

        debug!(
            "Page {}: {} chars of text, {} embedded images",
            idx + 1,
            text.len(),
            figures.len()
        );
        results.push(PageContent {
            index: idx,
            text,
            figures,
        });
    }

    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn image_document_is_exactly_one_page() {
        let doc = Document::new(vec![0xFF, 0xD8, 0xFF, 0xE0, 1, 2, 3], "image/jpeg").unwrap();
        let pages = render(&doc, &ExtractionConfig::default()).await.unwrap();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].index, 0);
        assert_eq!(pages[0].number(), 1);
        match &pages[0].raster {
            Raster::Encoded { bytes, mime_type } => {
                assert_eq!(mime_type, "image/jpeg");
                assert_eq!(bytes.len(), 7);
            }
            other => panic!("expected encoded raster, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_document_is_a_render_failure() {
        let doc = Document::new(Vec::new(), "image/png").unwrap();
        let err = render(&doc, &ExtractionConfig::default()).await.unwrap_err();
        assert!(matches!(err, ExtractError::RenderFailure { .. }));
    }

    #[tokio::test]
    async fn hybrid_extraction_requires_pdf() {
        let doc = Document::new(vec![1, 2, 3], "image/png").unwrap();
        let err = extract_text_and_figures(&doc, &ExtractionConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::UnsupportedMediaType { .. }));
    }

    #[tokio::test]
    async fn garbage_pdf_is_a_render_failure() {
        if std::env::var("E2E_ENABLED").is_err() {
            println!("SKIP: set E2E_ENABLED=1 to run pdfium-backed tests");
            return;
        }
        let doc = Document::new(b"%PDF-garbage".to_vec(), "application/pdf").unwrap();
        let err = render(&doc, &ExtractionConfig::default()).await.unwrap_err();
        assert!(matches!(err, ExtractError::RenderFailure { .. }));
    }
}
