//! Input resolution: turn bytes, a local path or a URL into a [`Document`].
//!
//! A `Document` is immutable raw bytes plus a media type. The media type is
//! either declared by the caller (an HTTP upload's content type) or sniffed
//! from magic bytes when loading from disk or the network. Anything that is
//! not a PDF or a raster image is rejected up front with
//! [`ExtractError::UnsupportedMediaType`].

use crate::error::ExtractError;
use image::ImageFormat;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// Media type of a [`Document`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaType {
    Pdf,
    Image(ImageFormat),
}

impl MediaType {
    /// Parse a declared MIME type such as `application/pdf` or `image/png`.
    pub fn from_mime(mime: &str) -> Result<Self, ExtractError> {
        let essence = mime
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        if essence == "application/pdf" {
            return Ok(MediaType::Pdf);
        }
        // `image/jpg` is common in the wild but not a registered type.
        let essence = if essence == "image/jpg" {
            "image/jpeg".to_string()
        } else {
            essence
        };
        ImageFormat::from_mime_type(&essence)
            .map(MediaType::Image)
            .ok_or_else(|| ExtractError::UnsupportedMediaType {
                media_type: mime.to_string(),
            })
    }

    /// Detect the media type from the leading bytes.
    pub fn sniff(bytes: &[u8]) -> Result<Self, ExtractError> {
        if bytes.starts_with(b"%PDF") {
            return Ok(MediaType::Pdf);
        }
        image::guess_format(bytes)
            .map(MediaType::Image)
            .map_err(|_| ExtractError::UnsupportedMediaType {
                media_type: format!("unknown (first bytes {:02x?})", &bytes[..bytes.len().min(4)]),
            })
    }

    pub fn mime(&self) -> &'static str {
        match self {
            MediaType::Pdf => "application/pdf",
            MediaType::Image(format) => format.to_mime_type(),
        }
    }

    pub fn is_pdf(&self) -> bool {
        matches!(self, MediaType::Pdf)
    }
}

/// Raw document payload. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Document {
    bytes: Arc<[u8]>,
    media_type: MediaType,
    name: String,
}

impl Document {
    /// Build a document from bytes and a declared MIME type.
    pub fn new(
        bytes: impl Into<Vec<u8>>,
        declared_media_type: &str,
    ) -> Result<Self, ExtractError> {
        let media_type = MediaType::from_mime(declared_media_type)?;
        Ok(Self::with_media_type(bytes, media_type))
    }

    /// Build a document whose media type is sniffed from its bytes.
    pub fn sniffed(bytes: impl Into<Vec<u8>>) -> Result<Self, ExtractError> {
        let bytes = bytes.into();
        let media_type = MediaType::sniff(&bytes)?;
        Ok(Self::with_media_type(bytes, media_type))
    }

    pub fn with_media_type(bytes: impl Into<Vec<u8>>, media_type: MediaType) -> Self {
        Self {
            bytes: Arc::from(bytes.into()),
            media_type,
            name: "document".to_string(),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub(crate) fn shared_bytes(&self) -> Arc<[u8]> {
        Arc::clone(&self.bytes)
    }

    pub fn media_type(&self) -> MediaType {
        self.media_type
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Load a document from a local path or an HTTP/HTTPS URL.
pub async fn load(input: &str, timeout_secs: u64) -> Result<Document, ExtractError> {
    if is_url(input) {
        download_url(input, timeout_secs).await
    } else {
        load_local(input).await
    }
}

async fn load_local(path_str: &str) -> Result<Document, ExtractError> {
    let path = PathBuf::from(path_str);

    let bytes = tokio::fs::read(&path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::PermissionDenied => ExtractError::PermissionDenied { path: path.clone() },
        _ => ExtractError::FileNotFound { path: path.clone() },
    })?;

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path_str.to_string());
    let document = Document::sniffed(bytes)?.named(name);
    debug!(
        "Loaded local document {} ({}, {} bytes)",
        path.display(),
        document.media_type().mime(),
        document.bytes().len()
    );
    Ok(document)
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<Document, ExtractError> {
    info!("Downloading document from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| ExtractError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            ExtractError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            ExtractError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    })?;

    if !response.status().is_success() {
        return Err(ExtractError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| ExtractError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let document = Document::sniffed(bytes.to_vec())?.named(filename_from_url(url));
    info!(
        "Downloaded {} bytes ({})",
        document.bytes().len(),
        document.media_type().mime()
    );
    Ok(document)
}

/// Last non-empty path segment of a URL, or `"downloaded"`.
fn filename_from_url(url: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|parsed| {
            parsed
                .path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string))
        })
        .filter(|last| !last.is_empty())
        .unwrap_or_else(|| "downloaded".to_string())
}
