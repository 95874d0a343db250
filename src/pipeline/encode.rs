//! Image Normalizer: bound a raster's size and re-encode it for transport.
//!
//! Every image sent to the model is downsampled so its longer edge fits the
//! budget for its [`crate::config::ImageRole`] (never upsampled), converted to
//! RGB and re-encoded as JPEG at quality 85, then base64-wrapped in an
//! [`ImageData`].
//!
//! Encoded inputs that fail to decode are passed through unchanged with a
//! warning instead of failing the request: the model may still read formats
//! this build cannot decode.

use crate::error::ExtractError;
use crate::pipeline::render::Raster;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::DynamicImage;
use tracing::{debug, warn};

/// JPEG quality used for every normalised image.
pub const JPEG_QUALITY: u8 = 85;

/// Normalise a page raster to at most `max_dimension` pixels on its longer edge.
pub fn normalize(raster: &Raster, max_dimension: u32) -> Result<ImageData, ExtractError> {
    match raster {
        Raster::Decoded(img) => normalize_image(img, max_dimension),
        Raster::Encoded { bytes, mime_type } => match image::load_from_memory(bytes) {
            Ok(img) => normalize_image(&img, max_dimension),
            Err(e) => {
                warn!(
                    "Could not decode {} bytes of {}: {}; sending original bytes",
                    bytes.len(),
                    mime_type,
                    e
                );
                Ok(ImageData::new(STANDARD.encode(bytes), mime_type.as_str()))
            }
        },
    }
}

/// Resize (if needed) and JPEG-encode an already decoded image.
pub fn normalize_image(img: &DynamicImage, max_dimension: u32) -> Result<ImageData, ExtractError> {
    let resized = bounded(img, max_dimension);
    let rgb = DynamicImage::ImageRgb8(resized.to_rgb8());

    let mut buf = Vec::new();
    rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut buf, JPEG_QUALITY))
        .map_err(|e| ExtractError::RenderFailure {
            detail: format!("JPEG encoding failed: {}", e),
        })?;

    let b64 = STANDARD.encode(&buf);
    debug!(
        "Normalised {}x{} → {}x{}, {} bytes base64",
        img.width(),
        img.height(),
        rgb.width(),
        rgb.height(),
        b64.len()
    );
    Ok(ImageData::new(b64, "image/jpeg"))
}

/// Shrink so the longer edge is ≤ `max_dimension`, preserving aspect ratio.
fn bounded(img: &DynamicImage, max_dimension: u32) -> DynamicImage {
    if img.width().max(img.height()) <= max_dimension {
        return img.clone();
    }
    img.resize(max_dimension, max_dimension, FilterType::Lanczos3)
}

/// `data:` URL for OpenAI-compatible `image_url` content parts.
pub fn data_url(image: &ImageData) -> String {
    format!("data:{};base64,{}", image.mime_type, image.data)
}
