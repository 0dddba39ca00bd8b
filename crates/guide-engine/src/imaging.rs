use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::DynamicImage;
use thiserror::Error;

/// Client-facing failures while decoding an uploaded image.
#[derive(Error, Debug)]
pub enum ImagePayloadError {
    #[error("Invalid base64 image data.")]
    InvalidBase64(#[source] base64::DecodeError),
    #[error("Invalid image payload.")]
    InvalidImage(#[source] image::ImageError),
}

/// Lanczos resize to `target_width`, keeping the aspect ratio.
pub fn resize_to_width(image: &DynamicImage, target_width: u32) -> DynamicImage {
    let width = image.width().max(1);
    let target_width = target_width.max(1);
    let target_height =
        ((u64::from(target_width) * u64::from(image.height())) / u64::from(width)).max(1) as u32;
    image.resize_exact(target_width, target_height, FilterType::Lanczos3)
}

/// JPEG at quality 90 on an opaque copy; used for inline model parts.
pub fn encode_jpeg(image: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let rgb = DynamicImage::ImageRgb8(image.to_rgb8());
    let mut bytes = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut bytes, 90);
    encoder.encode_image(&rgb)?;
    Ok(bytes)
}

/// Drops a leading `data:<mime>;base64,` header if present.
pub fn strip_data_url_prefix(data: &str) -> &str {
    let lowered_head = data.get(..5).map(str::to_ascii_lowercase);
    if lowered_head.as_deref() == Some("data:") {
        if let Some((_, rest)) = data.split_once(',') {
            return rest;
        }
    }
    data
}

/// Decodes a (possibly data-URL) base64 payload into an RGB image.
pub fn decode_base64_image(data: &str) -> Result<DynamicImage, ImagePayloadError> {
    let raw = strip_data_url_prefix(data.trim());
    let bytes = BASE64
        .decode(raw.as_bytes())
        .map_err(ImagePayloadError::InvalidBase64)?;
    let image = image::load_from_memory(&bytes).map_err(ImagePayloadError::InvalidImage)?;
    Ok(DynamicImage::ImageRgb8(image.to_rgb8()))
}

pub fn encode_base64(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}
