use crate::error::{GatewayError, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use image::imageops::FilterType;
use image::DynamicImage;

/// Widest image forwarded upstream; larger attachments are downsampled
/// preserving aspect ratio.
const MAX_WIDTH: u32 = 1024;
const JPEG_QUALITY: u8 = 80;

/// Downloads an attachment, downsamples it to at most 1024px wide,
/// re-encodes as JPEG and returns the base64 payload.
///
/// Any failure (network, decode, encode) aborts the whole request's
/// translation; there is no partial fallback.
pub async fn fetch_and_encode(http: &reqwest::Client, url: &str) -> Result<String> {
    let resp = http
        .get(url)
        .send()
        .await
        .map_err(|e| GatewayError::ImagePreprocessing(format!("download failed for {url}: {e}")))?;

    let status = resp.status();
    if !status.is_success() {
        return Err(GatewayError::ImagePreprocessing(format!(
            "download failed for {url}: HTTP {status}"
        )));
    }

    let bytes = resp
        .bytes()
        .await
        .map_err(|e| GatewayError::ImagePreprocessing(format!("read failed for {url}: {e}")))?;

    // Decode + re-encode are CPU-bound; keep them off the async workers.
    let url = url.to_string();
    tokio::task::spawn_blocking(move || recompress(&bytes))
        .await
        .map_err(|e| GatewayError::ImagePreprocessing(format!("encode task failed for {url}: {e}")))?
}

fn recompress(bytes: &[u8]) -> Result<String> {
    let img = image::load_from_memory(bytes)
        .map_err(|e| GatewayError::ImagePreprocessing(format!("decode failed: {e}")))?;

    let img = if img.width() > MAX_WIDTH {
        img.resize(MAX_WIDTH, u32::MAX, FilterType::Lanczos3)
    } else {
        img
    };

    // JPEG has no alpha channel.
    let img = DynamicImage::ImageRgb8(img.to_rgb8());

    let mut jpeg = Vec::new();
    let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut jpeg, JPEG_QUALITY);
    img.write_with_encoder(encoder)
        .map_err(|e| GatewayError::ImagePreprocessing(format!("jpeg encode failed: {e}")))?;

    Ok(STANDARD.encode(&jpeg))
}
