//! Decoding of source images and encoding of finished results.
//!
//! Format conversion proper is out of scope for the pipeline; this module only
//! covers the two boundaries every image crosses: bytes → RGBA on the way in
//! and RGBA → PNG/JPEG bytes on the way out.

use std::io::Cursor;

use anyhow::{Context, Result};
use base64::{Engine as _, engine::general_purpose};
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat, RgbaImage};
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};

/// Encoded output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Png,
    Jpeg,
}

impl OutputFormat {
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Png => "png",
            OutputFormat::Jpeg => "jpg",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            OutputFormat::Png => "png",
            OutputFormat::Jpeg => "jpeg",
        }
    }
}

/// Decode any format the `image` crate understands into RGBA8.
pub fn decode(label: &str, bytes: &[u8]) -> PipelineResult<RgbaImage> {
    let image = image::load_from_memory(bytes)
        .map_err(|e| {
            PipelineError::load(label, e.to_string())
                .with_context(format!("decoding {} bytes", bytes.len()))
        })?;
    let rgba = image.to_rgba8();
    if rgba.width() == 0 || rgba.height() == 0 {
        return Err(PipelineError::load(label, "image has no pixels"));
    }
    Ok(rgba)
}

/// Serialize a finished buffer.
pub fn encode(image: &RgbaImage, format: OutputFormat, jpeg_quality: u8) -> PipelineResult<Vec<u8>> {
    let mut out = Vec::new();
    match format {
        OutputFormat::Png => image
            .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
            .map_err(|e| PipelineError::encode(format.name(), e.to_string()))?,
        OutputFormat::Jpeg => {
            if !(1..=100).contains(&jpeg_quality) {
                return Err(PipelineError::encode(
                    format.name(),
                    format!("quality {} outside 1..=100", jpeg_quality),
                )
                .with_recovery_suggestion("use a JPEG quality between 1 and 100"));
            }
            // JPEG has no alpha channel.
            let rgb = DynamicImage::ImageRgba8(image.clone()).to_rgb8();
            JpegEncoder::new_with_quality(&mut out, jpeg_quality)
                .encode_image(&rgb)
                .map_err(|e| PipelineError::encode(format.name(), e.to_string()))?;
        }
    }
    Ok(out)
}

/// PNG-encode into a `data:image/png;base64,` URL.
pub fn to_data_url(image: &RgbaImage) -> PipelineResult<String> {
    let png = encode(image, OutputFormat::Png, 100)?;
    Ok(format!(
        "data:image/png;base64,{}",
        general_purpose::STANDARD.encode(png)
    ))
}

/// Decode a base64 image, with or without a `data:` prefix.
pub fn from_data_url(encoded: &str) -> Result<RgbaImage> {
    let payload = match encoded.strip_prefix("data:") {
        Some(rest) => rest
            .split_once(',')
            .map(|(_, data)| data)
            .context("data URL without payload")?,
        None => encoded,
    };
    let bytes = general_purpose::STANDARD
        .decode(payload.trim())
        .context("invalid base64 image payload")?;
    Ok(image::load_from_memory(&bytes)
        .context("undecodable image payload")?
        .to_rgba8())
}
