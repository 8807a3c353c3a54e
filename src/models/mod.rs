//! # External Model Contracts
//!
//! Narrow async interfaces to the collaborators the pipeline consumes but
//! does not implement: an object detector, a super-resolution runtime and a
//! GPU memory signal.
//!
//! ## Output Normalization
//!
//! Super-resolution runtimes hand back one of three shapes (a drawable
//! surface, a raw tensor, or an encoded image string). [`UpscaleOutput`] is the
//! tagged union of those shapes and [`normalize_output`] is the single place
//! that turns any of them into the canonical [`RgbaImage`].
//!
//! ## Implementations
//!
//! - [`fallback`]: in-process stand-ins (fixed-box detector, CPU resampling runtime, no-accelerator memory signal)
//! - [`http`]: JSON-over-HTTP clients for remote model servers

pub mod fallback;
pub mod http;

use std::sync::Arc;

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use image::RgbaImage;
use serde::{Deserialize, Serialize};

/// Axis-aligned box in image pixels, `[x, y, width, height]` on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f32; 4]", into = "[f32; 4]")]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    pub fn center(&self) -> FocalPoint {
        FocalPoint {
            x: self.x + self.width / 2.0,
            y: self.y + self.height / 2.0,
        }
    }

    /// Scale both position and size, e.g. after the image was resampled.
    pub fn scaled(&self, sx: f32, sy: f32) -> Self {
        Self::new(self.x * sx, self.y * sy, self.width * sx, self.height * sy)
    }
}

impl From<[f32; 4]> for BoundingBox {
    fn from([x, y, width, height]: [f32; 4]) -> Self {
        Self::new(x, y, width, height)
    }
}

impl From<BoundingBox> for [f32; 4] {
    fn from(b: BoundingBox) -> Self {
        [b.x, b.y, b.width, b.height]
    }
}

/// One detection produced by an [`ObjectDetector`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    #[serde(rename = "bbox")]
    pub bounding_box: BoundingBox,
    #[serde(rename = "class")]
    pub class_name: String,
    #[serde(rename = "score")]
    pub confidence: f32,
}

impl Prediction {
    pub fn new(bounding_box: BoundingBox, class_name: impl Into<String>, confidence: f32) -> Self {
        Self {
            bounding_box,
            class_name: class_name.into(),
            confidence,
        }
    }
}

/// Pixel coordinate used as a crop center.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FocalPoint {
    pub x: f32,
    pub y: f32,
}

/// Tuning passed to a super-resolution model per call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UpscaleParams {
    pub scale: u32,
    /// Models that work on patches split the input into squares of this side.
    pub patch_size: Option<u32>,
    /// Overlap between patches, in input pixels.
    pub padding: Option<u32>,
}

impl UpscaleParams {
    pub fn for_scale(scale: u32) -> Self {
        Self {
            scale,
            patch_size: None,
            padding: None,
        }
    }
}

/// Raw shapes a super-resolution runtime may return.
#[derive(Debug, Clone)]
pub enum UpscaleOutput {
    /// Ready-to-use RGBA surface
    Surface(RgbaImage),
    /// Interleaved HWC tensor with values in `0.0..=255.0`
    Tensor {
        data: Vec<f32>,
        width: u32,
        height: u32,
        /// 3 (RGB) or 4 (RGBA)
        channels: u8,
    },
    /// Base64 image, optionally as a `data:` URL
    Encoded(String),
}

/// Turn any [`UpscaleOutput`] into the canonical RGBA buffer.
pub fn normalize_output(output: UpscaleOutput) -> Result<RgbaImage> {
    match output {
        UpscaleOutput::Surface(image) => Ok(image),
        UpscaleOutput::Tensor {
            data,
            width,
            height,
            channels,
        } => tensor_to_rgba(&data, width, height, channels),
        UpscaleOutput::Encoded(encoded) => crate::codec::from_data_url(&encoded),
    }
}

fn tensor_to_rgba(data: &[f32], width: u32, height: u32, channels: u8) -> Result<RgbaImage> {
    let channels = channels as usize;
    if channels != 3 && channels != 4 {
        bail!("unsupported tensor channel count {}", channels);
    }
    let pixels = (width as usize) * (height as usize);
    if pixels == 0 || data.len() != pixels * channels {
        bail!(
            "tensor of {} values does not match {}x{}x{}",
            data.len(),
            width,
            height,
            channels
        );
    }

    let to_u8 = |v: f32| v.round().clamp(0.0, 255.0) as u8;
    let mut rgba = Vec::with_capacity(pixels * 4);
    for px in data.chunks_exact(channels) {
        rgba.extend_from_slice(&[to_u8(px[0]), to_u8(px[1]), to_u8(px[2])]);
        rgba.push(if channels == 4 { to_u8(px[3]) } else { 255 });
    }
    RgbaImage::from_raw(width, height, rgba).ok_or_else(|| anyhow!("tensor buffer size mismatch"))
}

/// Object-detection collaborator.
#[async_trait]
pub trait ObjectDetector: Send + Sync {
    async fn detect(&self, image: &RgbaImage) -> Result<Vec<Prediction>>;

    /// Drop any loaded weights; the next `detect` reloads lazily.
    fn reset(&self) {}
}

/// One loaded super-resolution model bound to a single scale factor.
#[async_trait]
pub trait SuperResolutionModel: Send + Sync {
    async fn upscale(&self, image: Arc<RgbaImage>, params: UpscaleParams) -> Result<UpscaleOutput>;

    /// Release the instance's accelerator memory.
    fn dispose(&self) {}
}

/// Factory for [`SuperResolutionModel`] instances.
#[async_trait]
pub trait SuperResolutionRuntime: Send + Sync {
    async fn load(&self, scale: u32) -> Result<Arc<dyn SuperResolutionModel>>;

    /// Ask the runtime to free cached buffers not owned by a live model.
    fn release_cached_buffers(&self) {}
}

/// Bytes currently allocated on the accelerator. Must not fail; `0` without one.
pub trait GpuMemory: Send + Sync {
    fn bytes_in_use(&self) -> u64;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tensor_rgb_is_widened_and_clamped() {
        let output = UpscaleOutput::Tensor {
            data: vec![300.0, 127.6, -4.0, 0.0, 0.0, 0.0],
            width: 2,
            height: 1,
            channels: 3,
        };
        let image = normalize_output(output).unwrap();
        assert_eq!(image.dimensions(), (2, 1));
        assert_eq!(image.get_pixel(0, 0).0, [255, 128, 0, 255]);
    }

    #[test]
    fn tensor_with_wrong_length_is_rejected() {
        let output = UpscaleOutput::Tensor {
            data: vec![0.0; 5],
            width: 2,
            height: 1,
            channels: 3,
        };
        assert!(normalize_output(output).is_err());
    }

    #[test]
    fn encoded_output_round_trips_through_data_url() {
        let source = RgbaImage::from_pixel(3, 2, image::Rgba([9, 8, 7, 255]));
        let url = crate::codec::to_data_url(&source).unwrap();
        let image = normalize_output(UpscaleOutput::Encoded(url)).unwrap();
        assert_eq!(image, source);
    }

    #[test]
    fn prediction_uses_wire_names() {
        let p: Prediction =
            serde_json::from_str(r#"{"bbox":[1,2,30,40],"class":"dog","score":0.8}"#).unwrap();
        assert_eq!(p.bounding_box, BoundingBox::new(1.0, 2.0, 30.0, 40.0));
        assert_eq!(p.class_name, "dog");
        assert_eq!(p.bounding_box.center(), FocalPoint { x: 16.0, y: 22.0 });
    }
}
