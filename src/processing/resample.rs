//! Blocking resampling passes on [`RgbaImage`] buffers.
//!
//! These run inside `spawn_blocking` from the async stages.

use crop_scale::cpu::{self, ResampleFilter};
use crop_scale::presets::Size;
use crop_scale::sharpen;
use crop_scale::tiles::{self, TiledOptions};
use fast_image_resize as fr;
use image::RgbaImage;

use crate::config::CascadeConfig;
use crate::error::{PipelineError, PipelineResult};

pub fn size_of(image: &RgbaImage) -> Size {
    Size::new(image.width(), image.height())
}

fn wrap(size: Size, raw: Vec<u8>) -> PipelineResult<RgbaImage> {
    RgbaImage::from_raw(size.w, size.h, raw).ok_or_else(|| {
        PipelineError::resource("resampler", format!("buffer does not hold {}x{}", size.w, size.h))
    })
}

/// Single-pass resample with no post-processing.
pub fn resample(image: &RgbaImage, target: Size, filter: ResampleFilter) -> PipelineResult<RgbaImage> {
    let src = size_of(image);
    if src == target {
        return Ok(image.clone());
    }
    let raw = cpu::resample_rgba(&mut fr::Resizer::new(), image.as_raw(), src, None, target, filter)?;
    wrap(target, raw)
}

fn wants_sharpen(src: Size, target: Size) -> bool {
    let scale = f64::from(target.w) / f64::from(src.w.max(1));
    scale >= 2.0
}

/// Lanczos3 resample followed by a high-boost pass.
///
/// Sharpening is skipped below 2x and above `sharpen_max_pixels`.
pub fn enhanced(image: &RgbaImage, target: Size, config: &CascadeConfig) -> PipelineResult<RgbaImage> {
    let src = size_of(image);
    let resampled = cpu::resample_rgba(
        &mut fr::Resizer::new(),
        image.as_raw(),
        src,
        None,
        target,
        ResampleFilter::Lanczos3,
    )?;
    if wants_sharpen(src, target) && target.pixels() <= config.sharpen_max_pixels {
        return wrap(target, sharpen::high_boost(&resampled, target));
    }
    wrap(target, resampled)
}

/// Tile-by-tile resample for targets above the tiling threshold.
///
/// Each tile is sharpened on its own, so the area guard does not apply.
pub fn tiled(image: &RgbaImage, target: Size, config: &CascadeConfig) -> PipelineResult<RgbaImage> {
    let src = size_of(image);
    let options = TiledOptions {
        tile_side: config.tile_size,
        filter: ResampleFilter::Lanczos3,
        sharpen: wants_sharpen(src, target),
    };
    let raw = tiles::upscale_tiled(&mut fr::Resizer::new(), image.as_raw(), src, target, options)?;
    wrap(target, raw)
}
