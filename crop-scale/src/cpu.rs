// SPDX-License-Identifier: MIT
// CPU resampler built on fast_image_resize (SIMD-accelerated).
// RGBA8 in → RGBA8 out, tightly packed rows, optional fractional source crop.

use fast_image_resize as fir;
use fir::images::{TypedImage, TypedImageRef};
use fir::pixels::U8x4;
use fir::{FilterType, ResizeAlg, ResizeOptions, Resizer};

use crate::presets::Size;

#[derive(Debug)]
pub enum ScaleError {
    BufferTooSmall { expected: usize, actual: usize },
    EmptySize,
    SourceRectOutOfBounds,
    Fir(fir::ResizeError),
    ImageBuf(fir::ImageBufferError),
}

impl From<fir::ResizeError> for ScaleError { fn from(e: fir::ResizeError) -> Self { Self::Fir(e) } }
impl From<fir::ImageBufferError> for ScaleError { fn from(e: fir::ImageBufferError) -> Self { Self::ImageBuf(e) } }

impl std::fmt::Display for ScaleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScaleError::BufferTooSmall { expected, actual } => {
                write!(f, "Buffer too small: need {} bytes, got {}", expected, actual)
            }
            ScaleError::EmptySize => write!(f, "Zero-sized image"),
            ScaleError::SourceRectOutOfBounds => write!(f, "Source rectangle lies outside the image"),
            ScaleError::Fir(e) => write!(f, "Fast image resize error: {}", e),
            ScaleError::ImageBuf(e) => write!(f, "Image buffer error: {}", e),
        }
    }
}

impl std::error::Error for ScaleError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ScaleError::Fir(e) => Some(e),
            ScaleError::ImageBuf(e) => Some(e),
            _ => None,
        }
    }
}

/// Resampling kernel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum ResampleFilter {
    Nearest,
    Bilinear,
    CatmullRom,
    /// Smoothest of the four; default for upscaling fallbacks.
    #[default]
    Lanczos3,
}

impl ResampleFilter {
    fn alg(self) -> ResizeAlg {
        match self {
            ResampleFilter::Nearest => ResizeAlg::Nearest,
            ResampleFilter::Bilinear => ResizeAlg::Convolution(FilterType::Bilinear),
            ResampleFilter::CatmullRom => ResizeAlg::Convolution(FilterType::CatmullRom),
            ResampleFilter::Lanczos3 => ResizeAlg::Convolution(FilterType::Lanczos3),
        }
    }
}

/// Fractional sub-rectangle of the source, in source pixels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SrcRect {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl SrcRect {
    fn fits(&self, src: Size) -> bool {
        self.left >= 0.0
            && self.top >= 0.0
            && self.width > 0.0
            && self.height > 0.0
            && self.left + self.width <= f64::from(src.w) + 1e-6
            && self.top + self.height <= f64::from(src.h) + 1e-6
    }
}

/// Bytes needed for a tightly packed RGBA8 image.
#[inline]
pub fn rgba_len(size: Size) -> usize {
    (size.w as usize) * (size.h as usize) * 4
}

/// Main scaling entry point.
/// `src_rgba` must hold `src.w * src.h` tightly packed RGBA8 pixels.
/// `dst` must be at least `dst_size.w * dst_size.h * 4` bytes.
pub fn resample_rgba_into(
    resizer: &mut Resizer,
    src_rgba: &[u8],
    src: Size,
    crop: Option<SrcRect>,
    dst: &mut [u8],
    dst_size: Size,
    filter: ResampleFilter,
) -> Result<(), ScaleError> {
    if src.w == 0 || src.h == 0 || dst_size.w == 0 || dst_size.h == 0 {
        return Err(ScaleError::EmptySize);
    }
    let src_len = rgba_len(src);
    if src_rgba.len() < src_len {
        return Err(ScaleError::BufferTooSmall { expected: src_len, actual: src_rgba.len() });
    }
    let dst_len = rgba_len(dst_size);
    if dst.len() < dst_len {
        return Err(ScaleError::BufferTooSmall { expected: dst_len, actual: dst.len() });
    }

    let src_view = TypedImageRef::<U8x4>::from_buffer(src.w, src.h, &src_rgba[..src_len])?;
    let mut dst_image = TypedImage::<U8x4>::from_buffer(dst_size.w, dst_size.h, &mut dst[..dst_len])?;

    let mut opts = ResizeOptions::new().resize_alg(filter.alg()).use_alpha(false);
    if let Some(rect) = crop {
        if !rect.fits(src) {
            return Err(ScaleError::SourceRectOutOfBounds);
        }
        opts = opts.crop(rect.left, rect.top, rect.width, rect.height);
    }

    resizer.resize_typed::<U8x4>(&src_view, &mut dst_image, &opts)?;
    Ok(())
}

/// Allocating convenience wrapper around [`resample_rgba_into`].
pub fn resample_rgba(
    resizer: &mut Resizer,
    src_rgba: &[u8],
    src: Size,
    crop: Option<SrcRect>,
    dst_size: Size,
    filter: ResampleFilter,
) -> Result<Vec<u8>, ScaleError> {
    let mut out = vec![0u8; rgba_len(dst_size)];
    resample_rgba_into(resizer, src_rgba, src, crop, &mut out, dst_size, filter)?;
    Ok(out)
}
