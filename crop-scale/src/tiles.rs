// SPDX-License-Identifier: MIT
//! # Tiled Upscaling
//!
//! Splits the destination canvas into fixed-size square tiles, resamples the
//! matching source sub-rectangle for each tile independently, optionally
//! sharpens it, and blits it into place.
//!
//! ## Memory Profile
//!
//! Only one tile-sized scratch buffer is alive at a time next to the
//! destination, so the working set no longer grows with the convolution
//! buffers of a full-frame resize.
//!
//! ## Seams
//!
//! Sharpening sees each tile in isolation, so pixels on tile borders use
//! replicated neighbours instead of the real ones across the seam. This is a
//! deliberate trade for bounded peak memory.

use fast_image_resize::Resizer;

use crate::cpu::{resample_rgba_into, rgba_len, ResampleFilter, ScaleError, SrcRect};
use crate::presets::Size;
use crate::sharpen::high_boost_into;

/// Rectangle in destination pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

/// Options for [`upscale_tiled`].
#[derive(Clone, Copy, Debug)]
pub struct TiledOptions {
    /// Side length of each square tile (edge tiles may be smaller).
    pub tile_side: u32,
    pub filter: ResampleFilter,
    /// Apply the high-boost kernel to every tile after resampling.
    pub sharpen: bool,
}

impl Default for TiledOptions {
    fn default() -> Self {
        Self {
            tile_side: 1024,
            filter: ResampleFilter::Lanczos3,
            sharpen: true,
        }
    }
}

/// Partition `dst` into row-major tiles of at most `tile_side` pixels per side.
pub fn tile_grid(dst: Size, tile_side: u32) -> Vec<Rect> {
    let side = tile_side.max(1);
    let cols = dst.w.div_ceil(side);
    let rows = dst.h.div_ceil(side);
    let mut rects = Vec::with_capacity((cols * rows) as usize);
    for r in 0..rows {
        for c in 0..cols {
            let x = c * side;
            let y = r * side;
            rects.push(Rect {
                x,
                y,
                w: side.min(dst.w - x),
                h: side.min(dst.h - y),
            });
        }
    }
    rects
}

/// Source sub-rectangle that maps onto `tile` under the `src → dst` scale.
pub fn source_rect(tile: Rect, src: Size, dst: Size) -> SrcRect {
    let sx = f64::from(src.w) / f64::from(dst.w.max(1));
    let sy = f64::from(src.h) / f64::from(dst.h.max(1));
    let left = (f64::from(tile.x) * sx).min(f64::from(src.w));
    let top = (f64::from(tile.y) * sy).min(f64::from(src.h));
    SrcRect {
        left,
        top,
        width: (f64::from(tile.w) * sx).min(f64::from(src.w) - left),
        height: (f64::from(tile.h) * sy).min(f64::from(src.h) - top),
    }
}

/// Copy a tightly packed tile into the destination at `rect`.
pub fn blit(dst: &mut [u8], dst_size: Size, tile: &[u8], rect: Rect) {
    let row_bytes = (rect.w as usize) * 4;
    let pitch = (dst_size.w as usize) * 4;
    for r in 0..rect.h as usize {
        let d = (rect.y as usize + r) * pitch + (rect.x as usize) * 4;
        let s = r * row_bytes;
        dst[d..d + row_bytes].copy_from_slice(&tile[s..s + row_bytes]);
    }
}

/// Extract `rect` from a tightly packed RGBA8 buffer into a new packed buffer.
///
/// `rect` must lie inside `src_size`.
pub fn copy_rect(src: &[u8], src_size: Size, rect: Rect) -> Vec<u8> {
    let row_bytes = (rect.w as usize) * 4;
    let pitch = (src_size.w as usize) * 4;
    let mut out = vec![0u8; row_bytes * rect.h as usize];
    for r in 0..rect.h as usize {
        let s = (rect.y as usize + r) * pitch + (rect.x as usize) * 4;
        out[r * row_bytes..(r + 1) * row_bytes].copy_from_slice(&src[s..s + row_bytes]);
    }
    out
}

/// Upscale `src` to `dst_size` tile by tile.
pub fn upscale_tiled(
    resizer: &mut Resizer,
    src: &[u8],
    src_size: Size,
    dst_size: Size,
    opts: TiledOptions,
) -> Result<Vec<u8>, ScaleError> {
    if dst_size.w == 0 || dst_size.h == 0 {
        return Err(ScaleError::EmptySize);
    }
    let mut out = vec![0u8; rgba_len(dst_size)];
    let side = opts.tile_side.max(1);
    let mut scratch = vec![0u8; rgba_len(Size::new(side, side))];
    let mut sharpened = if opts.sharpen { vec![0u8; scratch.len()] } else { Vec::new() };

    for tile in tile_grid(dst_size, side) {
        let tile_size = Size::new(tile.w, tile.h);
        let len = rgba_len(tile_size);
        let rect = source_rect(tile, src_size, dst_size);
        resample_rgba_into(resizer, src, src_size, Some(rect), &mut scratch[..len], tile_size, opts.filter)?;

        if opts.sharpen {
            high_boost_into(&scratch[..len], tile_size, &mut sharpened[..len]);
            blit(&mut out, dst_size, &sharpened[..len], tile);
        } else {
            blit(&mut out, dst_size, &scratch[..len], tile);
        }
    }

    Ok(out)
}
