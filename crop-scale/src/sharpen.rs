// SPDX-License-Identifier: MIT
//! # High-Boost Sharpening
//!
//! Single pass, 4-neighbour kernel applied per colour channel:
//!
//! ```text
//! out = 1.5 * center - 0.125 * (up + down + left + right)
//! ```
//!
//! The kernel sums to 1.0, so flat regions are unchanged and only edges are
//! boosted. Border pixels reuse their own value for missing neighbours.
//! Alpha is copied through untouched.

use crate::cpu::rgba_len;
use crate::presets::Size;

const CENTER_WEIGHT: f32 = 1.5;
const NEIGHBOUR_WEIGHT: f32 = 0.125;

/// Sharpen a tightly packed RGBA8 buffer into a new buffer.
pub fn high_boost(src: &[u8], size: Size) -> Vec<u8> {
    let mut out = vec![0u8; rgba_len(size)];
    high_boost_into(src, size, &mut out);
    out
}

/// Sharpen `src` into `dst`. Both must hold `size.w * size.h` RGBA8 pixels.
pub fn high_boost_into(src: &[u8], size: Size, dst: &mut [u8]) {
    let (w, h) = (size.w as usize, size.h as usize);
    let len = rgba_len(size);
    debug_assert!(src.len() >= len && dst.len() >= len);
    if w == 0 || h == 0 {
        return;
    }

    let idx = |x: usize, y: usize| (y * w + x) * 4;
    for y in 0..h {
        let up_y = y.saturating_sub(1);
        let down_y = (y + 1).min(h - 1);
        for x in 0..w {
            let left_x = x.saturating_sub(1);
            let right_x = (x + 1).min(w - 1);
            let c = idx(x, y);
            let (u, d) = (idx(x, up_y), idx(x, down_y));
            let (l, r) = (idx(left_x, y), idx(right_x, y));
            for ch in 0..3 {
                let neighbours = f32::from(src[u + ch])
                    + f32::from(src[d + ch])
                    + f32::from(src[l + ch])
                    + f32::from(src[r + ch]);
                let v = CENTER_WEIGHT * f32::from(src[c + ch]) - NEIGHBOUR_WEIGHT * neighbours;
                dst[c + ch] = v.round().clamp(0.0, 255.0) as u8;
            }
            dst[c + 3] = src[c + 3];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_image_is_unchanged() {
        let size = Size::new(5, 3);
        let src: Vec<u8> = [90u8, 120, 150, 200].repeat(15);
        assert_eq!(high_boost(&src, size), src);
    }

    #[test]
    fn bright_dot_is_boosted_and_clamped() {
        let size = Size::new(3, 3);
        let mut src = [100u8, 100, 100, 255].repeat(9);
        let center = 4 * 4;
        src[center..center + 3].copy_from_slice(&[240, 240, 240]);

        let out = high_boost(&src, size);
        // 1.5 * 240 - 0.125 * 400 = 310 -> clamped
        assert_eq!(&out[center..center + 4], &[255, 255, 255, 255]);
        // Neighbour: 1.5 * 100 - 0.125 * (240 + 100 + 100 + 100) = 82.5 -> 83
        assert_eq!(out[4], 83);
    }
}
