//! # Crop Compositor
//!
//! Computes crop offsets and renders the final crop as an exact pixel copy.
//!
//! Every offset is clamped to `[0, src - target]` per axis, so the crop window
//! always lies inside the (already cover-scaled) source.
//!
//! ## Subject Offsets
//!
//! The window is centered on the subject box. When the box is larger than the
//! window on an axis and sits within a margin (10% of the box's own extent) of
//! one source edge, the window is aligned to that side of the box instead, so
//! the part of the subject touching the frame edge is kept.

use std::fmt;
use std::str::FromStr;

use crop_scale::presets::Size;
use crop_scale::tiles::{Rect, copy_rect};
use image::RgbaImage;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};
use crate::models::{BoundingBox, FocalPoint};

const SUBJECT_MARGIN: f64 = 0.1;

/// Named anchor for fixed crops.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum CropPosition {
    TopLeft,
    Top,
    TopRight,
    Left,
    #[default]
    Center,
    Right,
    BottomLeft,
    Bottom,
    BottomRight,
}

impl CropPosition {
    pub const ALL: [CropPosition; 9] = [
        CropPosition::TopLeft,
        CropPosition::Top,
        CropPosition::TopRight,
        CropPosition::Left,
        CropPosition::Center,
        CropPosition::Right,
        CropPosition::BottomLeft,
        CropPosition::Bottom,
        CropPosition::BottomRight,
    ];

    pub fn name(self) -> &'static str {
        match self {
            CropPosition::TopLeft => "top-left",
            CropPosition::Top => "top",
            CropPosition::TopRight => "top-right",
            CropPosition::Left => "left",
            CropPosition::Center => "center",
            CropPosition::Right => "right",
            CropPosition::BottomLeft => "bottom-left",
            CropPosition::Bottom => "bottom",
            CropPosition::BottomRight => "bottom-right",
        }
    }

    /// Horizontal and vertical anchors as fractions of the free space.
    fn anchors(self) -> (f64, f64) {
        match self {
            CropPosition::TopLeft => (0.0, 0.0),
            CropPosition::Top => (0.5, 0.0),
            CropPosition::TopRight => (1.0, 0.0),
            CropPosition::Left => (0.0, 0.5),
            CropPosition::Center => (0.5, 0.5),
            CropPosition::Right => (1.0, 0.5),
            CropPosition::BottomLeft => (0.0, 1.0),
            CropPosition::Bottom => (0.5, 1.0),
            CropPosition::BottomRight => (1.0, 1.0),
        }
    }
}

impl fmt::Display for CropPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CropPosition {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace(['_', ' '], "-");
        if normalized == "middle" {
            return Ok(CropPosition::Center);
        }
        CropPosition::ALL
            .into_iter()
            .find(|p| p.name() == normalized)
            .ok_or_else(|| PipelineError::validation("position", "one of the 9 named positions", s))
    }
}

/// What a crop is anchored on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CropAnchor {
    Position(CropPosition),
    Subject(BoundingBox),
    Focal(FocalPoint),
}

fn clamp_axis(offset: f64, src: u32, target: u32) -> u32 {
    let max = src.saturating_sub(target);
    if !offset.is_finite() {
        return 0;
    }
    (offset.round().max(0.0) as u32).min(max)
}

/// Offset for a named position.
pub fn offset_for_position(position: CropPosition, src: Size, target: Size) -> (u32, u32) {
    let (ax, ay) = position.anchors();
    let free_x = f64::from(src.w.saturating_sub(target.w));
    let free_y = f64::from(src.h.saturating_sub(target.h));
    // Floor keeps center crops stable for odd free space.
    (
        clamp_axis((free_x * ax).floor(), src.w, target.w),
        clamp_axis((free_y * ay).floor(), src.h, target.h),
    )
}

fn subject_axis(start: f32, extent: f32, src: u32, target: u32) -> u32 {
    let (start, extent) = (f64::from(start), f64::from(extent.max(0.0)));
    let (src_len, window) = (f64::from(src), f64::from(target));
    let mut offset = start + extent / 2.0 - window / 2.0;

    if extent > window {
        let margin = extent * SUBJECT_MARGIN;
        let near_start = start <= margin;
        let near_end = src_len - (start + extent) <= margin;
        if near_start && !near_end {
            offset = start;
        } else if near_end && !near_start {
            offset = start + extent - window;
        }
    }
    clamp_axis(offset, src, target)
}

/// Offset centering the window on a subject box.
pub fn offset_for_subject(subject: &BoundingBox, src: Size, target: Size) -> (u32, u32) {
    (
        subject_axis(subject.x, subject.width, src.w, target.w),
        subject_axis(subject.y, subject.height, src.h, target.h),
    )
}

/// Offset centering the window on a point.
pub fn offset_for_focal_point(point: FocalPoint, src: Size, target: Size) -> (u32, u32) {
    (
        clamp_axis(f64::from(point.x) - f64::from(target.w) / 2.0, src.w, target.w),
        clamp_axis(f64::from(point.y) - f64::from(target.h) / 2.0, src.h, target.h),
    )
}

pub fn compute_offset(anchor: CropAnchor, src: Size, target: Size) -> (u32, u32) {
    match anchor {
        CropAnchor::Position(position) => offset_for_position(position, src, target),
        CropAnchor::Subject(subject) => offset_for_subject(&subject, src, target),
        CropAnchor::Focal(point) => offset_for_focal_point(point, src, target),
    }
}

/// Copy the `target` window at `offset` out of `src`.
pub fn render_crop(src: &RgbaImage, offset: (u32, u32), target: Size) -> PipelineResult<RgbaImage> {
    let (w, h) = src.dimensions();
    if target.w == 0 || target.h == 0 {
        return Err(PipelineError::validation("crop size", "non-zero", format!("{}x{}", target.w, target.h)));
    }
    let fits_x = offset.0.checked_add(target.w).is_some_and(|end| end <= w);
    let fits_y = offset.1.checked_add(target.h).is_some_and(|end| end <= h);
    if !fits_x || !fits_y {
        return Err(PipelineError::validation(
            "crop window",
            format!("inside {}x{}", w, h),
            format!("{}x{} at ({}, {})", target.w, target.h, offset.0, offset.1),
        ));
    }

    let rect = Rect {
        x: offset.0,
        y: offset.1,
        w: target.w,
        h: target.h,
    };
    let raw = copy_rect(src.as_raw(), Size::new(w, h), rect);
    RgbaImage::from_raw(target.w, target.h, raw)
        .ok_or_else(|| PipelineError::resource("compositor", "crop buffer size mismatch"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SRC: Size = Size { w: 1000, h: 600 };
    const TARGET: Size = Size { w: 400, h: 300 };

    #[test]
    fn named_positions() {
        assert_eq!(offset_for_position(CropPosition::TopLeft, SRC, TARGET), (0, 0));
        assert_eq!(offset_for_position(CropPosition::Center, SRC, TARGET), (300, 150));
        assert_eq!(offset_for_position(CropPosition::BottomRight, SRC, TARGET), (600, 300));
        assert_eq!(offset_for_position(CropPosition::Top, SRC, TARGET), (300, 0));
        assert_eq!(offset_for_position(CropPosition::Left, SRC, TARGET), (0, 150));
    }

    #[test]
    fn center_of_square_source() {
        let (src, target) = (Size::new(1000, 1000), Size::new(500, 500));
        assert_eq!(offset_for_position(CropPosition::Center, src, target), (250, 250));
        for p in CropPosition::ALL {
            let (x, y) = offset_for_position(p, src, target);
            assert!(x <= 500 && y <= 500, "{p} out of range");
        }
    }

    #[test]
    fn position_parsing() {
        assert_eq!("top-left".parse::<CropPosition>().unwrap(), CropPosition::TopLeft);
        assert_eq!("Bottom_Right".parse::<CropPosition>().unwrap(), CropPosition::BottomRight);
        assert_eq!("middle".parse::<CropPosition>().unwrap(), CropPosition::Center);
        assert!("diagonal".parse::<CropPosition>().is_err());
        for p in CropPosition::ALL {
            assert_eq!(p.to_string().parse::<CropPosition>().unwrap(), p);
        }
    }

    #[test]
    fn focal_point_is_clamped() {
        let corner = FocalPoint { x: 990.0, y: 5.0 };
        assert_eq!(offset_for_focal_point(corner, SRC, TARGET), (600, 0));
        let middle = FocalPoint { x: 500.0, y: 300.0 };
        assert_eq!(offset_for_focal_point(middle, SRC, TARGET), (300, 150));
    }

    #[test]
    fn small_subject_is_centered() {
        let subject = BoundingBox::new(700.0, 200.0, 100.0, 100.0);
        assert_eq!(offset_for_subject(&subject, SRC, TARGET), (550, 100));
    }

    #[test]
    fn tall_subject_at_top_edge_keeps_its_top() {
        // 500px tall box touching the top; window is only 300px tall.
        let subject = BoundingBox::new(400.0, 10.0, 200.0, 500.0);
        let (x, y) = offset_for_subject(&subject, SRC, TARGET);
        assert_eq!(x, 300);
        assert_eq!(y, 10);
    }

    #[test]
    fn wide_subject_at_right_edge_keeps_its_right() {
        let subject = BoundingBox::new(350.0, 200.0, 640.0, 100.0);
        let (x, _) = offset_for_subject(&subject, SRC, TARGET);
        assert_eq!(x, 350 + 640 - 400);
    }

    #[test]
    fn render_copies_exact_pixels() {
        let src = RgbaImage::from_fn(8, 6, |x, y| image::Rgba([x as u8, y as u8, 0, 255]));
        let out = render_crop(&src, (3, 2), Size::new(4, 3)).unwrap();
        assert_eq!(out.dimensions(), (4, 3));
        assert_eq!(out.get_pixel(0, 0).0, [3, 2, 0, 255]);
        assert_eq!(out.get_pixel(3, 2).0, [6, 4, 0, 255]);
    }

    #[test]
    fn render_rejects_window_outside_source() {
        let src = RgbaImage::new(8, 6);
        let err = render_crop(&src, (6, 0), Size::new(4, 3)).unwrap_err();
        assert_eq!(err.category(), "validation");
    }
}
