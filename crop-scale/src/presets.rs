// SPDX-License-Identifier: MIT
//! # Dimension Planning
//!
//! Pure functions that decide how large an image may become before any pixel
//! work or GPU allocation happens.
//!
//! ## Two-Stage Clamp
//!
//! [`safe_dimensions`] is the controlling invariant for every downstream
//! allocation:
//! 1. **Axis ceiling**: neither side may exceed `min(max_texture_size, max_safe_dimension)`
//! 2. **Area ceiling**: `width * height` may not exceed `max_total_pixels`
//!
//! Each stage rescales proportionally and marks the result `was_adjusted`.
//!
//! ## Discrete Factors
//!
//! Super-resolution models exist only for a handful of scale factors
//! ([`UPSCALE_FACTORS`]). [`plan_factor`] picks the smallest one that covers the
//! requested growth and still fits the ceilings, and falls back to a capped
//! continuous factor otherwise.

/// Discrete scale factors a super-resolution model can be instantiated for.
pub const UPSCALE_FACTORS: [u32; 4] = [2, 3, 4, 8];

/// Upper bound applied to the required scale when no discrete factor qualifies.
pub const HARD_SCALE_CAP: u32 = 4;

/// Represents a 2D size with width and height in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Size {
    pub w: u32,
    pub h: u32,
}

impl Size {
    pub fn new(w: u32, h: u32) -> Self {
        Self { w, h }
    }

    /// Pixel count as `u64` so 8K×8K and larger never overflow.
    pub fn pixels(self) -> u64 {
        u64::from(self.w) * u64::from(self.h)
    }
}

/// Hardware and memory ceilings used by the planner.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Limits {
    /// Largest texture side the accelerator accepts.
    pub max_texture_size: u32,
    /// Largest side the pipeline is willing to produce.
    pub max_safe_dimension: u32,
    /// Total pixel budget for any single surface.
    pub max_total_pixels: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_texture_size: 16_384,
            max_safe_dimension: 8_192,
            max_total_pixels: 33_554_432, // 8192 * 4096
        }
    }
}

impl Limits {
    /// Effective single-axis ceiling.
    pub fn axis_ceiling(&self) -> u32 {
        self.max_texture_size.min(self.max_safe_dimension).max(1)
    }

    /// Whether a size passes both ceilings unchanged.
    pub fn admits(&self, size: Size) -> bool {
        size.w <= self.axis_ceiling()
            && size.h <= self.axis_ceiling()
            && size.pixels() <= self.max_total_pixels
    }
}

/// Planned output dimensions for a given source and scale.
///
/// `was_adjusted == true` means the requested scale had to be reduced.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SafeDimensions {
    pub width: u32,
    pub height: u32,
    pub scale: f64,
    pub was_adjusted: bool,
}

impl SafeDimensions {
    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }
}

/// Result of choosing an upscale factor.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FactorPlan {
    /// Chosen factor; `1` means no upscaling is needed.
    pub factor: u32,
    /// Continuous scale the target actually asks for.
    pub required: f64,
    /// No discrete factor fit the ceilings; `factor` is the capped required scale.
    pub possibly_oversized: bool,
}

/// Scale `(w, h)` by `scale`, clamping to the axis ceiling first and the
/// pixel budget second.
pub fn safe_dimensions(w: u32, h: u32, scale: f64, limits: &Limits) -> SafeDimensions {
    let (fw, fh) = (f64::from(w.max(1)), f64::from(h.max(1)));
    let mut scale = if scale.is_finite() && scale > 0.0 {
        scale
    } else {
        1.0
    };
    let mut was_adjusted = false;

    let ceiling = f64::from(limits.axis_ceiling());
    let long = fw.max(fh);
    if long * scale > ceiling {
        scale = ceiling / long;
        was_adjusted = true;
    }

    let budget = limits.max_total_pixels.max(1) as f64;
    let area = (fw * scale) * (fh * scale);
    if area > budget {
        scale *= (budget / area).sqrt();
        was_adjusted = true;
    }

    let axis = limits.axis_ceiling();
    let mut width = ((fw * scale).floor() as u32).clamp(1, axis);
    let mut height = ((fh * scale).floor() as u32).clamp(1, axis);

    // Rounding can leave the product one row over budget.
    while u64::from(width) * u64::from(height) > limits.max_total_pixels.max(1) {
        if width >= height {
            width -= 1;
        } else {
            height -= 1;
        }
        was_adjusted = true;
    }

    SafeDimensions {
        width,
        height,
        scale,
        was_adjusted,
    }
}

/// Continuous scale needed for `(w, h)` to cover `(tw, th)`.
pub fn required_scale(w: u32, h: u32, tw: u32, th: u32) -> f64 {
    let sx = f64::from(tw) / f64::from(w.max(1));
    let sy = f64::from(th) / f64::from(h.max(1));
    sx.max(sy)
}

/// Pick the smallest discrete factor that covers the target and fits the ceilings.
pub fn plan_factor(w: u32, h: u32, tw: u32, th: u32, limits: &Limits) -> FactorPlan {
    let required = required_scale(w, h, tw, th);
    if required <= 1.0 {
        return FactorPlan {
            factor: 1,
            required,
            possibly_oversized: false,
        };
    }

    for factor in UPSCALE_FACTORS {
        if f64::from(factor) >= required
            && !safe_dimensions(w, h, f64::from(factor), limits).was_adjusted
        {
            return FactorPlan {
                factor,
                required,
                possibly_oversized: false,
            };
        }
    }

    FactorPlan {
        factor: (required.ceil() as u32).clamp(1, HARD_SCALE_CAP),
        required,
        possibly_oversized: true,
    }
}

/// Minimal acceptable discrete upscale factor; `1` when no growth is needed.
pub fn required_upscale_factor(w: u32, h: u32, tw: u32, th: u32, limits: &Limits) -> u32 {
    plan_factor(w, h, tw, th, limits).factor
}

/// Fit the longest side to `target`, preserving aspect ratio. Upscaling is allowed.
pub fn fit_long_side(input: Size, target: u32) -> Size {
    let (w, h) = (f64::from(input.w.max(1)), f64::from(input.h.max(1)));
    let s = f64::from(target.max(1)) / w.max(h);
    Size {
        w: ((w * s).round() as u32).max(1),
        h: ((h * s).round() as u32).max(1),
    }
}

/// Smallest aspect-preserving size that fully covers `target`.
///
/// Used before cropping so the crop window always lies inside the source.
pub fn fit_cover(input: Size, target: Size) -> Size {
    let s = required_scale(input.w, input.h, target.w, target.h);
    let (w, h) = (f64::from(input.w.max(1)), f64::from(input.h.max(1)));
    Size {
        w: ((w * s).round() as u32).max(target.w).max(1),
        h: ((h * s).round() as u32).max(target.h).max(1),
    }
}

/// Largest size with the proportions of `aspect` that fits inside `input`.
pub fn fit_aspect_within(input: Size, aspect: Size) -> Size {
    let (w, h) = (u64::from(input.w.max(1)), u64::from(input.h.max(1)));
    let (aw, ah) = (u64::from(aspect.w.max(1)), u64::from(aspect.h.max(1)));
    if w * ah >= aw * h {
        let width = (h as f64 * aw as f64 / ah as f64).round() as u64;
        Size::new(width.clamp(1, w) as u32, h as u32)
    } else {
        let height = (w as f64 * ah as f64 / aw as f64).round() as u64;
        Size::new(w as u32, height.clamp(1, h) as u32)
    }
}
