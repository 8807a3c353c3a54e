// SPDX-License-Identifier: MIT
//! # crop-scale: Safe Scaling Kernels for the Smart-Crop Pipeline
//!
//! This crate holds the pure, allocation-aware pixel kernels used by the
//! smart-crop pipeline. Nothing here knows about models, pools or the GPU
//! memory governor; every function is deterministic and synchronous so the
//! async orchestrator can call it between suspension points.
//!
//! ## Key Components
//!
//! - [`presets`]: Dimension planning (safe dimensions, minimal discrete upscale factor, aspect fits)
//! - [`cpu`]: RGBA8 resampling built on `fast_image_resize` (SIMD accelerated)
//! - [`sharpen`]: Single-pass 4-neighbour high-boost sharpening
//! - [`tiles`]: Tiled upscaling that bounds peak working memory on very large outputs
//!
//! ## Dimension Safety
//!
//! Every GPU allocation downstream is sized from [`presets::safe_dimensions`],
//! which applies a two-stage clamp: first the per-axis ceiling, then the
//! total-pixel budget.
//!
//! ## Usage Example
//!
//! ```rust
//! use crop_scale::presets::{required_upscale_factor, safe_dimensions, Limits};
//!
//! let limits = Limits::default();
//! assert_eq!(required_upscale_factor(100, 100, 350, 350, &limits), 4);
//!
//! let safe = safe_dimensions(4000, 3000, 4.0, &limits);
//! assert!(safe.width <= limits.max_safe_dimension);
//! assert!(safe.was_adjusted);
//! ```

pub mod cpu;
pub mod presets;
pub mod sharpen;
pub mod tiles;
