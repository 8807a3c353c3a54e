//! Capability-aware upscale routing on top of the pure size math in
//! [`crop_scale::presets`].

use crop_scale::presets::{
    Limits, SafeDimensions, Size, UPSCALE_FACTORS, plan_factor, safe_dimensions,
};

use crate::core::memory::AiCapability;

/// Why the model stage is bypassed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BypassReason {
    AiDisabled,
    /// Caller opted out of the AI path.
    NotRequested,
    /// Not even the smallest factor keeps the model's output inside the ceilings.
    Oversized,
}

/// How a source reaches its target size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UpscaleRoute {
    /// Target is no larger than the source on either axis.
    Resample,
    /// Try the model at `factor`; its raw output will be `model_output`.
    /// The output may fall short of the target when the ceilings forced a
    /// smaller factor; the cascade resamples the rest of the way.
    Model {
        factor: u32,
        model_output: SafeDimensions,
    },
    /// Go straight to the non-AI stages.
    Fallback { reason: BypassReason },
}

impl UpscaleRoute {
    pub fn uses_model(&self) -> bool {
        matches!(self, UpscaleRoute::Model { .. })
    }
}

/// Decide how `src` gets to `target`.
pub fn plan_upscale(
    src: Size,
    target: Size,
    limits: &Limits,
    capability: AiCapability,
    allow_ai: bool,
) -> UpscaleRoute {
    let plan = plan_factor(src.w, src.h, target.w, target.h, limits);
    if plan.factor <= 1 {
        return UpscaleRoute::Resample;
    }
    if !allow_ai {
        return UpscaleRoute::Fallback {
            reason: BypassReason::NotRequested,
        };
    }
    if capability == AiCapability::Disabled {
        return UpscaleRoute::Fallback {
            reason: BypassReason::AiDisabled,
        };
    }
    let factor = if plan.possibly_oversized {
        // Largest factor under the capped one whose output fits as is.
        let fitting = UPSCALE_FACTORS
            .iter()
            .copied()
            .filter(|&f| f <= plan.factor)
            .filter(|&f| !safe_dimensions(src.w, src.h, f64::from(f), limits).was_adjusted)
            .max();
        match fitting {
            Some(factor) => factor,
            None => {
                return UpscaleRoute::Fallback {
                    reason: BypassReason::Oversized,
                };
            }
        }
    } else {
        plan.factor
    };
    UpscaleRoute::Model {
        factor,
        model_output: safe_dimensions(src.w, src.h, f64::from(factor), limits),
    }
}

/// Clamp a requested output size into the ceilings, preserving aspect ratio.
pub fn clamp_target(src: Size, target: Size, limits: &Limits) -> Size {
    if limits.admits(target) {
        return target;
    }
    let scale = f64::from(target.w) / f64::from(src.w.max(1));
    safe_dimensions(src.w, src.h, scale, limits).size()
}
