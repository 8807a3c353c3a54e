//! # Processing Module
//!
//! The per-image stages of the pipeline:
//!
//! 1. **planner**: capability-aware routing over the pure size math
//! 2. **upscale**: model-first cascade with CPU fallbacks
//! 3. **detect**: subject selection and edge-density focal point
//! 4. **compositor**: crop offsets and exact-copy rendering
//!
//! `resample` holds the blocking CPU passes shared by the stages.

pub mod compositor;
pub mod detect;
pub mod planner;
pub mod resample;
pub mod upscale;

pub use compositor::{CropAnchor, CropPosition};
pub use detect::{SubjectChoice, SubjectDetector};
pub use planner::{BypassReason, UpscaleRoute, plan_upscale};
pub use upscale::{CascadeStage, UpscaleCascade, UpscaleOutcome};
