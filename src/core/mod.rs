//! # Core Infrastructure Module
//!
//! Shared resource state for the pipeline: the memory governor with its AI
//! capability latch, the reference-counted model pool, the clock that drives
//! idle eviction, the hold that keeps a lease alive while an inference
//! runs, and the resource manager that owns them.

pub mod clock;
pub mod inflight;
pub mod memory;
pub mod model_pool;
pub mod resources;

pub use clock::{Clock, ManualClock, SystemClock};
pub use inflight::InferenceHold;
pub use memory::{AiCapability, MemoryGovernor, MemoryState};
pub use model_pool::{FallbackReason, ModelLease, ModelPool};
pub use resources::{CleanupOutcome, ResourceManager, ResourceStats};
