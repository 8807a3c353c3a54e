//! # Smart Crop Library
//!
//! An image resize, crop and smart-crop pipeline that can enlarge images with
//! an external super-resolution model while staying inside a GPU memory budget.
//!
//! ## Architecture
//!
//! The library is organized into several key modules:
//! - `core`: Memory governor, model pool and the resource manager owning them
//! - `processing`: Dimension planning, upscale cascade, subject detection, compositing
//! - `models`: Contracts for the external detector, super-resolution runtime and GPU signal
//! - `session`: High-level batch orchestration
//! - `config`: Configuration management and validation
//! - `codec`: Decoding inputs and encoding results
//!
//! ## Features
//!
//! - **Always an answer**: every image gets a result; AI failures degrade to CPU resampling
//! - **Bounded memory**: two-stage axis/area clamp on every planned surface, tiling for huge outputs
//! - **Pooled models**: one reference-counted instance per scale, evicted when idle
//! - **Failure latch**: repeated AI failures disable the AI path until an explicit reset
//! - **Async/await**: Built on Tokio; CPU-bound work runs on the blocking pool
//!
//! ## Example
//!
//! ```rust,no_run
//! use smart_crop::session::{ImagePipeline, ImageSource, ProcessOptions};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let pipeline = ImagePipeline::builder().build()?;
//! let photo = ImageSource::new("photo.jpg", std::fs::read("photo.jpg")?);
//!
//! let results = pipeline
//!     .smart_crop(&[photo], 500, 500, &ProcessOptions::default())
//!     .await;
//! for result in results {
//!     println!("{}: {:?} used_ai={}", result.label, result.dimensions, result.used_ai);
//! }
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod config;
pub mod core;
pub mod error;
pub mod models;
pub mod processing;
pub mod session;

/// Re-export error types for convenience
pub use error::{HasRecoverySuggestion, HasSeverity, PipelineError, PipelineResult, Recoverable};

/// Re-export commonly used types
pub use codec::OutputFormat;
pub use crate::core::{AiCapability, ResourceManager};
pub use processing::CropPosition;
pub use session::{
    ImagePipeline, ImagePipelineBuilder, ImageSource, ImageTask, ProcessOptions,
    ProcessedImageResult, TaskMode,
};
