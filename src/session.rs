//! # Image Pipeline
//!
//! High-level orchestration of resize, crop and smart-crop batches. Provides a
//! builder-pattern API for wiring the external collaborators and the shared
//! [`ResourceManager`].
//!
//! ## Per-Image Flow
//!
//! ```text
//! decode ─▶ plan target ─▶ upscale cascade / resample ─▶ [detect subject] ─▶ crop ─▶ encode
//! ```
//!
//! - **Resize** fits the long side to the target dimension.
//! - **Crop** modes first scale the source to cover the crop window, then copy
//!   the window out at the chosen offset.
//!
//! ## Batches
//!
//! Images are processed one after another. Peak memory stays at roughly one
//! image's working set. Every task yields exactly one [`ProcessedImageResult`];
//! a failing image records its error and the batch continues.

use std::sync::Arc;

use crop_scale::cpu::ResampleFilter;
use crop_scale::presets::{Size, fit_aspect_within, fit_cover, fit_long_side};
use image::RgbaImage;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::codec::{self, OutputFormat};
use crate::config::PipelineConfig;
use crate::core::clock::{Clock, SystemClock};
use crate::core::resources::ResourceManager;
use crate::error::{HasRecoverySuggestion, HasSeverity, PipelineError, PipelineResult};
use crate::models::fallback::{FixedBoxDetector, NoAccelerator, ResamplingRuntime};
use crate::models::{FocalPoint, GpuMemory, ObjectDetector, SuperResolutionRuntime};
use crate::processing::compositor::{self, CropAnchor, CropPosition};
use crate::processing::detect::{SubjectChoice, SubjectDetector, edge_focal_point};
use crate::processing::planner::{self, UpscaleRoute};
use crate::processing::resample;
use crate::processing::upscale::{UpscaleCascade, run_blocking};

/// Encoded source image with a caller-chosen label.
#[derive(Debug, Clone)]
pub struct ImageSource {
    pub label: String,
    pub bytes: Arc<Vec<u8>>,
}

impl ImageSource {
    pub fn new(label: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            label: label.into(),
            bytes: Arc::new(bytes),
        }
    }
}

/// What to do with one image.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskMode {
    /// Fit the longest side to `target_dimension`.
    Resize { target_dimension: u32 },
    Crop {
        width: u32,
        height: u32,
        position: CropPosition,
    },
    /// Detector-driven crop. `focal_hint` (source pixels) skips detection.
    SmartCrop {
        width: u32,
        height: u32,
        focal_hint: Option<FocalPoint>,
    },
    /// Edge-density crop without the detector.
    SimpleSmartCrop {
        width: u32,
        height: u32,
        fallback_position: CropPosition,
    },
}

impl TaskMode {
    pub fn name(&self) -> &'static str {
        match self {
            TaskMode::Resize { .. } => "resize",
            TaskMode::Crop { .. } => "crop",
            TaskMode::SmartCrop { .. } => "smart-crop",
            TaskMode::SimpleSmartCrop { .. } => "simple-smart-crop",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ImageTask {
    pub source: ImageSource,
    pub mode: TaskMode,
}

/// Output options shared by a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessOptions {
    pub format: OutputFormat,
    /// 1..=100, JPEG only
    pub jpeg_quality: u8,
    /// Allow the super-resolution model when an image must grow.
    pub allow_ai: bool,
    /// Kernel for plain downscales.
    pub filter: ResampleFilter,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self {
            format: OutputFormat::Png,
            jpeg_quality: 90,
            allow_ai: true,
            filter: ResampleFilter::Lanczos3,
        }
    }
}

/// Terminal record for one task.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedImageResult {
    pub label: String,
    /// Encoded image, `None` on failure.
    pub output: Option<Vec<u8>>,
    pub dimensions: (u32, u32),
    pub used_ai: bool,
    pub error: Option<String>,
}

impl ProcessedImageResult {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    fn failed(label: String, error: &PipelineError) -> Self {
        Self {
            label,
            output: None,
            dimensions: (0, 0),
            used_ai: false,
            error: Some(error.to_string()),
        }
    }
}

struct Rendered {
    image: RgbaImage,
    used_ai: bool,
}

/// How the crop offset is chosen.
#[derive(Debug, Clone, Copy)]
enum CropMode {
    Fixed(CropPosition),
    Smart(Option<FocalPoint>),
    Simple(CropPosition),
}

/// Resize/crop orchestrator.
#[derive(Debug, Clone)]
pub struct ImagePipeline {
    resources: Arc<ResourceManager>,
    cascade: UpscaleCascade,
    subjects: SubjectDetector,
}

impl ImagePipeline {
    /// Create a new pipeline using the builder pattern.
    pub fn builder() -> ImagePipelineBuilder {
        ImagePipelineBuilder::new()
    }

    pub fn resources(&self) -> &Arc<ResourceManager> {
        &self.resources
    }

    pub fn subjects(&self) -> &SubjectDetector {
        &self.subjects
    }

    pub fn config(&self) -> &PipelineConfig {
        self.resources.config()
    }

    /// Dispose every model and reset the detector, unless a model is leased.
    pub fn aggressive_cleanup(&self) -> crate::core::resources::CleanupOutcome {
        self.resources.aggressive_cleanup(Some(self.subjects.detector()))
    }

    pub async fn resize(
        &self,
        images: &[ImageSource],
        target_dimension: u32,
        options: &ProcessOptions,
    ) -> Vec<ProcessedImageResult> {
        self.run_all(images, TaskMode::Resize { target_dimension }, options)
            .await
    }

    pub async fn crop(
        &self,
        images: &[ImageSource],
        width: u32,
        height: u32,
        position: CropPosition,
        options: &ProcessOptions,
    ) -> Vec<ProcessedImageResult> {
        let mode = TaskMode::Crop {
            width,
            height,
            position,
        };
        self.run_all(images, mode, options).await
    }

    /// Detector-driven crop; detector failures fall back to the edge-density path.
    pub async fn smart_crop(
        &self,
        images: &[ImageSource],
        width: u32,
        height: u32,
        options: &ProcessOptions,
    ) -> Vec<ProcessedImageResult> {
        let mode = TaskMode::SmartCrop {
            width,
            height,
            focal_hint: None,
        };
        self.run_all(images, mode, options).await
    }

    /// Edge-density crop; `fallback_position` is used when the image has no edges.
    pub async fn simple_smart_crop(
        &self,
        images: &[ImageSource],
        width: u32,
        height: u32,
        fallback_position: CropPosition,
        options: &ProcessOptions,
    ) -> Vec<ProcessedImageResult> {
        let mode = TaskMode::SimpleSmartCrop {
            width,
            height,
            fallback_position,
        };
        self.run_all(images, mode, options).await
    }

    async fn run_all(
        &self,
        images: &[ImageSource],
        mode: TaskMode,
        options: &ProcessOptions,
    ) -> Vec<ProcessedImageResult> {
        let tasks = images
            .iter()
            .map(|source| ImageTask {
                source: source.clone(),
                mode: mode.clone(),
            })
            .collect();
        self.process(tasks, options).await
    }

    /// Run a mixed batch sequentially; one result per task, in order.
    pub async fn process(
        &self,
        tasks: Vec<ImageTask>,
        options: &ProcessOptions,
    ) -> Vec<ProcessedImageResult> {
        let total = tasks.len();
        let mut results = Vec::with_capacity(total);
        for task in tasks {
            let span = info_span!("image", label = %task.source.label, mode = task.mode.name());
            results.push(self.process_one(task, options).instrument(span).await);
        }
        let failed = results.iter().filter(|r| !r.is_ok()).count();
        info!(total, failed, "batch finished");
        results
    }

    async fn process_one(&self, task: ImageTask, options: &ProcessOptions) -> ProcessedImageResult {
        let label = task.source.label.clone();
        match self.render_and_encode(task, options).await {
            Ok((output, dimensions, used_ai)) => {
                debug!(width = dimensions.0, height = dimensions.1, used_ai, "image done");
                ProcessedImageResult {
                    label,
                    output: Some(output),
                    dimensions,
                    used_ai,
                    error: None,
                }
            }
            Err(error) => {
                warn!(
                    error = %error,
                    category = error.category(),
                    severity = ?error.severity(),
                    suggestion = error.recovery_suggestion().unwrap_or("none"),
                    "image failed"
                );
                ProcessedImageResult::failed(label, &error)
            }
        }
    }

    async fn render_and_encode(
        &self,
        task: ImageTask,
        options: &ProcessOptions,
    ) -> PipelineResult<(Vec<u8>, (u32, u32), bool)> {
        let rendered = self.render(task, options).await?;
        let dimensions = rendered.image.dimensions();
        let (format, quality) = (options.format, options.jpeg_quality);
        let image = rendered.image;
        let output = run_blocking(move || codec::encode(&image, format, quality)).await?;
        Ok((output, dimensions, rendered.used_ai))
    }

    async fn render(&self, task: ImageTask, options: &ProcessOptions) -> PipelineResult<Rendered> {
        let source = task.source;
        let src = Arc::new(run_blocking(move || codec::decode(&source.label, &source.bytes)).await?);

        match task.mode {
            TaskMode::Resize { target_dimension } => {
                self.resize_one(src, target_dimension, options).await
            }
            TaskMode::Crop {
                width,
                height,
                position,
            } => {
                self.crop_one(src, Size::new(width, height), CropMode::Fixed(position), options)
                    .await
            }
            TaskMode::SmartCrop {
                width,
                height,
                focal_hint,
            } => {
                self.crop_one(src, Size::new(width, height), CropMode::Smart(focal_hint), options)
                    .await
            }
            TaskMode::SimpleSmartCrop {
                width,
                height,
                fallback_position,
            } => {
                self.crop_one(
                    src,
                    Size::new(width, height),
                    CropMode::Simple(fallback_position),
                    options,
                )
                .await
            }
        }
    }

    async fn resize_one(
        &self,
        src: Arc<RgbaImage>,
        target_dimension: u32,
        options: &ProcessOptions,
    ) -> PipelineResult<Rendered> {
        if target_dimension == 0 {
            return Err(PipelineError::validation("target_dimension", "greater than 0", "0"));
        }
        let src_size = resample::size_of(&src);
        let requested = fit_long_side(src_size, target_dimension);
        let limits = self.config().limits.to_limits();
        let target = planner::clamp_target(src_size, requested, &limits);
        if target != requested {
            warn!(
                requested_w = requested.w,
                requested_h = requested.h,
                width = target.w,
                height = target.h,
                "resize target clamped to safe dimensions"
            );
        }
        self.scale_to(src, target, options).await
    }

    async fn crop_one(
        &self,
        src: Arc<RgbaImage>,
        target: Size,
        mode: CropMode,
        options: &ProcessOptions,
    ) -> PipelineResult<Rendered> {
        let limits = self.config().limits.to_limits();
        if target.w == 0 || target.h == 0 || !limits.admits(target) {
            return Err(PipelineError::validation(
                "crop size",
                format!("non-zero and within {}px per axis", limits.axis_ceiling()),
                format!("{}x{}", target.w, target.h),
            )
            .with_recovery_suggestion("request a smaller crop or raise the configured limits"));
        }

        let src_size = resample::size_of(&src);
        let cover = fit_cover(src_size, target);
        if !limits.admits(cover) {
            // Cut the window's aspect out of the source first, so nothing
            // larger than the window itself is ever scaled.
            let window = fit_aspect_within(src_size, target);
            debug!(
                cover_w = cover.w,
                cover_h = cover.h,
                window_w = window.w,
                window_h = window.h,
                "cover exceeds limits, cropping before scaling"
            );
            let anchor = self.choose_anchor(&src, mode, (1.0, 1.0)).await;
            let offset = compositor::compute_offset(anchor, src_size, window);
            let region = compositor::render_crop(&src, offset, window)?;
            return self.scale_to(Arc::new(region), target, options).await;
        }

        let scaled = self.scale_to(src, cover, options).await?;
        let hint_scale = (
            cover.w as f32 / src_size.w as f32,
            cover.h as f32 / src_size.h as f32,
        );
        let anchor = self.choose_anchor(&scaled.image, mode, hint_scale).await;

        let offset = compositor::compute_offset(anchor, cover, target);
        debug!(?anchor, x = offset.0, y = offset.1, "crop offset");
        let image = compositor::render_crop(&scaled.image, offset, target)?;
        Ok(Rendered {
            image,
            used_ai: scaled.used_ai,
        })
    }

    /// Where the crop window goes on `image`. Focal hints are given in source
    /// pixels and multiplied by `hint_scale` to land on `image`.
    async fn choose_anchor(&self, image: &RgbaImage, mode: CropMode, hint_scale: (f32, f32)) -> CropAnchor {
        match mode {
            CropMode::Fixed(position) => CropAnchor::Position(position),
            CropMode::Simple(fallback) => self.simple_anchor(image, fallback),
            CropMode::Smart(Some(hint)) => CropAnchor::Focal(FocalPoint {
                x: hint.x * hint_scale.0,
                y: hint.y * hint_scale.1,
            }),
            CropMode::Smart(None) => match self.subjects.locate(image).await {
                Ok(SubjectChoice::Subject { prediction, .. }) => {
                    CropAnchor::Subject(prediction.bounding_box)
                }
                Ok(SubjectChoice::FocalPoint(point)) => CropAnchor::Focal(point),
                Err(e) => {
                    let reason = format!("{e:#}");
                    warn!(error = %reason, "detector failed, using edge density");
                    self.simple_anchor(image, CropPosition::Center)
                }
            },
        }
    }

    fn simple_anchor(&self, image: &RgbaImage, fallback: CropPosition) -> CropAnchor {
        edge_focal_point(image, self.config().detector.edge_threshold)
            .map(CropAnchor::Focal)
            .unwrap_or(CropAnchor::Position(fallback))
    }

    /// Bring `src` to exactly `target`, through the cascade when it must grow.
    async fn scale_to(
        &self,
        src: Arc<RgbaImage>,
        target: Size,
        options: &ProcessOptions,
    ) -> PipelineResult<Rendered> {
        let src_size = resample::size_of(&src);
        if src_size == target {
            let image = Arc::try_unwrap(src).unwrap_or_else(|shared| (*shared).clone());
            return Ok(Rendered {
                image,
                used_ai: false,
            });
        }

        let limits = self.config().limits.to_limits();
        let route = planner::plan_upscale(
            src_size,
            target,
            &limits,
            self.resources.capability(),
            options.allow_ai,
        );
        if route == UpscaleRoute::Resample {
            let filter = options.filter;
            let image = run_blocking(move || resample::resample(&src, target, filter)).await?;
            return Ok(Rendered {
                image,
                used_ai: false,
            });
        }

        let outcome = self.cascade.upscale(src, target, route).await?;
        debug!(stages = ?outcome.stages, used_ai = outcome.used_ai, "upscale finished");
        Ok(Rendered {
            image: outcome.image,
            used_ai: outcome.used_ai,
        })
    }
}

/// Builder for [`ImagePipeline`].
///
/// Unset collaborators default to the in-process stand-ins.
pub struct ImagePipelineBuilder {
    config: PipelineConfig,
    detector: Option<Arc<dyn ObjectDetector>>,
    runtime: Option<Arc<dyn SuperResolutionRuntime>>,
    gpu: Option<Arc<dyn GpuMemory>>,
    clock: Option<Arc<dyn Clock>>,
    resources: Option<Arc<ResourceManager>>,
}

impl ImagePipelineBuilder {
    pub fn new() -> Self {
        Self {
            config: PipelineConfig::default(),
            detector: None,
            runtime: None,
            gpu: None,
            clock: None,
            resources: None,
        }
    }

    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_detector(mut self, detector: Arc<dyn ObjectDetector>) -> Self {
        self.detector = Some(detector);
        self
    }

    pub fn with_runtime(mut self, runtime: Arc<dyn SuperResolutionRuntime>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn with_gpu_memory(mut self, gpu: Arc<dyn GpuMemory>) -> Self {
        self.gpu = Some(gpu);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Share an existing resource manager. Its config, runtime and clock win
    /// over the builder's.
    pub fn with_resources(mut self, resources: Arc<ResourceManager>) -> Self {
        self.resources = Some(resources);
        self
    }

    pub fn build(self) -> PipelineResult<ImagePipeline> {
        let resources = match self.resources {
            Some(resources) => resources,
            None => {
                self.config
                    .validate()
                    .map_err(|reason| PipelineError::config("pipeline", "<builder>", reason))?;
                Arc::new(ResourceManager::with_clock(
                    self.config,
                    self.runtime
                        .unwrap_or_else(|| Arc::new(ResamplingRuntime::default())),
                    self.gpu.unwrap_or_else(|| Arc::new(NoAccelerator)),
                    self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
                ))
            }
        };
        let detector = self
            .detector
            .unwrap_or_else(|| Arc::new(FixedBoxDetector::default()));
        let subjects = SubjectDetector::new(detector, resources.config().detector.clone());

        Ok(ImagePipeline {
            cascade: UpscaleCascade::new(resources.clone()),
            resources,
            subjects,
        })
    }
}

impl Default for ImagePipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
