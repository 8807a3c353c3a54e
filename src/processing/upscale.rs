//! # Upscale Cascade
//!
//! Produces an upscaled image of exactly the target size, trying the AI model
//! first and degrading to CPU resampling on any failure.
//!
//! ## Stages
//!
//! ```text
//! TryModel ──ok──────────────────────────────────────────▶ Done (used_ai)
//!    │ failure / timeout / fallback lease / too many orphans
//!    ▼
//! target pixels > tiling threshold ? TryTiled : TryEnhancedFallback ──▶ Done
//! ```
//!
//! The model call runs as its own task raced against the inference timeout,
//! carrying an [`InferenceHold`] that owns the model lease. On timeout the task
//! is aborted and the hold is marked orphaned: the lease and the orphan count
//! are released only when the last hold drops, including holds a model moved
//! into blocking work. The model stage is skipped while the orphan count is
//! above the cap.
//!
//! Only a model success or a counted AI failure touches the governor's latch.
//! Skipping the model (fallback lease, orphan cap) leaves it unchanged.

use std::sync::Arc;

use crop_scale::cpu::ResampleFilter;
use crop_scale::presets::Size;
use image::RgbaImage;
use tracing::{debug, info, warn};

use crate::core::inflight::InferenceHold;
use crate::core::resources::ResourceManager;
use crate::error::{PipelineError, PipelineResult, Recoverable, classify};
use crate::models::{UpscaleParams, normalize_output};
use crate::processing::planner::UpscaleRoute;
use crate::processing::resample;

/// One step of the cascade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CascadeStage {
    TryModel,
    TryEnhancedFallback,
    TryTiled,
    Done,
}

/// What the cascade produced and how.
#[derive(Debug, Clone)]
pub struct UpscaleOutcome {
    pub image: RgbaImage,
    pub used_ai: bool,
    /// Stages visited, in order, ending with `Done`.
    pub stages: Vec<CascadeStage>,
    /// Why the model stage did not produce the image, if it was tried.
    pub model_failure: Option<String>,
}

/// Why the model stage yielded nothing.
enum ModelMiss {
    /// Counted against the AI capability.
    Failed(PipelineError),
    /// Not attempted or not available; not counted.
    Skipped(String),
}

#[derive(Debug, Clone)]
pub struct UpscaleCascade {
    resources: Arc<ResourceManager>,
}

impl UpscaleCascade {
    pub fn new(resources: Arc<ResourceManager>) -> Self {
        Self { resources }
    }

    fn fallback_stage(&self, target: Size) -> CascadeStage {
        if target.pixels() > self.resources.config().cascade.tiling_threshold_pixels {
            CascadeStage::TryTiled
        } else {
            CascadeStage::TryEnhancedFallback
        }
    }

    /// Bring `src` to exactly `target` along `route`.
    pub async fn upscale(
        &self,
        src: Arc<RgbaImage>,
        target: Size,
        route: UpscaleRoute,
    ) -> PipelineResult<UpscaleOutcome> {
        let mut stages = Vec::with_capacity(3);
        let mut model_failure = None;
        let mut stage = match route {
            UpscaleRoute::Resample => {
                let image = run_blocking(move || resample::resample(&src, target, ResampleFilter::Lanczos3)).await?;
                return Ok(UpscaleOutcome {
                    image,
                    used_ai: false,
                    stages: vec![CascadeStage::Done],
                    model_failure: None,
                });
            }
            UpscaleRoute::Model { .. } => CascadeStage::TryModel,
            UpscaleRoute::Fallback { reason } => {
                debug!(?reason, "model stage bypassed");
                self.fallback_stage(target)
            }
        };

        loop {
            stages.push(stage);
            match stage {
                CascadeStage::TryModel => {
                    let UpscaleRoute::Model { factor, .. } = route else {
                        stage = self.fallback_stage(target);
                        continue;
                    };
                    match self.try_model(src.clone(), factor, target).await {
                        Ok(image) => {
                            self.resources.governor().record_success();
                            stages.push(CascadeStage::Done);
                            return Ok(UpscaleOutcome {
                                image,
                                used_ai: true,
                                stages,
                                model_failure: None,
                            });
                        }
                        Err(ModelMiss::Failed(error)) => {
                            warn!(
                                factor,
                                error = %error,
                                recoverable = error.is_recoverable(),
                                "model upscale failed, falling back"
                            );
                            self.resources.governor().record_failure(&error);
                            model_failure = Some(error.to_string());
                        }
                        Err(ModelMiss::Skipped(reason)) => {
                            debug!(factor, %reason, "model upscale skipped");
                            model_failure = Some(reason);
                        }
                    }
                    stage = self.fallback_stage(target);
                }
                CascadeStage::TryEnhancedFallback | CascadeStage::TryTiled => {
                    let tiled = stage == CascadeStage::TryTiled;
                    let config = self.resources.config().cascade.clone();
                    let source = src.clone();
                    let image = run_blocking(move || {
                        if tiled {
                            resample::tiled(&source, target, &config)
                        } else {
                            resample::enhanced(&source, target, &config)
                        }
                    })
                    .await?;
                    stages.push(CascadeStage::Done);
                    return Ok(UpscaleOutcome {
                        image,
                        used_ai: false,
                        stages,
                        model_failure,
                    });
                }
                CascadeStage::Done => {
                    return Err(PipelineError::resource(
                        "upscale cascade",
                        "reached Done without an image",
                    ));
                }
            }
        }
    }

    async fn try_model(
        &self,
        src: Arc<RgbaImage>,
        factor: u32,
        target: Size,
    ) -> Result<RgbaImage, ModelMiss> {
        let governor = self.resources.governor().clone();
        let cascade_config = &self.resources.config().cascade;

        let orphaned = governor.orphaned_inferences();
        if orphaned > cascade_config.max_orphaned_inferences {
            return Err(ModelMiss::Skipped(format!(
                "{} timed-out inferences still running",
                orphaned
            )));
        }

        let lease = self.resources.pool().acquire(factor).await;
        let Some(model) = lease.model().cloned() else {
            return Err(ModelMiss::Skipped(format!(
                "no model for x{}: {:?}",
                factor,
                lease.fallback_reason()
            )));
        };

        governor.wait_for_cleanup().await;

        let timeout = cascade_config.inference_timeout();
        let params = UpscaleParams::for_scale(factor);
        let hold = InferenceHold::new(lease, governor.clone());
        let mut task = tokio::spawn(
            hold.clone()
                .scope(async move { model.upscale(src, params).await }),
        );

        let output = match tokio::time::timeout(timeout, &mut task).await {
            Ok(Ok(Ok(output))) => output,
            Ok(Ok(Err(e))) => {
                return Err(ModelMiss::Failed(classify::inference_failure(
                    factor,
                    format!("{e:#}"),
                )));
            }
            Ok(Err(join_error)) => {
                return Err(ModelMiss::Failed(PipelineError::inference(
                    factor,
                    join_error.to_string(),
                )));
            }
            Err(_) => {
                let orphans = hold.orphan();
                task.abort();
                warn!(factor, orphans, timeout_ms = timeout.as_millis() as u64, "inference timed out");
                return Err(ModelMiss::Failed(PipelineError::inference_timeout(
                    factor,
                    timeout.as_millis() as u64,
                )));
            }
        };
        drop(hold);

        let image = run_blocking(move || {
            let image = normalize_output(output)
                .map_err(|e| PipelineError::inference(factor, format!("unusable model output: {e:#}")))?;
            if image.dimensions() == (target.w, target.h) {
                return Ok(image);
            }
            resample::resample(&image, target, ResampleFilter::Lanczos3)
        })
        .await
        .map_err(|e| {
            if classify::counts_toward_ai_disable(&e) {
                ModelMiss::Failed(e)
            } else {
                ModelMiss::Skipped(e.to_string())
            }
        })?;

        info!(factor, width = target.w, height = target.h, "model upscale finished");
        Ok(image)
    }
}

/// Run CPU-bound work off the async workers.
pub(crate) async fn run_blocking<T, F>(f: F) -> PipelineResult<T>
where
    F: FnOnce() -> PipelineResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| PipelineError::resource("blocking worker", e.to_string()))?
}
