//! In-process stand-ins for the external model collaborators.
//!
//! - [`FixedBoxDetector`] always reports one centered box.
//! - [`ResamplingRuntime`] "upscales" with Lanczos3 plus a high-boost pass on the CPU.
//! - [`NoAccelerator`] reports zero accelerator memory.
//!
//! They keep the whole pipeline usable on machines without a model server and
//! double as deterministic collaborators in tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use crop_scale::cpu::{self, ResampleFilter};
use crop_scale::presets::Size;
use crop_scale::sharpen;
use fast_image_resize as fr;
use image::RgbaImage;

use crate::core::inflight;

use super::{
    BoundingBox, GpuMemory, ObjectDetector, Prediction, SuperResolutionModel,
    SuperResolutionRuntime, UpscaleOutput, UpscaleParams,
};

/// Reports a single centered box covering `fraction` of each axis.
#[derive(Debug, Clone)]
pub struct FixedBoxDetector {
    pub fraction: f32,
    pub class_name: String,
}

impl Default for FixedBoxDetector {
    fn default() -> Self {
        Self {
            fraction: 0.5,
            class_name: "object".to_string(),
        }
    }
}

#[async_trait]
impl ObjectDetector for FixedBoxDetector {
    async fn detect(&self, image: &RgbaImage) -> Result<Vec<Prediction>> {
        let (w, h) = (image.width() as f32, image.height() as f32);
        let f = self.fraction.clamp(0.0, 1.0);
        let (bw, bh) = (w * f, h * f);
        Ok(vec![Prediction::new(
            BoundingBox::new((w - bw) / 2.0, (h - bh) / 2.0, bw, bh),
            self.class_name.clone(),
            1.0,
        )])
    }
}

/// No accelerator present.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoAccelerator;

impl GpuMemory for NoAccelerator {
    fn bytes_in_use(&self) -> u64 {
        0
    }
}

/// CPU super-resolution stand-in.
#[derive(Debug, Default)]
pub struct ResamplingRuntime {
    loads: AtomicUsize,
}

impl ResamplingRuntime {
    /// Number of `load` calls served so far.
    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl SuperResolutionRuntime for ResamplingRuntime {
    async fn load(&self, scale: u32) -> Result<Arc<dyn SuperResolutionModel>> {
        if scale < 2 {
            return Err(anyhow!("no model for x{} upscaling", scale));
        }
        self.loads.fetch_add(1, Ordering::Relaxed);
        Ok(Arc::new(ResamplingModel { scale }))
    }
}

#[derive(Debug)]
pub struct ResamplingModel {
    scale: u32,
}

#[async_trait]
impl SuperResolutionModel for ResamplingModel {
    async fn upscale(&self, image: Arc<RgbaImage>, params: UpscaleParams) -> Result<UpscaleOutput> {
        let scale = if params.scale == 0 { self.scale } else { params.scale };
        let hold = inflight::current();
        let surface = tokio::task::spawn_blocking(move || {
            let _hold = hold;
            resample_scaled(&image, scale)
        })
        .await
        .context("resampling task failed")??;
        Ok(UpscaleOutput::Surface(surface))
    }
}

fn resample_scaled(image: &RgbaImage, scale: u32) -> Result<RgbaImage> {
    let src = Size::new(image.width(), image.height());
    let dst = Size::new(
        src.w.checked_mul(scale).context("width overflow")?,
        src.h.checked_mul(scale).context("height overflow")?,
    );
    let mut resizer = fr::Resizer::new();
    let resampled = cpu::resample_rgba(
        &mut resizer,
        image.as_raw(),
        src,
        None,
        dst,
        ResampleFilter::Lanczos3,
    )?;
    let sharpened = sharpen::high_boost(&resampled, dst);
    RgbaImage::from_raw(dst.w, dst.h, sharpened).context("resampled buffer size mismatch")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GovernorConfig, PoolConfig};
    use crate::core::{InferenceHold, ManualClock, MemoryGovernor, ModelPool};
    use crate::models::normalize_output;

    #[tokio::test]
    async fn fixed_box_is_centered() {
        let image = RgbaImage::new(200, 100);
        let predictions = FixedBoxDetector::default().detect(&image).await.unwrap();
        assert_eq!(predictions.len(), 1);
        assert_eq!(
            predictions[0].bounding_box,
            BoundingBox::new(50.0, 25.0, 100.0, 50.0)
        );
    }

    #[tokio::test]
    async fn resampling_model_scales_by_factor() {
        let runtime = ResamplingRuntime::default();
        let model = runtime.load(3).await.unwrap();
        let image = Arc::new(RgbaImage::from_pixel(10, 7, image::Rgba([90, 90, 90, 255])));
        let output = model.upscale(image, UpscaleParams::for_scale(3)).await.unwrap();
        let surface = normalize_output(output).unwrap();
        assert_eq!(surface.dimensions(), (30, 21));
        assert_eq!(runtime.loads(), 1);
    }

    #[tokio::test]
    async fn resampling_runtime_has_no_identity_model() {
        assert!(ResamplingRuntime::default().load(1).await.is_err());
    }

    #[tokio::test]
    async fn aborted_resample_stays_counted_until_the_work_ends() {
        let governor = Arc::new(MemoryGovernor::new(
            GovernorConfig::default(),
            Arc::new(NoAccelerator),
        ));
        let pool = ModelPool::new(
            Arc::new(ResamplingRuntime::default()),
            governor.clone(),
            Arc::new(ManualClock::new()),
            PoolConfig::default(),
        );
        let lease = pool.acquire(2).await;
        let model = lease.model().cloned().unwrap();
        let hold = InferenceHold::new(lease, governor.clone());
        let image = Arc::new(RgbaImage::from_pixel(2000, 2000, image::Rgba([90, 90, 90, 255])));

        let task = tokio::spawn(
            hold.clone()
                .scope(async move { model.upscale(image, UpscaleParams::for_scale(2)).await }),
        );
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        hold.orphan();
        task.abort();
        let _ = task.await;
        drop(hold);

        // The blocking resample still owns a hold.
        assert_eq!(governor.orphaned_inferences(), 1);
        assert_eq!(pool.usage_count(2), Some(1));

        for _ in 0..1000 {
            if governor.orphaned_inferences() == 0 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(governor.orphaned_inferences(), 0);
        assert_eq!(pool.usage_count(2), Some(0));
    }
}
