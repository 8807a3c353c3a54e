//! Common test utilities for the smart-crop integration tests
//!
//! Synthetic images plus scripted collaborators, so the pipeline can be
//! driven end to end without a model server.

#![allow(dead_code)]

/// Synthetic inputs
pub mod test_images {
    use image::{Rgba, RgbaImage};
    use smart_crop::codec;
    use smart_crop::{ImageSource, OutputFormat};

    /// Smooth gradient; decodes to exactly `w` x `h`.
    pub fn gradient(w: u32, h: u32) -> RgbaImage {
        RgbaImage::from_fn(w, h, |x, y| {
            Rgba([
                (x * 255 / w.max(1)) as u8,
                (y * 255 / h.max(1)) as u8,
                96,
                255,
            ])
        })
    }

    /// Flat gray image with a white square whose top-left corner is at `(x, y)`.
    pub fn square_at(w: u32, h: u32, x: u32, y: u32, side: u32) -> RgbaImage {
        RgbaImage::from_fn(w, h, |px, py| {
            let inside = px >= x && px < x + side && py >= y && py < y + side;
            if inside {
                Rgba([255, 255, 255, 255])
            } else {
                Rgba([40, 40, 40, 255])
            }
        })
    }

    pub fn png_source(label: &str, image: &RgbaImage) -> ImageSource {
        let bytes = codec::encode(image, OutputFormat::Png, 90).expect("encode test png");
        ImageSource::new(label, bytes)
    }

    pub fn gradient_png(w: u32, h: u32) -> ImageSource {
        png_source(&format!("gradient-{}x{}.png", w, h), &gradient(w, h))
    }

    pub fn decode_output(bytes: &[u8]) -> RgbaImage {
        codec::decode("output", bytes).expect("decode pipeline output")
    }
}

/// Scripted detector, runtime and model implementations
pub mod mock_models {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use anyhow::{Result, anyhow};
    use async_trait::async_trait;
    use image::RgbaImage;
    use smart_crop::core::inflight;
    use smart_crop::models::{
        GpuMemory, ObjectDetector, Prediction, SuperResolutionModel, SuperResolutionRuntime,
        UpscaleOutput, UpscaleParams,
    };

    /// Detector whose every call fails.
    #[derive(Debug, Default)]
    pub struct FailingDetector {
        pub calls: AtomicUsize,
    }

    #[async_trait]
    impl ObjectDetector for FailingDetector {
        async fn detect(&self, _image: &RgbaImage) -> Result<Vec<Prediction>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(anyhow!("detector service unavailable"))
        }
    }

    /// Detector returning a fixed prediction list, regardless of the image.
    #[derive(Debug, Default)]
    pub struct ScriptedDetector {
        pub predictions: Vec<Prediction>,
        pub resets: AtomicUsize,
    }

    impl ScriptedDetector {
        pub fn new(predictions: Vec<Prediction>) -> Self {
            Self {
                predictions,
                resets: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ObjectDetector for ScriptedDetector {
        async fn detect(&self, _image: &RgbaImage) -> Result<Vec<Prediction>> {
            Ok(self.predictions.clone())
        }

        fn reset(&self) {
            self.resets.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// How a [`ScriptedModel`] answers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum ModelBehavior {
        /// Nearest-neighbour enlargement by the requested scale.
        Upscale,
        /// Every call errors with a plain inference failure.
        Fail,
        /// Every call sleeps for the given duration before answering.
        Hang(Duration),
        /// Blocks its worker thread, so an abort cannot land until it returns.
        Block(Duration),
        /// Sleeps on a blocking worker, carrying the current inference hold.
        Offload(Duration),
    }

    #[derive(Debug)]
    pub struct ScriptedModel {
        behavior: ModelBehavior,
        calls: Arc<AtomicUsize>,
        disposals: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl SuperResolutionModel for ScriptedModel {
        async fn upscale(
            &self,
            image: Arc<RgbaImage>,
            params: UpscaleParams,
        ) -> Result<UpscaleOutput> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.behavior {
                ModelBehavior::Upscale => {
                    let scale = params.scale.max(1);
                    let (w, h) = image.dimensions();
                    let out = RgbaImage::from_fn(w * scale, h * scale, |x, y| {
                        *image.get_pixel(x / scale, y / scale)
                    });
                    Ok(UpscaleOutput::Surface(out))
                }
                ModelBehavior::Fail => Err(anyhow!("kernel launch failed")),
                ModelBehavior::Hang(delay) => {
                    tokio::time::sleep(delay).await;
                    Ok(UpscaleOutput::Surface((*image).clone()))
                }
                ModelBehavior::Block(delay) => {
                    std::thread::sleep(delay);
                    Ok(UpscaleOutput::Surface((*image).clone()))
                }
                ModelBehavior::Offload(delay) => {
                    let hold = inflight::current();
                    let surface = tokio::task::spawn_blocking(move || {
                        let _hold = hold;
                        std::thread::sleep(delay);
                        (*image).clone()
                    })
                    .await?;
                    Ok(UpscaleOutput::Surface(surface))
                }
            }
        }

        fn dispose(&self) {
            self.disposals.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Runtime counting loads, optionally failing every load.
    #[derive(Debug)]
    pub struct ScriptedRuntime {
        behavior: ModelBehavior,
        fail_loads: bool,
        loads: AtomicUsize,
        calls: Arc<AtomicUsize>,
        disposals: Arc<AtomicUsize>,
    }

    impl ScriptedRuntime {
        pub fn new(behavior: ModelBehavior) -> Self {
            Self {
                behavior,
                fail_loads: false,
                loads: AtomicUsize::new(0),
                calls: Arc::new(AtomicUsize::new(0)),
                disposals: Arc::new(AtomicUsize::new(0)),
            }
        }

        pub fn failing_loads() -> Self {
            Self {
                fail_loads: true,
                ..Self::new(ModelBehavior::Upscale)
            }
        }

        pub fn loads(&self) -> usize {
            self.loads.load(Ordering::SeqCst)
        }

        /// Inference calls across every model this runtime produced.
        pub fn inference_calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub fn disposals(&self) -> usize {
            self.disposals.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SuperResolutionRuntime for ScriptedRuntime {
        async fn load(&self, scale: u32) -> Result<Arc<dyn SuperResolutionModel>> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            if self.fail_loads {
                return Err(anyhow!("weights for x{} not found", scale));
            }
            Ok(Arc::new(ScriptedModel {
                behavior: self.behavior,
                calls: self.calls.clone(),
                disposals: self.disposals.clone(),
            }))
        }
    }

    /// Accelerator reporting a fixed number of bytes.
    #[derive(Debug, Clone, Copy)]
    pub struct FixedGpu(pub u64);

    impl GpuMemory for FixedGpu {
        fn bytes_in_use(&self) -> u64 {
            self.0
        }
    }
}
