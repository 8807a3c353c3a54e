//! JSON-over-HTTP clients for remote detection and super-resolution servers.
//!
//! Images travel as `data:image/png;base64,` URLs.
//!
//! | Endpoint | Request | Response |
//! |----------|---------|----------|
//! | `POST {base}/detect` | `{"image": url}` | `[{"bbox": [x,y,w,h], "class": "...", "score": 0.9}]` |
//! | `GET {base}/models/x{scale}` | | 2xx when the model exists |
//! | `POST {base}/upscale` | `{"image": url, "scale": n, "patch_size": ?, "padding": ?}` | `{"image": url}` |
//! | `POST {base}/release` | | ignored |

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use image::RgbaImage;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{
    ObjectDetector, Prediction, SuperResolutionModel, SuperResolutionRuntime, UpscaleOutput,
    UpscaleParams,
};
use crate::codec;

fn client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .context("failed to build HTTP client")
}

fn endpoint(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path)
}

/// Detector backed by a remote server.
#[derive(Debug, Clone)]
pub struct HttpObjectDetector {
    client: Client,
    base_url: String,
}

impl HttpObjectDetector {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: client(timeout)?,
            base_url: base_url.into(),
        })
    }
}

#[async_trait]
impl ObjectDetector for HttpObjectDetector {
    async fn detect(&self, image: &RgbaImage) -> Result<Vec<Prediction>> {
        let request_body = serde_json::json!({ "image": codec::to_data_url(image)? });
        let response = self
            .client
            .post(endpoint(&self.base_url, "detect"))
            .json(&request_body)
            .send()
            .await
            .context("detector unreachable")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            bail!("detector returned {}: {}", status, error_text);
        }
        let predictions: Vec<Prediction> = response
            .json()
            .await
            .context("malformed detector response")?;
        debug!(count = predictions.len(), "remote detections");
        Ok(predictions)
    }
}

/// Super-resolution runtime backed by a remote server.
#[derive(Debug, Clone)]
pub struct HttpSuperResolutionRuntime {
    client: Client,
    base_url: String,
    patch_size: Option<u32>,
    padding: Option<u32>,
}

impl HttpSuperResolutionRuntime {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: client(timeout)?,
            base_url: base_url.into(),
            patch_size: None,
            padding: None,
        })
    }

    /// Ask the server to process the input in overlapping patches.
    pub fn with_patches(mut self, patch_size: u32, padding: u32) -> Self {
        self.patch_size = Some(patch_size);
        self.padding = Some(padding);
        self
    }

    fn model(&self, scale: u32) -> HttpSuperResolutionModel {
        HttpSuperResolutionModel {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            scale,
            patch_size: self.patch_size,
            padding: self.padding,
        }
    }
}

#[async_trait]
impl SuperResolutionRuntime for HttpSuperResolutionRuntime {
    async fn load(&self, scale: u32) -> Result<Arc<dyn SuperResolutionModel>> {
        let url = endpoint(&self.base_url, &format!("models/x{}", scale));
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("model server unreachable at {}", url))?;
        if !response.status().is_success() {
            bail!("model x{} unavailable: {}", scale, response.status());
        }
        Ok(Arc::new(self.model(scale)))
    }

    fn release_cached_buffers(&self) {
        let client = self.client.clone();
        let url = endpoint(&self.base_url, "release");
        // Fire and forget; only meaningful inside a runtime.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(e) = client.post(&url).send().await {
                    warn!(error = %e, "release request failed");
                }
            });
        }
    }
}

#[derive(Debug)]
struct HttpSuperResolutionModel {
    client: Client,
    base_url: String,
    scale: u32,
    patch_size: Option<u32>,
    padding: Option<u32>,
}

#[derive(Deserialize)]
struct UpscaleResponse {
    image: String,
}

impl HttpSuperResolutionModel {
    /// Per-call patch settings win over the runtime's.
    fn request_body(&self, image: &RgbaImage, params: UpscaleParams) -> Result<serde_json::Value> {
        Ok(serde_json::json!({
            "image": codec::to_data_url(image)?,
            "scale": self.scale,
            "patch_size": params.patch_size.or(self.patch_size),
            "padding": params.padding.or(self.padding),
        }))
    }
}

#[async_trait]
impl SuperResolutionModel for HttpSuperResolutionModel {
    async fn upscale(&self, image: Arc<RgbaImage>, params: UpscaleParams) -> Result<UpscaleOutput> {
        let request_body = self.request_body(&image, params)?;
        let response = self
            .client
            .post(endpoint(&self.base_url, "upscale"))
            .json(&request_body)
            .send()
            .await
            .context("model server unreachable")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            bail!("upscale returned {}: {}", status, error_text);
        }
        let body: UpscaleResponse = response
            .json()
            .await
            .context("malformed upscale response")?;
        Ok(UpscaleOutput::Encoded(body.image))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_joins_without_double_slash() {
        assert_eq!(endpoint("http://h:1/", "detect"), "http://h:1/detect");
        assert_eq!(endpoint("http://h:1", "models/x2"), "http://h:1/models/x2");
    }

    #[tokio::test]
    async fn unreachable_detector_is_an_error() {
        let detector =
            HttpObjectDetector::new("http://127.0.0.1:9", Duration::from_millis(200)).unwrap();
        let image = RgbaImage::new(4, 4);
        assert!(detector.detect(&image).await.is_err());
    }

    #[tokio::test]
    async fn unreachable_runtime_fails_to_load() {
        let runtime =
            HttpSuperResolutionRuntime::new("http://127.0.0.1:9", Duration::from_millis(200))
                .unwrap();
        assert!(runtime.load(2).await.is_err());
    }

    #[test]
    fn patch_settings_reach_the_request() {
        let runtime = HttpSuperResolutionRuntime::new("http://127.0.0.1:9", Duration::from_secs(1))
            .unwrap()
            .with_patches(128, 8);
        let image = RgbaImage::new(2, 2);

        let body = runtime
            .model(4)
            .request_body(&image, UpscaleParams::for_scale(4))
            .unwrap();
        assert_eq!(body["scale"], 4);
        assert_eq!(body["patch_size"], 128);
        assert_eq!(body["padding"], 8);

        let params = UpscaleParams {
            patch_size: Some(64),
            ..UpscaleParams::for_scale(4)
        };
        let body = runtime.model(4).request_body(&image, params).unwrap();
        assert_eq!(body["patch_size"], 64);
        assert_eq!(body["padding"], 8);

        let plain = HttpSuperResolutionRuntime::new("http://127.0.0.1:9", Duration::from_secs(1))
            .unwrap()
            .model(2)
            .request_body(&image, UpscaleParams::for_scale(2))
            .unwrap();
        assert!(plain["patch_size"].is_null());
    }
}
