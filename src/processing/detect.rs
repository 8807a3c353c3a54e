//! # Subject Detection
//!
//! Chooses where a smart crop should center.
//!
//! ## Scoring
//!
//! Predictions below the confidence floor or on the denylist are dropped. The
//! rest are scored as
//!
//! ```text
//! (0.4 * area_ratio + 0.4 * confidence + 0.2 * centrality) * class_weight
//! ```
//!
//! where `area_ratio` is box area over image area and `centrality` is
//! `1 - distance(box center, image center) / half diagonal`. Ties keep the
//! earliest prediction.
//!
//! ## Edge-Density Focal Point
//!
//! Without a usable subject, the centroid of high-contrast pixels is used
//! instead: luminance is sampled on a grid of stride `max(1, long_side / 256)`
//! and a pixel counts as an edge when `|L(x+1,y) - L| + |L(x,y+1) - L|`
//! exceeds the edge threshold. No edges means the geometric center.

use std::sync::Arc;

use anyhow::Result;
use image::RgbaImage;
use tracing::debug;

use crate::config::DetectorConfig;
use crate::models::{FocalPoint, ObjectDetector, Prediction};

const PERSON_CLASSES: &[&str] = &["person", "human", "man", "woman", "child", "people"];
const PET_CLASSES: &[&str] = &["cat", "dog", "bird", "horse"];

/// Where the crop should center.
#[derive(Debug, Clone, PartialEq)]
pub enum SubjectChoice {
    Subject { prediction: Prediction, score: f32 },
    FocalPoint(FocalPoint),
}

/// Multiplier favoring photographic subjects.
pub fn class_weight(class_name: &str) -> f32 {
    let class = class_name.to_ascii_lowercase();
    if PERSON_CLASSES.contains(&class.as_str()) {
        1.5
    } else if class.contains("face") {
        1.3
    } else if PET_CLASSES.contains(&class.as_str()) {
        1.2
    } else {
        1.0
    }
}

#[derive(Clone)]
pub struct SubjectDetector {
    detector: Arc<dyn ObjectDetector>,
    config: DetectorConfig,
}

impl std::fmt::Debug for SubjectDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubjectDetector")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SubjectDetector {
    pub fn new(detector: Arc<dyn ObjectDetector>, config: DetectorConfig) -> Self {
        Self { detector, config }
    }

    pub fn detector(&self) -> &dyn ObjectDetector {
        self.detector.as_ref()
    }

    fn eligible(&self, prediction: &Prediction) -> bool {
        prediction.confidence >= self.config.min_confidence
            && prediction.bounding_box.area() > 0.0
            && !self
                .config
                .denylist
                .iter()
                .any(|d| d.eq_ignore_ascii_case(&prediction.class_name))
    }

    /// Score one prediction against a `width` x `height` image.
    pub fn score(&self, prediction: &Prediction, width: u32, height: u32) -> f32 {
        let (w, h) = (width.max(1) as f32, height.max(1) as f32);
        let area_ratio = (prediction.bounding_box.area() / (w * h)).min(1.0);

        let center = prediction.bounding_box.center();
        let (dx, dy) = (center.x - w / 2.0, center.y - h / 2.0);
        let half_diagonal = (w * w + h * h).sqrt() / 2.0;
        let centrality = (1.0 - (dx * dx + dy * dy).sqrt() / half_diagonal).max(0.0);

        (0.4 * area_ratio + 0.4 * prediction.confidence + 0.2 * centrality)
            * class_weight(&prediction.class_name)
    }

    /// Highest-scoring eligible prediction; the first one wins ties.
    pub fn select_subject<'a>(
        &self,
        predictions: &'a [Prediction],
        width: u32,
        height: u32,
    ) -> Option<(&'a Prediction, f32)> {
        let mut best: Option<(&Prediction, f32)> = None;
        for prediction in predictions.iter().filter(|p| self.eligible(p)) {
            let score = self.score(prediction, width, height);
            if best.is_none_or(|(_, top)| score > top) {
                best = Some((prediction, score));
            }
        }
        best
    }

    /// Run the detector and pick a subject, or the edge-density focal point.
    ///
    /// Detector errors propagate so the caller can switch to the simple path.
    pub async fn locate(&self, image: &RgbaImage) -> Result<SubjectChoice> {
        let predictions = self.detector.detect(image).await?;
        let (w, h) = image.dimensions();
        if let Some((prediction, score)) = self.select_subject(&predictions, w, h) {
            debug!(class = %prediction.class_name, score, "subject selected");
            return Ok(SubjectChoice::Subject {
                prediction: prediction.clone(),
                score,
            });
        }
        debug!(candidates = predictions.len(), "no eligible subject, using edge density");
        Ok(SubjectChoice::FocalPoint(self.focal_point(image)))
    }

    /// Edge-density centroid, or the geometric center when there are no edges.
    pub fn focal_point(&self, image: &RgbaImage) -> FocalPoint {
        edge_focal_point(image, self.config.edge_threshold).unwrap_or_else(|| center_of(image))
    }
}

pub fn center_of(image: &RgbaImage) -> FocalPoint {
    FocalPoint {
        x: image.width() as f32 / 2.0,
        y: image.height() as f32 / 2.0,
    }
}

fn luminance(image: &RgbaImage, x: u32, y: u32) -> f32 {
    let [r, g, b, _] = image.get_pixel(x, y).0;
    0.299 * f32::from(r) + 0.587 * f32::from(g) + 0.114 * f32::from(b)
}

/// Centroid of sampled edge pixels; `None` when no sample crosses `threshold`.
pub fn edge_focal_point(image: &RgbaImage, threshold: f32) -> Option<FocalPoint> {
    let (w, h) = image.dimensions();
    if w < 2 || h < 2 {
        return None;
    }
    let stride = (w.max(h) / 256).max(1) as usize;

    let (mut sum_x, mut sum_y, mut count) = (0f64, 0f64, 0u64);
    for y in (0..h - 1).step_by(stride) {
        for x in (0..w - 1).step_by(stride) {
            let l = luminance(image, x, y);
            let gradient = (luminance(image, x + 1, y) - l).abs() + (luminance(image, x, y + 1) - l).abs();
            if gradient > threshold {
                sum_x += f64::from(x);
                sum_y += f64::from(y);
                count += 1;
            }
        }
    }

    (count > 0).then(|| FocalPoint {
        x: (sum_x / count as f64) as f32,
        y: (sum_y / count as f64) as f32,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BoundingBox;
    use crate::models::fallback::FixedBoxDetector;

    fn detector() -> SubjectDetector {
        SubjectDetector::new(Arc::new(FixedBoxDetector::default()), DetectorConfig::default())
    }

    fn pred(x: f32, y: f32, w: f32, h: f32, class: &str, conf: f32) -> Prediction {
        Prediction::new(BoundingBox::new(x, y, w, h), class, conf)
    }

    #[test]
    fn class_weights() {
        assert_eq!(class_weight("Person"), 1.5);
        assert_eq!(class_weight("human"), 1.5);
        assert_eq!(class_weight("face"), 1.3);
        assert_eq!(class_weight("dog"), 1.2);
        assert_eq!(class_weight("car"), 1.0);
    }

    #[test]
    fn low_confidence_and_denylisted_are_ignored() {
        let d = detector();
        let predictions = vec![
            pred(0.0, 0.0, 100.0, 100.0, "car", 0.2),
            pred(0.0, 0.0, 100.0, 100.0, "cell phone", 0.99),
        ];
        assert!(d.select_subject(&predictions, 100, 100).is_none());
    }

    #[test]
    fn person_outranks_similar_object() {
        let d = detector();
        let predictions = vec![
            pred(10.0, 10.0, 40.0, 40.0, "chair", 0.9),
            pred(50.0, 50.0, 40.0, 40.0, "person", 0.8),
        ];
        let (subject, _) = d.select_subject(&predictions, 100, 100).unwrap();
        assert_eq!(subject.class_name, "person");
    }

    #[test]
    fn centered_person_beats_confident_book_on_score_alone() {
        // Empty denylist: the book loses on area, centrality and class weight.
        let config = DetectorConfig {
            denylist: Vec::new(),
            ..DetectorConfig::default()
        };
        let d = SubjectDetector::new(Arc::new(FixedBoxDetector::default()), config);
        // 1000x1000 frame: person covers 40% around the center, book 5% in a corner.
        let book = pred(0.0, 0.0, 250.0, 200.0, "book", 0.95);
        let person = pred(183.0, 183.0, 632.0, 633.0, "person", 0.9);
        assert!(d.score(&person, 1000, 1000) > d.score(&book, 1000, 1000));

        let predictions = vec![book, person];
        let (subject, _) = d.select_subject(&predictions, 1000, 1000).unwrap();
        assert_eq!(subject.class_name, "person");
    }

    #[test]
    fn first_wins_ties() {
        let d = detector();
        let a = pred(25.0, 25.0, 50.0, 50.0, "car", 0.9);
        let mut b = a.clone();
        b.class_name = "truck".into();
        let predictions = vec![a, b];
        let (subject, _) = d.select_subject(&predictions, 100, 100).unwrap();
        assert_eq!(subject.class_name, "car");
    }

    #[test]
    fn score_of_full_frame_centered_box() {
        let d = detector();
        let p = pred(0.0, 0.0, 100.0, 100.0, "dog", 1.0);
        let score = d.score(&p, 100, 100);
        assert!((score - 1.2).abs() < 1e-5);
    }

    #[test]
    fn flat_image_has_no_edges() {
        let image = RgbaImage::from_pixel(64, 32, image::Rgba([80, 80, 80, 255]));
        assert!(edge_focal_point(&image, 30.0).is_none());
        assert_eq!(detector().focal_point(&image), FocalPoint { x: 32.0, y: 16.0 });
    }

    #[test]
    fn edges_pull_focal_point() {
        // Bright square in the bottom-right quadrant.
        let image = RgbaImage::from_fn(100, 100, |x, y| {
            if (70..90).contains(&x) && (70..90).contains(&y) {
                image::Rgba([255, 255, 255, 255])
            } else {
                image::Rgba([0, 0, 0, 255])
            }
        });
        let p = edge_focal_point(&image, 30.0).unwrap();
        assert!(p.x > 60.0 && p.y > 60.0, "{:?}", p);
    }

    #[tokio::test]
    async fn locate_uses_detector_box() {
        let image = RgbaImage::new(200, 100);
        match detector().locate(&image).await.unwrap() {
            SubjectChoice::Subject { prediction, .. } => {
                assert_eq!(prediction.bounding_box.center(), FocalPoint { x: 100.0, y: 50.0 });
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
