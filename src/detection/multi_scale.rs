// src/detection/multi_scale.rs
//
// Multi-scale detection fusion. Runs the external detector at several image
// scales, maps boxes back to original coordinates, and fuses duplicates with
// greedy NMS. Boxes confirmed by more than one scale get a confidence boost.

use crate::detection::types::{FusedDetection, RawDetection};
use crate::geometry::iou;
use crate::pipeline::PipelineMetrics;
use crate::types::{Frame, FusionConfig};
use anyhow::Result;
use std::sync::Arc;
use tracing::{debug, error};

/// External object-detection collaborator. Implementations are responsible
/// for filtering to vehicle classes (COCO car/motorcycle/bus/truck).
pub trait Detector {
    fn detect(&mut self, frame: &Frame, min_confidence: f32) -> Result<Vec<RawDetection>>;
}

pub struct MultiScaleFuser {
    config: FusionConfig,
    metrics: Arc<PipelineMetrics>,
}

impl MultiScaleFuser {
    pub fn new(config: FusionConfig, metrics: Arc<PipelineMetrics>) -> Self {
        Self { config, metrics }
    }

    /// Run the detector at every configured scale and fuse the results.
    /// A detector failure at one scale skips that scale, never the frame.
    pub fn detect_multi_scale(
        &self,
        detector: &mut dyn Detector,
        frame: &Frame,
        base_confidence: f32,
    ) -> Vec<FusedDetection> {
        let mut all_detections: Vec<RawDetection> = Vec::new();

        for &scale in &self.config.scales {
            let scaled_w = (frame.width as f32 * scale) as usize;
            let scaled_h = (frame.height as f32 * scale) as usize;
            if scaled_w < self.config.min_width || scaled_h < self.config.min_height {
                debug!("Skipping scale {scale}: {scaled_w}x{scaled_h} below detector minimum");
                continue;
            }

            // Small scales shrink vehicles, so the detector gets a lower bar
            let scale_confidence = base_confidence * if scale < 1.0 { 0.8 } else { 1.0 };

            let scaled_frame;
            let input = if scale != 1.0 {
                scaled_frame = resize_frame(frame, scaled_w, scaled_h);
                &scaled_frame
            } else {
                frame
            };

            match detector.detect(input, scale_confidence) {
                Ok(detections) => {
                    self.metrics.record_scale(scale, detections.len() as u64);
                    all_detections
                        .extend(detections.into_iter().map(|det| det.rescaled(scale)));
                }
                Err(err) => {
                    error!("Detection failed at scale {scale}: {err:#}");
                    continue;
                }
            }
        }

        self.metrics.inc(&self.metrics.multi_scale_runs);
        let fused = self.nms_fusion(all_detections);
        debug!(
            "Multi-scale detection: {} raw -> {} fused",
            self.metrics.raw_detections_last(),
            fused.len()
        );
        fused
    }

    /// Greedy NMS over the union of all scales, highest confidence first.
    /// Each kept box absorbs the confidence of suppressed boxes that agree
    /// with it (IoU above the agreement threshold).
    pub fn nms_fusion(&self, detections: Vec<RawDetection>) -> Vec<FusedDetection> {
        self.metrics.set_raw_detections(detections.len() as u64);
        if detections.is_empty() {
            return Vec::new();
        }

        // Confidence-descending order, bbox as deterministic tie-break so
        // fusion does not depend on scale merge order
        let mut order: Vec<usize> = (0..detections.len()).collect();
        order.sort_by(|&a, &b| {
            detections[b]
                .confidence
                .partial_cmp(&detections[a].confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    detections[a].bbox[0]
                        .partial_cmp(&detections[b].bbox[0])
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| {
                    detections[a].bbox[1]
                        .partial_cmp(&detections[b].bbox[1])
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
        });

        let mut keep: Vec<usize> = Vec::new();
        let mut suppressed = vec![false; detections.len()];

        for &i in &order {
            if suppressed[i] {
                continue;
            }
            keep.push(i);
            for &j in &order {
                if j == i || suppressed[j] {
                    continue;
                }
                if iou(&detections[i].bbox, &detections[j].bbox) > self.config.nms_threshold {
                    suppressed[j] = true;
                }
            }
        }

        let mut fused: Vec<FusedDetection> = Vec::with_capacity(keep.len());
        for &i in &keep {
            let mut det = FusedDetection::from_raw(detections[i].clone());

            // Suppressed boxes that agree with this one count as independent
            // scale confirmations
            let agreeing: Vec<f32> = detections
                .iter()
                .enumerate()
                .filter(|&(j, other)| {
                    suppressed[j]
                        && iou(&detections[i].bbox, &other.bbox) > self.config.agreement_threshold
                })
                .map(|(_, other)| other.confidence)
                .collect();

            if !agreeing.is_empty() {
                let sum: f32 = det.detection.confidence + agreeing.iter().sum::<f32>();
                let mean = sum / (agreeing.len() + 1) as f32;
                det.detection.confidence = (mean * 1.1).min(1.0);
                det.multi_scale_confirmed = true;
                det.detection_scales = agreeing.len() as u32 + 1;
                self.metrics.inc(&self.metrics.multi_scale_confirmations);
            }

            fused.push(det);
        }

        self.metrics
            .set_fused_detections(fused.len() as u64);
        fused
    }
}

/// Bilinear resize of a packed-RGB frame.
fn resize_frame(frame: &Frame, dst_w: usize, dst_h: usize) -> Frame {
    let src = &frame.data;
    let (src_w, src_h) = (frame.width, frame.height);
    let mut dst = vec![0u8; dst_h * dst_w * 3];
    let x_ratio = src_w as f32 / dst_w as f32;
    let y_ratio = src_h as f32 / dst_h as f32;

    for dy in 0..dst_h {
        for dx in 0..dst_w {
            let sx = dx as f32 * x_ratio;
            let sy = dy as f32 * y_ratio;
            let sx0 = (sx.floor() as usize).min(src_w - 1);
            let sy0 = (sy.floor() as usize).min(src_h - 1);
            let sx1 = (sx0 + 1).min(src_w - 1);
            let sy1 = (sy0 + 1).min(src_h - 1);
            let fx = sx - sx0 as f32;
            let fy = sy - sy0 as f32;

            for c in 0..3 {
                let p00 = src[(sy0 * src_w + sx0) * 3 + c] as f32;
                let p10 = src[(sy0 * src_w + sx1) * 3 + c] as f32;
                let p01 = src[(sy1 * src_w + sx0) * 3 + c] as f32;
                let p11 = src[(sy1 * src_w + sx1) * 3 + c] as f32;

                let val = p00 * (1.0 - fx) * (1.0 - fy)
                    + p10 * fx * (1.0 - fy)
                    + p01 * (1.0 - fx) * fy
                    + p11 * fx * fy;

                dst[(dy * dst_w + dx) * 3 + c] = val.round() as u8;
            }
        }
    }

    Frame {
        data: dst,
        width: dst_w,
        height: dst_h,
        timestamp: frame.timestamp,
    }
}
