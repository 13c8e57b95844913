// src/pipeline/metrics.rs
//
// Injected metrics sink for the whole pipeline. Counters for every stage:
// fusion scale usage, classifier method selection, tracker lifecycle, and
// hysteresis interventions. Export via summary() into logs or an API layer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct PipelineMetrics {
    pub total_frames: Arc<AtomicU64>,

    // Multi-scale fusion
    pub multi_scale_runs: Arc<AtomicU64>,
    pub multi_scale_confirmations: Arc<AtomicU64>,
    pub raw_detections: Arc<AtomicU64>,
    pub fused_detections: Arc<AtomicU64>,
    scales_used: Arc<Mutex<HashMap<String, u64>>>,

    // Zone classifier
    pub method_center: Arc<AtomicU64>,
    pub method_multi_point: Arc<AtomicU64>,
    pub method_iou: Arc<AtomicU64>,
    pub confidence_adjustments: Arc<AtomicU64>,
    pub occupied_zones: Arc<AtomicU64>,

    // Cross-frame tracker
    pub vehicles_tracked: Arc<AtomicU64>,
    pub vehicles_reidentified: Arc<AtomicU64>,
    pub vehicles_lost: Arc<AtomicU64>,

    // Temporal smoother
    pub state_changes_prevented: Arc<AtomicU64>,
    pub persistent_detections_added: Arc<AtomicU64>,

    pub started_at: Instant,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self {
            total_frames: Arc::new(AtomicU64::new(0)),
            multi_scale_runs: Arc::new(AtomicU64::new(0)),
            multi_scale_confirmations: Arc::new(AtomicU64::new(0)),
            raw_detections: Arc::new(AtomicU64::new(0)),
            fused_detections: Arc::new(AtomicU64::new(0)),
            scales_used: Arc::new(Mutex::new(HashMap::new())),
            method_center: Arc::new(AtomicU64::new(0)),
            method_multi_point: Arc::new(AtomicU64::new(0)),
            method_iou: Arc::new(AtomicU64::new(0)),
            confidence_adjustments: Arc::new(AtomicU64::new(0)),
            occupied_zones: Arc::new(AtomicU64::new(0)),
            vehicles_tracked: Arc::new(AtomicU64::new(0)),
            vehicles_reidentified: Arc::new(AtomicU64::new(0)),
            vehicles_lost: Arc::new(AtomicU64::new(0)),
            state_changes_prevented: Arc::new(AtomicU64::new(0)),
            persistent_detections_added: Arc::new(AtomicU64::new(0)),
            started_at: Instant::now(),
        }
    }

    pub fn inc(&self, counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_scale(&self, scale: f32, detections: u64) {
        if let Ok(mut scales) = self.scales_used.lock() {
            *scales.entry(format!("{scale:.1}")).or_insert(0) += detections;
        }
    }

    pub fn set_raw_detections(&self, count: u64) {
        self.raw_detections.store(count, Ordering::Relaxed);
    }

    pub fn raw_detections_last(&self) -> u64 {
        self.raw_detections.load(Ordering::Relaxed)
    }

    pub fn set_fused_detections(&self, count: u64) {
        self.fused_detections.store(count, Ordering::Relaxed);
    }

    pub fn set_occupied_zones(&self, count: u64) {
        self.occupied_zones.store(count, Ordering::Relaxed);
    }

    pub fn fps(&self) -> f64 {
        let frames = self.total_frames.load(Ordering::Relaxed);
        let elapsed = self.started_at.elapsed().as_secs_f64();
        if elapsed > 0.01 {
            frames as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            total_frames: self.total_frames.load(Ordering::Relaxed),
            fps: self.fps(),
            multi_scale_runs: self.multi_scale_runs.load(Ordering::Relaxed),
            multi_scale_confirmations: self.multi_scale_confirmations.load(Ordering::Relaxed),
            scales_used: self
                .scales_used
                .lock()
                .map(|s| s.clone())
                .unwrap_or_default(),
            method_center: self.method_center.load(Ordering::Relaxed),
            method_multi_point: self.method_multi_point.load(Ordering::Relaxed),
            method_iou: self.method_iou.load(Ordering::Relaxed),
            confidence_adjustments: self.confidence_adjustments.load(Ordering::Relaxed),
            occupied_zones: self.occupied_zones.load(Ordering::Relaxed),
            vehicles_tracked: self.vehicles_tracked.load(Ordering::Relaxed),
            vehicles_reidentified: self.vehicles_reidentified.load(Ordering::Relaxed),
            vehicles_lost: self.vehicles_lost.load(Ordering::Relaxed),
            state_changes_prevented: self.state_changes_prevented.load(Ordering::Relaxed),
            persistent_detections_added: self.persistent_detections_added.load(Ordering::Relaxed),
            elapsed_secs: self.started_at.elapsed().as_secs_f64(),
        }
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsSummary {
    pub total_frames: u64,
    pub fps: f64,
    pub multi_scale_runs: u64,
    pub multi_scale_confirmations: u64,
    pub scales_used: HashMap<String, u64>,
    pub method_center: u64,
    pub method_multi_point: u64,
    pub method_iou: u64,
    pub confidence_adjustments: u64,
    pub occupied_zones: u64,
    pub vehicles_tracked: u64,
    pub vehicles_reidentified: u64,
    pub vehicles_lost: u64,
    pub state_changes_prevented: u64,
    pub persistent_detections_added: u64,
    pub elapsed_secs: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_and_summary() {
        let metrics = PipelineMetrics::new();
        metrics.inc(&metrics.total_frames);
        metrics.inc(&metrics.total_frames);
        metrics.record_scale(0.8, 3);
        metrics.record_scale(0.8, 2);
        metrics.record_scale(1.5, 1);

        let summary = metrics.summary();
        assert_eq!(summary.total_frames, 2);
        assert_eq!(summary.scales_used["0.8"], 5);
        assert_eq!(summary.scales_used["1.5"], 1);
    }
}
