// src/pipeline/orchestrator.rs
//
// Per-frame orchestration of the occupancy pipeline:
//
//   Frame → MultiScaleFuser → ZoneClassifier → VehicleTracker → TemporalSmoother
//
// The stages are stateful and order-dependent (hysteresis, track aging,
// ghost accounting), so one pipeline instance owns all per-camera state and
// frames must be processed in arrival order. Multiple cameras get one
// pipeline each.

use crate::analysis::vehicle_tracker::TrackerInput;
use crate::analysis::{TemporalSmoother, VehicleTracker, ZoneClassifier, ZoneDetectionResult};
use crate::config::build_zone;
use crate::detection::{Detector, EnrichedDetection, FusedDetection, MultiScaleFuser};
use crate::pipeline::PipelineMetrics;
use crate::types::{Config, Frame, Zone, ZoneSpec};
use anyhow::Result;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

/// Published per-zone state after smoothing.
#[derive(Debug, Clone, Serialize)]
pub struct ZoneStatus {
    pub zone_id: u32,
    pub space_id: u32,
    pub occupied: bool,
    pub confidence: f32,
    pub detection_count: usize,
    pub stable_frames: u32,
    pub stability: f64,
    pub detection_history: Vec<bool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OccupancySummary {
    pub total_spaces: usize,
    pub occupied_spaces: usize,
    pub occupancy_rate: f64,
}

/// Everything published for one processed frame.
#[derive(Debug, Clone, Serialize)]
pub struct FrameResult {
    pub timestamp: f64,
    pub zones: Vec<ZoneStatus>,
    pub detections: Vec<EnrichedDetection>,
    pub summary: OccupancySummary,
}

impl FrameResult {
    /// JSON payload handed to the storage/upload layers.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

pub struct OccupancyPipeline {
    config: Config,
    zones: Vec<Zone>,
    fuser: MultiScaleFuser,
    classifier: ZoneClassifier,
    tracker: VehicleTracker,
    smoother: TemporalSmoother,
    metrics: Arc<PipelineMetrics>,
}

impl OccupancyPipeline {
    pub fn new(config: Config) -> Result<Self> {
        Self::with_metrics(config, Arc::new(PipelineMetrics::new()))
    }

    pub fn with_metrics(config: Config, metrics: Arc<PipelineMetrics>) -> Result<Self> {
        let zones = config.build_zones()?;
        info!(
            "Occupancy pipeline initialized: {} zones, scales {:?}",
            zones.len(),
            config.fusion.scales
        );

        let fuser = MultiScaleFuser::new(config.fusion.clone(), Arc::clone(&metrics));
        let classifier = ZoneClassifier::new(
            config.detection.mask_width,
            config.detection.mask_height,
            Arc::clone(&metrics),
        );
        let tracker = VehicleTracker::new(config.tracking.clone(), Arc::clone(&metrics));
        let mut smoother = TemporalSmoother::new(config.smoothing.clone(), Arc::clone(&metrics));
        smoother.sync_zones(&zones);

        Ok(Self {
            config,
            zones,
            fuser,
            classifier,
            tracker,
            smoother,
            metrics,
        })
    }

    /// Replace the zone set after a config reload. Histories of surviving
    /// zone ids are preserved; removed and new zones are reinitialized.
    pub fn set_zones(&mut self, specs: &[ZoneSpec]) -> Result<()> {
        let zones: Vec<Zone> = specs.iter().map(build_zone).collect::<Result<_>>()?;
        info!("Zone set reloaded: {} -> {} zones", self.zones.len(), zones.len());
        self.smoother.sync_zones(&zones);
        self.zones = zones;
        Ok(())
    }

    pub fn zones(&self) -> &[Zone] {
        &self.zones
    }

    pub fn metrics(&self) -> &Arc<PipelineMetrics> {
        &self.metrics
    }

    /// Process one frame end to end. Detector failures degrade to fewer
    /// detections; this call itself never fails.
    pub fn process_frame(&mut self, detector: &mut dyn Detector, frame: &Frame) -> FrameResult {
        let timestamp = frame.timestamp;

        // 1. Multi-scale detection fusion
        let fused =
            self.fuser
                .detect_multi_scale(detector, frame, self.config.detection.base_confidence);

        // 2. Zone overlap classification (raw, pre-smoothing occupancy)
        let zone_results = self.classifier.classify(&self.zones, &fused);

        // 3. Cross-frame identity + ghosts
        let tracker_inputs: Vec<TrackerInput> = fused
            .iter()
            .map(|det| TrackerInput {
                bbox: *det.bbox(),
                confidence: det.confidence(),
                class_id: det.detection.class_id,
                zone_id: zone_for_detection(det, &zone_results),
                multi_scale_confirmed: det.multi_scale_confirmed,
            })
            .collect();
        let tracked = self.tracker.update(&tracker_inputs, timestamp);

        // 4. Temporal hysteresis smoothing
        let smoothed = self.smoother.smooth(&zone_results, timestamp);

        // 5. Assemble the published snapshot
        let mut zones: Vec<ZoneStatus> = Vec::with_capacity(zone_results.len());
        for result in &zone_results {
            let state = &smoothed[&result.zone_id];
            zones.push(ZoneStatus {
                zone_id: result.zone_id,
                space_id: result.space_id,
                occupied: state.occupied,
                confidence: state.confidence,
                detection_count: result.detection_count,
                stable_frames: state.stable_frames,
                stability: state.stability,
                detection_history: state.detection_history.clone(),
            });
        }

        let detections: Vec<EnrichedDetection> = tracked
            .into_iter()
            .map(|t| {
                let zone_state = t.zone_id.and_then(|id| smoothed.get(&id));
                let dwell = t.zone_id.and_then(|id| self.smoother.dwell(id));
                EnrichedDetection {
                    bbox: t.bbox,
                    confidence: t.confidence,
                    class_id: t.class_id,
                    zone_id: t.zone_id,
                    tracked_id: Some(t.tracked_id),
                    tracked_duration: t.tracked_duration,
                    is_ghost: t.is_ghost,
                    missed_frames: t.missed_frames,
                    multi_scale_confirmed: t.multi_scale_confirmed,
                    temporal_confidence: zone_state.map(|s| s.confidence),
                    stable_frames: zone_state.map(|s| s.stable_frames),
                    time_parked: dwell.map(|mem| timestamp - mem.first_seen),
                    vehicle_id: dwell.map(|mem| mem.vehicle_id.clone()),
                }
            })
            .collect();

        let occupied_spaces = zones.iter().filter(|z| z.occupied).count();
        let summary = OccupancySummary {
            total_spaces: zones.len(),
            occupied_spaces,
            occupancy_rate: if zones.is_empty() {
                0.0
            } else {
                occupied_spaces as f64 / zones.len() as f64
            },
        };

        self.metrics.inc(&self.metrics.total_frames);
        debug!(
            "Frame {:.3}: {} detections, {}/{} occupied",
            timestamp,
            detections.len(),
            occupied_spaces,
            zones.len()
        );

        FrameResult {
            timestamp,
            zones,
            detections,
            summary,
        }
    }
}

/// Zone a fused detection was attached to, if any. Zones are checked in
/// configuration order; the first zone that accepted the detection wins.
fn zone_for_detection(
    detection: &FusedDetection,
    zone_results: &[ZoneDetectionResult],
) -> Option<u32> {
    zone_results
        .iter()
        .find(|result| {
            result
                .detections
                .iter()
                .any(|member| member.bbox() == detection.bbox())
        })
        .map(|result| result.zone_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::RawDetection;
    use crate::types::{
        DetectionConfig, DetectionDifficulty, FusionConfig, LoggingConfig, SmoothingConfig,
        TrackingConfig,
    };

    fn config() -> Config {
        Config {
            detection: DetectionConfig::default(),
            fusion: FusionConfig {
                scales: vec![1.0],
                ..FusionConfig::default()
            },
            tracking: TrackingConfig::default(),
            smoothing: SmoothingConfig::default(),
            logging: LoggingConfig::default(),
            zones: vec![ZoneSpec {
                id: 1,
                space_id: 101,
                polygon: vec![[0.0, 0.0], [100.0, 0.0], [100.0, 100.0], [0.0, 100.0]],
                difficulty: DetectionDifficulty::Easy,
            }],
        }
    }

    fn frame(timestamp: f64) -> Frame {
        Frame {
            data: vec![0u8; 640 * 480 * 3],
            width: 640,
            height: 480,
            timestamp,
        }
    }

    struct FixedDetector {
        detections: Vec<RawDetection>,
    }

    impl Detector for FixedDetector {
        fn detect(&mut self, _frame: &Frame, _min_confidence: f32) -> Result<Vec<RawDetection>> {
            Ok(self.detections.clone())
        }
    }

    #[test]
    fn test_empty_frame_yields_vacant_zones() {
        let mut pipeline = OccupancyPipeline::new(config()).unwrap();
        let mut detector = FixedDetector { detections: vec![] };

        let result = pipeline.process_frame(&mut detector, &frame(0.0));
        assert_eq!(result.zones.len(), 1);
        assert!(!result.zones[0].occupied);
        assert_eq!(result.summary.occupied_spaces, 0);
        assert_eq!(result.summary.occupancy_rate, 0.0);
    }

    #[test]
    fn test_sustained_detection_occupies_zone() {
        let mut pipeline = OccupancyPipeline::new(config()).unwrap();
        let mut detector = FixedDetector {
            detections: vec![RawDetection::new([20.0, 20.0, 80.0, 80.0], 0.9, 2)],
        };

        let mut last = None;
        for i in 0..5 {
            last = Some(pipeline.process_frame(&mut detector, &frame(i as f64)));
        }
        let result = last.unwrap();
        assert!(result.zones[0].occupied);
        assert_eq!(result.summary.occupied_spaces, 1);

        let det = &result.detections[0];
        assert_eq!(det.zone_id, Some(1));
        assert!(det.tracked_id.is_some());
        assert!(!det.is_ghost);
        assert!(det.time_parked.is_some());
    }

    #[test]
    fn test_zone_reload_is_error_checked() {
        let mut pipeline = OccupancyPipeline::new(config()).unwrap();
        let bad = vec![ZoneSpec {
            id: 9,
            space_id: 9,
            polygon: vec![[0.0, 0.0], [1.0, 1.0]],
            difficulty: DetectionDifficulty::Easy,
        }];
        assert!(pipeline.set_zones(&bad).is_err());
        // Original zone set still in place
        assert_eq!(pipeline.zones().len(), 1);
    }
}
