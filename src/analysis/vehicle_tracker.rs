// src/analysis/vehicle_tracker.rs
//
// Greedy IoU cross-frame tracker. Matches each fused detection to the
// highest-IoU tracked vehicle; unmatched vehicles coast for up to
// max_missed_frames, emitting ghost detections with decaying confidence so
// brief occlusions are not reported as vacancies.

use crate::geometry::iou;
use crate::pipeline::PipelineMetrics;
use crate::types::TrackingConfig;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Vehicle with persistent identity across frames.
#[derive(Debug, Clone)]
pub struct TrackedVehicle {
    pub id: u64,
    pub bbox: [f64; 4],
    pub confidence: f32,
    pub class_id: u32,
    pub zone_id: Option<u32>,
    pub first_seen: f64,
    pub last_updated: f64,
    pub missed_frames: u32,
}

/// Tracker input: one fused detection with its zone assignment.
#[derive(Debug, Clone)]
pub struct TrackerInput {
    pub bbox: [f64; 4],
    pub confidence: f32,
    pub class_id: u32,
    pub zone_id: Option<u32>,
    pub multi_scale_confirmed: bool,
}

/// Detection enriched with tracking identity. Ghosts are synthetic entries
/// re-emitted for briefly missing vehicles.
#[derive(Debug, Clone, Serialize)]
pub struct TrackedDetection {
    pub bbox: [f64; 4],
    pub confidence: f32,
    pub class_id: u32,
    pub zone_id: Option<u32>,
    pub tracked_id: u64,
    /// IoU of the match (1.0 for newly created tracks)
    pub tracking_confidence: f64,
    /// Seconds since the vehicle was first seen
    pub tracked_duration: f64,
    pub is_ghost: bool,
    pub missed_frames: u32,
    pub multi_scale_confirmed: bool,
}

pub struct VehicleTracker {
    config: TrackingConfig,
    vehicles: HashMap<u64, TrackedVehicle>,
    next_id: u64,
    metrics: Arc<PipelineMetrics>,
}

impl VehicleTracker {
    pub fn new(config: TrackingConfig, metrics: Arc<PipelineMetrics>) -> Self {
        Self {
            config,
            vehicles: HashMap::new(),
            next_id: 1,
            metrics,
        }
    }

    /// Match detections against tracked vehicles and advance the track
    /// lifecycle. Returns the input detections tagged with identity, plus
    /// ghost detections for vehicles missing fewer than max_missed_frames.
    pub fn update(&mut self, detections: &[TrackerInput], timestamp: f64) -> Vec<TrackedDetection> {
        let mut tracked: Vec<TrackedDetection> = Vec::with_capacity(detections.len());
        let mut matched: Vec<u64> = Vec::new();

        for detection in detections {
            let mut best: Option<(u64, f64)> = None;

            for (&id, vehicle) in &self.vehicles {
                if matched.contains(&id) {
                    continue;
                }
                let score = iou(&detection.bbox, &vehicle.bbox);
                if score > self.config.iou_threshold
                    && best.map_or(true, |(_, b)| score > b)
                {
                    best = Some((id, score));
                }
            }

            let entry = match best {
                Some((id, score)) => {
                    let vehicle = self.vehicles.get_mut(&id).expect("matched id exists");
                    vehicle.bbox = detection.bbox;
                    vehicle.confidence = detection.confidence;
                    vehicle.zone_id = detection.zone_id;
                    vehicle.last_updated = timestamp;
                    vehicle.missed_frames = 0;
                    matched.push(id);
                    self.metrics.inc(&self.metrics.vehicles_reidentified);

                    TrackedDetection {
                        bbox: detection.bbox,
                        confidence: detection.confidence,
                        class_id: detection.class_id,
                        zone_id: detection.zone_id,
                        tracked_id: id,
                        tracking_confidence: score,
                        tracked_duration: timestamp - vehicle.first_seen,
                        is_ghost: false,
                        missed_frames: 0,
                        multi_scale_confirmed: detection.multi_scale_confirmed,
                    }
                }
                None => {
                    let id = self.next_id;
                    self.next_id += 1;
                    self.vehicles.insert(
                        id,
                        TrackedVehicle {
                            id,
                            bbox: detection.bbox,
                            confidence: detection.confidence,
                            class_id: detection.class_id,
                            zone_id: detection.zone_id,
                            first_seen: timestamp,
                            last_updated: timestamp,
                            missed_frames: 0,
                        },
                    );
                    matched.push(id);
                    self.metrics.inc(&self.metrics.vehicles_tracked);

                    TrackedDetection {
                        bbox: detection.bbox,
                        confidence: detection.confidence,
                        class_id: detection.class_id,
                        zone_id: detection.zone_id,
                        tracked_id: id,
                        tracking_confidence: 1.0,
                        tracked_duration: 0.0,
                        is_ghost: false,
                        missed_frames: 0,
                        multi_scale_confirmed: detection.multi_scale_confirmed,
                    }
                }
            };

            tracked.push(entry);
        }

        // Age unmatched vehicles; coast with ghosts, then remove
        let mut removed: Vec<u64> = Vec::new();
        for (&id, vehicle) in self.vehicles.iter_mut() {
            if matched.contains(&id) {
                continue;
            }
            vehicle.missed_frames += 1;

            if vehicle.missed_frames <= self.config.max_missed_frames {
                vehicle.confidence *= self.config.ghost_decay;
                tracked.push(TrackedDetection {
                    bbox: vehicle.bbox,
                    confidence: vehicle.confidence,
                    class_id: vehicle.class_id,
                    zone_id: vehicle.zone_id,
                    tracked_id: id,
                    tracking_confidence: 0.0,
                    tracked_duration: timestamp - vehicle.first_seen,
                    is_ghost: true,
                    missed_frames: vehicle.missed_frames,
                    multi_scale_confirmed: false,
                });
            } else {
                removed.push(id);
            }
        }

        for id in removed {
            debug!("Vehicle {id} lost after {} missed frames", self.config.max_missed_frames + 1);
            self.vehicles.remove(&id);
            self.metrics.inc(&self.metrics.vehicles_lost);
        }

        tracked
    }

    /// Zones with persistent vehicle presence: zone_id → score that saturates
    /// after a minute of continuous tracking.
    pub fn persistent_zones(&self, now: f64) -> HashMap<u32, f64> {
        let mut persistence: HashMap<u32, f64> = HashMap::new();
        for vehicle in self.vehicles.values() {
            if let Some(zone_id) = vehicle.zone_id {
                let score = ((now - vehicle.first_seen) / 60.0).min(1.0);
                let entry = persistence.entry(zone_id).or_insert(0.0);
                *entry = entry.max(score);
            }
        }
        persistence
    }

    pub fn active_count(&self) -> usize {
        self.vehicles.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> VehicleTracker {
        VehicleTracker::new(TrackingConfig::default(), Arc::new(PipelineMetrics::new()))
    }

    fn input(bbox: [f64; 4], confidence: f32) -> TrackerInput {
        TrackerInput {
            bbox,
            confidence,
            class_id: 2,
            zone_id: Some(1),
            multi_scale_confirmed: false,
        }
    }

    #[test]
    fn test_identity_persists_across_frames() {
        let mut tracker = tracker();

        let first = tracker.update(&[input([100.0, 100.0, 200.0, 200.0], 0.8)], 0.0);
        let id = first[0].tracked_id;

        // Slightly shifted box in the next frame keeps the same id
        let second = tracker.update(&[input([105.0, 102.0, 205.0, 202.0], 0.85)], 1.0);
        assert_eq!(second[0].tracked_id, id);
        assert!(!second[0].is_ghost);
        assert!((second[0].tracked_duration - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_distant_detection_gets_new_id() {
        let mut tracker = tracker();
        let first = tracker.update(&[input([100.0, 100.0, 200.0, 200.0], 0.8)], 0.0);
        let second = tracker.update(&[input([700.0, 700.0, 800.0, 800.0], 0.8)], 1.0);
        assert_ne!(first[0].tracked_id, second[0].tracked_id);
    }

    #[test]
    fn test_ghost_decay_and_removal() {
        let mut tracker = tracker();
        tracker.update(&[input([100.0, 100.0, 200.0, 200.0], 1.0)], 0.0);

        // max_missed_frames = 5 ghosts with cumulative 0.8 decay
        let mut expected = 1.0_f32;
        for frame in 1..=5u32 {
            let out = tracker.update(&[], frame as f64);
            expected *= 0.8;
            assert_eq!(out.len(), 1);
            assert!(out[0].is_ghost);
            assert_eq!(out[0].missed_frames, frame);
            assert!((out[0].confidence - expected).abs() < 1e-6);
        }

        // Sixth consecutive miss removes the vehicle, no ghost emitted
        let out = tracker.update(&[], 6.0);
        assert!(out.is_empty());
        assert_eq!(tracker.active_count(), 0);
    }

    #[test]
    fn test_rematch_resets_missed_frames() {
        let mut tracker = tracker();
        tracker.update(&[input([100.0, 100.0, 200.0, 200.0], 0.9)], 0.0);
        tracker.update(&[], 1.0);
        tracker.update(&[], 2.0);

        // Vehicle reappears; it must not be removed and misses reset
        let out = tracker.update(&[input([101.0, 100.0, 201.0, 200.0], 0.9)], 3.0);
        assert_eq!(out.len(), 1);
        assert!(!out[0].is_ghost);
        assert_eq!(out[0].missed_frames, 0);

        // Full coast budget available again
        for frame in 4..=8u32 {
            let out = tracker.update(&[], frame as f64);
            assert_eq!(out.len(), 1, "frame {frame}");
        }
        assert_eq!(tracker.update(&[], 9.0).len(), 0);
    }

    #[test]
    fn test_persistent_zones_saturate() {
        let mut tracker = tracker();
        tracker.update(&[input([100.0, 100.0, 200.0, 200.0], 0.9)], 0.0);
        tracker.update(&[input([100.0, 100.0, 200.0, 200.0], 0.9)], 30.0);

        let persistence = tracker.persistent_zones(30.0);
        assert!((persistence[&1] - 0.5).abs() < 1e-9);

        let persistence = tracker.persistent_zones(120.0);
        assert_eq!(persistence[&1], 1.0);
    }
}
