// src/analysis/temporal.rs
//
// Temporal occupancy smoothing. Each zone keeps a short rolling history of
// raw detection flags; asymmetric hysteresis requires strong evidence to
// flip the published state in either direction, which suppresses the
// frame-to-frame flicker of stationary vehicles. A separate per-zone dwell
// memory tracks how long the occupying vehicle has been parked; it is
// informational only and never feeds back into the occupancy decision.

use crate::analysis::zone_classifier::ZoneDetectionResult;
use crate::pipeline::PipelineMetrics;
use crate::types::{SmoothingConfig, Zone};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::debug;

/// Rolling detection history for one zone.
#[derive(Debug, Clone)]
pub struct ZoneHistory {
    pub zone_id: u32,
    pub detections: VecDeque<bool>,
    pub confidences: VecDeque<f32>,
    pub last_state: bool,
    pub state_change_count: u32,
    pub last_state_change: f64,
    pub stable_frames: u32,
    capacity: usize,
}

impl ZoneHistory {
    fn new(zone_id: u32, capacity: usize) -> Self {
        Self {
            zone_id,
            detections: VecDeque::with_capacity(capacity),
            confidences: VecDeque::with_capacity(capacity),
            last_state: false,
            state_change_count: 0,
            last_state_change: 0.0,
            stable_frames: 0,
            capacity,
        }
    }

    fn add(&mut self, detected: bool, confidence: f32) {
        if self.detections.len() == self.capacity {
            self.detections.pop_front();
            self.confidences.pop_front();
        }
        self.detections.push_back(detected);
        self.confidences.push_back(if detected { confidence } else { 0.0 });

        if self.detections.len() > 1 {
            let n = self.detections.len();
            if self.detections[n - 1] == self.detections[n - 2] {
                self.stable_frames += 1;
            } else {
                self.stable_frames = 0;
            }
        }
    }

    fn detection_ratio(&self) -> f64 {
        if self.detections.is_empty() {
            return 0.0;
        }
        self.detections.iter().filter(|&&d| d).count() as f64 / self.detections.len() as f64
    }

    /// Stability in [0, 1]: long unchanged runs score high, frequent state
    /// changes are penalized.
    pub fn stability_score(&self) -> f64 {
        if self.detections.is_empty() {
            return 0.0;
        }
        let stable_ratio = self.stable_frames as f64 / self.detections.len().max(1) as f64;
        let change_penalty = 1.0 / (1.0 + self.state_change_count as f64 * 0.1);
        (stable_ratio * change_penalty).min(1.0)
    }
}

/// Per-zone dwell slot: who is parked there and since when.
#[derive(Debug, Clone, Serialize)]
pub struct VehicleMemory {
    pub vehicle_id: String,
    pub zone_id: u32,
    pub first_seen: f64,
    pub last_seen: f64,
    pub bbox_history: VecDeque<[f64; 4]>,
    pub confidence_avg: f32,
    pub detection_count: u32,
}

/// Published smoothed state for one zone.
#[derive(Debug, Clone, Serialize)]
pub struct SmoothedZoneState {
    pub occupied: bool,
    pub confidence: f32,
    pub stable_frames: u32,
    pub stability: f64,
    pub detection_history: Vec<bool>,
}

pub struct TemporalSmoother {
    config: SmoothingConfig,
    histories: HashMap<u32, ZoneHistory>,
    memory: HashMap<String, VehicleMemory>,
    next_vehicle_id: u64,
    /// Normalized exponential weights over the configured capacity,
    /// most recent entry weighted highest
    weights: Vec<f64>,
    metrics: Arc<PipelineMetrics>,
}

impl TemporalSmoother {
    pub fn new(config: SmoothingConfig, metrics: Arc<PipelineMetrics>) -> Self {
        let weights = temporal_weights(config.history_size);
        Self {
            config,
            histories: HashMap::new(),
            memory: HashMap::new(),
            next_vehicle_id: 1,
            weights,
            metrics,
        }
    }

    /// Reconcile the zone set after a config reload: histories for surviving
    /// zone ids are kept, removed zones are dropped, new zones start fresh.
    pub fn sync_zones(&mut self, zones: &[Zone]) {
        let ids: Vec<u32> = zones.iter().map(|z| z.id).collect();
        self.histories.retain(|id, _| ids.contains(id));
        self.memory.retain(|_, mem| ids.contains(&mem.zone_id));
        for &id in &ids {
            self.histories
                .entry(id)
                .or_insert_with(|| ZoneHistory::new(id, self.config.history_size));
        }
    }

    /// Feed this frame's raw zone classifications and produce smoothed
    /// states. Also advances the dwell memory.
    pub fn smooth(
        &mut self,
        zone_results: &[ZoneDetectionResult],
        now: f64,
    ) -> HashMap<u32, SmoothedZoneState> {
        let mut smoothed = HashMap::with_capacity(zone_results.len());

        for result in zone_results {
            let capacity = self.config.history_size;
            let history = self
                .histories
                .entry(result.zone_id)
                .or_insert_with(|| ZoneHistory::new(result.zone_id, capacity));

            history.add(result.occupied, result.confidence);
            let (occupied, confidence) = apply_hysteresis(
                history,
                self.config.hysteresis_threshold,
                &self.weights,
                now,
                &self.metrics,
            );

            if !result.occupied && occupied {
                self.metrics.inc(&self.metrics.persistent_detections_added);
                debug!(
                    "Zone {}: holding occupied through miss (confidence {:.2})",
                    result.zone_id, confidence
                );
            }

            smoothed.insert(
                result.zone_id,
                SmoothedZoneState {
                    occupied,
                    confidence,
                    stable_frames: history.stable_frames,
                    stability: history.stability_score(),
                    detection_history: history.detections.iter().copied().collect(),
                },
            );
        }

        self.update_memory(zone_results, now);
        smoothed
    }

    /// Dwell slot for a zone, if a vehicle is being remembered there.
    pub fn dwell(&self, zone_id: u32) -> Option<&VehicleMemory> {
        self.memory.values().find(|mem| mem.zone_id == zone_id)
    }

    pub fn tracked_vehicle_count(&self) -> usize {
        self.memory.len()
    }

    fn update_memory(&mut self, zone_results: &[ZoneDetectionResult], now: f64) {
        let timeout = self.config.memory_timeout_secs;
        self.memory.retain(|_, mem| now - mem.last_seen < timeout);

        for result in zone_results {
            // Highest-confidence attached detection represents the occupant
            let best = result
                .detections
                .iter()
                .max_by(|a, b| {
                    a.confidence()
                        .partial_cmp(&b.confidence())
                        .unwrap_or(std::cmp::Ordering::Equal)
                });
            let Some(best) = best else { continue };

            let existing_id = self
                .memory
                .iter()
                .find(|(_, mem)| mem.zone_id == result.zone_id)
                .map(|(id, _)| id.clone());

            if let Some(mem) = existing_id.and_then(|id| self.memory.get_mut(&id)) {
                mem.last_seen = now;
                mem.detection_count += 1;
                if mem.bbox_history.len() == 3 {
                    mem.bbox_history.pop_front();
                }
                mem.bbox_history.push_back(*best.bbox());
                mem.confidence_avg = mem.confidence_avg * 0.7 + best.confidence() * 0.3;
            } else {
                let vehicle_id = format!("v_{}", self.next_vehicle_id);
                self.next_vehicle_id += 1;
                let mut bbox_history = VecDeque::with_capacity(3);
                bbox_history.push_back(*best.bbox());
                self.memory.insert(
                    vehicle_id.clone(),
                    VehicleMemory {
                        vehicle_id,
                        zone_id: result.zone_id,
                        first_seen: now,
                        last_seen: now,
                        bbox_history,
                        confidence_avg: best.confidence(),
                        detection_count: 1,
                    },
                );
            }
        }
    }
}

fn temporal_weights(size: usize) -> Vec<f64> {
    let weights: Vec<f64> = (0..size).map(|i| 2f64.powi(i as i32)).collect();
    let total: f64 = weights.iter().sum();
    weights.into_iter().map(|w| w / total).collect()
}

/// Asymmetric hysteresis: flipping state in either direction needs the
/// detection ratio past the threshold; anything in between holds.
fn apply_hysteresis(
    history: &mut ZoneHistory,
    threshold: f64,
    weights: &[f64],
    now: f64,
    metrics: &PipelineMetrics,
) -> (bool, f32) {
    if history.detections.is_empty() {
        return (false, 0.0);
    }

    let ratio = history.detection_ratio();
    let detection_count = history.detections.iter().filter(|&&d| d).count();

    // Most-recent entries take the tail of the weight series
    let n = history.confidences.len();
    let mut weighted_confidence: f64 = history
        .confidences
        .iter()
        .zip(&weights[weights.len() - n..])
        .map(|(&c, &w)| c as f64 * w)
        .sum();

    let current = history.last_state;
    let new_state = if !current && ratio >= threshold {
        history.last_state_change = now;
        history.state_change_count += 1;
        true
    } else if current && ratio <= 1.0 - threshold {
        history.last_state_change = now;
        history.state_change_count += 1;
        false
    } else {
        if current != (detection_count > 0) {
            metrics.inc(&metrics.state_changes_prevented);
        }
        current
    };

    history.last_state = new_state;

    if history.stable_frames > 3 {
        weighted_confidence = (weighted_confidence * 1.2).min(1.0);
    }

    (new_state, weighted_confidence as f32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::{FusedDetection, RawDetection};
    use crate::types::DetectionDifficulty;

    fn smoother() -> TemporalSmoother {
        TemporalSmoother::new(SmoothingConfig::default(), Arc::new(PipelineMetrics::new()))
    }

    fn result(zone_id: u32, occupied: bool, confidence: f32) -> ZoneDetectionResult {
        let detections = if occupied {
            vec![FusedDetection::from_raw(RawDetection::new(
                [10.0, 10.0, 40.0, 40.0],
                confidence,
                2,
            ))]
        } else {
            Vec::new()
        };
        let overlap_scores = vec![1.0; detections.len()];
        ZoneDetectionResult {
            zone_id,
            space_id: zone_id,
            occupied,
            confidence,
            detection_count: detections.len(),
            detections,
            overlap_scores,
            method: None,
            difficulty: DetectionDifficulty::Easy,
        }
    }

    #[test]
    fn test_history_bounded_by_capacity() {
        let mut smoother = smoother();
        for frame in 0..20 {
            let out = smoother.smooth(&[result(1, frame % 2 == 0, 0.8)], frame as f64);
            assert!(out[&1].detection_history.len() <= 5);
        }
    }

    #[test]
    fn test_hysteresis_flips_occupied_then_vacant() {
        let mut smoother = smoother();

        // Vacant zone: 5 consecutive strong detections must end occupied
        let mut state = false;
        for frame in 0..5 {
            let out = smoother.smooth(&[result(1, true, 0.9)], frame as f64);
            state = out[&1].occupied;
        }
        assert!(state);

        // Then 5 consecutive misses must end vacant
        for frame in 5..10 {
            let out = smoother.smooth(&[result(1, false, 0.0)], frame as f64);
            state = out[&1].occupied;
        }
        assert!(!state);
    }

    #[test]
    fn test_single_flicker_does_not_flip_state() {
        let mut smoother = smoother();
        for frame in 0..5 {
            smoother.smooth(&[result(1, true, 0.9)], frame as f64);
        }

        // One missed frame out of five: ratio 0.8 stays above 1 - 0.6
        let out = smoother.smooth(&[result(1, false, 0.0)], 5.0);
        assert!(out[&1].occupied, "single miss must not report a vacancy");
    }

    #[test]
    fn test_single_spurious_detection_does_not_flip_state() {
        let mut smoother = smoother();
        for frame in 0..5 {
            smoother.smooth(&[result(1, false, 0.0)], frame as f64);
        }

        let out = smoother.smooth(&[result(1, true, 0.9)], 5.0);
        assert!(!out[&1].occupied, "single hit must not report occupancy");
    }

    #[test]
    fn test_recent_frames_weighted_highest() {
        let mut smoother = smoother();
        // Old strong detections followed by recent misses: the weighted
        // confidence must be dominated by the recent zeros
        for frame in 0..2 {
            smoother.smooth(&[result(1, true, 1.0)], frame as f64);
        }
        let mut last = 0.0;
        for frame in 2..5 {
            let out = smoother.smooth(&[result(1, false, 0.0)], frame as f64);
            last = out[&1].confidence;
        }
        assert!(last < 0.2, "confidence = {last}");
    }

    #[test]
    fn test_stable_streak_boosts_confidence() {
        let mut smoother = smoother();
        let mut boosted = 0.0;
        for frame in 0..8 {
            let out = smoother.smooth(&[result(1, true, 0.5)], frame as f64);
            boosted = out[&1].confidence;
        }
        // Full history of 0.5 with stable_frames > 3: 0.5 * 1.2
        assert!((boosted - 0.6).abs() < 1e-6, "confidence = {boosted}");
    }

    #[test]
    fn test_dwell_memory_tracks_and_evicts() {
        let mut smoother = smoother();
        smoother.smooth(&[result(1, true, 0.8)], 0.0);
        smoother.smooth(&[result(1, true, 0.8)], 1.0);

        let mem = smoother.dwell(1).expect("dwell slot exists");
        assert_eq!(mem.zone_id, 1);
        assert_eq!(mem.detection_count, 2);
        assert_eq!(mem.first_seen, 0.0);

        // No sightings for longer than the 10 s timeout evicts the slot
        smoother.smooth(&[result(1, false, 0.0)], 12.0);
        assert!(smoother.dwell(1).is_none());
    }

    #[test]
    fn test_dwell_confidence_running_average() {
        let mut smoother = smoother();
        smoother.smooth(&[result(1, true, 1.0)], 0.0);
        smoother.smooth(&[result(1, true, 0.0)], 1.0);
        let mem = smoother.dwell(1).unwrap();
        // EMA: 1.0 * 0.7 + 0.0 * 0.3
        assert!((mem.confidence_avg - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_zone_reload_keeps_surviving_histories() {
        let mut smoother = smoother();
        for frame in 0..5 {
            smoother.smooth(&[result(1, true, 0.9), result(2, true, 0.9)], frame as f64);
        }

        let keep = Zone {
            id: 1,
            space_id: 1,
            polygon: vec![[0.0, 0.0], [10.0, 0.0], [10.0, 10.0]],
            difficulty: DetectionDifficulty::Easy,
        };
        let added = Zone {
            id: 3,
            space_id: 3,
            polygon: vec![[0.0, 0.0], [10.0, 0.0], [10.0, 10.0]],
            difficulty: DetectionDifficulty::Easy,
        };
        smoother.sync_zones(&[keep, added]);

        // Zone 1 history survived (full window, still occupied), zone 2 is
        // gone, zone 3 starts from a single-entry history
        let out = smoother.smooth(
            &[result(1, true, 0.9), result(3, true, 0.9)],
            5.0,
        );
        assert!(out[&1].occupied);
        assert_eq!(out[&1].detection_history.len(), 5);
        assert_eq!(out[&3].detection_history.len(), 1);
        assert!(smoother.histories.get(&2).is_none());
    }
}
