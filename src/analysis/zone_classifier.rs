// src/analysis/zone_classifier.rs
//
// Assigns fused detections to parking zones and decides per-zone raw
// occupancy. Three overlap signals are computed for every (zone, detection)
// pair; a fixed priority rule picks which one to trust. Hard zones (distant
// or occluded spaces with systematically weak raw signal) get aggressive
// confidence compensation and much lower acceptance thresholds.

use crate::detection::FusedDetection;
use crate::geometry::{iou_with_polygon, point_in_polygon};
use crate::pipeline::PipelineMetrics;
use crate::types::{DetectionDifficulty, Zone};
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

/// Overlap method chosen for a (zone, detection) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlapMethod {
    Center,
    MultiPoint,
    Iou,
}

/// Per-zone classification for one frame. `overlap_scores` is parallel to
/// `detections`.
#[derive(Debug, Clone, Serialize)]
pub struct ZoneDetectionResult {
    pub zone_id: u32,
    pub space_id: u32,
    pub occupied: bool,
    pub confidence: f32,
    pub detection_count: usize,
    pub detections: Vec<FusedDetection>,
    pub overlap_scores: Vec<f64>,
    pub method: Option<OverlapMethod>,
    pub difficulty: DetectionDifficulty,
}

pub struct ZoneClassifier {
    mask_width: usize,
    mask_height: usize,
    metrics: Arc<PipelineMetrics>,
}

impl ZoneClassifier {
    pub fn new(mask_width: usize, mask_height: usize, metrics: Arc<PipelineMetrics>) -> Self {
        Self {
            mask_width,
            mask_height,
            metrics,
        }
    }

    pub fn classify(
        &self,
        zones: &[Zone],
        detections: &[FusedDetection],
    ) -> Vec<ZoneDetectionResult> {
        let results: Vec<ZoneDetectionResult> = zones
            .iter()
            .map(|zone| self.classify_zone(zone, detections))
            .collect();

        let occupied = results.iter().filter(|r| r.occupied).count();
        self.metrics.set_occupied_zones(occupied as u64);
        results
    }

    fn classify_zone(&self, zone: &Zone, detections: &[FusedDetection]) -> ZoneDetectionResult {
        let mut attached: Vec<FusedDetection> = Vec::new();
        let mut overlap_scores: Vec<f64> = Vec::new();
        let mut method: Option<OverlapMethod> = None;

        for detection in detections {
            let (selected, inside, score) = self.select_method(zone, detection);

            match selected {
                OverlapMethod::Center => self.metrics.inc(&self.metrics.method_center),
                OverlapMethod::MultiPoint => self.metrics.inc(&self.metrics.method_multi_point),
                OverlapMethod::Iou => self.metrics.inc(&self.metrics.method_iou),
            }

            if !inside {
                continue;
            }

            let mut member = detection.clone();
            member.detection.confidence =
                self.adjust_confidence(detection.detection.original_confidence, zone.difficulty, score);
            attached.push(member);
            overlap_scores.push(score);
            if method.is_none() {
                method = Some(selected);
            }
        }

        let occupied = self.determine_occupancy(&attached, zone.difficulty);
        let confidence = zone_confidence(&attached, &overlap_scores);

        if occupied {
            debug!(
                "Zone {} occupied: {} detection(s), confidence {:.2}",
                zone.id,
                attached.len(),
                confidence
            );
        }

        ZoneDetectionResult {
            zone_id: zone.id,
            space_id: zone.space_id,
            occupied,
            confidence,
            detection_count: attached.len(),
            detections: attached,
            overlap_scores,
            method,
            difficulty: zone.difficulty,
        }
    }

    /// Evaluate all three overlap signals and pick one by the fixed priority:
    /// strong IoU evidence wins, then multi-point coverage, then the cheap
    /// center test. Selection is independent of whether the selected method
    /// judged the detection inside.
    fn select_method(
        &self,
        zone: &Zone,
        detection: &FusedDetection,
    ) -> (OverlapMethod, bool, f64) {
        let (iou_inside, iou_score) = self.evaluate_iou(zone, detection);
        if iou_score > 0.3 {
            return (OverlapMethod::Iou, iou_inside, iou_score);
        }

        let (mp_inside, mp_score) = evaluate_multi_point(zone, detection);
        if mp_score > 0.2 {
            return (OverlapMethod::MultiPoint, mp_inside, mp_score);
        }

        let (center_inside, center_score) = evaluate_center(zone, detection);
        (OverlapMethod::Center, center_inside, center_score)
    }

    /// IoU of the detection bbox (as a quad) against the zone polygon.
    fn evaluate_iou(&self, zone: &Zone, detection: &FusedDetection) -> (bool, f64) {
        let iou = iou_with_polygon(
            detection.bbox(),
            detection.detection.area,
            &zone.polygon,
            self.mask_width,
            self.mask_height,
        );
        if iou <= 0.0 {
            return (false, 0.0);
        }

        let threshold = match zone.difficulty {
            DetectionDifficulty::Hard => 0.05,
            _ => 0.25,
        };
        (iou >= threshold, iou)
    }

    fn adjust_confidence(
        &self,
        original_confidence: f32,
        difficulty: DetectionDifficulty,
        overlap_score: f64,
    ) -> f32 {
        let multiplier = match difficulty {
            DetectionDifficulty::Hard => {
                self.metrics.inc(&self.metrics.confidence_adjustments);
                4.0 + overlap_score * 2.0
            }
            _ => 1.2 + overlap_score * 0.3,
        };
        (original_confidence as f64 * multiplier).min(1.0) as f32
    }

    fn determine_occupancy(
        &self,
        attached: &[FusedDetection],
        difficulty: DetectionDifficulty,
    ) -> bool {
        if attached.is_empty() {
            return false;
        }
        let min_confidence = match difficulty {
            DetectionDifficulty::Hard => 0.05,
            _ => 0.5,
        };
        attached.iter().any(|d| d.confidence() >= min_confidence)
    }
}

/// Point-in-polygon on the detection center. Binary score.
fn evaluate_center(zone: &Zone, detection: &FusedDetection) -> (bool, f64) {
    let inside = point_in_polygon(detection.detection.center, &zone.polygon).inside;
    (inside, if inside { 1.0 } else { 0.0 })
}

/// Coverage of the 9 sample points (4 corners + 4 edge midpoints + center)
/// by the zone polygon.
fn evaluate_multi_point(zone: &Zone, detection: &FusedDetection) -> (bool, f64) {
    let raw = &detection.detection;
    let inside_count = raw
        .corners
        .iter()
        .chain(raw.edge_points.iter())
        .filter(|&&p| point_in_polygon(p, &zone.polygon).inside)
        .count();

    let score = inside_count as f64 / 9.0;
    let threshold = match zone.difficulty {
        DetectionDifficulty::Hard => 0.1,
        _ => 0.3,
    };
    (score >= threshold, score)
}

fn zone_confidence(attached: &[FusedDetection], overlap_scores: &[f64]) -> f32 {
    if attached.is_empty() {
        return 0.0;
    }
    let max_confidence = attached
        .iter()
        .map(|d| d.confidence())
        .fold(0.0_f32, f32::max);
    let max_overlap = overlap_scores.iter().copied().fold(0.0_f64, f64::max);
    ((max_confidence as f64 + max_overlap * 0.2).min(1.0)) as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::RawDetection;

    const MASK: (usize, usize) = (2000, 1200);

    fn classifier() -> ZoneClassifier {
        ZoneClassifier::new(MASK.0, MASK.1, Arc::new(PipelineMetrics::new()))
    }

    fn zone(difficulty: DetectionDifficulty) -> Zone {
        Zone {
            id: 1,
            space_id: 101,
            polygon: vec![[0.0, 0.0], [100.0, 0.0], [100.0, 100.0], [0.0, 100.0]],
            difficulty,
        }
    }

    fn fused(bbox: [f64; 4], confidence: f32) -> FusedDetection {
        FusedDetection::from_raw(RawDetection::new(bbox, confidence, 2))
    }

    #[test]
    fn test_hard_zone_boosts_weak_detection_to_occupied() {
        // Fully contained 30x30 box at confidence 0.1 in a 100x100 hard zone:
        // multi-point coverage is full, multiplier 4.0 + 2.0*overlap,
        // adjusted well above the 0.05 hard-zone floor
        let results = classifier().classify(
            &[zone(DetectionDifficulty::Hard)],
            &[fused([10.0, 10.0, 40.0, 40.0], 0.1)],
        );

        let result = &results[0];
        assert!(result.occupied);
        assert_eq!(result.detection_count, 1);
        assert_eq!(result.overlap_scores.len(), result.detections.len());
        assert!(result.detections[0].confidence() >= 0.4);
    }

    #[test]
    fn test_normal_zone_rejects_weak_detection() {
        // Same geometry, normal difficulty: multiplier ~1.2 leaves the
        // detection far below the 0.5 occupancy floor
        let results = classifier().classify(
            &[zone(DetectionDifficulty::Normal)],
            &[fused([10.0, 10.0, 40.0, 40.0], 0.1)],
        );

        let result = &results[0];
        assert!(!result.occupied);
        assert_eq!(result.detection_count, 1);
        assert!(result.detections[0].confidence() < 0.5);
    }

    #[test]
    fn test_detection_outside_zone_not_attached() {
        let results = classifier().classify(
            &[zone(DetectionDifficulty::Easy)],
            &[fused([500.0, 500.0, 600.0, 600.0], 0.9)],
        );

        let result = &results[0];
        assert!(!result.occupied);
        assert_eq!(result.detection_count, 0);
        assert_eq!(result.confidence, 0.0);
        assert!(result.method.is_none());
    }

    #[test]
    fn test_method_priority_prefers_iou() {
        // Large box over most of the zone: IoU score exceeds 0.3 so the IoU
        // method is selected even though center/multi-point also agree
        let results = classifier().classify(
            &[zone(DetectionDifficulty::Easy)],
            &[fused([5.0, 5.0, 95.0, 95.0], 0.9)],
        );
        assert_eq!(results[0].method, Some(OverlapMethod::Iou));
        assert!(results[0].occupied);
    }

    #[test]
    fn test_center_fallback_for_marginal_overlap() {
        // Huge box centered on the zone: only the center sample point lands
        // inside, so IoU and multi-point scores stay low and the center
        // method decides
        let results = classifier().classify(
            &[zone(DetectionDifficulty::Easy)],
            &[fused([-300.0, -300.0, 400.0, 400.0], 0.9)],
        );
        assert_eq!(results[0].method, Some(OverlapMethod::Center));
        assert!(results[0].occupied);
    }

    #[test]
    fn test_zone_confidence_combines_overlap_bonus() {
        let results = classifier().classify(
            &[zone(DetectionDifficulty::Easy)],
            &[fused([10.0, 10.0, 90.0, 90.0], 0.8)],
        );
        let result = &results[0];
        assert!(result.occupied);
        // max adjusted confidence + 0.2 * max overlap, capped at 1.0
        assert!(result.confidence > result.detections[0].confidence() || result.confidence == 1.0);
        assert!(result.confidence <= 1.0);
    }
}
