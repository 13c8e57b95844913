// src/detection/types.rs

use serde::Serialize;

/// Single vehicle detection as returned by the detector collaborator,
/// with derived geometry precomputed for the overlap methods.
#[derive(Debug, Clone, Serialize)]
pub struct RawDetection {
    /// [x1, y1, x2, y2] in original frame coordinates
    pub bbox: [f64; 4],
    /// Working confidence, clamped to [0, 1]. Adjusted downstream.
    pub confidence: f32,
    /// Confidence as reported by the detector, never adjusted
    pub original_confidence: f32,
    pub class_id: u32,
    pub center: [f64; 2],
    pub width: f64,
    pub height: f64,
    pub area: f64,
    /// Bbox corners: top-left, top-right, bottom-right, bottom-left
    pub corners: [[f64; 2]; 4],
    /// Edge midpoints (top, right, bottom, left) plus center
    pub edge_points: [[f64; 2]; 5],
    /// Scale the detector ran at when this box was produced
    pub scale_factor: Option<f32>,
}

impl RawDetection {
    pub fn new(bbox: [f64; 4], confidence: f32, class_id: u32) -> Self {
        let [x1, y1, x2, y2] = bbox;
        let cx = (x1 + x2) / 2.0;
        let cy = (y1 + y2) / 2.0;
        let width = x2 - x1;
        let height = y2 - y1;
        let confidence = confidence.clamp(0.0, 1.0);

        Self {
            bbox,
            confidence,
            original_confidence: confidence,
            class_id,
            center: [cx, cy],
            width,
            height,
            area: width * height,
            corners: [[x1, y1], [x2, y1], [x2, y2], [x1, y2]],
            edge_points: [[cx, y1], [x2, cy], [cx, y2], [x1, cy], [cx, cy]],
            scale_factor: None,
        }
    }

    /// Map a detection produced on a frame resized by `scale` back to
    /// original frame coordinates.
    pub fn rescaled(mut self, scale: f32) -> Self {
        let s = scale as f64;
        for v in self.bbox.iter_mut() {
            *v /= s;
        }
        for v in self.center.iter_mut() {
            *v /= s;
        }
        for corner in self.corners.iter_mut() {
            corner[0] /= s;
            corner[1] /= s;
        }
        for point in self.edge_points.iter_mut() {
            point[0] /= s;
            point[1] /= s;
        }
        self.width /= s;
        self.height /= s;
        self.area /= s * s;
        self.scale_factor = Some(scale);
        self
    }
}

/// Detection surviving NMS fusion across scales. Lives for one frame.
#[derive(Debug, Clone, Serialize)]
pub struct FusedDetection {
    #[serde(flatten)]
    pub detection: RawDetection,
    /// Whether more than one scale produced a box for this vehicle
    pub multi_scale_confirmed: bool,
    /// Number of scales that agreed on this box
    pub detection_scales: u32,
}

impl FusedDetection {
    pub fn from_raw(detection: RawDetection) -> Self {
        Self {
            detection,
            multi_scale_confirmed: false,
            detection_scales: 1,
        }
    }

    pub fn bbox(&self) -> &[f64; 4] {
        &self.detection.bbox
    }

    pub fn confidence(&self) -> f32 {
        self.detection.confidence
    }
}

/// Fully enriched detection as published per frame: zone assignment,
/// persistent identity, ghost flag, and temporal metadata.
#[derive(Debug, Clone, Serialize)]
pub struct EnrichedDetection {
    pub bbox: [f64; 4],
    pub confidence: f32,
    pub class_id: u32,
    pub zone_id: Option<u32>,
    pub tracked_id: Option<u64>,
    pub tracked_duration: f64,
    pub is_ghost: bool,
    pub missed_frames: u32,
    pub multi_scale_confirmed: bool,
    /// Smoothed confidence of the zone this detection sits in
    pub temporal_confidence: Option<f32>,
    pub stable_frames: Option<u32>,
    /// Seconds the occupying vehicle has dwelled in its zone
    pub time_parked: Option<f64>,
    pub vehicle_id: Option<String>,
}
