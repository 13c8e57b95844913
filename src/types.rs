// src/types.rs

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub detection: DetectionConfig,
    pub fusion: FusionConfig,
    pub tracking: TrackingConfig,
    pub smoothing: SmoothingConfig,
    pub logging: LoggingConfig,
    pub zones: Vec<ZoneSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    /// Base confidence threshold handed to the detector collaborator
    pub base_confidence: f32,
    /// Mask size used for polygon intersection (frame + margin)
    pub mask_width: usize,
    pub mask_height: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusionConfig {
    /// Scales the detector is run at per frame
    pub scales: Vec<f32>,
    /// Greedy NMS suppression threshold
    pub nms_threshold: f64,
    /// IoU above which a suppressed box counts as scale agreement
    pub agreement_threshold: f64,
    /// Smallest frame the detector is still given (scales below are skipped)
    pub min_width: usize,
    pub min_height: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingConfig {
    /// Minimum IoU to match a detection to a tracked vehicle
    pub iou_threshold: f64,
    /// Unmatched frames a vehicle survives before removal
    pub max_missed_frames: u32,
    /// Per-frame confidence decay applied to ghost detections
    pub ghost_decay: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmoothingConfig {
    /// Frames of zone history kept for hysteresis
    pub history_size: usize,
    /// Fraction of history frames needed to flip occupancy state
    pub hysteresis_threshold: f64,
    /// Seconds a dwell-memory slot survives without a sighting
    pub memory_timeout_secs: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            base_confidence: 0.35,
            mask_width: 2000,
            mask_height: 1200,
        }
    }
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            scales: vec![0.8, 1.0, 1.2, 1.5],
            nms_threshold: 0.4,
            agreement_threshold: 0.3,
            min_width: 320,
            min_height: 240,
        }
    }
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            iou_threshold: 0.3,
            max_missed_frames: 5,
            ghost_decay: 0.8,
        }
    }
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self {
            history_size: 5,
            hysteresis_threshold: 0.6,
            memory_timeout_secs: 10.0,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Single video frame in packed RGB order.
#[derive(Debug, Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: usize,
    pub height: usize,
    pub timestamp: f64,
}

/// Detection difficulty tier for a parking zone. Hard zones (distant or
/// partially occluded spaces) get aggressive confidence compensation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionDifficulty {
    Easy,
    Normal,
    Hard,
}

/// Zone definition as it appears in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoneSpec {
    pub id: u32,
    pub space_id: u32,
    pub polygon: Vec<[f64; 2]>,
    #[serde(default = "default_difficulty")]
    pub difficulty: DetectionDifficulty,
}

fn default_difficulty() -> DetectionDifficulty {
    DetectionDifficulty::Easy
}

/// Validated parking zone. Polygon has at least 3 vertices and no negative
/// coordinates; both are enforced at config load.
#[derive(Debug, Clone)]
pub struct Zone {
    pub id: u32,
    pub space_id: u32,
    pub polygon: Vec<[f64; 2]>,
    pub difficulty: DetectionDifficulty,
}
