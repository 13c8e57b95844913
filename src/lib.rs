// src/lib.rs
//
// Detection-to-occupancy pipeline for a fixed-camera parking lot monitor.
// Turns per-frame vehicle detections (from an external detector collaborator)
// into stable per-zone occupancy decisions.
//
// Frame flow:
//   Frame → detection::MultiScaleFuser → analysis::ZoneClassifier
//         → analysis::VehicleTracker   → analysis::TemporalSmoother
//         → pipeline::FrameResult

pub mod analysis;
pub mod config;
pub mod detection;
pub mod geometry;
pub mod pipeline;
pub mod types;

pub use analysis::{
    OverlapMethod, SmoothedZoneState, TemporalSmoother, TrackedVehicle, VehicleTracker,
    ZoneClassifier, ZoneDetectionResult,
};
pub use detection::{Detector, EnrichedDetection, FusedDetection, MultiScaleFuser, RawDetection};
pub use pipeline::{
    FrameResult, MetricsSummary, OccupancyPipeline, OccupancySummary, PipelineMetrics, ZoneStatus,
};
pub use types::{Config, DetectionDifficulty, Frame, Zone, ZoneSpec};
