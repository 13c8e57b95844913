// src/analysis/mod.rs
//
// Occupancy analysis stages, in frame order:
//   FusedDetections → zone_classifier → per-zone raw occupancy
//                   → vehicle_tracker → persistent ids + ghost detections
//                   → temporal        → hysteresis-smoothed zone states
//
// Orchestrated by pipeline::OccupancyPipeline.

pub mod temporal;
pub mod vehicle_tracker;
pub mod zone_classifier;

pub use temporal::{SmoothedZoneState, TemporalSmoother, VehicleMemory, ZoneHistory};
pub use vehicle_tracker::{TrackedDetection, TrackedVehicle, VehicleTracker};
pub use zone_classifier::{OverlapMethod, ZoneClassifier, ZoneDetectionResult};
