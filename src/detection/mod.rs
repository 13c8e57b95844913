// src/detection/mod.rs

mod multi_scale;
mod types;

pub use multi_scale::{Detector, MultiScaleFuser};
pub use types::{EnrichedDetection, FusedDetection, RawDetection};
