// src/config.rs

use crate::types::{Config, Zone, ZoneSpec};
use anyhow::{bail, Context, Result};
use std::fs;
use tracing::warn;

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let contents =
            fs::read_to_string(path).with_context(|| format!("Failed to read config: {path}"))?;
        let config: Config = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse config: {path}"))?;
        validate_zones(&config.zones)?;
        Ok(config)
    }

    /// Validated zone list ready for the classifier.
    pub fn build_zones(&self) -> Result<Vec<Zone>> {
        self.zones.iter().map(build_zone).collect()
    }
}

/// Build a validated zone from its config entry. Negative coordinates are
/// clamped to 0 (zones drawn slightly off-frame in the dashboard editor);
/// fewer than 3 vertices is a config error.
pub fn build_zone(spec: &ZoneSpec) -> Result<Zone> {
    if spec.polygon.len() < 3 {
        bail!(
            "Zone {} has {} vertices, need at least 3",
            spec.id,
            spec.polygon.len()
        );
    }

    let mut clamped = 0usize;
    let polygon = spec
        .polygon
        .iter()
        .map(|&[x, y]| {
            if x < 0.0 || y < 0.0 {
                clamped += 1;
            }
            [x.max(0.0), y.max(0.0)]
        })
        .collect();

    if clamped > 0 {
        warn!(
            "Zone {}: clamped {} negative coordinate(s) to 0",
            spec.id, clamped
        );
    }

    Ok(Zone {
        id: spec.id,
        space_id: spec.space_id,
        polygon,
        difficulty: spec.difficulty,
    })
}

fn validate_zones(zones: &[ZoneSpec]) -> Result<()> {
    for spec in zones {
        build_zone(spec)?;
    }
    Ok(())
}
