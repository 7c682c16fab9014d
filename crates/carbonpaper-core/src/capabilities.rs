// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Capability model: the normalised, read-only description of what one
// scanner supports.

use serde::Serialize;

use crate::error::{Result, ScanError};
use crate::types::{ColorMode, GeometryUnit};

/// Scan-bed bounds in device units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Bounds {
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
}

impl Bounds {
    /// Whether `x` lies inside `[min_x, max_x]`. NaN is never inside.
    pub fn contains_x(&self, x: f64) -> bool {
        x >= self.min_x && x <= self.max_x
    }

    /// Whether `y` lies inside `[min_y, max_y]`. NaN is never inside.
    pub fn contains_y(&self, y: f64) -> bool {
        y >= self.min_y && y <= self.max_y
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }
}

/// What a device supports, computed once per device session.
///
/// Construction enforces the invariants: bounds finite, non-negative and
/// ordered; resolutions ascending without duplicates; color modes without
/// duplicates.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Capabilities {
    bounds: Bounds,
    unit: GeometryUnit,
    resolutions_dpi: Vec<u32>,
    color_modes: Vec<ColorMode>,
    sources: Vec<String>,
}

impl Capabilities {
    pub fn new(
        bounds: Bounds,
        unit: GeometryUnit,
        mut resolutions_dpi: Vec<u32>,
        mut color_modes: Vec<ColorMode>,
        sources: Vec<String>,
    ) -> Result<Self> {
        let values = [bounds.min_x, bounds.max_x, bounds.min_y, bounds.max_y];
        if values.iter().any(|v| !v.is_finite() || *v < 0.0) {
            return Err(ScanError::ProtocolError(format!(
                "scan bounds must be finite and non-negative, got {bounds:?}"
            )));
        }
        if bounds.min_x > bounds.max_x || bounds.min_y > bounds.max_y {
            return Err(ScanError::ProtocolError(format!(
                "scan bounds are inverted: {bounds:?}"
            )));
        }
        if resolutions_dpi.contains(&0) {
            return Err(ScanError::ProtocolError(
                "resolution list contains 0 dpi".into(),
            ));
        }

        resolutions_dpi.sort_unstable();
        resolutions_dpi.dedup();
        color_modes.sort_unstable();
        color_modes.dedup();

        let mut unique_sources: Vec<String> = Vec::with_capacity(sources.len());
        for source in sources {
            if !unique_sources.contains(&source) {
                unique_sources.push(source);
            }
        }

        Ok(Self {
            bounds,
            unit,
            resolutions_dpi,
            color_modes,
            sources: unique_sources,
        })
    }

    pub fn bounds(&self) -> Bounds {
        self.bounds
    }

    pub fn unit(&self) -> GeometryUnit {
        self.unit
    }

    /// Supported resolutions, ascending.
    pub fn resolutions_dpi(&self) -> &[u32] {
        &self.resolutions_dpi
    }

    pub fn color_modes(&self) -> &[ColorMode] {
        &self.color_modes
    }

    /// Source names exactly as the driver reported them.
    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    pub fn supports_resolution(&self, dpi: u32) -> bool {
        self.resolutions_dpi.binary_search(&dpi).is_ok()
    }

    pub fn supports_color_mode(&self, mode: ColorMode) -> bool {
        self.color_modes.contains(&mode)
    }

    pub fn supports_source(&self, source: &str) -> bool {
        self.sources.iter().any(|s| s == source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bounds(min_x: f64, max_x: f64, min_y: f64, max_y: f64) -> Bounds {
        Bounds {
            min_x,
            max_x,
            min_y,
            max_y,
        }
    }

    #[test]
    fn resolutions_are_sorted_and_deduplicated() {
        let caps = Capabilities::new(
            bounds(0.0, 100.0, 0.0, 100.0),
            GeometryUnit::Pixel,
            vec![300, 75, 150, 75],
            vec![ColorMode::Color, ColorMode::Gray, ColorMode::Color],
            vec!["Flatbed".into(), "ADF".into(), "Flatbed".into()],
        )
        .expect("valid capabilities");
        assert_eq!(caps.resolutions_dpi(), &[75, 150, 300]);
        assert_eq!(caps.color_modes(), &[ColorMode::Gray, ColorMode::Color]);
        assert_eq!(caps.sources(), &["Flatbed".to_string(), "ADF".to_string()]);
        assert!(caps.supports_resolution(150));
        assert!(!caps.supports_resolution(200));
    }

    #[test]
    fn negative_bounds_are_a_protocol_error() {
        let err = Capabilities::new(
            bounds(-1.0, 100.0, 0.0, 100.0),
            GeometryUnit::Millimetre,
            vec![75],
            vec![ColorMode::Gray],
            vec![],
        )
        .unwrap_err();
        assert!(matches!(err, ScanError::ProtocolError(_)));
    }

    #[test]
    fn inverted_bounds_are_a_protocol_error() {
        let err = Capabilities::new(
            bounds(0.0, 100.0, 50.0, 10.0),
            GeometryUnit::Millimetre,
            vec![75],
            vec![ColorMode::Gray],
            vec![],
        )
        .unwrap_err();
        assert!(matches!(err, ScanError::ProtocolError(_)));
    }

    #[test]
    fn nan_bounds_are_a_protocol_error() {
        let err = Capabilities::new(
            bounds(0.0, f64::NAN, 0.0, 10.0),
            GeometryUnit::Millimetre,
            vec![75],
            vec![ColorMode::Gray],
            vec![],
        )
        .unwrap_err();
        assert!(matches!(err, ScanError::ProtocolError(_)));
    }
}
