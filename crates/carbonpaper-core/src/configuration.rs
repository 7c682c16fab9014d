// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scan configuration: caller proposals, validated configurations, and the
// pure validator that turns one into the other.
//
// Only a `ValidatedConfiguration` can be applied to a driver, and the only
// way to build one is `validate` (or `full_area`, which goes through it).

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::capabilities::Capabilities;
use crate::error::ConfigError;
use crate::types::ColorMode;

/// Scan parameters as supplied by a caller. Not yet checked against any
/// device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposedConfiguration {
    pub from_x: f64,
    pub from_y: f64,
    pub to_x: f64,
    pub to_y: f64,
    pub resolution_dpi: u32,
    pub color_mode: ColorMode,
    /// Scan source (flatbed, feeder). `None` leaves the device default.
    pub source: Option<String>,
}

/// Partial update applied on top of the current configuration. Fields left
/// as `None` keep their current value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigurationPatch {
    pub from_x: Option<f64>,
    pub from_y: Option<f64>,
    pub to_x: Option<f64>,
    pub to_y: Option<f64>,
    pub resolution_dpi: Option<u32>,
    pub color_mode: Option<ColorMode>,
    pub source: Option<String>,
}

impl ConfigurationPatch {
    /// Overlay this patch onto `base`, producing a new proposal.
    pub fn apply_to(&self, base: &ProposedConfiguration) -> ProposedConfiguration {
        ProposedConfiguration {
            from_x: self.from_x.unwrap_or(base.from_x),
            from_y: self.from_y.unwrap_or(base.from_y),
            to_x: self.to_x.unwrap_or(base.to_x),
            to_y: self.to_y.unwrap_or(base.to_y),
            resolution_dpi: self.resolution_dpi.unwrap_or(base.resolution_dpi),
            color_mode: self.color_mode.unwrap_or(base.color_mode),
            source: self.source.clone().or_else(|| base.source.clone()),
        }
    }
}

/// A configuration proven to fit a device's capabilities.
///
/// Invariants: `from_x < to_x`, `from_y < to_y`, all four inside the device
/// bounds, resolution and color mode (and source, if set) supported.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidatedConfiguration {
    from_x: f64,
    from_y: f64,
    to_x: f64,
    to_y: f64,
    resolution_dpi: u32,
    color_mode: ColorMode,
    source: Option<String>,
}

impl ValidatedConfiguration {
    pub fn from_x(&self) -> f64 {
        self.from_x
    }

    pub fn from_y(&self) -> f64 {
        self.from_y
    }

    pub fn to_x(&self) -> f64 {
        self.to_x
    }

    pub fn to_y(&self) -> f64 {
        self.to_y
    }

    pub fn resolution_dpi(&self) -> u32 {
        self.resolution_dpi
    }

    pub fn color_mode(&self) -> ColorMode {
        self.color_mode
    }

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    /// Editable copy for read-modify-write flows.
    pub fn to_proposed(&self) -> ProposedConfiguration {
        ProposedConfiguration {
            from_x: self.from_x,
            from_y: self.from_y,
            to_x: self.to_x,
            to_y: self.to_y,
            resolution_dpi: self.resolution_dpi,
            color_mode: self.color_mode,
            source: self.source.clone(),
        }
    }

    /// Default configuration: whole scan bed, lowest resolution, first
    /// color mode and first source.
    pub fn full_area(capabilities: &Capabilities) -> Result<Self, ConfigError> {
        let bounds = capabilities.bounds();
        let proposed = ProposedConfiguration {
            from_x: bounds.min_x,
            from_y: bounds.min_y,
            to_x: bounds.max_x,
            to_y: bounds.max_y,
            // 0 is never a supported resolution, so an empty list still
            // fails with UnsupportedResolution.
            resolution_dpi: capabilities.resolutions_dpi().first().copied().unwrap_or(0),
            color_mode: capabilities
                .color_modes()
                .first()
                .copied()
                .unwrap_or(ColorMode::Color),
            source: capabilities.sources().first().cloned(),
        };
        validate(capabilities, &proposed)
    }
}

/// Check `proposed` against `capabilities`.
///
/// Pure and deterministic. Checks run in a fixed order (geometry,
/// resolution, color mode, source) and the first violation is returned.
pub fn validate(
    capabilities: &Capabilities,
    proposed: &ProposedConfiguration,
) -> Result<ValidatedConfiguration, ConfigError> {
    let bounds = capabilities.bounds();

    let inside = bounds.contains_x(proposed.from_x)
        && bounds.contains_x(proposed.to_x)
        && bounds.contains_y(proposed.from_y)
        && bounds.contains_y(proposed.to_y);
    let non_empty = proposed.from_x < proposed.to_x && proposed.from_y < proposed.to_y;
    if !(inside && non_empty) {
        debug!(?proposed, ?bounds, "scan region rejected");
        return Err(ConfigError::OutOfBounds {
            from_x: proposed.from_x,
            from_y: proposed.from_y,
            to_x: proposed.to_x,
            to_y: proposed.to_y,
        });
    }

    if !capabilities.supports_resolution(proposed.resolution_dpi) {
        return Err(ConfigError::UnsupportedResolution {
            requested: proposed.resolution_dpi,
            supported: capabilities.resolutions_dpi().to_vec(),
        });
    }

    if !capabilities.supports_color_mode(proposed.color_mode) {
        return Err(ConfigError::UnsupportedColorMode {
            requested: proposed.color_mode,
            supported: capabilities.color_modes().to_vec(),
        });
    }

    if let Some(source) = &proposed.source {
        if !capabilities.supports_source(source) {
            return Err(ConfigError::UnsupportedSource {
                requested: source.clone(),
                supported: capabilities.sources().to_vec(),
            });
        }
    }

    Ok(ValidatedConfiguration {
        from_x: proposed.from_x,
        from_y: proposed.from_y,
        to_x: proposed.to_x,
        to_y: proposed.to_y,
        resolution_dpi: proposed.resolution_dpi,
        color_mode: proposed.color_mode,
        source: proposed.source.clone(),
    })
}
