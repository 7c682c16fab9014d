// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Normalisation of driver-reported options into the capability model, and
// the mapping between validated configurations and driver option values.
//
// Devices describe themselves in very different ways: resolutions as a word
// list or as a quantised range, geometry in millimetres or pixels, colour
// modes as vendor strings. Everything is reconciled here so the rest of the
// crate only ever sees `Capabilities`.

use carbonpaper_core::capabilities::{Bounds, Capabilities};
use carbonpaper_core::configuration::{ProposedConfiguration, ValidatedConfiguration};
use carbonpaper_core::error::{Result, ScanError};
use carbonpaper_core::types::{ColorMode, GeometryUnit};
use carbonpaper_driver::{RawCapabilities, RawConfiguration, RawUnit, ResolutionConstraint};
use tracing::debug;

/// Resolutions offered when a device accepts any value in a range.
const STANDARD_RESOLUTIONS: [u32; 10] = [75, 100, 150, 200, 300, 400, 600, 1200, 2400, 4800];

/// Ranges with more steps than this are reduced to the standard ladder.
const MAX_RANGE_STEPS: i64 = 64;

// -- Capabilities -------------------------------------------------------------

/// Build the capability model from raw driver options.
pub fn normalize_capabilities(raw: &RawCapabilities) -> Result<Capabilities> {
    let bounds = Bounds {
        min_x: raw.tl_x.min,
        max_x: raw.br_x.max,
        min_y: raw.tl_y.min,
        max_y: raw.br_y.max,
    };
    let unit = match raw.unit {
        RawUnit::Millimetre => GeometryUnit::Millimetre,
        RawUnit::Pixel => GeometryUnit::Pixel,
    };
    let resolutions = expand_resolutions(&raw.resolution)?;

    let mut color_modes = Vec::new();
    for name in &raw.modes {
        match ColorMode::from_driver_name(name) {
            Some(mode) => color_modes.push(mode),
            None => debug!(mode = %name, "ignoring unrecognised colour mode"),
        }
    }

    Capabilities::new(bounds, unit, resolutions, color_modes, raw.sources.clone())
}

/// Turn a resolution constraint into an explicit list of dpi values.
pub fn expand_resolutions(constraint: &ResolutionConstraint) -> Result<Vec<u32>> {
    match constraint {
        ResolutionConstraint::List(values) => values
            .iter()
            .map(|&dpi| {
                u32::try_from(dpi).ok().filter(|&dpi| dpi > 0).ok_or_else(|| {
                    ScanError::ProtocolError(format!("resolution list contains {dpi} dpi"))
                })
            })
            .collect(),
        ResolutionConstraint::Range { min, max, quant } => {
            if min > max {
                return Err(ScanError::ProtocolError(format!(
                    "resolution range is inverted: {min}..{max}"
                )));
            }
            let steps = if *quant > 0 {
                (i64::from(*max) - i64::from(*min)) / i64::from(*quant) + 1
            } else {
                i64::MAX
            };
            if steps <= MAX_RANGE_STEPS {
                return Ok((0..steps)
                    .map(|i| i64::from(*min) + i * i64::from(*quant))
                    .filter_map(|dpi| u32::try_from(dpi).ok())
                    .filter(|&dpi| dpi > 0)
                    .collect());
            }

            let mut ladder: Vec<u32> = STANDARD_RESOLUTIONS
                .iter()
                .copied()
                .filter(|&dpi| i32::try_from(dpi).is_ok_and(|dpi| constraint.allows(dpi)))
                .collect();
            if ladder.is_empty() {
                // Range sits between ladder rungs; offer its end points.
                ladder = [*min, *max]
                    .into_iter()
                    .filter_map(|dpi| u32::try_from(dpi).ok())
                    .filter(|&dpi| dpi > 0)
                    .collect();
            }
            Ok(ladder)
        }
    }
}

// -- Configuration mapping ----------------------------------------------------

/// Option values that apply `config` to a driver.
pub fn to_raw(config: &ValidatedConfiguration) -> RawConfiguration {
    RawConfiguration {
        tl_x: config.from_x(),
        tl_y: config.from_y(),
        br_x: config.to_x(),
        br_y: config.to_y(),
        resolution: i32::try_from(config.resolution_dpi()).unwrap_or(i32::MAX),
        mode: config.color_mode().driver_name().to_string(),
        source: config.source().map(str::to_string),
    }
}

/// Read driver option values back as a proposal. `None` when the device
/// reports something we cannot represent (unknown mode, negative dpi).
pub fn from_raw(raw: &RawConfiguration) -> Option<ProposedConfiguration> {
    Some(ProposedConfiguration {
        from_x: raw.tl_x,
        from_y: raw.tl_y,
        to_x: raw.br_x,
        to_y: raw.br_y,
        resolution_dpi: u32::try_from(raw.resolution).ok()?,
        color_mode: ColorMode::from_driver_name(&raw.mode)?,
        source: raw.source.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use carbonpaper_core::error::ErrorKind;
    use carbonpaper_driver::OptionRange;

    fn range(min: f64, max: f64) -> OptionRange {
        OptionRange {
            min,
            max,
            quant: 0.0,
        }
    }

    fn raw(resolution: ResolutionConstraint, modes: &[&str]) -> RawCapabilities {
        RawCapabilities {
            unit: RawUnit::Millimetre,
            tl_x: range(0.0, 100.0),
            tl_y: range(0.0, 100.0),
            br_x: range(0.0, 100.0),
            br_y: range(0.0, 100.0),
            resolution,
            sources: vec!["Flatbed".into(), "ADF".into(), "Flatbed".into()],
            modes: modes.iter().map(|m| m.to_string()).collect(),
        }
    }

    #[test]
    fn word_list_is_sorted_and_deduplicated() {
        let caps = normalize_capabilities(&raw(
            ResolutionConstraint::List(vec![300, 75, 150, 75]),
            &["Color"],
        ))
        .expect("normalize");
        assert_eq!(caps.resolutions_dpi(), &[75, 150, 300]);
        assert_eq!(caps.sources(), &["Flatbed".to_string(), "ADF".to_string()]);
    }

    #[test]
    fn non_positive_list_entry_is_a_protocol_error() {
        let err = normalize_capabilities(&raw(
            ResolutionConstraint::List(vec![75, -1]),
            &["Color"],
        ))
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProtocolError);
    }

    #[test]
    fn quantised_range_expands_every_step() {
        let dpi = expand_resolutions(&ResolutionConstraint::Range {
            min: 100,
            max: 400,
            quant: 100,
        })
        .expect("expand");
        assert_eq!(dpi, vec![100, 200, 300, 400]);
    }

    #[test]
    fn continuous_range_uses_the_standard_ladder() {
        let dpi = expand_resolutions(&ResolutionConstraint::Range {
            min: 50,
            max: 600,
            quant: 0,
        })
        .expect("expand");
        assert_eq!(dpi, vec![75, 100, 150, 200, 300, 400, 600]);
    }

    #[test]
    fn fine_range_is_reduced_to_allowed_ladder_values() {
        let dpi = expand_resolutions(&ResolutionConstraint::Range {
            min: 50,
            max: 1200,
            quant: 5,
        })
        .expect("expand");
        assert_eq!(dpi, vec![75, 100, 150, 200, 300, 400, 600, 1200]);
    }

    #[test]
    fn narrow_range_offers_its_end_points() {
        let dpi = expand_resolutions(&ResolutionConstraint::Range {
            min: 110,
            max: 140,
            quant: 0,
        })
        .expect("expand");
        assert_eq!(dpi, vec![110, 140]);
    }

    #[test]
    fn inverted_range_is_a_protocol_error() {
        let err = expand_resolutions(&ResolutionConstraint::Range {
            min: 600,
            max: 75,
            quant: 0,
        })
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProtocolError);
    }

    #[test]
    fn vendor_mode_names_are_normalised() {
        let caps = normalize_capabilities(&raw(
            ResolutionConstraint::List(vec![75]),
            &["Colour", "Halftone", "Grayscale", "Gray", "Binary"],
        ))
        .expect("normalize");
        assert_eq!(
            caps.color_modes(),
            &[ColorMode::Lineart, ColorMode::Gray, ColorMode::Color]
        );
    }

    #[test]
    fn bounds_come_from_top_left_min_and_bottom_right_max() {
        let mut raw = raw(ResolutionConstraint::List(vec![75]), &["Gray"]);
        raw.tl_x = range(2.0, 50.0);
        raw.br_x = range(10.0, 210.0);
        let caps = normalize_capabilities(&raw).expect("normalize");
        assert_eq!(caps.bounds().min_x, 2.0);
        assert_eq!(caps.bounds().max_x, 210.0);
    }

    #[test]
    fn inverted_geometry_is_a_protocol_error() {
        let mut raw = raw(ResolutionConstraint::List(vec![75]), &["Gray"]);
        raw.tl_x = range(110.0, 100.0);
        assert_eq!(
            normalize_capabilities(&raw).unwrap_err().kind(),
            ErrorKind::ProtocolError
        );
    }

    #[test]
    fn raw_configuration_with_unknown_mode_is_unrepresentable() {
        let raw = RawConfiguration {
            tl_x: 0.0,
            tl_y: 0.0,
            br_x: 10.0,
            br_y: 10.0,
            resolution: 75,
            mode: "Halftone".into(),
            source: None,
        };
        assert!(from_raw(&raw).is_none());
    }
}
