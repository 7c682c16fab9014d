// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Carbonpaper: scanner driver abstractions.
//
// The traits in `traits` are the only surface the scanner layer talks to.
// A real transport (SANE, eSCL, WIA) implements them outside this workspace;
// `stub` stands in when none is linked and `simulated` provides in-process
// virtual scanners for tests, benchmarks and demos.

pub mod simulated;
pub mod stub;
pub mod traits;

pub use simulated::{DriverStats, Fault, SimulatedDevice, SimulatedDriver, test_pattern};
pub use stub::StubDriver;
pub use traits::*;

use std::sync::Arc;

/// Returns the driver for the current build.
///
/// No hardware transport is compiled into this workspace, so this is always
/// the stub driver, which enumerates no devices.
pub fn platform_driver() -> Arc<dyn ScannerDriver> {
    Arc::new(StubDriver)
}
