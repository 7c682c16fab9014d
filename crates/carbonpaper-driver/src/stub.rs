// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Stub driver for builds without a hardware transport.
//
// Enumeration succeeds with no devices, so callers see "no scanners" rather
// than an error. Opening anything reports the device as disconnected.

use crate::traits::*;

/// Driver returned when no transport is linked in.
pub struct StubDriver;

impl ScannerDriver for StubDriver {
    fn driver_name(&self) -> &str {
        "stub"
    }

    fn list_devices(&self) -> DriverResult<Vec<RawDevice>> {
        tracing::debug!("ScannerDriver::list_devices called on stub driver");
        Ok(Vec::new())
    }

    fn open_device(&self, name: &str) -> DriverResult<Box<dyn DeviceConnection>> {
        tracing::warn!(device = name, "ScannerDriver::open_device called on stub driver");
        Err(DriverStatus::Disconnected)
    }
}
