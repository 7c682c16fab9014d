// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scanner service construction from settings.

use std::sync::Arc;

use carbonpaper_core::ScannerConfig;
use carbonpaper_driver::{ScannerDriver, SimulatedDriver, platform_driver};
use carbonpaper_scan::ScanService;
use tracing::info;

/// Build the scan service the settings ask for: simulated flatbeds when
/// `simulated_devices` is non-zero, the platform driver otherwise.
pub fn build_service(config: ScannerConfig) -> ScanService {
    let driver: Arc<dyn ScannerDriver> = if config.simulated_devices > 0 {
        info!(count = config.simulated_devices, "using simulated scanners");
        Arc::new(SimulatedDriver::with_flatbeds(config.simulated_devices))
    } else {
        platform_driver()
    };
    ScanService::new(driver, config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simulated_devices_are_listed() {
        let service = build_service(ScannerConfig {
            simulated_devices: 3,
            ..Default::default()
        });
        assert_eq!(service.list_devices().len(), 3);
    }

    #[test]
    fn default_settings_use_the_platform_driver() {
        let service = build_service(ScannerConfig::default());
        assert!(service.list_devices().is_empty());
    }
}
