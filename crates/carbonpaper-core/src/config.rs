// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Application configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;
use crate::types::ImageFormat;

/// Persistent scanner-layer settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Size of the buffer handed to the driver for each chunk read.
    pub chunk_size: usize,
    /// Consecutive empty reads tolerated before a scan is declared stalled.
    pub max_stalled_reads: u32,
    /// Format used when an output path has no recognised extension.
    pub default_format: ImageFormat,
    /// Preferred device: first device whose descriptor contains this text.
    pub default_device: Option<String>,
    /// Number of simulated scanners to expose instead of real hardware
    /// (0 = use the platform driver).
    pub simulated_devices: u32,
    /// Deadline for a whole scan when run through the async worker.
    pub scan_timeout_secs: Option<u64>,
    /// Largest frame, in bytes as delivered by the driver, a scan will
    /// accept. Bigger frames are refused before anything is allocated.
    pub max_frame_bytes: u64,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            chunk_size: 64 * 1024,
            max_stalled_reads: 64,
            default_format: ImageFormat::Png,
            default_device: None,
            simulated_devices: 0,
            scan_timeout_secs: None,
            max_frame_bytes: 2 * 1024 * 1024 * 1024,
        }
    }
}

impl ScannerConfig {
    /// Read a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&data)?;
        debug!(path = %path.as_ref().display(), "scanner config loaded");
        Ok(config)
    }

    /// Read a JSON configuration file, falling back to defaults when it is
    /// missing or unreadable.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        match Self::load(path.as_ref()) {
            Ok(config) => config,
            Err(err) => {
                if path.as_ref().exists() {
                    warn!(path = %path.as_ref().display(), error = %err, "ignoring unreadable scanner config");
                }
                Self::default()
            }
        }
    }

    /// Write the configuration as pretty-printed JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), json)?;
        Ok(())
    }
}
