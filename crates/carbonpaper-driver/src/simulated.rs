// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// In-process simulated scanners.
//
// Every simulated device produces a deterministic test pattern so callers can
// compare a finished buffer byte for byte. Devices can be slowed down, made
// to misbehave through a `Fault`, or unplugged mid-scan. The driver counts
// every open, close, and scan so tests can check that nothing leaks.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::traits::*;

/// Misbehaviour a simulated device can be told to exhibit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Report end-of-data after this many bytes, short of the full frame.
    TruncateAfter(usize),
    /// After this many bytes, return empty reads forever.
    StallAfter(usize),
    /// After this many bytes, fail the read with an I/O error.
    IoErrorAfter(usize),
    /// Deliver this many bytes beyond the announced frame size.
    Overrun(usize),
    /// Announce 16-bit samples.
    WideSamples,
    /// Report a geometry range whose minimum exceeds its maximum.
    MalformedCapabilities,
}

/// Description of one simulated device.
#[derive(Debug, Clone)]
pub struct SimulatedDevice {
    pub name: String,
    pub vendor: String,
    pub model: String,
    pub capabilities: RawCapabilities,
    /// Option values the device reports before anything is applied.
    pub defaults: RawConfiguration,
    /// Upper bound on bytes returned by a single read.
    pub max_chunk: usize,
    /// Pause before each read returns.
    pub chunk_delay: Duration,
    pub fault: Option<Fault>,
    /// Hardware condition reported by `scan_status` (cover open, jam, ...).
    pub hardware_status: Option<DriverStatus>,
}

impl SimulatedDevice {
    /// A4 flatbed with a document feeder. Geometry is in millimetres.
    pub fn flatbed(name: impl Into<String>) -> Self {
        let width = 215.9;
        let height = 297.0;
        Self {
            name: name.into(),
            vendor: "Carbonpaper".into(),
            model: "Virtual Flatbed".into(),
            capabilities: RawCapabilities {
                unit: RawUnit::Millimetre,
                tl_x: continuous(0.0, width),
                tl_y: continuous(0.0, height),
                br_x: continuous(0.0, width),
                br_y: continuous(0.0, height),
                resolution: ResolutionConstraint::List(vec![75, 150, 300, 600]),
                sources: vec!["Flatbed".into(), "ADF".into()],
                modes: vec![
                    "Color".into(),
                    "Gray".into(),
                    "Lineart".into(),
                    "Halftone".into(),
                ],
            },
            defaults: RawConfiguration {
                tl_x: 0.0,
                tl_y: 0.0,
                br_x: width,
                br_y: height,
                resolution: 75,
                mode: "Color".into(),
                source: Some("Flatbed".into()),
            },
            max_chunk: 32 * 1024,
            chunk_delay: Duration::ZERO,
            fault: None,
            hardware_status: None,
        }
    }

    /// Device whose geometry is measured in pixels, bounds `0..width` by
    /// `0..height`. The scanned area maps one-to-one onto the frame.
    pub fn pixel_bed(
        name: impl Into<String>,
        width: f64,
        height: f64,
        resolutions: Vec<i32>,
        modes: &[&str],
    ) -> Self {
        let first_resolution = resolutions.first().copied().unwrap_or(0);
        let first_mode = modes.first().map(|m| m.to_string()).unwrap_or_default();
        Self {
            name: name.into(),
            vendor: "Carbonpaper".into(),
            model: "Virtual Pixel Bed".into(),
            capabilities: RawCapabilities {
                unit: RawUnit::Pixel,
                tl_x: continuous(0.0, width),
                tl_y: continuous(0.0, height),
                br_x: continuous(0.0, width),
                br_y: continuous(0.0, height),
                resolution: ResolutionConstraint::List(resolutions),
                sources: Vec::new(),
                modes: modes.iter().map(|m| m.to_string()).collect(),
            },
            defaults: RawConfiguration {
                tl_x: 0.0,
                tl_y: 0.0,
                br_x: width,
                br_y: height,
                resolution: first_resolution,
                mode: first_mode,
                source: None,
            },
            max_chunk: 32 * 1024,
            chunk_delay: Duration::ZERO,
            fault: None,
            hardware_status: None,
        }
    }

    pub fn with_fault(mut self, fault: Fault) -> Self {
        self.fault = Some(fault);
        self
    }

    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = delay;
        self
    }

    pub fn with_max_chunk(mut self, max_chunk: usize) -> Self {
        self.max_chunk = max_chunk;
        self
    }

    pub fn with_hardware_status(mut self, status: DriverStatus) -> Self {
        self.hardware_status = Some(status);
        self
    }

    pub fn with_resolution(mut self, constraint: ResolutionConstraint) -> Self {
        self.capabilities.resolution = constraint;
        self
    }
}

fn continuous(min: f64, max: f64) -> OptionRange {
    OptionRange {
        min,
        max,
        quant: 0.0,
    }
}

/// Counters kept across every connection of one simulated driver.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DriverStats {
    pub opened: u64,
    pub closed: u64,
    pub capability_queries: u64,
    pub configurations_applied: u64,
    pub scans_started: u64,
    pub scans_ended: u64,
    pub cancellations: u64,
}

impl DriverStats {
    /// Connections opened but never closed.
    pub fn open_connections(&self) -> u64 {
        self.opened.saturating_sub(self.closed)
    }

    /// Frames started but neither finished, cancelled, nor closed.
    pub fn scans_in_progress(&self) -> u64 {
        self.scans_started.saturating_sub(self.scans_ended)
    }
}

struct Shared {
    devices: Vec<SimulatedDevice>,
    unplugged: HashSet<String>,
    stats: DriverStats,
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Driver exposing a fixed set of simulated devices.
///
/// Clones share the same devices and counters.
#[derive(Clone)]
pub struct SimulatedDriver {
    shared: Arc<Mutex<Shared>>,
}

impl SimulatedDriver {
    pub fn new(devices: Vec<SimulatedDevice>) -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared {
                devices,
                unplugged: HashSet::new(),
                stats: DriverStats::default(),
            })),
        }
    }

    /// `count` identical flatbeds named `sim:0`, `sim:1`, ...
    pub fn with_flatbeds(count: u32) -> Self {
        Self::new(
            (0..count)
                .map(|i| SimulatedDevice::flatbed(format!("sim:{i}")))
                .collect(),
        )
    }

    pub fn stats(&self) -> DriverStats {
        lock(&self.shared).stats
    }

    /// Disconnect a device. Open connections start failing immediately and
    /// enumeration stops listing it.
    pub fn unplug(&self, name: &str) {
        info!(device = name, "simulated device unplugged");
        lock(&self.shared).unplugged.insert(name.to_string());
    }

    pub fn replug(&self, name: &str) {
        info!(device = name, "simulated device reconnected");
        lock(&self.shared).unplugged.remove(name);
    }
}

impl ScannerDriver for SimulatedDriver {
    fn driver_name(&self) -> &str {
        "simulated"
    }

    fn list_devices(&self) -> DriverResult<Vec<RawDevice>> {
        let shared = lock(&self.shared);
        Ok(shared
            .devices
            .iter()
            .filter(|d| !shared.unplugged.contains(&d.name))
            .map(|d| RawDevice {
                name: d.name.clone(),
                vendor: d.vendor.clone(),
                model: d.model.clone(),
                kind: "virtual scanner".into(),
            })
            .collect())
    }

    fn open_device(&self, name: &str) -> DriverResult<Box<dyn DeviceConnection>> {
        let mut shared = lock(&self.shared);
        if shared.unplugged.contains(name) {
            return Err(DriverStatus::Disconnected);
        }
        let Some(device) = shared.devices.iter().find(|d| d.name == name).cloned() else {
            warn!(device = name, "no simulated device with that name");
            return Err(DriverStatus::Invalid);
        };
        shared.stats.opened += 1;
        drop(shared);

        debug!(device = name, "simulated device opened");
        Ok(Box::new(SimulatedConnection {
            config: device.defaults.clone(),
            device,
            shared: Arc::clone(&self.shared),
            frame: None,
        }))
    }
}

struct Frame {
    params: ScanParameters,
    lineart: bool,
    frame_len: usize,
    total_len: usize,
    delivered: usize,
    finished: bool,
}

struct SimulatedConnection {
    device: SimulatedDevice,
    shared: Arc<Mutex<Shared>>,
    config: RawConfiguration,
    frame: Option<Frame>,
}

impl SimulatedConnection {
    fn is_unplugged(&self) -> bool {
        lock(&self.shared).unplugged.contains(&self.device.name)
    }

    fn frame_parameters(&self) -> ScanParameters {
        let config = &self.config;
        let extent = |from: f64, to: f64| -> i32 {
            let length = (to - from).max(0.0);
            match self.device.capabilities.unit {
                RawUnit::Pixel => length.round() as i32,
                RawUnit::Millimetre => (length / 25.4 * config.resolution as f64).round() as i32,
            }
        };
        let pixels_per_line = extent(config.tl_x, config.br_x);
        let lines = extent(config.tl_y, config.br_y);
        let (format, channels) = if config.mode.eq_ignore_ascii_case("color") {
            (FrameFormat::Rgb, 3)
        } else {
            (FrameFormat::Gray, 1)
        };
        let depth = if self.device.fault == Some(Fault::WideSamples) {
            16
        } else if config.mode.eq_ignore_ascii_case("lineart") {
            1
        } else {
            8
        };
        let bytes_per_line = if depth == 1 {
            (pixels_per_line + 7) / 8
        } else {
            pixels_per_line * channels * (depth / 8)
        };
        ScanParameters {
            format,
            pixels_per_line,
            lines,
            bytes_per_line,
            depth,
        }
    }

    fn check_configuration(&self, config: &RawConfiguration) -> DriverResult<()> {
        let caps = &self.device.capabilities;
        let within = |range: &OptionRange, v: f64| v >= range.min && v <= range.max;
        if !(within(&caps.tl_x, config.tl_x)
            && within(&caps.tl_y, config.tl_y)
            && within(&caps.br_x, config.br_x)
            && within(&caps.br_y, config.br_y))
            || config.tl_x >= config.br_x
            || config.tl_y >= config.br_y
        {
            return Err(DriverStatus::Invalid);
        }
        if !caps.resolution.allows(config.resolution) {
            return Err(DriverStatus::Invalid);
        }
        if !caps.modes.iter().any(|m| m.eq_ignore_ascii_case(&config.mode)) {
            return Err(DriverStatus::Invalid);
        }
        if let Some(source) = &config.source {
            if !caps.sources.iter().any(|s| s == source) {
                return Err(DriverStatus::Invalid);
            }
        }
        Ok(())
    }
}

/// Byte `offset` of the test pattern for a frame with the given layout.
/// Lineart frames are packed eight pixels to a byte and alternate whole
/// bytes of black and white. Bytes past the end of the frame (overrun) are
/// `0xAA`.
fn pattern_byte(params: &ScanParameters, lineart: bool, frame_len: usize, offset: usize) -> u8 {
    if offset >= frame_len {
        return 0xAA;
    }
    let bytes_per_line = params.bytes_per_line.max(1) as usize;
    let row = offset / bytes_per_line;
    let column = offset % bytes_per_line;
    if lineart {
        if (row / 4 + column) % 2 == 0 { 0x00 } else { 0xFF }
    } else {
        ((row * 3 + column) % 256) as u8
    }
}

/// The complete frame a simulated device delivers for `params`.
pub fn test_pattern(params: &ScanParameters, lineart: bool) -> Vec<u8> {
    let frame_len = (params.bytes_per_line.max(0) as usize) * (params.lines.max(0) as usize);
    (0..frame_len)
        .map(|offset| pattern_byte(params, lineart, frame_len, offset))
        .collect()
}

impl DeviceConnection for SimulatedConnection {
    fn device_name(&self) -> &str {
        &self.device.name
    }

    fn query_capabilities(&mut self) -> DriverResult<RawCapabilities> {
        if self.is_unplugged() {
            return Err(DriverStatus::Disconnected);
        }
        lock(&self.shared).stats.capability_queries += 1;
        let mut caps = self.device.capabilities.clone();
        if self.device.fault == Some(Fault::MalformedCapabilities) {
            caps.tl_x.min = caps.tl_x.max + 10.0;
        }
        Ok(caps)
    }

    fn current_configuration(&mut self) -> DriverResult<RawConfiguration> {
        if self.is_unplugged() {
            return Err(DriverStatus::Disconnected);
        }
        Ok(self.config.clone())
    }

    fn apply_configuration(&mut self, config: &RawConfiguration) -> DriverResult<()> {
        if self.is_unplugged() {
            return Err(DriverStatus::Disconnected);
        }
        if self.frame.as_ref().is_some_and(|f| !f.finished) {
            return Err(DriverStatus::DeviceBusy);
        }
        self.check_configuration(config)?;
        self.config = config.clone();
        lock(&self.shared).stats.configurations_applied += 1;
        debug!(device = %self.device.name, ?config, "simulated configuration applied");
        Ok(())
    }

    fn scan_status(&mut self) -> DriverResult<()> {
        if self.is_unplugged() {
            return Err(DriverStatus::Disconnected);
        }
        match self.device.hardware_status {
            Some(status) => Err(status),
            None => Ok(()),
        }
    }

    fn start_scan(&mut self) -> DriverResult<ScanParameters> {
        self.scan_status()?;
        if self.frame.as_ref().is_some_and(|f| !f.finished) {
            return Err(DriverStatus::DeviceBusy);
        }
        let params = self.frame_parameters();
        let frame_len = (params.bytes_per_line.max(0) as usize) * (params.lines.max(0) as usize);
        let overrun = match self.device.fault {
            Some(Fault::Overrun(extra)) => extra,
            _ => 0,
        };
        self.frame = Some(Frame {
            params,
            lineart: self.config.mode.eq_ignore_ascii_case("lineart"),
            frame_len,
            total_len: frame_len + overrun,
            delivered: 0,
            finished: false,
        });
        lock(&self.shared).stats.scans_started += 1;
        debug!(device = %self.device.name, ?params, "simulated scan started");
        Ok(params)
    }

    fn read_next_chunk(&mut self, buf: &mut [u8]) -> DriverResult<ReadOutcome> {
        let unplugged = self.is_unplugged();
        let Some(frame) = self.frame.as_mut() else {
            return Err(DriverStatus::Invalid);
        };
        if frame.finished {
            return Ok(ReadOutcome::EndOfData);
        }
        if unplugged {
            frame.finished = true;
            lock(&self.shared).stats.scans_ended += 1;
            return Err(DriverStatus::IoError);
        }
        if !self.device.chunk_delay.is_zero() {
            std::thread::sleep(self.device.chunk_delay);
        }

        let limit = match self.device.fault {
            Some(Fault::TruncateAfter(n) | Fault::StallAfter(n) | Fault::IoErrorAfter(n)) => {
                n.min(frame.total_len)
            }
            _ => frame.total_len,
        };
        if frame.delivered >= limit {
            let short = frame.delivered < frame.total_len;
            match self.device.fault {
                Some(Fault::StallAfter(_)) if short => return Ok(ReadOutcome::Data(0)),
                Some(Fault::IoErrorAfter(_)) if short => {
                    frame.finished = true;
                    lock(&self.shared).stats.scans_ended += 1;
                    return Err(DriverStatus::IoError);
                }
                _ => {
                    frame.finished = true;
                    lock(&self.shared).stats.scans_ended += 1;
                    return Ok(ReadOutcome::EndOfData);
                }
            }
        }

        let n = buf
            .len()
            .min(self.device.max_chunk)
            .min(limit - frame.delivered);
        for (i, byte) in buf[..n].iter_mut().enumerate() {
            *byte = pattern_byte(&frame.params, frame.lineart, frame.frame_len, frame.delivered + i);
        }
        frame.delivered += n;
        Ok(ReadOutcome::Data(n))
    }

    fn cancel_scan(&mut self) {
        let mut shared = lock(&self.shared);
        shared.stats.cancellations += 1;
        if let Some(frame) = self.frame.take() {
            if !frame.finished {
                shared.stats.scans_ended += 1;
            }
        }
        debug!(device = %self.device.name, "simulated scan cancelled");
    }

    fn close_device(self: Box<Self>) {
        let mut shared = lock(&self.shared);
        if self.frame.as_ref().is_some_and(|f| !f.finished) {
            shared.stats.scans_ended += 1;
        }
        shared.stats.closed += 1;
        debug!(device = %self.device.name, "simulated device closed");
    }
}
