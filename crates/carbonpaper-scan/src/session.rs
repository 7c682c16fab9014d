// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scan session state machine.
//
//   Idle ──configure──▶ Configured ──run──▶ Scanning ──▶ Completed
//                                               │
//                                               └──────▶ Failed(kind)
//
// A `ScanSession` drives exactly one frame. It applies the validated
// configuration, starts the driver, and pulls chunks into a buffer until
// the driver signals end-of-data. Chunks need not be row-aligned. Anything
// other than a clean end-of-data with exactly the announced frame size
// fails the session and discards the partial data.
//
// Progress is published through `ScanControl`, which can be read (and the
// scan cancelled) from other threads without touching the session itself.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use carbonpaper_core::config::ScannerConfig;
use carbonpaper_core::configuration::ValidatedConfiguration;
use carbonpaper_core::error::{ErrorKind, Result, ScanError};
use carbonpaper_core::types::{PixelBuffer, SessionId};
use carbonpaper_driver::{DeviceConnection, FrameFormat, ReadOutcome, ScanParameters};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::capabilities::to_raw;
use crate::status::from_driver;

// -- State --------------------------------------------------------------------

/// Where a scan session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Idle,
    Configured,
    Scanning,
    Completed,
    Failed(ErrorKind),
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed(_))
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => f.write_str("Idle"),
            Self::Configured => f.write_str("Configured"),
            Self::Scanning => f.write_str("Scanning"),
            Self::Completed => f.write_str("Completed"),
            Self::Failed(kind) => write!(f, "Failed({kind})"),
        }
    }
}

/// Snapshot of scan progress.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanStatus {
    /// Scan this snapshot belongs to; `None` before the first scan.
    pub session_id: Option<SessionId>,
    pub state: SessionState,
    pub bytes_received: u64,
    /// Frame size in bytes, known once the driver has started.
    pub expected_bytes: u64,
    pub rows_completed: u32,
    pub updated_at: DateTime<Utc>,
}

impl Default for ScanStatus {
    fn default() -> Self {
        Self {
            session_id: None,
            state: SessionState::Idle,
            bytes_received: 0,
            expected_bytes: 0,
            rows_completed: 0,
            updated_at: Utc::now(),
        }
    }
}

impl ScanStatus {
    /// Completion in `0.0..=1.0`; zero while the frame size is unknown.
    pub fn fraction_complete(&self) -> f64 {
        if self.expected_bytes == 0 {
            0.0
        } else {
            self.bytes_received as f64 / self.expected_bytes as f64
        }
    }
}

/// Cancellation flag and progress shared between a device session and
/// whoever observes it.
#[derive(Debug, Clone, Default)]
pub struct ScanControl {
    cancel: Arc<AtomicBool>,
    status: Arc<Mutex<ScanStatus>>,
}

impl ScanControl {
    /// Ask the running scan to stop. Takes effect at the next chunk boundary.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> ScanStatus {
        match self.status.lock() {
            Ok(status) => status.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn reset_cancel(&self) {
        self.cancel.store(false, Ordering::SeqCst);
    }

    fn publish(&self, update: impl FnOnce(&mut ScanStatus)) {
        let mut status = match self.status.lock() {
            Ok(status) => status,
            Err(poisoned) => poisoned.into_inner(),
        };
        update(&mut status);
        status.updated_at = Utc::now();
    }
}

/// Tunables for the chunk loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanSettings {
    /// Size of the buffer handed to each driver read.
    pub chunk_size: usize,
    /// Consecutive empty reads tolerated before the frame is declared stalled.
    pub max_stalled_reads: u32,
    /// Largest frame accepted from the driver, in bytes.
    pub max_frame_bytes: u64,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self::from(&ScannerConfig::default())
    }
}

impl From<&ScannerConfig> for ScanSettings {
    fn from(config: &ScannerConfig) -> Self {
        Self {
            chunk_size: config.chunk_size.max(1),
            max_stalled_reads: config.max_stalled_reads.max(1),
            max_frame_bytes: config.max_frame_bytes,
        }
    }
}

// -- Frame layout -------------------------------------------------------------

/// Dimensions of the frame the driver is about to deliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLayout {
    pub width: u32,
    pub height: u32,
    /// Bytes per pixel in the finished buffer.
    pub bytes_per_pixel: u32,
    /// Bytes per line as the driver sends them.
    pub line_bytes: u64,
    /// One bit per pixel, most significant bit first, 1 = black.
    pub packed: bool,
}

fn allocation_error(bytes: u64) -> ScanError {
    ScanError::ProtocolError(format!("frame of {bytes} bytes does not fit in memory"))
}

impl FrameLayout {
    /// Derive the layout from driver scan parameters, refusing anything a
    /// `PixelBuffer` cannot hold.
    pub fn from_parameters(params: &ScanParameters) -> Result<Self> {
        let (bytes_per_pixel, packed) = match (params.format, params.depth) {
            (FrameFormat::Gray, 1) => (1, true),
            (FrameFormat::Gray, 8) => (1, false),
            (FrameFormat::Rgb, 8) => (3, false),
            (format, depth) => {
                return Err(ScanError::ProtocolError(format!(
                    "unsupported frame: {format:?} at {depth} bits per sample"
                )));
            }
        };
        let width = u32::try_from(params.pixels_per_line)
            .ok()
            .filter(|&w| w > 0)
            .ok_or_else(|| {
                ScanError::ProtocolError(format!(
                    "invalid line width: {} pixels",
                    params.pixels_per_line
                ))
            })?;
        let height = u32::try_from(params.lines)
            .ok()
            .filter(|&h| h > 0)
            .ok_or_else(|| {
                ScanError::ProtocolError(format!("invalid line count: {}", params.lines))
            })?;
        let line_bytes = if packed {
            u64::from(width).div_ceil(8)
        } else {
            u64::from(width) * u64::from(bytes_per_pixel)
        };
        if i64::from(params.bytes_per_line) != line_bytes as i64 {
            return Err(ScanError::ProtocolError(format!(
                "bytes per line {} does not match {width} pixels ({line_bytes} bytes expected)",
                params.bytes_per_line
            )));
        }
        Ok(Self {
            width,
            height,
            bytes_per_pixel,
            line_bytes,
            packed,
        })
    }

    /// Bytes the driver sends per line.
    pub fn stride(&self) -> u64 {
        self.line_bytes
    }

    /// Bytes the driver sends for the whole frame.
    pub fn wire_len(&self) -> u64 {
        self.line_bytes * u64::from(self.height)
    }

    /// Bytes in the finished `PixelBuffer`.
    pub fn byte_len(&self) -> u64 {
        PixelBuffer::byte_len(self.width, self.height, self.bytes_per_pixel)
    }

    /// Turn the frame as delivered into buffer pixels. Packed lineart
    /// becomes one byte per pixel: 0 for black, 255 for white.
    pub fn unpack(&self, wire: Vec<u8>) -> Result<Vec<u8>> {
        if !self.packed {
            return Ok(wire);
        }
        let total = self.byte_len();
        let len = usize::try_from(total).map_err(|_| allocation_error(total))?;
        let mut pixels = Vec::new();
        pixels
            .try_reserve_exact(len)
            .map_err(|_| allocation_error(total))?;
        let stride = self.line_bytes as usize;
        for line in wire.chunks_exact(stride) {
            for x in 0..self.width as usize {
                let bit = (line[x / 8] >> (7 - x % 8)) & 1;
                pixels.push(if bit == 1 { 0 } else { 255 });
            }
        }
        Ok(pixels)
    }
}

// -- Session ------------------------------------------------------------------

/// One scan, from configuration to a finished (or failed) frame.
pub struct ScanSession {
    id: SessionId,
    state: SessionState,
    configuration: Option<ValidatedConfiguration>,
    result: Option<PixelBuffer>,
    control: ScanControl,
    settings: ScanSettings,
}

impl ScanSession {
    pub fn new(control: ScanControl, settings: ScanSettings) -> Self {
        let id = SessionId::new();
        control.publish(|status| {
            *status = ScanStatus {
                session_id: Some(id),
                ..ScanStatus::default()
            };
        });
        Self {
            id,
            state: SessionState::Idle,
            configuration: None,
            result: None,
            control,
            settings,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn configuration(&self) -> Option<&ValidatedConfiguration> {
        self.configuration.as_ref()
    }

    /// Finished frame; present only in `Completed`.
    pub fn result(&self) -> Option<&PixelBuffer> {
        self.result.as_ref()
    }

    pub fn into_result(self) -> Option<PixelBuffer> {
        self.result
    }

    /// Apply `config` to the driver. Clears any earlier cancel request.
    #[instrument(skip_all, fields(session = %self.id, dpi = config.resolution_dpi()))]
    pub fn configure(
        &mut self,
        conn: &mut dyn DeviceConnection,
        config: ValidatedConfiguration,
    ) -> Result<()> {
        if !matches!(self.state, SessionState::Idle | SessionState::Configured) {
            return Err(self.invalid_state("Idle or Configured"));
        }
        self.control.reset_cancel();
        if let Err(status) = conn.apply_configuration(&to_raw(&config)) {
            return self.fail(from_driver("apply_configuration", status));
        }
        self.configuration = Some(config);
        self.transition(SessionState::Configured);
        Ok(())
    }

    /// Acquire the frame. Blocks until the driver finishes, fails, or the
    /// scan is cancelled through the shared `ScanControl`.
    #[instrument(skip_all, fields(session = %self.id))]
    pub fn run(&mut self, conn: &mut dyn DeviceConnection) -> Result<()> {
        if self.state != SessionState::Configured {
            return Err(self.invalid_state("Configured"));
        }
        if let Err(status) = conn.scan_status() {
            return self.fail(from_driver("scan_status", status));
        }
        if self.control.is_cancel_requested() {
            return self.fail(ScanError::Cancelled);
        }

        self.transition(SessionState::Scanning);
        let params = match conn.start_scan() {
            Ok(params) => params,
            Err(status) => {
                conn.cancel_scan();
                return self.fail(from_driver("start_scan", status));
            }
        };
        let layout = match FrameLayout::from_parameters(&params) {
            Ok(layout) => layout,
            Err(err) => {
                conn.cancel_scan();
                return self.fail(err);
            }
        };
        let expected = layout.wire_len();
        let largest = expected.max(layout.byte_len());
        if largest > self.settings.max_frame_bytes {
            conn.cancel_scan();
            return self.fail(ScanError::ProtocolError(format!(
                "driver announced a {}x{} frame of {largest} bytes, over the {} byte limit",
                layout.width, layout.height, self.settings.max_frame_bytes
            )));
        }
        info!(
            width = layout.width,
            height = layout.height,
            bytes_per_pixel = layout.bytes_per_pixel,
            packed = layout.packed,
            expected_bytes = expected,
            "frame started"
        );
        self.control.publish(|status| status.expected_bytes = expected);

        match self
            .pull_frame(conn, layout)
            .and_then(|wire| layout.unpack(wire))
        {
            Ok(pixels) => {
                let buffer = match PixelBuffer::new(
                    layout.width,
                    layout.height,
                    layout.bytes_per_pixel,
                    pixels,
                ) {
                    Ok(buffer) => buffer,
                    Err(err) => return self.fail(err),
                };
                self.result = Some(buffer);
                self.transition(SessionState::Completed);
                Ok(())
            }
            Err(err) => {
                conn.cancel_scan();
                self.fail(err)
            }
        }
    }

    fn pull_frame(&self, conn: &mut dyn DeviceConnection, layout: FrameLayout) -> Result<Vec<u8>> {
        let expected = layout.wire_len();
        let stride = layout.stride().max(1);
        let capacity = usize::try_from(expected).map_err(|_| allocation_error(expected))?;
        let mut pixels = Vec::new();
        pixels
            .try_reserve_exact(capacity)
            .map_err(|_| allocation_error(expected))?;
        let mut chunk = vec![0u8; self.settings.chunk_size.max(1)];
        let mut stalled_reads = 0u32;

        loop {
            if self.control.is_cancel_requested() {
                info!(bytes_received = pixels.len(), "scan cancelled");
                return Err(ScanError::Cancelled);
            }
            match conn.read_next_chunk(&mut chunk) {
                Ok(ReadOutcome::Data(0)) => {
                    stalled_reads += 1;
                    if stalled_reads >= self.settings.max_stalled_reads {
                        warn!(stalled_reads, bytes_received = pixels.len(), "driver stalled");
                        if let Err(status) = conn.scan_status() {
                            return Err(from_driver("scan_status", status));
                        }
                        return Err(ScanError::IncompleteScan {
                            expected,
                            received: pixels.len() as u64,
                        });
                    }
                }
                Ok(ReadOutcome::Data(n)) if n > chunk.len() => {
                    return Err(ScanError::ProtocolError(format!(
                        "driver reported {n} bytes for a {} byte chunk",
                        chunk.len()
                    )));
                }
                Ok(ReadOutcome::Data(n)) => {
                    stalled_reads = 0;
                    let received = (pixels.len() + n) as u64;
                    if received > expected {
                        warn!(expected, received, "driver sent more data than the frame holds");
                        return Err(ScanError::IncompleteScan { expected, received });
                    }
                    pixels.extend_from_slice(&chunk[..n]);
                    let rows = (received / stride) as u32;
                    self.control.publish(|status| {
                        status.bytes_received = received;
                        status.rows_completed = rows;
                    });
                }
                Ok(ReadOutcome::EndOfData) => break,
                Err(status) => return Err(from_driver("read_next_chunk", status)),
            }
        }

        if pixels.len() as u64 != expected {
            warn!(expected, received = pixels.len(), "frame ended early");
            return Err(ScanError::IncompleteScan {
                expected,
                received: pixels.len() as u64,
            });
        }
        debug!(bytes = pixels.len(), "frame complete");
        Ok(pixels)
    }

    // -- Transitions ------------------------------------------------------------

    fn transition(&mut self, next: SessionState) {
        info!(session = %self.id, from = %self.state, to = %next, "scan session transition");
        self.state = next;
        self.control.publish(|status| status.state = next);
    }

    fn fail<T>(&mut self, err: ScanError) -> Result<T> {
        warn!(session = %self.id, error = %err, "scan session failed");
        self.result = None;
        self.transition(SessionState::Failed(err.kind()));
        Err(err)
    }

    fn invalid_state(&self, expected: &'static str) -> ScanError {
        ScanError::InvalidState {
            expected,
            actual: self.state.to_string(),
        }
    }
}

impl std::fmt::Debug for ScanSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanSession")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("has_result", &self.result.is_some())
            .finish()
    }
}
