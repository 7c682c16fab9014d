// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Platform-agnostic driver interface.
//
// Values here are deliberately raw: geometry ranges as the device reports
// them, resolution constraints as either a word list or a range, mode names
// as free-form strings, and failures as `DriverStatus` codes. Normalising
// them is the scanner layer's job.

use thiserror::Error;

/// Result of every driver call.
pub type DriverResult<T> = std::result::Result<T, DriverStatus>;

/// Status codes a driver can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DriverStatus {
    #[error("operation not supported")]
    Unsupported,
    #[error("operation was cancelled")]
    Cancelled,
    #[error("device busy")]
    DeviceBusy,
    #[error("invalid argument")]
    Invalid,
    #[error("end of data")]
    Eof,
    #[error("document feeder jammed")]
    Jammed,
    #[error("no documents in feeder")]
    NoDocs,
    #[error("scanner cover open")]
    CoverOpen,
    #[error("error during device I/O")]
    IoError,
    #[error("out of memory")]
    NoMem,
    #[error("access denied")]
    AccessDenied,
    #[error("device not connected")]
    Disconnected,
}

impl DriverStatus {
    /// Numeric code as used on the wire by SANE-style backends (0 is "good").
    pub fn code(&self) -> i32 {
        match self {
            Self::Unsupported => 1,
            Self::Cancelled => 2,
            Self::DeviceBusy => 3,
            Self::Invalid => 4,
            Self::Eof => 5,
            Self::Jammed => 6,
            Self::NoDocs => 7,
            Self::CoverOpen => 8,
            Self::IoError => 9,
            Self::NoMem => 10,
            Self::AccessDenied => 11,
            Self::Disconnected => 12,
        }
    }
}

/// A device as listed by the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDevice {
    /// Unique driver-level name, used to open the device.
    pub name: String,
    pub vendor: String,
    pub model: String,
    /// Device type string ("flatbed scanner", "sheetfed scanner", ...).
    pub kind: String,
}

/// Unit of geometry options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawUnit {
    Millimetre,
    Pixel,
}

/// Numeric option range. `quant == 0` means continuous.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OptionRange {
    pub min: f64,
    pub max: f64,
    pub quant: f64,
}

/// How a device constrains its resolution option.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionConstraint {
    /// Discrete list of values.
    List(Vec<i32>),
    /// Every `quant` step between `min` and `max`; `quant == 0` means any
    /// integer value in the range.
    Range { min: i32, max: i32, quant: i32 },
}

impl ResolutionConstraint {
    /// Whether `dpi` satisfies the constraint.
    pub fn allows(&self, dpi: i32) -> bool {
        match self {
            Self::List(values) => values.contains(&dpi),
            Self::Range { min, max, quant } => {
                dpi >= *min && dpi <= *max && (*quant <= 0 || (dpi - min) % quant == 0)
            }
        }
    }
}

/// Capability options as the driver reports them.
#[derive(Debug, Clone, PartialEq)]
pub struct RawCapabilities {
    pub unit: RawUnit,
    /// Top-left x option range.
    pub tl_x: OptionRange,
    pub tl_y: OptionRange,
    /// Bottom-right x option range.
    pub br_x: OptionRange,
    pub br_y: OptionRange,
    pub resolution: ResolutionConstraint,
    pub sources: Vec<String>,
    pub modes: Vec<String>,
}

/// Option values applied to (or read back from) a device.
#[derive(Debug, Clone, PartialEq)]
pub struct RawConfiguration {
    pub tl_x: f64,
    pub tl_y: f64,
    pub br_x: f64,
    pub br_y: f64,
    pub resolution: i32,
    pub mode: String,
    /// `None` leaves the device's current source untouched.
    pub source: Option<String>,
}

/// Pixel layout of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameFormat {
    Gray,
    Rgb,
}

/// Frame parameters reported once a scan has started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanParameters {
    pub format: FrameFormat,
    pub pixels_per_line: i32,
    /// Number of lines, or -1 when the device cannot know in advance.
    pub lines: i32,
    pub bytes_per_line: i32,
    /// Bits per sample.
    pub depth: i32,
}

/// Outcome of one chunk read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// This many bytes were written to the front of the buffer. Zero means
    /// nothing was ready yet.
    Data(usize),
    /// The frame is complete; no further data follows.
    EndOfData,
}

/// Entry point of a scanner driver.
pub trait ScannerDriver: Send + Sync {
    /// Human-readable driver name (e.g. "sane 1.2", "simulated").
    fn driver_name(&self) -> &str;

    /// Enumerate devices currently attached.
    fn list_devices(&self) -> DriverResult<Vec<RawDevice>>;

    /// Open a device by its driver-level name.
    fn open_device(&self, name: &str) -> DriverResult<Box<dyn DeviceConnection>>;
}

/// One open connection to a device.
///
/// Calls on a connection are sequential; the scanner layer never shares one
/// between threads without exclusive access.
pub trait DeviceConnection: Send {
    fn device_name(&self) -> &str;

    /// Read the option descriptors describing what the device supports.
    fn query_capabilities(&mut self) -> DriverResult<RawCapabilities>;

    /// Read the option values currently set on the device.
    fn current_configuration(&mut self) -> DriverResult<RawConfiguration>;

    /// Set the option values for the next scan.
    fn apply_configuration(&mut self, config: &RawConfiguration) -> DriverResult<()>;

    /// Current hardware condition (cover, feeder, connection).
    fn scan_status(&mut self) -> DriverResult<()>;

    /// Start acquiring a frame with the applied configuration.
    fn start_scan(&mut self) -> DriverResult<ScanParameters>;

    /// Block until the next chunk of frame bytes, end-of-data, or an error.
    fn read_next_chunk(&mut self, buf: &mut [u8]) -> DriverResult<ReadOutcome>;

    /// Abort the running frame. Harmless when nothing is running.
    fn cancel_scan(&mut self);

    /// Release the device.
    fn close_device(self: Box<Self>);
}
