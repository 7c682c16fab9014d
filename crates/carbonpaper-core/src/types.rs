// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the Carbonpaper scanner layer.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, ScanError};

/// Unique identifier for an enumerated scanner device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceId(pub Uuid);

impl DeviceId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for DeviceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for one scan session (used for log correlation).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque reference to a scanner found during enumeration.
///
/// Handles are immutable. A handle whose device has gone away stays
/// constructible but fails with `DeviceUnavailable` when opened.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceHandle {
    id: DeviceId,
    name: String,
    vendor: String,
    model: String,
}

impl DeviceHandle {
    pub fn new(
        id: DeviceId,
        name: impl Into<String>,
        vendor: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            vendor: vendor.into(),
            model: model.into(),
        }
    }

    pub fn id(&self) -> DeviceId {
        self.id
    }

    /// Driver-level device name (e.g. `"pixma:04A91912_10.0.0.7"`).
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn vendor(&self) -> &str {
        &self.vendor
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Human-readable descriptor: `name (vendor / model)`.
    pub fn descriptor(&self) -> String {
        format!("{} ({} / {})", self.name, self.vendor, self.model)
    }
}

impl std::fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.descriptor())
    }
}

/// Normalised scan color modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ColorMode {
    /// Scanned at one bit per pixel, unpacked to 0 (black) and 255 (white).
    Lineart,
    Gray,
    Color,
}

impl ColorMode {
    /// Parse a driver-reported mode name. Returns `None` for names we do not
    /// recognise (halftone variants, vendor specials).
    pub fn from_driver_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "color" | "colour" | "rgb" | "24bit color" => Some(Self::Color),
            "gray" | "grey" | "grayscale" | "greyscale" | "true gray" => Some(Self::Gray),
            "lineart" | "binary" | "black & white" | "black and white" => Some(Self::Lineart),
            _ => None,
        }
    }

    /// Canonical name passed back to drivers.
    pub fn driver_name(&self) -> &'static str {
        match self {
            Self::Lineart => "Lineart",
            Self::Gray => "Gray",
            Self::Color => "Color",
        }
    }

    /// Bytes per pixel in a finished [`PixelBuffer`].
    pub fn bytes_per_pixel(&self) -> u32 {
        match self {
            Self::Lineart | Self::Gray => 1,
            Self::Color => 3,
        }
    }
}

impl std::fmt::Display for ColorMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.driver_name())
    }
}

/// Unit of the geometry values a device reports and accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GeometryUnit {
    Millimetre,
    Pixel,
}

/// Decoded, dimensioned raw image produced by a completed scan.
///
/// The pixel vector always holds exactly `width * height * bytes_per_pixel`
/// bytes in row-major order.
#[derive(Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    bytes_per_pixel: u32,
    pixels: Vec<u8>,
}

impl PixelBuffer {
    /// Wrap `pixels`, refusing a vector whose length does not match the
    /// declared dimensions.
    pub fn new(width: u32, height: u32, bytes_per_pixel: u32, pixels: Vec<u8>) -> Result<Self> {
        let expected = Self::byte_len(width, height, bytes_per_pixel);
        if pixels.len() as u64 != expected {
            return Err(ScanError::IncompleteScan {
                expected,
                received: pixels.len() as u64,
            });
        }
        Ok(Self {
            width,
            height,
            bytes_per_pixel,
            pixels,
        })
    }

    /// Number of bytes a buffer of these dimensions holds.
    pub fn byte_len(width: u32, height: u32, bytes_per_pixel: u32) -> u64 {
        width as u64 * height as u64 * bytes_per_pixel as u64
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn bytes_per_pixel(&self) -> u32 {
        self.bytes_per_pixel
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Bytes in one row.
    pub fn stride(&self) -> usize {
        self.width as usize * self.bytes_per_pixel as usize
    }

    /// Borrow row `y`, or `None` past the last row.
    pub fn row(&self, y: u32) -> Option<&[u8]> {
        if y >= self.height {
            return None;
        }
        let start = y as usize * self.stride();
        Some(&self.pixels[start..start + self.stride()])
    }

    pub fn into_pixels(self) -> Vec<u8> {
        self.pixels
    }
}

impl std::fmt::Debug for PixelBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PixelBuffer")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes_per_pixel", &self.bytes_per_pixel)
            .field("pixels", &format_args!("[{} bytes]", self.pixels.len()))
            .finish()
    }
}

/// File formats the output adapter can ask the codec for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageFormat {
    Png,
    Jpeg,
    Tiff,
    Bmp,
    Pnm,
}

impl ImageFormat {
    /// Infer the format from a file extension.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "png" => Some(Self::Png),
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "tif" | "tiff" => Some(Self::Tiff),
            "bmp" => Some(Self::Bmp),
            "pnm" | "pgm" | "ppm" => Some(Self::Pnm),
            _ => None,
        }
    }

    /// Infer the format from a path, if it has a known extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
    }
}

/// A scan persisted to disk by the output adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanArtifact {
    pub path: PathBuf,
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
    pub bytes_written: u64,
    /// SHA-256 of the written file, lowercase hex.
    pub sha256: String,
    pub created_at: DateTime<Utc>,
}
