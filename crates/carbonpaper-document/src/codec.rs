// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Raster encoding of pixel buffers using the `image` crate.

use std::io::Cursor;
use std::path::Path;

use carbonpaper_core::error::{Result, ScanError};
use carbonpaper_core::types::{ImageFormat, PixelBuffer};
use image::{DynamicImage, GrayImage, RgbImage};
use tracing::{debug, instrument};

/// JPEG quality used for scans.
const JPEG_QUALITY: u8 = 90;

/// Encodes finished scans into image file bytes.
pub trait ImageCodec: Send + Sync {
    /// Encode `buffer` as `format`.
    fn encode(&self, buffer: &PixelBuffer, format: ImageFormat) -> Result<Vec<u8>>;

    /// Write encoded bytes to `path`, replacing any existing file.
    fn write_file(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        std::fs::write(path, bytes)?;
        Ok(())
    }
}

/// Default codec backed by the `image` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct RasterCodec;

impl RasterCodec {
    // -- Conversion -----------------------------------------------------------

    /// Wrap a pixel buffer as a `DynamicImage` without re-encoding.
    pub fn to_dynamic(buffer: &PixelBuffer) -> Result<DynamicImage> {
        let (width, height) = (buffer.width(), buffer.height());
        let pixels = buffer.pixels().to_vec();
        let image = match buffer.bytes_per_pixel() {
            1 => GrayImage::from_raw(width, height, pixels).map(DynamicImage::ImageLuma8),
            3 => RgbImage::from_raw(width, height, pixels).map(DynamicImage::ImageRgb8),
            other => {
                return Err(ScanError::EncodingError(format!(
                    "unsupported pixel layout: {other} bytes per pixel"
                )));
            }
        };
        image.ok_or_else(|| {
            ScanError::EncodingError(format!(
                "pixel data does not fill a {width}x{height} image"
            ))
        })
    }

    /// Decode encoded image bytes back into a `DynamicImage`.
    pub fn decode(bytes: &[u8]) -> Result<DynamicImage> {
        image::load_from_memory(bytes)
            .map_err(|err| ScanError::EncodingError(format!("failed to decode image: {err}")))
    }
}

fn image_format(format: ImageFormat) -> image::ImageFormat {
    match format {
        ImageFormat::Png => image::ImageFormat::Png,
        ImageFormat::Jpeg => image::ImageFormat::Jpeg,
        ImageFormat::Tiff => image::ImageFormat::Tiff,
        ImageFormat::Bmp => image::ImageFormat::Bmp,
        ImageFormat::Pnm => image::ImageFormat::Pnm,
    }
}

impl ImageCodec for RasterCodec {
    #[instrument(skip(self, buffer), fields(width = buffer.width(), height = buffer.height()))]
    fn encode(&self, buffer: &PixelBuffer, format: ImageFormat) -> Result<Vec<u8>> {
        if buffer.width() == 0 || buffer.height() == 0 {
            return Err(ScanError::EncodingError("cannot encode an empty image".into()));
        }
        let image = Self::to_dynamic(buffer)?;

        let mut bytes = Vec::new();
        let written = match format {
            ImageFormat::Jpeg => {
                let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(
                    &mut bytes,
                    JPEG_QUALITY,
                );
                image.write_with_encoder(encoder)
            }
            other => image.write_to(&mut Cursor::new(&mut bytes), image_format(other)),
        };
        written.map_err(|err| {
            ScanError::EncodingError(format!("failed to encode {format:?}: {err}"))
        })?;

        debug!(?format, encoded_len = bytes.len(), "scan encoded");
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(width: u32, height: u32, bpp: u32) -> PixelBuffer {
        let len = (width * height * bpp) as usize;
        let pixels = (0..len).map(|i| (i % 256) as u8).collect();
        PixelBuffer::new(width, height, bpp, pixels).expect("buffer")
    }

    #[test]
    fn png_preserves_gray_pixels() {
        let buffer = gradient(100, 5, 1);
        let bytes = RasterCodec.encode(&buffer, ImageFormat::Png).expect("encode");
        assert_eq!(&bytes[..8], b"\x89PNG\r\n\x1a\n");
        let decoded = RasterCodec::decode(&bytes).expect("decode");
        assert_eq!(decoded.width(), 100);
        assert_eq!(decoded.height(), 5);
        assert_eq!(decoded.to_luma8().into_raw(), buffer.pixels());
    }

    #[test]
    fn png_preserves_rgb_pixels() {
        let buffer = gradient(16, 8, 3);
        let bytes = RasterCodec.encode(&buffer, ImageFormat::Png).expect("encode");
        let decoded = RasterCodec::decode(&bytes).expect("decode");
        assert_eq!(decoded.to_rgb8().into_raw(), buffer.pixels());
    }

    #[test]
    fn jpeg_has_expected_dimensions() {
        let buffer = gradient(32, 16, 3);
        let bytes = RasterCodec.encode(&buffer, ImageFormat::Jpeg).expect("encode");
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
        let decoded = RasterCodec::decode(&bytes).expect("decode");
        assert_eq!((decoded.width(), decoded.height()), (32, 16));
    }

    #[test]
    fn empty_image_is_an_encoding_error() {
        let buffer = PixelBuffer::new(0, 0, 1, Vec::new()).expect("buffer");
        match RasterCodec.encode(&buffer, ImageFormat::Png) {
            Err(ScanError::EncodingError(_)) => {}
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn write_file_reports_missing_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("missing").join("scan.png");
        match RasterCodec.write_file(&path, b"data") {
            Err(ScanError::Io(err)) => assert_eq!(err.kind(), std::io::ErrorKind::NotFound),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
