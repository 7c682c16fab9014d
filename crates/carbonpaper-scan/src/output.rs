// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Output adapter: hands a finished scan to the caller as a pixel buffer or
// persists it through the image codec.

use std::path::Path;
use std::sync::Arc;

use carbonpaper_core::error::{Result, ScanError};
use carbonpaper_core::types::{ImageFormat, PixelBuffer, ScanArtifact};
use carbonpaper_document::{ImageCodec, RasterCodec};
use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::{info, instrument};

use crate::session::{ScanSession, SessionState};

/// SHA-256 of `data` as lowercase hex.
pub fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Renders completed scan sessions.
#[derive(Clone)]
pub struct OutputAdapter {
    codec: Arc<dyn ImageCodec>,
    default_format: ImageFormat,
}

impl Default for OutputAdapter {
    fn default() -> Self {
        Self::new(Arc::new(RasterCodec), ImageFormat::Png)
    }
}

impl OutputAdapter {
    pub fn new(codec: Arc<dyn ImageCodec>, default_format: ImageFormat) -> Self {
        Self {
            codec,
            default_format,
        }
    }

    /// Format implied by the extension of `path`, else the default.
    pub fn format_for(&self, path: &Path) -> ImageFormat {
        ImageFormat::from_path(path).unwrap_or(self.default_format)
    }

    fn completed<'a>(&self, session: &'a ScanSession) -> Result<&'a PixelBuffer> {
        match (session.state(), session.result()) {
            (SessionState::Completed, Some(buffer)) => Ok(buffer),
            (state, _) => Err(ScanError::InvalidState {
                expected: "Completed",
                actual: state.to_string(),
            }),
        }
    }

    /// Copy of the finished frame. Can be called any number of times.
    pub fn to_buffer(&self, session: &ScanSession) -> Result<PixelBuffer> {
        self.completed(session).cloned()
    }

    /// Encode the finished frame as `format` and write it to `path`.
    #[instrument(skip(self, session), fields(session = %session.id(), path = %path.display()))]
    pub fn to_file(
        &self,
        session: &ScanSession,
        path: &Path,
        format: ImageFormat,
    ) -> Result<ScanArtifact> {
        let buffer = self.completed(session)?;
        let bytes = self.codec.encode(buffer, format)?;
        self.codec.write_file(path, &bytes)?;

        let artifact = ScanArtifact {
            path: path.to_path_buf(),
            format,
            width: buffer.width(),
            height: buffer.height(),
            bytes_written: bytes.len() as u64,
            sha256: hash_bytes(&bytes),
            created_at: Utc::now(),
        };
        info!(
            ?format,
            bytes_written = artifact.bytes_written,
            sha256 = %artifact.sha256,
            "scan written"
        );
        Ok(artifact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carbonpaper_core::configuration::ProposedConfiguration;
    use carbonpaper_core::error::ErrorKind;
    use carbonpaper_core::types::ColorMode;
    use carbonpaper_driver::{SimulatedDevice, SimulatedDriver};

    use crate::registry::DeviceRegistry;
    use crate::session::{ScanControl, ScanSettings};

    struct BrokenCodec;

    impl ImageCodec for BrokenCodec {
        fn encode(&self, _buffer: &PixelBuffer, format: ImageFormat) -> Result<Vec<u8>> {
            Err(ScanError::EncodingError(format!("{format:?} encoder missing")))
        }
    }

    fn completed_session() -> ScanSession {
        let driver = SimulatedDriver::new(vec![SimulatedDevice::pixel_bed(
            "bed",
            100.0,
            100.0,
            vec![75],
            &["Gray"],
        )]);
        let registry = DeviceRegistry::new(Arc::new(driver), ScanSettings::default());
        let handle = registry.list_devices().remove(0);
        let device = registry.open(&handle).expect("open");
        device
            .set_configuration(&ProposedConfiguration {
                from_x: 0.0,
                from_y: 0.0,
                to_x: 100.0,
                to_y: 5.0,
                resolution_dpi: 75,
                color_mode: ColorMode::Gray,
                source: None,
            })
            .expect("set");
        device.scan().expect("scan")
    }

    #[test]
    fn buffer_is_repeatable() {
        let session = completed_session();
        let adapter = OutputAdapter::default();
        let first = adapter.to_buffer(&session).expect("buffer");
        let second = adapter.to_buffer(&session).expect("buffer");
        assert_eq!(first, second);
        assert_eq!(first.pixels().len(), 500);
    }

    #[test]
    fn unfinished_session_is_invalid_state() {
        let session = ScanSession::new(ScanControl::default(), ScanSettings::default());
        match OutputAdapter::default().to_buffer(&session).unwrap_err() {
            ScanError::InvalidState { expected, actual } => {
                assert_eq!(expected, "Completed");
                assert_eq!(actual, "Idle");
            }
            other => panic!("unexpected error variant: {other}"),
        }
    }

    #[test]
    fn file_artifact_matches_written_bytes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("strip.png");
        let session = completed_session();
        let adapter = OutputAdapter::default();

        let artifact = adapter
            .to_file(&session, &path, adapter.format_for(&path))
            .expect("to_file");
        let written = std::fs::read(&path).expect("read back");
        assert_eq!(artifact.format, ImageFormat::Png);
        assert_eq!((artifact.width, artifact.height), (100, 5));
        assert_eq!(artifact.bytes_written, written.len() as u64);
        assert_eq!(artifact.sha256, hash_bytes(&written));
    }

    #[test]
    fn unknown_extension_uses_default_format() {
        let adapter = OutputAdapter::new(Arc::new(RasterCodec), ImageFormat::Tiff);
        assert_eq!(adapter.format_for(Path::new("scan.dat")), ImageFormat::Tiff);
        assert_eq!(adapter.format_for(Path::new("scan.JPG")), ImageFormat::Jpeg);
    }

    #[test]
    fn codec_failure_is_an_encoding_error_and_writes_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("strip.png");
        let adapter = OutputAdapter::new(Arc::new(BrokenCodec), ImageFormat::Png);
        let err = adapter
            .to_file(&completed_session(), &path, ImageFormat::Png)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EncodingError);
        assert!(!path.exists());
    }

    #[test]
    fn digest_is_lowercase_hex() {
        assert_eq!(
            hash_bytes(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
