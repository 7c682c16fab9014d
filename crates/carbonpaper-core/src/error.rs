// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Carbonpaper.
//
// Driver status codes never appear here: they are mapped into this taxonomy
// at the driver boundary (see `carbonpaper_scan::status`).

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::ColorMode;

/// Reasons a proposed configuration is rejected by the validator.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("scan region ({from_x}, {from_y})-({to_x}, {to_y}) is empty or outside the device bounds")]
    OutOfBounds {
        from_x: f64,
        from_y: f64,
        to_x: f64,
        to_y: f64,
    },

    #[error("resolution {requested} dpi is not supported (supported: {supported:?})")]
    UnsupportedResolution { requested: u32, supported: Vec<u32> },

    #[error("color mode {requested} is not supported (supported: {supported:?})")]
    UnsupportedColorMode {
        requested: ColorMode,
        supported: Vec<ColorMode>,
    },

    #[error("scan source {requested:?} is not supported (supported: {supported:?})")]
    UnsupportedSource {
        requested: String,
        supported: Vec<String>,
    },
}

/// Top-level error type for all Carbonpaper operations.
#[derive(Debug, Error)]
pub enum ScanError {
    // -- Device --
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("driver protocol error: {0}")]
    ProtocolError(String),

    // -- Configuration --
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    // -- Session --
    #[error("device session is busy with another operation")]
    SessionBusy,

    #[error("invalid session state: expected {expected}, found {actual}")]
    InvalidState {
        expected: &'static str,
        actual: String,
    },

    #[error("incomplete scan: expected {expected} bytes, received {received}")]
    IncompleteScan { expected: u64, received: u64 },

    #[error("scan cancelled")]
    Cancelled,

    // -- Output --
    #[error("image encoding failed: {0}")]
    EncodingError(String),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, ScanError>;

/// Flat, copyable discriminant of a [`ScanError`].
///
/// Carried by `SessionState::Failed` so a failed session can be inspected
/// without holding on to the (non-`Clone`) error value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    DeviceUnavailable,
    ProtocolError,
    OutOfBounds,
    UnsupportedResolution,
    UnsupportedColorMode,
    UnsupportedSource,
    SessionBusy,
    InvalidState,
    IncompleteScan,
    Cancelled,
    EncodingError,
    Io,
    Serialization,
}

/// How a caller should react to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorClass {
    /// Another operation holds the device; retry once it finishes.
    Transient,
    /// The caller must change something (configuration, cabling, lid).
    UserAction,
    /// Retrying the same request will fail the same way.
    Permanent,
    /// Explicit abort; not an application error.
    Cancelled,
}

impl ErrorKind {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::SessionBusy => ErrorClass::Transient,
            Self::DeviceUnavailable
            | Self::OutOfBounds
            | Self::UnsupportedResolution
            | Self::UnsupportedColorMode
            | Self::UnsupportedSource => ErrorClass::UserAction,
            Self::ProtocolError
            | Self::InvalidState
            | Self::IncompleteScan
            | Self::EncodingError
            | Self::Io
            | Self::Serialization => ErrorClass::Permanent,
            Self::Cancelled => ErrorClass::Cancelled,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

impl ConfigError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::OutOfBounds { .. } => ErrorKind::OutOfBounds,
            Self::UnsupportedResolution { .. } => ErrorKind::UnsupportedResolution,
            Self::UnsupportedColorMode { .. } => ErrorKind::UnsupportedColorMode,
            Self::UnsupportedSource { .. } => ErrorKind::UnsupportedSource,
        }
    }
}

impl ScanError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::DeviceUnavailable(_) => ErrorKind::DeviceUnavailable,
            Self::ProtocolError(_) => ErrorKind::ProtocolError,
            Self::Config(err) => err.kind(),
            Self::SessionBusy => ErrorKind::SessionBusy,
            Self::InvalidState { .. } => ErrorKind::InvalidState,
            Self::IncompleteScan { .. } => ErrorKind::IncompleteScan,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::EncodingError(_) => ErrorKind::EncodingError,
            Self::Io(_) => ErrorKind::Io,
            Self::Serialization(_) => ErrorKind::Serialization,
        }
    }

    /// Whether retrying the same call later may succeed without changes.
    pub fn is_retriable(&self) -> bool {
        self.kind().class() == ErrorClass::Transient
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_need_user_action() {
        let err = ScanError::from(ConfigError::UnsupportedResolution {
            requested: 200,
            supported: vec![75, 150, 300],
        });
        assert_eq!(err.kind(), ErrorKind::UnsupportedResolution);
        assert_eq!(err.kind().class(), ErrorClass::UserAction);
        assert!(!err.is_retriable());
    }

    #[test]
    fn busy_is_transient() {
        assert!(ScanError::SessionBusy.is_retriable());
    }

    #[test]
    fn cancellation_is_not_an_error_class() {
        assert_eq!(ScanError::Cancelled.kind().class(), ErrorClass::Cancelled);
    }

    #[test]
    fn io_errors_convert() {
        let err: ScanError = std::io::Error::other("disk full").into();
        assert_eq!(err.kind(), ErrorKind::Io);
        assert_eq!(err.kind().class(), ErrorClass::Permanent);
    }
}
