// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Human-readable error messages for people standing next to a scanner.
//
// Every technical error is mapped to plain English with a clear suggestion.
// The severity drives how a front end presents it.

use crate::error::{ConfigError, ScanError};

/// Severity of an error from the user's perspective.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// The scanner is busy; trying again shortly will work.
    Transient,
    /// User must do something (plug in, close lid, load paper, change settings).
    ActionRequired,
    /// Cannot be fixed by retrying or user action.
    Permanent,
    /// The user stopped the scan themselves.
    Informational,
}

/// A human-readable error with plain English message and actionable suggestion.
#[derive(Debug, Clone)]
pub struct HumanError {
    /// Plain English summary (shown as a heading).
    pub message: String,
    /// What the user should try (shown as body text).
    pub suggestion: String,
    /// Whether retrying unchanged may succeed.
    pub retriable: bool,
    pub severity: Severity,
}

/// Convert a `ScanError` into a `HumanError`.
pub fn humanize_error(err: &ScanError) -> HumanError {
    match err {
        ScanError::DeviceUnavailable(detail) => humanize_device_detail(detail),

        ScanError::ProtocolError(_) => HumanError {
            message: "The scanner sent something we didn't understand.".into(),
            suggestion: "Your scanner model may not be fully supported. Try switching it off and on again, then scan once more.".into(),
            retriable: false,
            severity: Severity::Permanent,
        },

        ScanError::Config(config_err) => humanize_config_error(config_err),

        ScanError::SessionBusy => HumanError {
            message: "The scanner is busy.".into(),
            suggestion: "Another scan is still running. Wait for it to finish, then try again.".into(),
            retriable: true,
            severity: Severity::Transient,
        },

        ScanError::InvalidState { .. } => HumanError {
            message: "There's no finished scan to save yet.".into(),
            suggestion: "Start a scan and wait for it to complete before saving.".into(),
            retriable: false,
            severity: Severity::ActionRequired,
        },

        ScanError::IncompleteScan { .. } => HumanError {
            message: "The scan stopped part-way through.".into(),
            suggestion: "The scanner didn't send the whole page. Check the cable or network connection and scan again.".into(),
            retriable: false,
            severity: Severity::Permanent,
        },

        ScanError::Cancelled => HumanError {
            message: "Scan cancelled.".into(),
            suggestion: "Nothing was saved. Start a new scan whenever you're ready.".into(),
            retriable: false,
            severity: Severity::Informational,
        },

        ScanError::EncodingError(_) => HumanError {
            message: "We couldn't save the scan in that format.".into(),
            suggestion: "Try saving as PNG instead.".into(),
            retriable: false,
            severity: Severity::Permanent,
        },

        ScanError::Io(io_err) => match io_err.kind() {
            std::io::ErrorKind::NotFound => HumanError {
                message: "The folder you chose doesn't exist.".into(),
                suggestion: "Pick another place to save the scan.".into(),
                retriable: false,
                severity: Severity::ActionRequired,
            },
            std::io::ErrorKind::PermissionDenied => HumanError {
                message: "We aren't allowed to save the scan there.".into(),
                suggestion: "Check the folder permissions, or save somewhere in your home folder.".into(),
                retriable: false,
                severity: Severity::ActionRequired,
            },
            _ => HumanError {
                message: "There was a problem writing the scan to disk.".into(),
                suggestion: "Your storage may be full. Free some space and try again.".into(),
                retriable: false,
                severity: Severity::Permanent,
            },
        },

        ScanError::Serialization(_) => HumanError {
            message: "The settings file is damaged.".into(),
            suggestion: "Delete the settings file to go back to the defaults.".into(),
            retriable: false,
            severity: Severity::ActionRequired,
        },
    }
}

fn humanize_config_error(err: &ConfigError) -> HumanError {
    let (message, suggestion) = match err {
        ConfigError::OutOfBounds { .. } => (
            "That scan area doesn't fit on the scanner glass.",
            "Choose an area inside the scanner's limits.".to_string(),
        ),
        ConfigError::UnsupportedResolution { supported, .. } => (
            "The scanner can't scan at that resolution.",
            match supported.first() {
                Some(_) => format!("Pick one of these resolutions: {supported:?} dpi."),
                None => "This scanner didn't report any resolutions it supports.".to_string(),
            },
        ),
        ConfigError::UnsupportedColorMode { supported, .. } => (
            "The scanner doesn't support that colour setting.",
            format!("Pick one of: {supported:?}."),
        ),
        ConfigError::UnsupportedSource { supported, .. } => (
            "The scanner doesn't have that paper source.",
            format!("Pick one of: {supported:?}."),
        ),
    };
    HumanError {
        message: message.into(),
        suggestion,
        retriable: false,
        severity: Severity::ActionRequired,
    }
}

/// Driver faults arrive as `DeviceUnavailable` with a detail string; pick
/// out the physical conditions a user can fix.
fn humanize_device_detail(detail: &str) -> HumanError {
    let lower = detail.to_ascii_lowercase();

    if lower.contains("jam") {
        HumanError {
            message: "Paper is stuck in the scanner.".into(),
            suggestion: "Open the document feeder, gently remove the paper, and try again.".into(),
            retriable: false,
            severity: Severity::ActionRequired,
        }
    } else if lower.contains("cover open") {
        HumanError {
            message: "The scanner lid is open.".into(),
            suggestion: "Close the lid and try again.".into(),
            retriable: false,
            severity: Severity::ActionRequired,
        }
    } else if lower.contains("no documents") {
        HumanError {
            message: "There's no paper in the document feeder.".into(),
            suggestion: "Load your pages into the feeder, or switch the source to the flatbed.".into(),
            retriable: false,
            severity: Severity::ActionRequired,
        }
    } else if lower.contains("access denied") {
        HumanError {
            message: "We don't have permission to use the scanner.".into(),
            suggestion: "Make sure your user account is allowed to access scanners (often the 'scanner' group).".into(),
            retriable: false,
            severity: Severity::ActionRequired,
        }
    } else {
        HumanError {
            message: "We can't reach the scanner.".into(),
            suggestion: "Make sure the scanner is switched on and connected, then try again.".into(),
            retriable: false,
            severity: Severity::ActionRequired,
        }
    }
}
