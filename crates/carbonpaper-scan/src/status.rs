// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Translation of driver status codes into the scanner error taxonomy.
//
// `DriverStatus` never leaves this crate: every driver call site passes its
// failure through `from_driver`.

use carbonpaper_core::error::ScanError;
use carbonpaper_driver::DriverStatus;
use tracing::debug;

/// Map a driver status returned by `operation` to a `ScanError`.
pub fn from_driver(operation: &'static str, status: DriverStatus) -> ScanError {
    debug!(operation, status = %status, code = status.code(), "driver call failed");
    match status {
        DriverStatus::Disconnected
        | DriverStatus::IoError
        | DriverStatus::AccessDenied
        | DriverStatus::DeviceBusy
        | DriverStatus::Jammed
        | DriverStatus::CoverOpen
        | DriverStatus::NoDocs => ScanError::DeviceUnavailable(format!("{operation}: {status}")),
        DriverStatus::Invalid
        | DriverStatus::Unsupported
        | DriverStatus::NoMem
        | DriverStatus::Eof => ScanError::ProtocolError(format!("{operation}: {status}")),
        DriverStatus::Cancelled => ScanError::Cancelled,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carbonpaper_core::error::ErrorKind;
    use carbonpaper_core::human_errors::{Severity, humanize_error};

    #[test]
    fn hardware_conditions_are_device_unavailable() {
        for status in [
            DriverStatus::Disconnected,
            DriverStatus::IoError,
            DriverStatus::Jammed,
            DriverStatus::CoverOpen,
            DriverStatus::NoDocs,
        ] {
            assert_eq!(
                from_driver("read", status).kind(),
                ErrorKind::DeviceUnavailable
            );
        }
    }

    #[test]
    fn malformed_exchanges_are_protocol_errors() {
        for status in [DriverStatus::Invalid, DriverStatus::Unsupported, DriverStatus::Eof] {
            assert_eq!(from_driver("start", status).kind(), ErrorKind::ProtocolError);
        }
    }

    #[test]
    fn driver_cancel_is_cancelled() {
        assert_eq!(
            from_driver("read", DriverStatus::Cancelled).kind(),
            ErrorKind::Cancelled
        );
    }

    #[test]
    fn cover_open_reaches_the_user_as_a_lid_message() {
        let human = humanize_error(&from_driver("scan_status", DriverStatus::CoverOpen));
        assert_eq!(human.severity, Severity::ActionRequired);
        assert!(human.message.contains("lid"));
    }
}
