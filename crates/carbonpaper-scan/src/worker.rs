// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Async wrapper around the blocking scan loop.
//
// A scan blocks its thread for as long as the hardware takes, so async
// callers run it on tokio's blocking pool. When the caller's deadline fires
// first the scan is cancelled, and the call returns once the worker has
// actually stopped and released the device. It returns what the worker
// reported, so it always agrees with the session status: normally
// `Cancelled`, or the finished scan if the frame completed before the
// cancel was seen.

use std::sync::Arc;
use std::time::Duration;

use carbonpaper_core::error::{Result, ScanError};
use tracing::{info, warn};

use crate::registry::DeviceSession;
use crate::session::ScanSession;

/// How often a cancel request is repeated while waiting for the worker.
const CANCEL_POLL: Duration = Duration::from_millis(50);

/// Run `session.scan()` on the blocking pool without a deadline.
pub async fn scan_in_background(session: Arc<DeviceSession>) -> Result<ScanSession> {
    tokio::task::spawn_blocking(move || session.scan())
        .await
        .map_err(|err| ScanError::ProtocolError(format!("scan worker did not finish: {err}")))?
}

/// Run `session.scan()` on the blocking pool, cancelling it if it has not
/// finished within `deadline`.
pub async fn scan_with_deadline(
    session: Arc<DeviceSession>,
    deadline: Duration,
) -> Result<ScanSession> {
    let worker = Arc::clone(&session);
    let mut task = tokio::task::spawn_blocking(move || worker.scan());

    match tokio::time::timeout(deadline, &mut task).await {
        Ok(joined) => joined.map_err(|err| {
            ScanError::ProtocolError(format!("scan worker did not finish: {err}"))
        })?,
        Err(_) => {
            warn!(
                device = %session.handle().name(),
                deadline_ms = deadline.as_millis() as u64,
                "scan deadline passed, cancelling"
            );
            // A request that lands before the worker has configured the scan
            // is cleared by `configure`, so keep asking until the worker stops.
            loop {
                session.cancel();
                if let Ok(joined) = tokio::time::timeout(CANCEL_POLL, &mut task).await {
                    let outcome = joined.map_err(|err| {
                        ScanError::ProtocolError(format!("scan worker did not finish: {err}"))
                    })?;
                    if outcome.is_ok() {
                        info!("scan finished before the cancel took effect");
                    }
                    return outcome;
                }
            }
        }
    }
}
