// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// carbonpaper-scan: device registry, scan state machine and output for the
// Carbonpaper scanner layer.
//
// Control flow: `DeviceRegistry` enumerates and opens devices,
// `capabilities` normalises what each reports, the core validator checks
// configurations against it, `ScanSession` pulls the frame, and
// `OutputAdapter` renders the result. `ScanService` ties these together
// behind a handle-based API.

pub mod capabilities;
pub mod output;
pub mod registry;
pub mod service;
pub mod session;
pub mod status;
pub mod worker;

pub use output::OutputAdapter;
pub use registry::{DeviceRegistry, DeviceSession};
pub use service::ScanService;
pub use session::{FrameLayout, ScanControl, ScanSession, ScanSettings, ScanStatus, SessionState};
pub use worker::{scan_in_background, scan_with_deadline};
