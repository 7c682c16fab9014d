// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Device registry and per-handle device sessions.
//
// The registry enumerates devices through the driver and hands out stable
// `DeviceHandle`s. Opening a handle yields a `DeviceSession`, which owns the
// driver connection for as long as it lives and closes it on drop, whatever
// path led there.
//
// A device session serialises work on its device: every operation takes the
// session state with `try_lock`, so a call that overlaps a running scan
// fails fast with `SessionBusy` instead of queueing behind it. Cancellation
// and progress go through `ScanControl` and never need that lock.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};

use carbonpaper_core::capabilities::Capabilities;
use carbonpaper_core::configuration::{
    ConfigurationPatch, ProposedConfiguration, ValidatedConfiguration, validate,
};
use carbonpaper_core::error::{Result, ScanError};
use carbonpaper_core::types::{DeviceHandle, DeviceId};
use carbonpaper_driver::{DeviceConnection, ScannerDriver};
use tracing::{debug, info, instrument, warn};

use crate::capabilities::{from_raw, normalize_capabilities};
use crate::session::{ScanControl, ScanSession, ScanSettings, ScanStatus};
use crate::status::from_driver;

fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// -- Registry -----------------------------------------------------------------

/// Enumerates devices and opens them into sessions.
pub struct DeviceRegistry {
    driver: Arc<dyn ScannerDriver>,
    /// Driver device name -> id issued for it, kept across enumerations.
    known: Mutex<HashMap<String, DeviceId>>,
    /// Ids with a live `DeviceSession`.
    open: Arc<Mutex<HashSet<DeviceId>>>,
    settings: ScanSettings,
}

impl DeviceRegistry {
    pub fn new(driver: Arc<dyn ScannerDriver>, settings: ScanSettings) -> Self {
        Self {
            driver,
            known: Mutex::new(HashMap::new()),
            open: Arc::new(Mutex::new(HashSet::new())),
            settings,
        }
    }

    pub fn driver_name(&self) -> &str {
        self.driver.driver_name()
    }

    /// Enumerate attached devices. Never fails: a driver error is logged and
    /// reported as "no devices".
    #[instrument(skip(self), fields(driver = self.driver.driver_name()))]
    pub fn list_devices(&self) -> Vec<DeviceHandle> {
        let raw = match self.driver.list_devices() {
            Ok(raw) => raw,
            Err(status) => {
                warn!(status = %status, "device enumeration failed");
                return Vec::new();
            }
        };

        let mut known = lock_or_recover(&self.known);
        let handles: Vec<DeviceHandle> = raw
            .into_iter()
            .map(|device| {
                let id = *known.entry(device.name.clone()).or_default();
                DeviceHandle::new(id, device.name, device.vendor, device.model)
            })
            .collect();
        info!(count = handles.len(), "devices enumerated");
        handles
    }

    /// Open `handle` for exclusive use.
    #[instrument(skip(self), fields(device = %handle.name()))]
    pub fn open(&self, handle: &DeviceHandle) -> Result<DeviceSession> {
        let issued = lock_or_recover(&self.known).get(handle.name()).copied();
        if issued != Some(handle.id()) {
            return Err(ScanError::DeviceUnavailable(format!(
                "{} was not enumerated by this registry",
                handle.descriptor()
            )));
        }

        let mut open = lock_or_recover(&self.open);
        if open.contains(&handle.id()) {
            debug!("device already has a live session");
            return Err(ScanError::SessionBusy);
        }
        let connection = self.driver.open_device(handle.name()).map_err(|status| {
            ScanError::DeviceUnavailable(format!("cannot open {}: {status}", handle.descriptor()))
        })?;
        open.insert(handle.id());
        drop(open);

        info!("device opened");
        Ok(DeviceSession {
            handle: handle.clone(),
            state: Mutex::new(DeviceState {
                connection: Some(connection),
                capabilities: None,
                active: None,
                settings: self.settings,
            }),
            control: ScanControl::default(),
            open_set: Arc::clone(&self.open),
        })
    }

    pub fn is_open(&self, handle: &DeviceHandle) -> bool {
        lock_or_recover(&self.open).contains(&handle.id())
    }

    /// Release a session. Equivalent to dropping it.
    pub fn close(&self, session: DeviceSession) {
        session.close();
    }
}

// -- Device session -----------------------------------------------------------

struct DeviceState {
    connection: Option<Box<dyn DeviceConnection>>,
    capabilities: Option<Capabilities>,
    active: Option<ValidatedConfiguration>,
    settings: ScanSettings,
}

impl DeviceState {
    fn connection(&mut self) -> Result<&mut dyn DeviceConnection> {
        match self.connection.as_deref_mut() {
            Some(conn) => Ok(conn),
            None => Err(ScanError::DeviceUnavailable("device session is closed".into())),
        }
    }

    /// Capabilities, queried from the driver on first use.
    fn capabilities(&mut self) -> Result<&Capabilities> {
        let caps = match self.capabilities.take() {
            Some(caps) => caps,
            None => {
                let raw = self
                    .connection()?
                    .query_capabilities()
                    .map_err(|status| from_driver("query_capabilities", status))?;
                let caps = normalize_capabilities(&raw)?;
                info!(
                    resolutions = ?caps.resolutions_dpi(),
                    modes = ?caps.color_modes(),
                    bounds = ?caps.bounds(),
                    "capabilities loaded"
                );
                caps
            }
        };
        Ok(self.capabilities.insert(caps))
    }

    /// Active configuration, else what the device reports if it validates,
    /// else the whole bed at the lowest resolution.
    fn configuration(&mut self) -> Result<ValidatedConfiguration> {
        if let Some(active) = &self.active {
            return Ok(active.clone());
        }
        let caps = self.capabilities()?.clone();
        match self.connection()?.current_configuration() {
            Ok(raw) => match from_raw(&raw).map(|proposed| validate(&caps, &proposed)) {
                Some(Ok(config)) => return Ok(config),
                Some(Err(err)) => debug!(error = %err, "device settings do not validate"),
                None => debug!(?raw, "device settings are not representable"),
            },
            Err(status) => debug!(status = %status, "device settings unavailable"),
        }
        Ok(ValidatedConfiguration::full_area(&caps)?)
    }
}

/// Exclusive, open connection to one device.
///
/// All methods take `&self` so a session can be shared (for example through
/// an `Arc`) between the thread running a scan and threads observing or
/// cancelling it.
pub struct DeviceSession {
    handle: DeviceHandle,
    state: Mutex<DeviceState>,
    control: ScanControl,
    open_set: Arc<Mutex<HashSet<DeviceId>>>,
}

impl DeviceSession {
    fn lock_state(&self) -> Result<MutexGuard<'_, DeviceState>> {
        match self.state.try_lock() {
            Ok(state) => Ok(state),
            Err(TryLockError::WouldBlock) => {
                debug!(device = %self.handle.name(), "device session busy");
                Err(ScanError::SessionBusy)
            }
            Err(TryLockError::Poisoned(_)) => Err(ScanError::ProtocolError(
                "device session was poisoned by an earlier panic".into(),
            )),
        }
    }

    pub fn handle(&self) -> &DeviceHandle {
        &self.handle
    }

    /// Device capabilities. Queried once per session and cached.
    pub fn capabilities(&self) -> Result<Capabilities> {
        let mut state = self.lock_state()?;
        state.capabilities().cloned()
    }

    /// Configuration the next scan will use.
    pub fn configuration(&self) -> Result<ValidatedConfiguration> {
        self.lock_state()?.configuration()
    }

    /// Validate `proposed` and make it the active configuration. Nothing is
    /// stored when validation fails.
    #[instrument(skip(self, proposed), fields(device = %self.handle.name()))]
    pub fn set_configuration(
        &self,
        proposed: &ProposedConfiguration,
    ) -> Result<ValidatedConfiguration> {
        let mut state = self.lock_state()?;
        let config = validate(state.capabilities()?, proposed)?;
        info!(?config, "configuration set");
        state.active = Some(config.clone());
        Ok(config)
    }

    /// Apply `patch` on top of the current configuration.
    #[instrument(skip(self, patch), fields(device = %self.handle.name()))]
    pub fn update_configuration(
        &self,
        patch: &ConfigurationPatch,
    ) -> Result<ValidatedConfiguration> {
        let mut state = self.lock_state()?;
        let proposed = patch.apply_to(&state.configuration()?.to_proposed());
        let config = validate(state.capabilities()?, &proposed)?;
        info!(?config, "configuration updated");
        state.active = Some(config.clone());
        Ok(config)
    }

    /// Run one scan with the current configuration. Blocks until the frame
    /// completes or fails; the returned session is `Completed`.
    #[instrument(skip(self), fields(device = %self.handle.name()))]
    pub fn scan(&self) -> Result<ScanSession> {
        let mut state = self.lock_state()?;
        let config = state.configuration()?;
        let settings = state.settings;
        let conn = state.connection()?;

        let mut session = ScanSession::new(self.control.clone(), settings);
        session.configure(conn, config)?;
        session.run(conn)?;
        Ok(session)
    }

    /// Request cancellation of the running scan. Lock-free; a no-op when
    /// nothing is running.
    pub fn cancel(&self) {
        info!(device = %self.handle.name(), "scan cancellation requested");
        self.control.cancel();
    }

    /// Progress of the running or most recent scan.
    pub fn status(&self) -> ScanStatus {
        self.control.status()
    }

    pub fn control(&self) -> ScanControl {
        self.control.clone()
    }

    /// Release the device. Equivalent to dropping the session.
    pub fn close(self) {}
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        let state = match self.state.get_mut() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(connection) = state.connection.take() {
            connection.close_device();
        }
        lock_or_recover(&self.open_set).remove(&self.handle.id());
        info!(device = %self.handle.name(), "device closed");
    }
}

impl std::fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSession")
            .field("handle", &self.handle)
            .field("status", &self.control.status())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    use carbonpaper_core::error::ErrorKind;
    use carbonpaper_core::types::ColorMode;
    use carbonpaper_driver::{
        DriverResult, DriverStatus, Fault, RawDevice, SimulatedDevice, SimulatedDriver,
        test_pattern,
    };

    use crate::session::SessionState;

    struct FailingDriver;

    impl ScannerDriver for FailingDriver {
        fn driver_name(&self) -> &str {
            "failing"
        }

        fn list_devices(&self) -> DriverResult<Vec<RawDevice>> {
            Err(DriverStatus::IoError)
        }

        fn open_device(&self, _name: &str) -> DriverResult<Box<dyn DeviceConnection>> {
            Err(DriverStatus::IoError)
        }
    }

    fn bed() -> SimulatedDevice {
        SimulatedDevice::pixel_bed("bed", 100.0, 100.0, vec![75, 150, 300], &["Gray"])
    }

    fn registry(driver: &SimulatedDriver) -> DeviceRegistry {
        DeviceRegistry::new(
            Arc::new(driver.clone()),
            ScanSettings {
                chunk_size: 64,
                max_stalled_reads: 8,
                ..ScanSettings::default()
            },
        )
    }

    fn strip() -> ProposedConfiguration {
        ProposedConfiguration {
            from_x: 0.0,
            from_y: 0.0,
            to_x: 100.0,
            to_y: 5.0,
            resolution_dpi: 75,
            color_mode: ColorMode::Gray,
            source: None,
        }
    }

    fn wait_for(what: &str, condition: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "timed out waiting for {what}");
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn handles_are_stable_across_enumerations() {
        let driver = SimulatedDriver::with_flatbeds(2);
        let registry = registry(&driver);
        let first = registry.list_devices();
        let second = registry.list_devices();
        assert_eq!(first.len(), 2);
        assert_eq!(first, second);
        assert_ne!(first[0].id(), first[1].id());
        assert_eq!(first[0].descriptor(), "sim:0 (Carbonpaper / Virtual Flatbed)");
    }

    #[test]
    fn failing_enumeration_yields_no_devices() {
        let registry = DeviceRegistry::new(Arc::new(FailingDriver), ScanSettings::default());
        assert!(registry.list_devices().is_empty());
    }

    #[test]
    fn second_open_is_busy_until_the_first_is_dropped() {
        let driver = SimulatedDriver::new(vec![bed()]);
        let registry = registry(&driver);
        let handle = registry.list_devices().remove(0);

        let session = registry.open(&handle).expect("open");
        assert!(registry.is_open(&handle));
        match registry.open(&handle) {
            Err(ScanError::SessionBusy) => {}
            other => panic!("unexpected result: {other:?}"),
        }

        registry.close(session);
        assert!(!registry.is_open(&handle));
        let reopened = registry.open(&handle).expect("reopen");
        drop(reopened);

        let stats = driver.stats();
        assert_eq!(stats.opened, 2);
        assert_eq!(stats.closed, 2);
    }

    #[test]
    fn vanished_device_is_unavailable() {
        let driver = SimulatedDriver::new(vec![bed()]);
        let registry = registry(&driver);
        let handle = registry.list_devices().remove(0);
        driver.unplug("bed");
        let err = registry.open(&handle).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DeviceUnavailable);
        assert!(!registry.is_open(&handle));
    }

    #[test]
    fn capabilities_are_queried_once() {
        let driver = SimulatedDriver::new(vec![bed()]);
        let registry = registry(&driver);
        let handle = registry.list_devices().remove(0);
        let session = registry.open(&handle).expect("open");

        let first = session.capabilities().expect("capabilities");
        let second = session.capabilities().expect("capabilities");
        assert_eq!(first, second);
        assert_eq!(driver.stats().capability_queries, 1);
        assert_eq!(first.resolutions_dpi(), &[75, 150, 300]);
        assert_eq!(first.bounds().max_x, 100.0);
    }

    #[test]
    fn malformed_capabilities_are_a_protocol_error() {
        let driver =
            SimulatedDriver::new(vec![bed().with_fault(Fault::MalformedCapabilities)]);
        let registry = registry(&driver);
        let handle = registry.list_devices().remove(0);
        let session = registry.open(&handle).expect("open");
        assert_eq!(
            session.capabilities().unwrap_err().kind(),
            ErrorKind::ProtocolError
        );
    }

    #[test]
    fn rejected_configuration_keeps_the_previous_one() {
        let driver = SimulatedDriver::new(vec![bed()]);
        let registry = registry(&driver);
        let handle = registry.list_devices().remove(0);
        let session = registry.open(&handle).expect("open");

        let accepted = session.set_configuration(&strip()).expect("set");
        let mut bad = strip();
        bad.resolution_dpi = 200;
        let err = session.set_configuration(&bad).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedResolution);
        assert_eq!(session.configuration().expect("configuration"), accepted);
    }

    #[test]
    fn patch_changes_only_the_given_fields() {
        let driver = SimulatedDriver::new(vec![bed()]);
        let registry = registry(&driver);
        let handle = registry.list_devices().remove(0);
        let session = registry.open(&handle).expect("open");
        session.set_configuration(&strip()).expect("set");

        let updated = session
            .update_configuration(&ConfigurationPatch {
                resolution_dpi: Some(300),
                ..Default::default()
            })
            .expect("update");
        assert_eq!(updated.resolution_dpi(), 300);
        assert_eq!(updated.to_y(), 5.0);
    }

    #[test]
    fn default_configuration_follows_the_device() {
        let driver = SimulatedDriver::new(vec![bed()]);
        let registry = registry(&driver);
        let handle = registry.list_devices().remove(0);
        let session = registry.open(&handle).expect("open");
        let config = session.configuration().expect("configuration");
        assert_eq!(config.to_x(), 100.0);
        assert_eq!(config.to_y(), 100.0);
        assert_eq!(config.resolution_dpi(), 75);
    }

    #[test]
    fn cancel_mid_scan_fails_cancelled_without_leaks() {
        let device = bed()
            .with_chunk_delay(Duration::from_millis(5))
            .with_max_chunk(10);
        let driver = SimulatedDriver::new(vec![device]);
        let registry = registry(&driver);
        let handle = registry.list_devices().remove(0);
        let session = registry.open(&handle).expect("open");
        session.set_configuration(&strip()).expect("set");

        let control = session.control();
        std::thread::scope(|scope| {
            let running = scope.spawn(|| session.scan());
            wait_for("scan progress", || control.status().bytes_received > 0);
            control.cancel();
            let err = running.join().expect("scan thread").unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Cancelled);
        });

        assert_eq!(
            session.status().state,
            SessionState::Failed(ErrorKind::Cancelled)
        );
        drop(session);
        let stats = driver.stats();
        assert_eq!(stats.open_connections(), 0);
        assert_eq!(stats.scans_in_progress(), 0);
        assert!(stats.cancellations >= 1);
    }

    #[test]
    fn second_scan_while_scanning_is_busy_and_first_survives() {
        let device = bed()
            .with_chunk_delay(Duration::from_millis(2))
            .with_max_chunk(10);
        let driver = SimulatedDriver::new(vec![device]);
        let registry = registry(&driver);
        let handle = registry.list_devices().remove(0);
        let session = registry.open(&handle).expect("open");
        session.set_configuration(&strip()).expect("set");

        let finished = std::thread::scope(|scope| {
            let running = scope.spawn(|| session.scan());
            wait_for("scanning state", || {
                session.status().state == SessionState::Scanning
            });
            match session.scan() {
                Err(ScanError::SessionBusy) => {}
                other => panic!("unexpected result: {other:?}"),
            }
            assert_eq!(
                session.set_configuration(&strip()).unwrap_err().kind(),
                ErrorKind::SessionBusy
            );
            running.join().expect("scan thread").expect("first scan")
        });

        let buffer = finished.into_result().expect("buffer");
        assert_eq!(buffer.pixels().len(), 500);
        let params = carbonpaper_driver::ScanParameters {
            format: carbonpaper_driver::FrameFormat::Gray,
            pixels_per_line: 100,
            lines: 5,
            bytes_per_line: 100,
            depth: 8,
        };
        assert_eq!(buffer.into_pixels(), test_pattern(&params, false));
    }

    #[test]
    fn stale_cancel_does_not_affect_the_next_scan() {
        let driver = SimulatedDriver::new(vec![bed()]);
        let registry = registry(&driver);
        let handle = registry.list_devices().remove(0);
        let session = registry.open(&handle).expect("open");
        session.set_configuration(&strip()).expect("set");
        session.cancel();
        let finished = session.scan().expect("scan");
        assert_eq!(finished.state(), SessionState::Completed);
    }
}
