// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scan service: the boundary API applications call.
//
// Works in terms of `DeviceHandle`s. Devices are opened lazily on first use
// and stay open (in this instance's session table) until `close` is called
// or the service is dropped.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use carbonpaper_core::capabilities::Capabilities;
use carbonpaper_core::config::ScannerConfig;
use carbonpaper_core::configuration::{
    ConfigurationPatch, ProposedConfiguration, ValidatedConfiguration,
};
use carbonpaper_core::error::{Result, ScanError};
use carbonpaper_core::types::{DeviceHandle, DeviceId, PixelBuffer, ScanArtifact};
use carbonpaper_document::{ImageCodec, RasterCodec};
use carbonpaper_driver::ScannerDriver;
use tracing::{info, instrument};

use crate::output::OutputAdapter;
use crate::registry::{DeviceRegistry, DeviceSession};
use crate::session::{ScanSettings, ScanStatus};

pub struct ScanService {
    registry: DeviceRegistry,
    sessions: Mutex<HashMap<DeviceId, Arc<DeviceSession>>>,
    output: OutputAdapter,
    config: ScannerConfig,
}

impl ScanService {
    /// Service over `driver`, encoding files with the default raster codec.
    pub fn new(driver: Arc<dyn ScannerDriver>, config: ScannerConfig) -> Self {
        Self::with_codec(driver, Arc::new(RasterCodec), config)
    }

    pub fn with_codec(
        driver: Arc<dyn ScannerDriver>,
        codec: Arc<dyn ImageCodec>,
        config: ScannerConfig,
    ) -> Self {
        info!(driver = driver.driver_name(), "scan service started");
        Self {
            registry: DeviceRegistry::new(driver, ScanSettings::from(&config)),
            sessions: Mutex::new(HashMap::new()),
            output: OutputAdapter::new(codec, config.default_format),
            config,
        }
    }

    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }

    pub fn output(&self) -> &OutputAdapter {
        &self.output
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<DeviceId, Arc<DeviceSession>>> {
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // -- Devices ----------------------------------------------------------------

    pub fn list_devices(&self) -> Vec<DeviceHandle> {
        self.registry.list_devices()
    }

    /// Preferred device: the first whose descriptor contains the configured
    /// `default_device` text, else the first device found.
    pub fn default_device(&self) -> Result<DeviceHandle> {
        let devices = self.list_devices();
        let preferred = self.config.default_device.as_deref().and_then(|wanted| {
            devices
                .iter()
                .find(|handle| handle.descriptor().contains(wanted))
                .cloned()
        });
        preferred
            .or_else(|| devices.into_iter().next())
            .ok_or_else(|| ScanError::DeviceUnavailable("no scanners found".into()))
    }

    /// Open session for `handle`, opening the device on first use.
    ///
    /// The device is opened without holding the session table, so a slow
    /// open never blocks calls on other handles.
    pub fn session(&self, handle: &DeviceHandle) -> Result<Arc<DeviceSession>> {
        if let Some(session) = self.sessions().get(&handle.id()) {
            return Ok(Arc::clone(session));
        }
        match self.registry.open(handle) {
            Ok(opened) => {
                let opened = Arc::new(opened);
                let session = self
                    .sessions()
                    .entry(handle.id())
                    .or_insert_with(|| Arc::clone(&opened))
                    .clone();
                Ok(session)
            }
            // Another caller opened it first.
            Err(ScanError::SessionBusy) => self
                .sessions()
                .get(&handle.id())
                .cloned()
                .ok_or(ScanError::SessionBusy),
            Err(err) => Err(err),
        }
    }

    /// Forget the session for `handle`. The device closes once no worker
    /// holds the session any more. Returns whether a session was open.
    pub fn close(&self, handle: &DeviceHandle) -> bool {
        let closed = self.sessions().remove(&handle.id()).is_some();
        if closed {
            info!(device = %handle.name(), "device released");
        }
        closed
    }

    // -- Capabilities and configuration -----------------------------------------

    pub fn get_capabilities(&self, handle: &DeviceHandle) -> Result<Capabilities> {
        self.session(handle)?.capabilities()
    }

    pub fn get_configuration(&self, handle: &DeviceHandle) -> Result<ValidatedConfiguration> {
        self.session(handle)?.configuration()
    }

    pub fn set_configuration(
        &self,
        handle: &DeviceHandle,
        proposed: &ProposedConfiguration,
    ) -> Result<()> {
        self.session(handle)?.set_configuration(proposed)?;
        Ok(())
    }

    pub fn update_configuration(
        &self,
        handle: &DeviceHandle,
        patch: &ConfigurationPatch,
    ) -> Result<ValidatedConfiguration> {
        self.session(handle)?.update_configuration(patch)
    }

    // -- Scanning ---------------------------------------------------------------

    #[instrument(skip(self), fields(device = %handle.name()))]
    pub fn scan_to_buffer(&self, handle: &DeviceHandle) -> Result<PixelBuffer> {
        let scan = self.session(handle)?.scan()?;
        self.output.to_buffer(&scan)
    }

    /// Scan and write the result to `path`, in the format its extension
    /// names (or the configured default).
    #[instrument(skip(self, path), fields(device = %handle.name(), path = %path.as_ref().display()))]
    pub fn scan_to_file(
        &self,
        handle: &DeviceHandle,
        path: impl AsRef<Path>,
    ) -> Result<ScanArtifact> {
        let path = path.as_ref();
        let scan = self.session(handle)?.scan()?;
        self.output.to_file(&scan, path, self.output.format_for(path))
    }

    /// Cancel the running scan on `handle`, if any.
    pub fn cancel(&self, handle: &DeviceHandle) {
        let session = self.sessions().get(&handle.id()).cloned();
        if let Some(session) = session {
            session.cancel();
        }
    }

    /// Progress of the latest scan on `handle`; `None` when it is not open.
    pub fn status(&self, handle: &DeviceHandle) -> Option<ScanStatus> {
        self.sessions()
            .get(&handle.id())
            .map(|session| session.status())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carbonpaper_core::error::ErrorKind;
    use carbonpaper_core::types::{ColorMode, ImageFormat};
    use carbonpaper_driver::{SimulatedDevice, SimulatedDriver, StubDriver};

    use std::sync::mpsc;
    use std::time::Duration;

    use carbonpaper_driver::{DeviceConnection, DriverResult, RawDevice};

    use crate::session::SessionState;

    /// Driver whose `gated` device blocks in `open_device` until released.
    struct GatedDriver {
        inner: SimulatedDriver,
        entered: Mutex<mpsc::Sender<()>>,
        release: Mutex<mpsc::Receiver<()>>,
    }

    impl ScannerDriver for GatedDriver {
        fn driver_name(&self) -> &str {
            "gated"
        }

        fn list_devices(&self) -> DriverResult<Vec<RawDevice>> {
            self.inner.list_devices()
        }

        fn open_device(&self, name: &str) -> DriverResult<Box<dyn DeviceConnection>> {
            if name == "gated" {
                let _ = self.entered.lock().map(|tx| tx.send(()));
                let _ = self.release.lock().map(|rx| rx.recv());
            }
            self.inner.open_device(name)
        }
    }

    fn service(driver: &SimulatedDriver) -> ScanService {
        ScanService::new(Arc::new(driver.clone()), ScannerConfig::default())
    }

    #[test]
    fn enumerate_configure_and_scan_to_file() {
        let driver = SimulatedDriver::with_flatbeds(1);
        let service = service(&driver);
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("output.png");

        let handle = service.default_device().expect("device");
        let caps = service.get_capabilities(&handle).expect("capabilities");
        let mut proposed = service
            .get_configuration(&handle)
            .expect("configuration")
            .to_proposed();
        proposed.resolution_dpi = caps.resolutions_dpi()[0];
        proposed.to_x = 25.4;
        proposed.to_y = 25.4;
        service.set_configuration(&handle, &proposed).expect("set");

        let artifact = service.scan_to_file(&handle, &path).expect("scan");
        assert_eq!(artifact.format, ImageFormat::Png);
        assert_eq!((artifact.width, artifact.height), (75, 75));

        let decoded = RasterCodec::decode(&std::fs::read(&path).expect("read")).expect("decode");
        assert_eq!((decoded.width(), decoded.height()), (75, 75));
        assert_eq!(
            service.status(&handle).expect("status").state,
            SessionState::Completed
        );
    }

    #[test]
    fn buffer_length_matches_dimensions_for_every_mode() {
        let driver = SimulatedDriver::with_flatbeds(1);
        let service = service(&driver);
        let handle = service.default_device().expect("device");
        for mode in [ColorMode::Lineart, ColorMode::Gray, ColorMode::Color] {
            service
                .update_configuration(
                    &handle,
                    &ConfigurationPatch {
                        to_x: Some(25.4),
                        to_y: Some(12.7),
                        color_mode: Some(mode),
                        ..Default::default()
                    },
                )
                .expect("update");
            let buffer = service.scan_to_buffer(&handle).expect("scan");
            assert_eq!(buffer.bytes_per_pixel(), mode.bytes_per_pixel());
            assert_eq!(
                buffer.pixels().len() as u64,
                PixelBuffer::byte_len(buffer.width(), buffer.height(), buffer.bytes_per_pixel())
            );
        }
    }

    #[test]
    fn no_devices_means_no_default() {
        let service = ScanService::new(Arc::new(StubDriver), ScannerConfig::default());
        assert!(service.list_devices().is_empty());
        assert_eq!(
            service.default_device().unwrap_err().kind(),
            ErrorKind::DeviceUnavailable
        );
    }

    #[test]
    fn configured_default_device_is_preferred() {
        let mut second = SimulatedDevice::flatbed("usb:002");
        second.model = "Document Feeder 9000".into();
        let driver = SimulatedDriver::new(vec![SimulatedDevice::flatbed("usb:001"), second]);
        let config = ScannerConfig {
            default_device: Some("Feeder".into()),
            ..Default::default()
        };
        let service = ScanService::new(Arc::new(driver), config);
        assert_eq!(service.default_device().expect("device").name(), "usb:002");
    }

    #[test]
    fn invalid_configuration_is_reported_and_not_stored() {
        let driver = SimulatedDriver::with_flatbeds(1);
        let service = service(&driver);
        let handle = service.default_device().expect("device");
        let before = service.get_configuration(&handle).expect("configuration");

        let mut proposed = before.to_proposed();
        proposed.source = Some("Transparency".into());
        let err = service.set_configuration(&handle, &proposed).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedSource);
        assert_eq!(service.get_configuration(&handle).expect("configuration"), before);
    }

    #[test]
    fn close_releases_the_device() {
        let driver = SimulatedDriver::with_flatbeds(1);
        let service = service(&driver);
        let handle = service.default_device().expect("device");
        service.get_capabilities(&handle).expect("capabilities");
        assert!(service.close(&handle));
        assert!(!service.close(&handle));
        assert!(service.status(&handle).is_none());

        service.get_capabilities(&handle).expect("capabilities");
        let stats = driver.stats();
        assert_eq!(stats.opened, 2);
        assert_eq!(stats.closed, 1);
        assert_eq!(stats.capability_queries, 2);
    }

    #[test]
    fn cancel_on_unopened_device_is_harmless() {
        let driver = SimulatedDriver::with_flatbeds(1);
        let service = service(&driver);
        let handle = service.default_device().expect("device");
        service.cancel(&handle);
        assert_eq!(driver.stats().opened, 0);
    }

    #[test]
    fn dropping_the_service_closes_everything() {
        let driver = SimulatedDriver::with_flatbeds(2);
        {
            let service = service(&driver);
            for handle in service.list_devices() {
                service.scan_to_buffer(&handle).expect("scan");
            }
        }
        let stats = driver.stats();
        assert_eq!(stats.opened, 2);
        assert_eq!(stats.open_connections(), 0);
        assert_eq!(stats.scans_in_progress(), 0);
    }

    #[test]
    fn slow_open_does_not_block_other_devices() {
        let inner = SimulatedDriver::new(vec![
            SimulatedDevice::flatbed("gated"),
            SimulatedDevice::flatbed("quick"),
        ]);
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let driver = GatedDriver {
            inner: inner.clone(),
            entered: Mutex::new(entered_tx),
            release: Mutex::new(release_rx),
        };
        let service = ScanService::new(Arc::new(driver), ScannerConfig::default());
        let devices = service.list_devices();
        let gated = devices.iter().find(|h| h.name() == "gated").expect("gated").clone();
        let quick = devices.iter().find(|h| h.name() == "quick").expect("quick").clone();

        std::thread::scope(|scope| {
            let slow = scope.spawn(|| service.session(&gated).map(|_| ()));
            entered_rx
                .recv_timeout(Duration::from_secs(5))
                .expect("gated open started");

            let (done_tx, done_rx) = mpsc::channel();
            let (service, quick, gated) = (&service, &quick, &gated);
            scope.spawn(move || {
                let outcome = service.get_capabilities(quick).map(|_| ());
                service.cancel(gated);
                let _ = done_tx.send(outcome);
            });
            let quick_result = done_rx.recv_timeout(Duration::from_secs(5));

            release_tx.send(()).expect("release");
            slow.join().expect("slow thread").expect("gated session");
            quick_result
                .expect("other device answered while the open was pending")
                .expect("capabilities");
        });

        assert!(service.status(&gated).is_some());
        assert_eq!(inner.stats().opened, 2);
    }
}
