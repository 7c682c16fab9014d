// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Carbonpaper: command-line scanner front end.
//
// Picks the preferred scanner, prints its capabilities, selects its first
// resolution, and scans the whole bed to the path given as the first
// argument (default `output.png`).

mod services;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use carbonpaper_core::error::Result;
use carbonpaper_core::human_errors::humanize_error;
use carbonpaper_core::{ScanArtifact, ScannerConfig};
use carbonpaper_scan::worker::{scan_in_background, scan_with_deadline};

use services::data_dir::config_path;
use services::scanner::build_service;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!("Carbonpaper starting");

    let config = ScannerConfig::load_or_default(config_path());
    let output = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("output.png"));

    match run(config, &output).await {
        Ok(artifact) => {
            println!(
                "Saved {}x{} scan to {} ({} bytes, sha256 {})",
                artifact.width,
                artifact.height,
                artifact.path.display(),
                artifact.bytes_written,
                artifact.sha256
            );
            ExitCode::SUCCESS
        }
        Err(err) => {
            tracing::error!(error = %err, kind = %err.kind(), "scan failed");
            let human = humanize_error(&err);
            eprintln!("{}\n{}", human.message, human.suggestion);
            ExitCode::FAILURE
        }
    }
}

async fn run(config: ScannerConfig, output: &Path) -> Result<ScanArtifact> {
    let service = build_service(config);

    let devices = service.list_devices();
    println!("Found {} scanner(s)", devices.len());
    for device in &devices {
        println!("  {device}");
    }

    let handle = service.default_device()?;
    let caps = service.get_capabilities(&handle)?;
    let bounds = caps.bounds();
    println!("Using {handle}");
    println!("  resolutions: {:?} dpi", caps.resolutions_dpi());
    println!("  colour modes: {:?}", caps.color_modes());
    println!("  sources: {:?}", caps.sources());
    println!(
        "  area: x {}..{}, y {}..{} ({:?})",
        bounds.min_x,
        bounds.max_x,
        bounds.min_y,
        bounds.max_y,
        caps.unit()
    );

    let mut proposed = service.get_configuration(&handle)?.to_proposed();
    if let Some(&dpi) = caps.resolutions_dpi().first() {
        proposed.resolution_dpi = dpi;
    }
    service.set_configuration(&handle, &proposed)?;

    let session = service.session(&handle)?;
    let scan = match service.config().scan_timeout_secs {
        Some(secs) => scan_with_deadline(session, Duration::from_secs(secs)).await?,
        None => scan_in_background(session).await?,
    };
    let adapter = service.output();
    adapter.to_file(&scan, output, adapter.format_for(output))
}
