// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Carbonpaper: core types, capability model, configuration validation and
// error definitions shared across all crates.

pub mod capabilities;
pub mod config;
pub mod configuration;
pub mod error;
pub mod human_errors;
pub mod types;

pub use capabilities::{Bounds, Capabilities};
pub use config::ScannerConfig;
pub use configuration::{ConfigurationPatch, ProposedConfiguration, ValidatedConfiguration, validate};
pub use error::{ConfigError, ErrorClass, ErrorKind, ScanError};
pub use types::*;
