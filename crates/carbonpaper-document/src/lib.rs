// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// carbonpaper-document: turns finished scans into image files.

pub mod codec;

pub use codec::{ImageCodec, RasterCodec};
