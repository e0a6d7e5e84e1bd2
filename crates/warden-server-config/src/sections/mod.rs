// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

mod database;
mod flags;
mod logging;

pub use database::{DatabaseConfig, DatabaseConfigLayer, DEFAULT_DATABASE_URL};
pub use flags::{FlagsConfig, FlagsConfigLayer};
pub use logging::{LoggingConfig, LoggingConfigLayer};
