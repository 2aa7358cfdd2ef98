// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-modbus-slave project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Register updater configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Settings of the periodic register updater.
///
/// Every `interval_ms` milliseconds, `holding_delta` is added to every holding
/// register and `input_delta` to every input register, wrapping at 65536.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdaterConfig {
    /// Flag to enable or disable the updater task.
    pub enabled: bool,

    /// Delay between two update passes, in milliseconds.
    pub interval_ms: u64,

    /// Increment applied to holding registers on each pass.
    pub holding_delta: u16,

    /// Increment applied to input registers on each pass.
    pub input_delta: u16,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 1000,
            holding_delta: 1,
            input_delta: 5,
        }
    }
}

impl UpdaterConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}
