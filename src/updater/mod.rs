// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-modbus-slave project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Periodic register updater
//!
//! The updater produces live data for Modbus clients: on every tick it adds a
//! fixed increment to every holding register and another one to every input
//! register, wrapping at 65536.
//!
//! A pass locks the whole register plane, applies both increments and
//! releases it before the task goes back to sleep. Nothing inside the pass
//! awaits, so a Modbus read of any number of registers sees the plane either
//! before or after a pass, never in between.
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use rust_modbus_slave::config::UpdaterConfig;
//! use rust_modbus_slave::registers::{RegisterKind, RegisterStore};
//! use rust_modbus_slave::updater::RegisterUpdater;
//!
//! let mut store = RegisterStore::new();
//! store.register_area(RegisterKind::Holding, 0, 100).unwrap();
//! store.register_area(RegisterKind::Input, 0, 100).unwrap();
//! store.seal();
//! let store = Arc::new(store);
//!
//! let updater = RegisterUpdater::new(store.clone(), UpdaterConfig::default()).unwrap();
//! updater.tick().unwrap();
//! assert_eq!(store.read(RegisterKind::Input, 0, 1).unwrap(), vec![5]);
//! ```

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};

use log::{debug, error, info};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::config::UpdaterConfig;
use crate::registers::{RegisterError, RegisterKind, RegisterStore};

/// Number of ticks between two progress log lines
const LOG_EVERY_TICKS: u64 = 60;

/// Applies the configured increments to the register plane on a fixed cadence
pub struct RegisterUpdater {
    store: Arc<RegisterStore>,
    config: UpdaterConfig,
    ticks: Arc<AtomicU64>,
}

impl RegisterUpdater {
    /// Create an updater over an initialized register plane
    ///
    /// # Errors
    ///
    /// * `RegisterError::Configuration` if the store is not sealed yet or the
    ///   interval is zero
    /// * `RegisterError::NoSuchArea` if a register kind has no area
    pub fn new(store: Arc<RegisterStore>, config: UpdaterConfig) -> Result<Self, RegisterError> {
        if !store.is_sealed() {
            return Err(RegisterError::configuration(
                "register plane is not initialized, the updater cannot start",
            ));
        }
        if config.interval_ms == 0 {
            return Err(RegisterError::configuration(
                "updater interval must be at least 1 ms",
            ));
        }
        for kind in RegisterKind::ALL {
            if !store.has_kind(kind) {
                return Err(RegisterError::NoSuchArea(kind));
            }
        }

        Ok(Self {
            store,
            config,
            ticks: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Shared counter of completed passes
    pub fn tick_counter(&self) -> Arc<AtomicU64> {
        self.ticks.clone()
    }

    /// Number of completed passes
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::SeqCst)
    }

    /// Run one update pass and return the number of completed passes
    ///
    /// The whole plane is locked for the duration of the pass.
    pub fn tick(&self) -> Result<u64, RegisterError> {
        let UpdaterConfig {
            holding_delta,
            input_delta,
            ..
        } = self.config;

        self.store.with_exclusive_access_all(|plane| {
            plane
                .bank_mut(RegisterKind::Holding)?
                .wrapping_add_all(holding_delta);
            plane
                .bank_mut(RegisterKind::Input)?
                .wrapping_add_all(input_delta);
            Ok::<(), RegisterError>(())
        })??;

        Ok(self.ticks.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Tick until `running` is cleared
    ///
    /// The first pass happens immediately, the next ones every
    /// `interval_ms`. The flag is checked between passes only. A failed pass
    /// ends the loop with its error.
    pub async fn run(self, running: Arc<AtomicBool>) -> Result<u64, RegisterError> {
        info!(
            "Register updater started: +{} holding, +{} input every {:?}",
            self.config.holding_delta,
            self.config.input_delta,
            self.config.interval()
        );

        let mut interval = time::interval(self.config.interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while running.load(Ordering::SeqCst) {
            interval.tick().await;
            if !running.load(Ordering::SeqCst) {
                break;
            }

            match self.tick() {
                Ok(ticks) if ticks % LOG_EVERY_TICKS == 0 => {
                    debug!("Register updater completed {} passes", ticks);
                }
                Ok(_) => {}
                Err(e) => {
                    error!("Register update pass failed: {}", e);
                    return Err(e);
                }
            }
        }

        let ticks = self.ticks();
        info!("Register updater stopped after {} passes", ticks);
        Ok(ticks)
    }

    /// Spawn [`RegisterUpdater::run`] on the tokio runtime
    pub fn spawn(self, running: Arc<AtomicBool>) -> JoinHandle<Result<u64, RegisterError>> {
        tokio::spawn(self.run(running))
    }
}
