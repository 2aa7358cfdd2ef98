// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-modbus-slave project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! # Daemon Management Module
//!
//! This module runs the background tasks of the Modbus slave:
//!
//! - the Modbus TCP server answering from the register plane
//! - the register updater producing live data
//! - a heartbeat logging the daemon status
//!
//! ## Startup sequence
//!
//! [`Daemon::launch`] brings the slave up in a fixed order and stops at the
//! first failure:
//!
//! 1. create the slave handle
//! 2. register every holding area, then every input area
//! 3. apply the transport parameters
//! 4. start serving (the register plane is frozen from here on)
//! 5. start the updater, if enabled
//!
//! ## Usage
//!
//! ```no_run
//! use rust_modbus_slave::{config::Config, daemon::launch_daemon::Daemon};
//!
//! async fn example() -> anyhow::Result<()> {
//!     let config = Config::default();
//!
//!     let mut daemon = Daemon::new();
//!     daemon.launch(&config).await?;
//!
//!     // Later, trigger a graceful shutdown
//!     daemon.shutdown();
//!     daemon.join().await?;
//!
//!     Ok(())
//! }
//! ```

use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time;

use crate::config::Config;
use crate::modbus::ModbusSlave;
use crate::registers::{RegisterKind, RegisterStore};
use crate::updater::RegisterUpdater;

/// Period of the heartbeat log line
const HEARTBEAT_PERIOD: Duration = Duration::from_secs(60);

/// How often background loops look at the `running` flag
const POLL_PERIOD: Duration = Duration::from_secs(1);

/// Represents a daemon task manager that coordinates the slave services
///
/// # Thread Safety
///
/// The `running` flag is shared with every task. Each task checks it
/// periodically and terminates once it is cleared. A task hitting a fatal
/// error clears the flag itself and wakes up [`Daemon::wait_for_stop`].
pub struct Daemon {
    tasks: Vec<JoinHandle<Result<()>>>,
    running: Arc<AtomicBool>,
    stop: Arc<Notify>,
    store: Option<Arc<RegisterStore>>,
    local_addr: Option<SocketAddr>,
    ticks: Option<Arc<AtomicU64>>,
}

impl Default for Daemon {
    fn default() -> Self {
        Self::new()
    }
}

impl Daemon {
    /// Create a new daemon instance
    ///
    /// # Examples
    ///
    /// ```
    /// use rust_modbus_slave::daemon::launch_daemon::Daemon;
    ///
    /// let daemon = Daemon::new();
    /// assert!(daemon.is_running());
    /// ```
    pub fn new() -> Self {
        Daemon {
            tasks: Vec::new(),
            running: Arc::new(AtomicBool::new(true)),
            stop: Arc::new(Notify::new()),
            store: None,
            local_addr: None,
            ticks: None,
        }
    }

    /// Launch all configured tasks based on configuration
    ///
    /// # Errors
    ///
    /// Any failure of the startup sequence is returned with the step it
    /// happened in. Nothing is left running in that case.
    pub async fn launch(&mut self, config: &Config) -> Result<()> {
        let slave = self.start_modbus_slave(config).await?;
        let store = slave
            .store()
            .context("Modbus slave started without a register plane")?;
        self.local_addr = slave.local_addr();
        self.store = Some(store.clone());

        self.supervise_modbus_slave(slave);

        if config.updater.enabled {
            if let Err(e) = self.start_updater(config, store) {
                self.shutdown();
                return Err(e);
            }
        } else {
            info!("Register updater disabled by configuration");
        }

        self.start_heartbeat();

        Ok(())
    }

    /// Run the slave startup sequence
    async fn start_modbus_slave(&mut self, config: &Config) -> Result<ModbusSlave> {
        info!(
            "Starting Modbus slave on {}:{}",
            config.modbus.address, config.modbus.port
        );

        let mut slave = ModbusSlave::new();

        for kind in RegisterKind::ALL {
            let descriptors = config
                .registers
                .descriptors(kind)
                .with_context(|| format!("Invalid {} register area", kind))?;
            for area in descriptors {
                slave
                    .set_descriptor(area)
                    .with_context(|| format!("Failed to register {}", area))?;
            }
        }

        let communication = config.modbus.communication_info()?;
        slave
            .setup(communication)
            .context("Failed to set up the Modbus transport")?;

        slave
            .start()
            .await
            .context("Failed to start the Modbus slave")?;

        Ok(slave)
    }

    /// Keep the serve loop alive until shutdown
    ///
    /// A serve loop ending on its own stops the whole daemon.
    fn supervise_modbus_slave(&mut self, mut slave: ModbusSlave) {
        let running = self.running.clone();
        let stop = self.stop.clone();
        let task = tokio::spawn(async move {
            while running.load(Ordering::SeqCst) {
                tokio::select! {
                    reason = slave.serve_loop_exit() => {
                        error!("Modbus server stopped unexpectedly, stopping daemon: {}", reason);
                        running.store(false, Ordering::SeqCst);
                        stop.notify_one();
                        return Err(reason.into());
                    }
                    _ = time::sleep(POLL_PERIOD) => {}
                }
            }
            slave.shutdown().await;
            Ok(())
        });

        self.tasks.push(task);
        info!("Modbus server started");
    }

    /// Start the register updater
    ///
    /// A failed update pass stops the whole daemon.
    fn start_updater(&mut self, config: &Config, store: Arc<RegisterStore>) -> Result<()> {
        let updater = RegisterUpdater::new(store, config.updater.clone())
            .context("Failed to initialize the register updater")?;
        self.ticks = Some(updater.tick_counter());

        let running = self.running.clone();
        let stop = self.stop.clone();
        let task = tokio::spawn(async move {
            match updater.run(running.clone()).await {
                Ok(_) => Ok(()),
                Err(e) => {
                    error!("Register updater failed, stopping daemon: {}", e);
                    running.store(false, Ordering::SeqCst);
                    stop.notify_one();
                    Err(e.into())
                }
            }
        });

        self.tasks.push(task);
        Ok(())
    }

    /// Start a heartbeat task that logs the daemon status periodically
    fn start_heartbeat(&mut self) {
        debug!("Starting heartbeat monitor");

        let running = self.running.clone();
        let ticks = self.ticks.clone();
        let task = tokio::spawn(async move {
            let mut elapsed = Duration::ZERO;
            while running.load(Ordering::SeqCst) {
                time::sleep(POLL_PERIOD).await;
                elapsed += POLL_PERIOD;
                if elapsed < HEARTBEAT_PERIOD {
                    continue;
                }
                elapsed = Duration::ZERO;
                match &ticks {
                    Some(ticks) => debug!(
                        "Daemon heartbeat: running, {} update passes",
                        ticks.load(Ordering::SeqCst)
                    ),
                    None => debug!("Daemon heartbeat: running"),
                }
            }
            Ok(())
        });

        self.tasks.push(task);
    }

    /// Register plane served by the slave, once launched
    pub fn store(&self) -> Option<Arc<RegisterStore>> {
        self.store.clone()
    }

    /// Address the slave is bound to, once launched
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Completed update passes, if the updater runs
    pub fn update_passes(&self) -> Option<u64> {
        self.ticks.as_ref().map(|t| t.load(Ordering::SeqCst))
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Wait until a task stops the daemon on a fatal error
    pub async fn wait_for_stop(&self) {
        while self.is_running() {
            self.stop.notified().await;
        }
    }

    /// Stop all running tasks gracefully
    ///
    /// This method only signals the tasks to stop; call `join()` to wait for
    /// them.
    pub fn shutdown(&self) {
        info!("Shutting down daemon tasks");
        self.running.store(false, Ordering::SeqCst);
        self.stop.notify_one();
    }

    /// Wait for all tasks to complete
    ///
    /// Returns the first error a task ended with. Panics and tasks exceeding
    /// the timeout are logged only.
    pub async fn join(self) -> Result<()> {
        let mut first_error = None;
        for task in self.tasks {
            match time::timeout(Duration::from_secs(5), task).await {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(e))) => {
                    error!("Task failed: {:#}", e);
                    first_error.get_or_insert(e);
                }
                Ok(Err(e)) => {
                    error!("Task panicked: {}", e);
                }
                Err(_) => {
                    warn!("Task did not complete within timeout period, may be hung");
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AreaConfig;
    use crate::modbus::CommunicationInfo;
    use crate::registers::RegisterArea;

    fn loopback_config() -> Config {
        let mut config = Config::default();
        config.modbus.address = "127.0.0.1".to_string();
        config.modbus.port = 0;
        config.updater.interval_ms = 10;
        config
    }

    #[tokio::test]
    async fn test_launch_and_shutdown() {
        let mut daemon = Daemon::new();
        daemon.launch(&loopback_config()).await.unwrap();

        let addr = daemon.local_addr().unwrap();
        assert!(addr.ip().is_loopback());
        assert_ne!(addr.port(), 0);

        time::sleep(Duration::from_millis(50)).await;
        assert!(daemon.update_passes().unwrap() >= 1);

        daemon.shutdown();
        assert!(!daemon.is_running());
        daemon.join().await.unwrap();
    }

    #[tokio::test]
    async fn test_launch_fails_on_overlapping_areas() {
        let mut config = loopback_config();
        config.registers.holding.push(AreaConfig {
            start_offset: 50,
            count: 10,
        });

        let mut daemon = Daemon::new();
        let err = daemon.launch(&config).await.unwrap_err();
        assert!(format!("{:#}", err).contains("overlap"));
        assert!(daemon.store().is_none());
    }

    #[tokio::test]
    async fn test_dead_server_stops_the_daemon() {
        let mut slave = ModbusSlave::new();
        slave
            .set_descriptor(RegisterArea::new(RegisterKind::Holding, 0, 10).unwrap())
            .unwrap();
        slave
            .setup(CommunicationInfo {
                port: 0,
                bind_address: Some("127.0.0.1".parse().unwrap()),
                ..CommunicationInfo::default()
            })
            .unwrap();
        slave.start().await.unwrap();

        let mut daemon = Daemon::new();
        slave.abort_serve_loop();
        daemon.supervise_modbus_slave(slave);

        time::timeout(Duration::from_secs(5), daemon.wait_for_stop())
            .await
            .unwrap();
        assert!(!daemon.is_running());

        let err = daemon.join().await.unwrap_err();
        assert!(format!("{:#}", err).contains("serve loop"));
    }

    #[tokio::test]
    async fn test_updater_lock_failure_stops_the_daemon() {
        let mut daemon = Daemon::new();
        daemon.launch(&loopback_config()).await.unwrap();

        // A holder panicking leaves the holding lock broken
        let store = daemon.store().unwrap();
        let broken = std::thread::spawn(move || {
            let _ = store.with_exclusive_access(RegisterKind::Holding, |_| {
                panic!("register holder crashed");
            });
        })
        .join();
        assert!(broken.is_err());

        time::timeout(Duration::from_secs(5), daemon.wait_for_stop())
            .await
            .unwrap();
        assert!(!daemon.is_running());

        let err = daemon.join().await.unwrap_err();
        assert!(format!("{:#}", err).contains("poisoned"));
    }

    #[tokio::test]
    async fn test_updater_disabled() {
        let mut config = loopback_config();
        config.updater.enabled = false;

        let mut daemon = Daemon::new();
        daemon.launch(&config).await.unwrap();
        assert!(daemon.update_passes().is_none());

        let store = daemon.store().unwrap();
        time::sleep(Duration::from_millis(30)).await;
        assert!(store
            .snapshot()
            .unwrap()
            .values(RegisterKind::Input)
            .all(|v| v == 0));

        daemon.shutdown();
        daemon.join().await.unwrap();
    }
}
