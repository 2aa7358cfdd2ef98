// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-modbus-slave project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Modbus slave handle
//!
//! [`ModbusSlave`] drives the startup sequence of the slave:
//!
//! 1. [`ModbusSlave::new`] creates the handle and an empty register plane
//! 2. [`ModbusSlave::set_descriptor`] registers holding then input areas
//! 3. [`ModbusSlave::setup`] sets the transport parameters
//! 4. [`ModbusSlave::start`] binds the listener, seals the plane and spawns
//!    the serve loop
//!
//! Every step returns an error instead of leaving a half-configured slave;
//! descriptors can no longer be registered once the slave is serving.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_modbus::server::tcp::{accept_tcp_connection, Server};

use super::RegisterPlaneService;
use crate::config::{AddressFamily, CommunicationMode};
use crate::registers::{AreaHandle, RegisterArea, RegisterError, RegisterStore};

/// How long [`ModbusSlave::shutdown`] waits for the serve loop
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Transport parameters of the slave
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommunicationInfo {
    /// TCP port, 0 lets the OS pick one
    pub port: u16,
    /// IP protocol version
    pub address_family: AddressFamily,
    /// Modbus protocol variant, only TCP is served
    pub mode: CommunicationMode,
    /// Local address to bind, `None` binds every interface of the family
    pub bind_address: Option<IpAddr>,
}

impl Default for CommunicationInfo {
    fn default() -> Self {
        Self {
            port: 502,
            address_family: AddressFamily::Ipv4,
            mode: CommunicationMode::Tcp,
            bind_address: None,
        }
    }
}

impl CommunicationInfo {
    /// Socket address the listener binds to
    pub fn socket_addr(&self) -> SocketAddr {
        let ip = self.bind_address.unwrap_or(match self.address_family {
            AddressFamily::Ipv4 => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            AddressFamily::Ipv6 => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        });
        SocketAddr::new(ip, self.port)
    }

    fn validate(&self) -> Result<(), RegisterError> {
        if self.mode != CommunicationMode::Tcp {
            return Err(RegisterError::transport(format!(
                "{} mode is not supported, this slave only serves Modbus TCP",
                self.mode
            )));
        }
        if let Some(address) = &self.bind_address {
            if AddressFamily::of(address) != self.address_family {
                return Err(RegisterError::transport(format!(
                    "bind address {} is not an {} address",
                    address, self.address_family
                )));
            }
        }
        Ok(())
    }
}

enum SlaveState {
    Configuring(RegisterStore),
    Serving {
        store: Arc<RegisterStore>,
        local_addr: SocketAddr,
        server: Option<JoinHandle<Result<(), RegisterError>>>,
    },
}

/// Handle on a Modbus TCP slave and its register plane
pub struct ModbusSlave {
    state: SlaveState,
    communication: Option<CommunicationInfo>,
}

impl Default for ModbusSlave {
    fn default() -> Self {
        Self::new()
    }
}

impl ModbusSlave {
    /// Create a slave with an empty register plane
    pub fn new() -> Self {
        debug!("Modbus slave handle created");
        Self {
            state: SlaveState::Configuring(RegisterStore::new()),
            communication: None,
        }
    }

    /// Register an area descriptor
    ///
    /// # Errors
    ///
    /// `RegisterError::Configuration` if the descriptor is invalid, overlaps
    /// an area of the same kind, or the slave is already serving.
    pub fn set_descriptor(&mut self, area: RegisterArea) -> Result<AreaHandle, RegisterError> {
        match &mut self.state {
            SlaveState::Configuring(store) => {
                let handle = store.register_descriptor(area)?;
                info!("Modbus slave descriptor set: {}", area);
                Ok(handle)
            }
            SlaveState::Serving { .. } => Err(RegisterError::configuration(format!(
                "cannot register {}: the Modbus slave is already serving",
                area
            ))),
        }
    }

    /// Set the transport parameters
    ///
    /// # Errors
    ///
    /// * `RegisterError::Transport` for a non-TCP mode or a bind address of
    ///   the wrong family
    /// * `RegisterError::Configuration` if the slave is already serving
    pub fn setup(&mut self, communication: CommunicationInfo) -> Result<(), RegisterError> {
        if self.is_serving() {
            return Err(RegisterError::configuration(
                "cannot change transport parameters while serving",
            ));
        }
        communication.validate()?;
        debug!(
            "Modbus slave transport: {} over {} on {}",
            communication.mode,
            communication.address_family,
            communication.socket_addr()
        );
        self.communication = Some(communication);
        Ok(())
    }

    /// Bind the listener and start serving requests
    ///
    /// The register plane is sealed and shared with the serve loop; the
    /// returned store is the same instance the loop answers from.
    ///
    /// # Errors
    ///
    /// * `RegisterError::Transport` if `setup` was not called or binding fails
    /// * `RegisterError::Configuration` if no descriptor was registered or the
    ///   slave is already serving
    pub async fn start(&mut self) -> Result<Arc<RegisterStore>, RegisterError> {
        let communication = self.communication.ok_or_else(|| {
            RegisterError::transport("transport is not configured, call setup before start")
        })?;

        let SlaveState::Configuring(store) = &mut self.state else {
            return Err(RegisterError::configuration(
                "the Modbus slave is already serving",
            ));
        };
        if store.areas().is_empty() {
            return Err(RegisterError::configuration(
                "no register area registered, nothing to serve",
            ));
        }

        let socket_addr = communication.socket_addr();
        let listener = TcpListener::bind(socket_addr).await.map_err(|e| {
            RegisterError::transport(format!("failed to bind {}: {}", socket_addr, e))
        })?;
        let local_addr = listener.local_addr().map_err(|e| {
            RegisterError::transport(format!("failed to read local address: {}", e))
        })?;

        let mut store = std::mem::take(store);
        store.seal();
        let store = Arc::new(store);

        let server = spawn_serve_loop(listener, store.clone());
        self.state = SlaveState::Serving {
            store: store.clone(),
            local_addr,
            server: Some(server),
        };

        info!("Modbus slave serving on {}", local_addr);
        Ok(store)
    }

    pub fn is_serving(&self) -> bool {
        matches!(self.state, SlaveState::Serving { .. })
    }

    /// Shared register plane, once serving
    pub fn store(&self) -> Option<Arc<RegisterStore>> {
        match &self.state {
            SlaveState::Serving { store, .. } => Some(store.clone()),
            SlaveState::Configuring(_) => None,
        }
    }

    /// Address actually bound, once serving
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &self.state {
            SlaveState::Serving { local_addr, .. } => Some(*local_addr),
            SlaveState::Configuring(_) => None,
        }
    }

    /// Wait until the serve loop ends on its own
    ///
    /// Resolves with the reason the loop stopped. Never resolves while the
    /// slave is not serving or after [`ModbusSlave::shutdown`]. Dropping the
    /// returned future leaves the serve loop untouched.
    pub async fn serve_loop_exit(&mut self) -> RegisterError {
        let SlaveState::Serving { server: slot, .. } = &mut self.state else {
            return std::future::pending().await;
        };
        let Some(server) = slot.as_mut() else {
            return std::future::pending().await;
        };

        let outcome = server.await;
        *slot = None;
        match outcome {
            Ok(Ok(())) => RegisterError::transport("Modbus serve loop exited"),
            Ok(Err(e)) => e,
            Err(e) => RegisterError::transport(format!("Modbus serve loop ended: {}", e)),
        }
    }

    #[cfg(test)]
    pub(crate) fn abort_serve_loop(&self) {
        if let SlaveState::Serving {
            server: Some(server),
            ..
        } = &self.state
        {
            server.abort();
        }
    }

    /// Stop the serve loop
    ///
    /// Open connections are dropped with it. Descriptors stay frozen.
    pub async fn shutdown(&mut self) {
        let SlaveState::Serving { server, .. } = &mut self.state else {
            return;
        };
        let Some(server) = server.take() else {
            return;
        };

        info!("Shutting down Modbus server...");
        server.abort();
        match tokio::time::timeout(SHUTDOWN_TIMEOUT, server).await {
            Ok(_) => info!("Modbus server shut down successfully"),
            Err(_) => warn!("Modbus server shutdown timed out, forcing termination"),
        }
    }
}

/// Run the tokio-modbus accept loop in the background
fn spawn_serve_loop(
    listener: TcpListener,
    store: Arc<RegisterStore>,
) -> JoinHandle<Result<(), RegisterError>> {
    let server = Server::new(listener);

    let on_connected = move |stream: TcpStream, socket_addr: SocketAddr| {
        let store = store.clone();
        async move {
            debug!("Modbus client connected: {}", socket_addr);
            accept_tcp_connection(stream, socket_addr, move |_socket_addr| {
                Ok(Some(RegisterPlaneService::new(store.clone())))
            })
        }
    };

    let on_process_error = |err| {
        error!("Modbus server error: {err}");
    };

    tokio::spawn(async move {
        server
            .serve(&on_connected, on_process_error)
            .await
            .map_err(|e| RegisterError::transport(format!("Modbus server stopped: {}", e)))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registers::RegisterKind;

    fn loopback() -> CommunicationInfo {
        CommunicationInfo {
            port: 0,
            bind_address: Some(IpAddr::V4(Ipv4Addr::LOCALHOST)),
            ..CommunicationInfo::default()
        }
    }

    #[test]
    fn test_socket_addr_defaults_to_any_interface() {
        let info = CommunicationInfo::default();
        assert_eq!(info.socket_addr(), "0.0.0.0:502".parse().unwrap());

        let info = CommunicationInfo {
            address_family: AddressFamily::Ipv6,
            ..CommunicationInfo::default()
        };
        assert_eq!(info.socket_addr(), "[::]:502".parse().unwrap());
    }

    #[test]
    fn test_setup_rejects_serial_modes_and_family_mismatch() {
        let mut slave = ModbusSlave::new();
        for mode in [CommunicationMode::Rtu, CommunicationMode::Ascii] {
            let info = CommunicationInfo {
                mode,
                ..CommunicationInfo::default()
            };
            assert!(matches!(slave.setup(info), Err(RegisterError::Transport(_))));
        }

        let info = CommunicationInfo {
            address_family: AddressFamily::Ipv6,
            ..loopback()
        };
        assert!(matches!(slave.setup(info), Err(RegisterError::Transport(_))));
    }

    #[tokio::test]
    async fn test_start_requires_setup_and_descriptors() {
        let mut slave = ModbusSlave::new();
        slave
            .set_descriptor(RegisterArea::new(RegisterKind::Holding, 0, 10).unwrap())
            .unwrap();
        assert!(matches!(
            slave.start().await,
            Err(RegisterError::Transport(_))
        ));

        let mut empty = ModbusSlave::new();
        empty.setup(loopback()).unwrap();
        assert!(matches!(
            empty.start().await,
            Err(RegisterError::Configuration(_))
        ));
        assert!(!empty.is_serving());
    }

    #[tokio::test]
    async fn test_descriptor_after_start_is_rejected() {
        let mut slave = ModbusSlave::new();
        slave
            .set_descriptor(RegisterArea::new(RegisterKind::Holding, 0, 100).unwrap())
            .unwrap();
        slave
            .set_descriptor(RegisterArea::new(RegisterKind::Input, 0, 100).unwrap())
            .unwrap();
        slave.setup(loopback()).unwrap();

        let store = slave.start().await.unwrap();
        assert!(store.is_sealed());
        assert!(slave.local_addr().unwrap().port() != 0);

        let late = RegisterArea::new(RegisterKind::Holding, 200, 10).unwrap();
        assert!(matches!(
            slave.set_descriptor(late),
            Err(RegisterError::Configuration(_))
        ));
        assert!(matches!(
            slave.start().await,
            Err(RegisterError::Configuration(_))
        ));
        assert_eq!(store.areas().len(), 2);

        slave.shutdown().await;
    }

    #[tokio::test]
    async fn test_serve_loop_exit_reports_a_dead_server() {
        let mut slave = ModbusSlave::new();
        slave
            .set_descriptor(RegisterArea::new(RegisterKind::Holding, 0, 10).unwrap())
            .unwrap();
        slave.setup(loopback()).unwrap();
        slave.start().await.unwrap();

        // Still serving: the wait does not resolve
        let pending =
            tokio::time::timeout(Duration::from_millis(50), slave.serve_loop_exit()).await;
        assert!(pending.is_err());

        slave.abort_serve_loop();
        let reason = tokio::time::timeout(Duration::from_secs(2), slave.serve_loop_exit())
            .await
            .unwrap();
        assert!(matches!(reason, RegisterError::Transport(_)));

        // The loop is gone, shutdown has nothing left to stop
        slave.shutdown().await;
    }
}
