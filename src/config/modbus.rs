// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-modbus-slave project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Modbus transport configuration
//!
//! This module defines the structures for configuring the transport the Modbus
//! slave listens on.

use std::fmt;
use std::net::IpAddr;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::modbus::CommunicationInfo;

/// IP protocol version the slave binds with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressFamily {
    Ipv4,
    Ipv6,
}

impl AddressFamily {
    /// Family of a concrete address
    pub fn of(address: &IpAddr) -> Self {
        match address {
            IpAddr::V4(_) => AddressFamily::Ipv4,
            IpAddr::V6(_) => AddressFamily::Ipv6,
        }
    }
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressFamily::Ipv4 => write!(f, "IPv4"),
            AddressFamily::Ipv6 => write!(f, "IPv6"),
        }
    }
}

/// Modbus protocol variant
///
/// Only `Tcp` is served by this crate; the serial variants are accepted in
/// configuration files so that they can be rejected with a clear error when
/// the transport is set up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommunicationMode {
    Tcp,
    Rtu,
    Ascii,
}

impl fmt::Display for CommunicationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommunicationMode::Tcp => write!(f, "TCP"),
            CommunicationMode::Rtu => write!(f, "RTU"),
            CommunicationMode::Ascii => write!(f, "ASCII"),
        }
    }
}

/// Configuration for the Modbus slave transport.
///
/// # Fields
///
/// * `port` - TCP port number for the Modbus slave (default: 502)
/// * `address` - Network address to bind to (default: 0.0.0.0, any interface)
/// * `address_family` - IP protocol version (default: IPv4)
/// * `mode` - Modbus protocol variant (default: TCP)
///
/// # Example
///
/// ```
/// use rust_modbus_slave::config::{AddressFamily, CommunicationMode, ModbusConfig};
///
/// let modbus_config = ModbusConfig {
///     port: 1502,
///     address: "127.0.0.1".to_string(),
///     address_family: AddressFamily::Ipv4,
///     mode: CommunicationMode::Tcp,
/// };
/// assert_eq!(modbus_config.communication_info().unwrap().port, 1502);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModbusConfig {
    /// The TCP port the Modbus slave will listen on.
    ///
    /// Default value is 502, the standard Modbus TCP port.
    pub port: u16,

    /// The network address the Modbus slave will bind to.
    ///
    /// An IPv4/IPv6 address or "localhost". "0.0.0.0" and "::" bind to every
    /// interface of the corresponding family.
    pub address: String,

    /// IP protocol version, must agree with `address`.
    #[serde(default = "default_address_family")]
    pub address_family: AddressFamily,

    /// Modbus protocol variant.
    #[serde(default = "default_mode")]
    pub mode: CommunicationMode,
}

fn default_address_family() -> AddressFamily {
    AddressFamily::Ipv4
}

fn default_mode() -> CommunicationMode {
    CommunicationMode::Tcp
}

impl Default for ModbusConfig {
    fn default() -> Self {
        Self {
            port: 502,                      // Standard Modbus TCP port
            address: "0.0.0.0".to_string(), // Any client may connect
            address_family: default_address_family(),
            mode: default_mode(),
        }
    }
}

impl ModbusConfig {
    /// Resolve the configured address to an IP address
    pub fn bind_address(&self) -> Result<IpAddr> {
        match self.address.as_str() {
            "localhost" => Ok(match self.address_family {
                AddressFamily::Ipv4 => IpAddr::from([127, 0, 0, 1]),
                AddressFamily::Ipv6 => IpAddr::from([0u16, 0, 0, 0, 0, 0, 0, 1]),
            }),
            address => address
                .parse::<IpAddr>()
                .with_context(|| format!("Invalid Modbus bind address: {}", address)),
        }
    }

    /// Transport parameters handed to the Modbus slave at setup
    pub fn communication_info(&self) -> Result<CommunicationInfo> {
        Ok(CommunicationInfo {
            port: self.port,
            address_family: self.address_family,
            mode: self.mode,
            bind_address: Some(self.bind_address()?),
        })
    }
}
