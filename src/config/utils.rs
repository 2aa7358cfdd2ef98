// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-modbus-slave project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Configuration utilities
//!
//! This module provides utility functions for working with configuration
//! settings, including validation and schema management.

use anyhow::{Context, Result};
use log::debug;

use super::{AddressFamily, Config};
use crate::registers::{RegisterKind, RegisterStore};

/// JSON schema every configuration file is validated against
pub(crate) const CONFIG_SCHEMA: &str = include_str!("../../resources/config.schema.json");

/// Output the embedded JSON schema to the console.
///
/// This function is called when the `--show-config-schema` flag is provided
/// on the command line. It outputs the full JSON schema for the configuration
/// to stdout, formatted for readability.
///
/// # Example
///
/// ```bash
/// ./rust_modbus_slave --show-config-schema > config_schema.json
/// ```
pub fn output_config_schema() -> Result<()> {
    // Parse the schema to a JSON Value to pretty-format it
    let schema: serde_json::Value =
        serde_json::from_str(CONFIG_SCHEMA).context("Failed to parse JSON schema")?;

    let formatted_schema =
        serde_json::to_string_pretty(&schema).context("Failed to format JSON schema")?;

    println!("{}", formatted_schema);

    Ok(())
}

/// Check if a string is a valid IP address
///
/// Validates that a string represents a valid IPv4 or IPv6 address,
/// or is one of the special values like "localhost" or "0.0.0.0".
///
/// # Arguments
///
/// * `addr` - The address string to validate
///
/// # Returns
///
/// `true` if the address is valid, `false` otherwise
pub fn is_valid_ip_address(addr: &str) -> bool {
    if addr.parse::<std::net::IpAddr>().is_ok() {
        return true;
    }

    // Special cases
    matches!(addr, "localhost" | "::" | "::0" | "0.0.0.0")
}

/// Validates the configuration against rules the JSON schema cannot express.
///
/// # Validation Rules
///
/// - **Port**: the Modbus port must not be 0
/// - **Address**: the bind address must parse and belong to `address_family`
/// - **Register map**: each kind has at least one area, every area is a valid
///   descriptor and areas of the same kind do not overlap
/// - **Updater**: the interval must be at least 1 ms
pub fn validate_specific_rules(config: &Config) -> Result<()> {
    debug!("Performing additional validation checks");

    if config.modbus.port == 0 {
        anyhow::bail!("Invalid Modbus port number: {}", config.modbus.port);
    }

    if !is_valid_ip_address(&config.modbus.address) {
        anyhow::bail!("Invalid Modbus bind address: {}", config.modbus.address);
    }
    let address = config.modbus.bind_address()?;
    if AddressFamily::of(&address) != config.modbus.address_family {
        anyhow::bail!(
            "Modbus bind address {} is not an {} address",
            address,
            config.modbus.address_family
        );
    }

    // Register the whole map in a scratch store to catch overlaps
    let mut scratch = RegisterStore::new();
    for kind in RegisterKind::ALL {
        if config.registers.areas(kind).is_empty() {
            anyhow::bail!("At least one {} register area is required", kind);
        }
        for descriptor in config.registers.descriptors(kind)? {
            scratch
                .register_descriptor(descriptor)
                .with_context(|| format!("Invalid {} register map", kind))?;
        }
    }

    if config.updater.interval_ms == 0 {
        anyhow::bail!("Updater interval must be at least 1 ms");
    }

    Ok(())
}
