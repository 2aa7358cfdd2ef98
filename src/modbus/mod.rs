// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-modbus-slave project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Modbus communication module
//!
//! This module exposes the register plane to Modbus TCP clients.
//!
//! ## Key Components
//!
//! - `ModbusSlave`: handle running the startup sequence (descriptors,
//!   transport setup, serve loop)
//! - `RegisterPlaneService`: the per-connection service translating Modbus
//!   requests into register store accesses
//!
//! ## Register Map
//!
//! With the default configuration:
//!
//! ### Input Registers (Read-Only)
//!
//! - Registers 0-99: incremented by 5 every second
//!
//! ### Holding Registers (Read/Write)
//!
//! - Registers 0-99: incremented by 1 every second, writable by clients
//!
//! ## Usage
//!
//! ```no_run
//! use rust_modbus_slave::modbus::{CommunicationInfo, ModbusSlave};
//! use rust_modbus_slave::registers::{RegisterArea, RegisterKind};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let mut slave = ModbusSlave::new();
//! slave.set_descriptor(RegisterArea::new(RegisterKind::Holding, 0, 100)?)?;
//! slave.set_descriptor(RegisterArea::new(RegisterKind::Input, 0, 100)?)?;
//! slave.setup(CommunicationInfo::default())?;
//! let store = slave.start().await?;
//! # Ok(())
//! # }
//! ```

pub mod modbus_server;
pub mod slave;

pub use modbus_server::RegisterPlaneService;
pub use slave::{CommunicationInfo, ModbusSlave};
