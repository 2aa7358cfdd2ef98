// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-modbus-slave project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Rust Modbus slave library
//!
//! This library provides a Modbus TCP slave exposing holding and input
//! registers, a register updater producing live data, and the daemon and
//! configuration layers tying them together.
//!
//! - [`registers`]: the register plane shared by the server and the updater
//! - [`modbus`]: the Modbus TCP service and slave handle
//! - [`updater`]: periodic increments of every register
//! - [`daemon`]: task management and startup sequence
//! - [`config`]: YAML configuration validated against a JSON schema

pub mod config;
pub mod daemon;
pub mod modbus;
pub mod registers;
pub mod updater;
