// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-modbus-slave project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Register plane
//!
//! This module holds the 16-bit registers exposed to Modbus clients and the
//! locking discipline that lets the Modbus service and the register updater
//! work on them concurrently.
//!
//! ## Key Components
//!
//! - [`RegisterArea`]: descriptor binding a kind and an address range to a
//!   block of cells, with its size in cells and in bytes
//! - [`RegisterStore`]: owns the cells, validates descriptors and provides
//!   bounds-checked access under per-kind locks
//! - [`RegisterError`]: configuration, addressing, transport and lock errors
//!
//! ## Consistency
//!
//! Every access, local or remote, goes through
//! [`RegisterStore::with_exclusive_access`] or
//! [`RegisterStore::with_exclusive_access_all`]. A read of N registers is one
//! critical section, so it observes either all or none of an update pass.

pub mod area;
pub mod error;
pub mod store;

pub use area::{RegisterArea, RegisterKind, ADDRESS_SPACE, CELL_SIZE};
pub use error::RegisterError;
pub use store::{AreaHandle, AreaSnapshot, PlaneGuard, PlaneSnapshot, RegisterBank, RegisterStore};
