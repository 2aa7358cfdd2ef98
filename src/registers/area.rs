// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-modbus-slave project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Register kinds and area descriptors
//!
//! An area descriptor binds a register kind and an address range to a block of
//! 16-bit cells. Sizes are tracked twice on purpose: in cells, which is what the
//! store indexes with, and in bytes, which is what descriptors are exchanged in.
//! Both are validated against each other when a descriptor is built.

use std::fmt;
use std::ops::Range;

use serde::{Deserialize, Serialize};

use super::RegisterError;

/// Size of a register cell in bytes
pub const CELL_SIZE: usize = std::mem::size_of::<u16>();

/// Number of addressable registers per kind in the Modbus data model
pub const ADDRESS_SPACE: usize = u16::MAX as usize + 1;

/// Register address space exposed to Modbus clients
///
/// The declaration order is the global lock order used whenever more than one
/// kind is locked at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegisterKind {
    /// Read/write registers (function codes 0x03, 0x06, 0x10, 0x17)
    Holding,
    /// Read-only registers (function code 0x04)
    Input,
}

impl RegisterKind {
    /// All kinds, in lock order
    pub const ALL: [RegisterKind; 2] = [RegisterKind::Holding, RegisterKind::Input];

    pub(crate) fn index(self) -> usize {
        match self {
            RegisterKind::Holding => 0,
            RegisterKind::Input => 1,
        }
    }
}

impl fmt::Display for RegisterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegisterKind::Holding => write!(f, "holding"),
            RegisterKind::Input => write!(f, "input"),
        }
    }
}

/// Descriptor of a contiguous register area
///
/// Built with [`RegisterArea::new`] from a cell count or with
/// [`RegisterArea::from_byte_length`] from a byte length. Either way the
/// descriptor satisfies `byte_length == 2 * cell_count`, holds at least one
/// cell and fits in the 16-bit address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RegisterArea {
    kind: RegisterKind,
    start_offset: u16,
    cell_count: usize,
    byte_length: usize,
}

impl RegisterArea {
    /// Create a descriptor for `cell_count` registers starting at `start_offset`
    pub fn new(
        kind: RegisterKind,
        start_offset: u16,
        cell_count: usize,
    ) -> Result<Self, RegisterError> {
        let byte_length = cell_count.checked_mul(CELL_SIZE).ok_or_else(|| {
            RegisterError::configuration(format!(
                "{kind} area at {start_offset}: cell count {cell_count} overflows"
            ))
        })?;
        Self::from_parts(kind, start_offset, cell_count, byte_length)
    }

    /// Create a descriptor from a size expressed in bytes
    ///
    /// The byte length must be even and must describe exactly `cell_count`
    /// registers. A length computed as twice the byte size of the backing
    /// array is rejected here rather than silently halved.
    pub fn from_byte_length(
        kind: RegisterKind,
        start_offset: u16,
        byte_length: usize,
        cell_count: usize,
    ) -> Result<Self, RegisterError> {
        if byte_length % CELL_SIZE != 0 {
            return Err(RegisterError::configuration(format!(
                "{kind} area at {start_offset}: byte length {byte_length} is not a multiple of {CELL_SIZE}"
            )));
        }
        Self::from_parts(kind, start_offset, cell_count, byte_length)
    }

    fn from_parts(
        kind: RegisterKind,
        start_offset: u16,
        cell_count: usize,
        byte_length: usize,
    ) -> Result<Self, RegisterError> {
        let area = RegisterArea {
            kind,
            start_offset,
            cell_count,
            byte_length,
        };
        area.validate()?;
        Ok(area)
    }

    /// Check the descriptor invariants
    pub fn validate(&self) -> Result<(), RegisterError> {
        if self.cell_count == 0 {
            return Err(RegisterError::configuration(format!(
                "{} area at {}: an area must hold at least one register",
                self.kind, self.start_offset
            )));
        }
        if Some(self.byte_length) != self.cell_count.checked_mul(CELL_SIZE) {
            return Err(RegisterError::configuration(format!(
                "{} area at {}: byte length {} does not match {} registers ({} bytes)",
                self.kind,
                self.start_offset,
                self.byte_length,
                self.cell_count,
                self.cell_count.saturating_mul(CELL_SIZE)
            )));
        }
        if (self.start_offset as usize)
            .checked_add(self.cell_count)
            .map_or(true, |end| end > ADDRESS_SPACE)
        {
            return Err(RegisterError::configuration(format!(
                "{} area at {} with {} registers exceeds the 16-bit address space",
                self.kind, self.start_offset, self.cell_count
            )));
        }
        Ok(())
    }

    pub fn kind(&self) -> RegisterKind {
        self.kind
    }

    pub fn start_offset(&self) -> u16 {
        self.start_offset
    }

    pub fn cell_count(&self) -> usize {
        self.cell_count
    }

    pub fn byte_length(&self) -> usize {
        self.byte_length
    }

    /// Absolute register addresses covered by this area
    pub fn address_range(&self) -> Range<usize> {
        let start = self.start_offset as usize;
        start..start + self.cell_count
    }

    /// `true` if both areas have the same kind and share at least one address
    pub fn overlaps(&self, other: &RegisterArea) -> bool {
        let a = self.address_range();
        let b = other.address_range();
        self.kind == other.kind && a.start < b.end && b.start < a.end
    }

    /// Offset of `[address, address + count)` inside this area, if it fits
    pub(crate) fn local_range(&self, address: u16, count: usize) -> Option<Range<usize>> {
        let range = self.address_range();
        let address = address as usize;
        if address < range.start || address >= range.end {
            return None;
        }
        let offset = address - range.start;
        let end = offset.checked_add(count)?;
        (end <= self.cell_count).then_some(offset..end)
    }
}

impl fmt::Display for RegisterArea {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let range = self.address_range();
        write!(
            f,
            "{} registers {}..{} ({} bytes)",
            self.kind, range.start, range.end, self.byte_length
        )
    }
}
