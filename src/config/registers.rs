// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-modbus-slave project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Register map configuration
//!
//! Lists the holding and input areas registered with the Modbus slave at
//! startup. The default map is one area of 100 registers at offset 0 for
//! each kind.

use serde::{Deserialize, Serialize};

use crate::registers::{RegisterArea, RegisterError, RegisterKind};

/// Number of registers in each default area
pub const DEFAULT_AREA_SIZE: usize = 100;

/// One contiguous register area
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AreaConfig {
    /// First Modbus register address of the area
    pub start_offset: u16,
    /// Number of 16-bit registers in the area
    pub count: usize,
}

impl AreaConfig {
    /// Build the descriptor of this area for `kind`
    pub fn descriptor(&self, kind: RegisterKind) -> Result<RegisterArea, RegisterError> {
        RegisterArea::new(kind, self.start_offset, self.count)
    }
}

impl Default for AreaConfig {
    fn default() -> Self {
        Self {
            start_offset: 0,
            count: DEFAULT_AREA_SIZE,
        }
    }
}

/// Register areas by kind
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistersConfig {
    /// Holding register areas (read/write from the Modbus side)
    pub holding: Vec<AreaConfig>,
    /// Input register areas (read-only from the Modbus side)
    pub input: Vec<AreaConfig>,
}

impl Default for RegistersConfig {
    fn default() -> Self {
        Self {
            holding: vec![AreaConfig::default()],
            input: vec![AreaConfig::default()],
        }
    }
}

impl RegistersConfig {
    /// Configured areas of `kind`
    pub fn areas(&self, kind: RegisterKind) -> &[AreaConfig] {
        match kind {
            RegisterKind::Holding => &self.holding,
            RegisterKind::Input => &self.input,
        }
    }

    /// Descriptors of `kind`, in configuration order
    pub fn descriptors(&self, kind: RegisterKind) -> Result<Vec<RegisterArea>, RegisterError> {
        self.areas(kind)
            .iter()
            .map(|area| area.descriptor(kind))
            .collect()
    }
}
