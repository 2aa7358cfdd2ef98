// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-modbus-slave project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Errors raised by the register plane

use thiserror::Error;

use super::RegisterKind;

/// Errors that can occur while configuring or accessing the register plane
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegisterError {
    /// Bad or overlapping descriptor, or registration after the plane was sealed
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Access beyond the bounds of every registered area of the kind
    #[error("{count} {kind} register(s) starting at address {address} are out of range")]
    OutOfRange {
        kind: RegisterKind,
        address: u16,
        count: usize,
    },

    /// No area of this kind was ever registered
    #[error("No {0} register area registered")]
    NoSuchArea(RegisterKind),

    /// Underlying transport or network failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// A bank lock was poisoned by a panic while it was held
    #[error("Lock on {0} registers is poisoned")]
    LockPoisoned(RegisterKind),
}

impl RegisterError {
    /// Shorthand used by descriptor validation
    pub(crate) fn configuration(message: impl Into<String>) -> Self {
        RegisterError::Configuration(message.into())
    }

    /// Shorthand used by the transport layer
    pub(crate) fn transport(message: impl Into<String>) -> Self {
        RegisterError::Transport(message.into())
    }

    /// `true` for errors a request handler answers with a protocol exception
    pub fn is_addressing_error(&self) -> bool {
        matches!(
            self,
            RegisterError::OutOfRange { .. } | RegisterError::NoSuchArea(_)
        )
    }
}
