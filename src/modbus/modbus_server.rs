// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-modbus-slave project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Modbus service over the register plane
//!
//! For avoiding confusion with the Modbus master/slave terminology, this module uses
//! the terms "server" and "client" instead. The server is the device that provides data,
//! while the client is the device that requests data.
//!
//! The Modbus master is the device that requests data, while the Modbus slave is the device
//! that provides data. In other words, the Modbus master is here the client and the
//! Modbus slave is here the server.
//!
//! Framing and sessions are handled by `tokio-modbus`; this service only turns
//! decoded requests into register store accesses and store errors into
//! exception responses. Each request runs inside a single critical section of
//! the register kind it addresses.

use std::{future, sync::Arc};

use log::{debug, error};

use tokio_modbus::prelude::*;

use crate::registers::{RegisterError, RegisterKind, RegisterStore};

/// Maximum quantity of a read request (0x03, 0x04)
pub const MAX_READ_QUANTITY: u16 = 125;

/// Maximum quantity of a write request (0x10)
pub const MAX_WRITE_QUANTITY: u16 = 123;

/// Maximum write quantity of a read/write request (0x17)
pub const MAX_READ_WRITE_QUANTITY: u16 = 121;

/// A Modbus service answering register requests from a shared [`RegisterStore`].
///
/// One instance is created per client connection; all instances share the
/// same store.
///
/// ### Function Codes
///
/// | Code | Function | Register kind |
/// |------|----------|---------------|
/// | 0x03 | Read Holding Registers | holding |
/// | 0x04 | Read Input Registers | input |
/// | 0x06 | Write Single Register | holding |
/// | 0x10 | Write Multiple Registers | holding |
/// | 0x17 | Read/Write Multiple Registers | holding |
///
/// Any other function code is answered with `IllegalFunction`.
#[derive(Clone)]
pub struct RegisterPlaneService {
    store: Arc<RegisterStore>,
}

impl tokio_modbus::server::Service for RegisterPlaneService {
    type Request = Request<'static>;
    type Response = Response;
    type Exception = ExceptionCode;
    type Future = future::Ready<Result<Self::Response, Self::Exception>>;

    fn call(&self, req: Self::Request) -> Self::Future {
        debug!("Received Modbus request: {:?}", req);

        let res = match req {
            Request::ReadInputRegisters(addr, cnt) => {
                debug!(
                    "Reading {} input registers starting from address {}",
                    cnt, addr
                );
                check_quantity(cnt, MAX_READ_QUANTITY)
                    .and_then(|_| self.register_read(RegisterKind::Input, addr, cnt))
                    .map(Response::ReadInputRegisters)
            }
            Request::ReadHoldingRegisters(addr, cnt) => {
                debug!(
                    "Reading {} holding registers starting from address {}",
                    cnt, addr
                );
                check_quantity(cnt, MAX_READ_QUANTITY)
                    .and_then(|_| self.register_read(RegisterKind::Holding, addr, cnt))
                    .map(Response::ReadHoldingRegisters)
            }
            Request::WriteMultipleRegisters(addr, values) => {
                debug!(
                    "Writing {} values to holding registers starting from address {}",
                    values.len(),
                    addr
                );
                let cnt = u16::try_from(values.len()).unwrap_or(u16::MAX);
                check_quantity(cnt, MAX_WRITE_QUANTITY)
                    .and_then(|_| self.register_write(addr, &values))
                    .map(|_| Response::WriteMultipleRegisters(addr, cnt))
            }
            Request::WriteSingleRegister(addr, value) => {
                debug!("Writing value {} to holding register {}", value, addr);
                self.register_write(addr, std::slice::from_ref(&value))
                    .map(|_| Response::WriteSingleRegister(addr, value))
            }
            Request::ReadWriteMultipleRegisters(read_addr, read_cnt, write_addr, values) => {
                debug!(
                    "Writing {} holding registers at {} then reading {} at {}",
                    values.len(),
                    write_addr,
                    read_cnt,
                    read_addr
                );
                let write_cnt = u16::try_from(values.len()).unwrap_or(u16::MAX);
                check_quantity(read_cnt, MAX_READ_QUANTITY)
                    .and_then(|_| check_quantity(write_cnt, MAX_READ_WRITE_QUANTITY))
                    .and_then(|_| self.register_read_write(read_addr, read_cnt, write_addr, &values))
                    .map(Response::ReadWriteMultipleRegisters)
            }
            _ => {
                error!(
                    "Exception::IllegalFunction - Unimplemented function code in request: {req:?}"
                );
                Err(ExceptionCode::IllegalFunction)
            }
        };

        future::ready(res)
    }
}

impl RegisterPlaneService {
    /// Create a service answering from `store`
    pub fn new(store: Arc<RegisterStore>) -> Self {
        Self { store }
    }

    /// Register store behind this service
    pub fn store(&self) -> &Arc<RegisterStore> {
        &self.store
    }

    fn register_read(
        &self,
        kind: RegisterKind,
        addr: u16,
        cnt: u16,
    ) -> Result<Vec<u16>, ExceptionCode> {
        let values = self
            .store
            .read(kind, addr, cnt.into())
            .map_err(exception_for)?;
        debug!("Successfully read {} registers from address {}", cnt, addr);
        Ok(values)
    }

    fn register_write(&self, addr: u16, values: &[u16]) -> Result<(), ExceptionCode> {
        self.store
            .write(RegisterKind::Holding, addr, values)
            .map_err(exception_for)?;
        debug!(
            "Successfully wrote {} values starting at register {}",
            values.len(),
            addr
        );
        Ok(())
    }

    /// Write then read holding registers inside one critical section
    ///
    /// Both ranges are checked before anything is written.
    fn register_read_write(
        &self,
        read_addr: u16,
        read_cnt: u16,
        write_addr: u16,
        values: &[u16],
    ) -> Result<Vec<u16>, ExceptionCode> {
        self.store
            .with_exclusive_access(RegisterKind::Holding, |bank| {
                bank.cells(read_addr, read_cnt.into())?;
                bank.write(write_addr, values)?;
                bank.read(read_addr, read_cnt.into())
            })
            .and_then(|res| res)
            .map_err(exception_for)
    }
}

/// Reject quantities outside `1..=max`
fn check_quantity(cnt: u16, max: u16) -> Result<(), ExceptionCode> {
    if cnt == 0 || cnt > max {
        error!(
            "Exception::IllegalDataValue - Quantity {} outside 1..={}",
            cnt, max
        );
        return Err(ExceptionCode::IllegalDataValue);
    }
    Ok(())
}

/// Translate a store error into the exception answered to the client
fn exception_for(error: RegisterError) -> ExceptionCode {
    if error.is_addressing_error() {
        error!("Exception::IllegalDataAddress - {}", error);
        ExceptionCode::IllegalDataAddress
    } else {
        error!("Exception::ServerDeviceFailure - {}", error);
        ExceptionCode::ServerDeviceFailure
    }
}
