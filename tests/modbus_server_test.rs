// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-modbus-slave project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Tests for the Modbus slave
//!
//! These tests start a slave on a loopback port chosen by the OS and talk to
//! it with the tokio-modbus client: reading input and holding registers,
//! writing holding registers, error conditions, and live data produced by the
//! register updater.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time;
use tokio_modbus::prelude::*;

use rust_modbus_slave::config::UpdaterConfig;
use rust_modbus_slave::modbus::{CommunicationInfo, ModbusSlave};
use rust_modbus_slave::registers::{RegisterArea, RegisterKind, RegisterStore};
use rust_modbus_slave::updater::RegisterUpdater;

/// Test utility function to start a slave with 100 holding and 100 input
/// registers at offset 0
async fn start_test_slave(
) -> Result<(SocketAddr, Arc<RegisterStore>, ModbusSlave), Box<dyn std::error::Error>> {
    let mut slave = ModbusSlave::new();
    slave.set_descriptor(RegisterArea::new(RegisterKind::Holding, 0, 100)?)?;
    slave.set_descriptor(RegisterArea::new(RegisterKind::Input, 0, 100)?)?;
    slave.setup(CommunicationInfo {
        port: 0,
        bind_address: Some(IpAddr::V4(Ipv4Addr::LOCALHOST)),
        ..CommunicationInfo::default()
    })?;

    let store = slave.start().await?;
    let socket_addr = slave.local_addr().ok_or("slave has no local address")?;
    println!("Test server started on: {}", socket_addr);

    Ok((socket_addr, store, slave))
}

#[tokio::test]
async fn test_read_input_registers() -> Result<(), Box<dyn std::error::Error>> {
    let (socket_addr, store, mut slave) = start_test_slave().await?;
    store.write(RegisterKind::Input, 0, &[11, 22, 33])?;

    let mut ctx = tcp::connect(socket_addr).await?;
    let data = ctx.read_input_registers(0, 4).await??;
    assert_eq!(data, vec![11, 22, 33, 0]);

    ctx.disconnect().await?;
    slave.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_write_then_read_holding_registers() -> Result<(), Box<dyn std::error::Error>> {
    let (socket_addr, store, mut slave) = start_test_slave().await?;

    let mut ctx = tcp::connect(socket_addr).await?;
    ctx.write_multiple_registers(10, &[100, 200, 300]).await??;
    let data = ctx.read_holding_registers(10, 3).await??;
    assert_eq!(data, vec![100, 200, 300]);

    ctx.write_single_register(99, 999).await??;
    assert_eq!(store.read(RegisterKind::Holding, 99, 1)?, vec![999]);

    ctx.disconnect().await?;
    slave.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_read_write_multiple_registers() -> Result<(), Box<dyn std::error::Error>> {
    let (socket_addr, _store, mut slave) = start_test_slave().await?;

    let mut ctx = tcp::connect(socket_addr).await?;
    ctx.write_single_register(0, 1).await??;
    let data = ctx.read_write_multiple_registers(0, 3, 1, &[2, 3]).await??;
    assert_eq!(data, vec![1, 2, 3]);

    ctx.disconnect().await?;
    slave.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_out_of_range_requests() -> Result<(), Box<dyn std::error::Error>> {
    let (socket_addr, store, mut slave) = start_test_slave().await?;

    let mut ctx = tcp::connect(socket_addr).await?;

    // Last register is 99
    let result = ctx.read_holding_registers(99, 2).await?;
    assert!(matches!(result, Err(ExceptionCode::IllegalDataAddress)));

    let result = ctx.read_input_registers(100, 1).await?;
    assert!(matches!(result, Err(ExceptionCode::IllegalDataAddress)));

    // Nothing is written when the range does not fit
    let result = ctx.write_multiple_registers(98, &[1, 2, 3]).await?;
    assert!(matches!(result, Err(ExceptionCode::IllegalDataAddress)));
    assert_eq!(store.read(RegisterKind::Holding, 98, 2)?, vec![0, 0]);

    // The connection stays usable after an exception
    let data = ctx.read_holding_registers(0, 1).await??;
    assert_eq!(data, vec![0]);

    ctx.disconnect().await?;
    slave.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_unsupported_function_code() -> Result<(), Box<dyn std::error::Error>> {
    let (socket_addr, _store, mut slave) = start_test_slave().await?;

    let mut ctx = tcp::connect(socket_addr).await?;
    let result = ctx.read_coils(0, 1).await?;
    assert!(matches!(result, Err(ExceptionCode::IllegalFunction)));

    ctx.disconnect().await?;
    slave.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_multiple_clients_share_the_plane() -> Result<(), Box<dyn std::error::Error>> {
    let (socket_addr, _store, mut slave) = start_test_slave().await?;

    let mut writer = tcp::connect(socket_addr).await?;
    let mut reader = tcp::connect(socket_addr).await?;

    writer.write_single_register(42, 4242).await??;
    let data = reader.read_holding_registers(42, 1).await??;
    assert_eq!(data, vec![4242]);

    writer.disconnect().await?;
    reader.disconnect().await?;
    slave.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_updater_produces_consistent_live_data() -> Result<(), Box<dyn std::error::Error>> {
    let (socket_addr, store, mut slave) = start_test_slave().await?;

    let running = Arc::new(AtomicBool::new(true));
    let config = UpdaterConfig {
        interval_ms: 5,
        ..UpdaterConfig::default()
    };
    let handle = RegisterUpdater::new(store.clone(), config)?.spawn(running.clone());

    let mut ctx = tcp::connect(socket_addr).await?;
    let mut last = 0;
    for _ in 0..20 {
        let data = ctx.read_input_registers(0, 100).await??;
        // A whole read lands between two update passes
        assert!(data.iter().all(|&v| v == data[0]), "torn read: {:?}", data);
        assert_eq!(data[0] % 5, 0);
        assert!(data[0] >= last);
        last = data[0];
        time::sleep(Duration::from_millis(3)).await;
    }
    assert!(last > 0);

    running.store(false, Ordering::SeqCst);
    handle.await??;

    ctx.disconnect().await?;
    slave.shutdown().await;
    Ok(())
}
