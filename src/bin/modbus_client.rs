// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-modbus-slave project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

use clap::Parser;
use std::error::Error;
use tokio::time::Duration;
use tokio_modbus::prelude::*;

/// Modbus client for reading the registers of the Modbus slave
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Modbus server address
    #[clap(long, default_value = "127.0.0.1")]
    address: String,

    /// Modbus server port
    #[clap(long, default_value = "502")]
    port: u16,

    /// Starting register address
    #[clap(long, default_value = "0")]
    register: u16,

    /// Number of registers to read
    #[clap(long, default_value = "10")]
    quantity: u16,

    /// Value written to the first holding register before reading
    #[clap(long)]
    write: Option<u16>,

    /// Number of polls, one second apart
    #[clap(long, default_value = "1")]
    polls: u32,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init_from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    );

    let args = Args::parse();

    let socket_addr: std::net::SocketAddr =
        format!("{}:{}", args.address, args.port).parse()?;
    println!("Connecting to Modbus server at {}", socket_addr);

    let mut ctx = tcp::connect_slave(socket_addr, Slave(1)).await?;

    if let Some(value) = args.write {
        println!("Writing {} to holding register {}", value, args.register);
        ctx.write_single_register(args.register, value).await??;
    }

    for poll in 0..args.polls {
        if poll > 0 {
            tokio::time::sleep(Duration::from_secs(1)).await;
        }

        let holding = ctx
            .read_holding_registers(args.register, args.quantity)
            .await??;
        let input = ctx
            .read_input_registers(args.register, args.quantity)
            .await??;

        println!(
            "Registers {}..{} (poll {})",
            args.register,
            u32::from(args.register) + u32::from(args.quantity),
            poll + 1
        );
        for (i, (h, r)) in holding.iter().zip(input.iter()).enumerate() {
            println!(
                "  {:>5}: holding = {:>5}  input = {:>5}",
                u32::from(args.register) + i as u32,
                h,
                r
            );
        }
    }

    Ok(())
}
