//! Garmin Product Query Tool
//!
//! Asks a Garmin GPS on a serial port to identify itself: sends a product
//! request, waits for the ACK, then reads and acknowledges the product data.
//!
//! Usage:
//!   cargo run --example product_query -- [OPTIONS] [PORT]
//!
//! Options:
//!   --port PORT       Serial port (default: first port found)
//!   --baud RATE       Baud rate (default: 9600)
//!   --timeout MS      Read timeout in ms (default: 1000)
//!   --resync N        Decode attempts per packet (default: 1)
//!   --config FILE     Load settings from a JSON file
//!   --list            List serial ports and exit
//!   --demo            Talk to a simulated device instead of a port
//!
//! Set RUST_LOG=garmin_link_core=trace to see every byte on the wire.

use anyhow::{bail, Context, Result};
use garmin_link_core::config::LinkConfig;
use garmin_link_core::protocol::{
    list_ports, open_transport, Link, MemoryTransport, PacketBuilder, PacketId, Transport, ACK,
};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    let mut config = LinkConfig::default();
    let mut demo = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--port" | "-p" => {
                i += 1;
                config.port_name = value(&args, i, "--port")?.to_string();
            }
            "--baud" | "-b" => {
                i += 1;
                config.baud_rate = value(&args, i, "--baud")?
                    .parse()
                    .context("invalid baud rate")?;
            }
            "--timeout" | "-t" => {
                i += 1;
                config.timeout_ms = value(&args, i, "--timeout")?
                    .parse()
                    .context("invalid timeout")?;
            }
            "--resync" | "-r" => {
                i += 1;
                config.resync_attempts = value(&args, i, "--resync")?
                    .parse()
                    .context("invalid resync attempts")?;
            }
            "--config" | "-c" => {
                i += 1;
                config = LinkConfig::from_json_file(value(&args, i, "--config")?)?;
            }
            "--list" | "-l" => {
                print_ports();
                return Ok(());
            }
            "--demo" => {
                demo = true;
            }
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            arg if !arg.starts_with('-') => {
                config.port_name = arg.to_string();
            }
            _ => {
                eprintln!("Unknown option: {}", args[i]);
            }
        }
        i += 1;
    }
    config.validate()?;

    if demo {
        println!("Using simulated device");
        let mut link = Link::with_config(simulated_device()?, &config);
        return query(&mut link);
    }

    if config.port_name.is_empty() {
        match list_ports().into_iter().next() {
            Some(port) => config.port_name = port.name,
            None => bail!("no serial ports found; pass --port or use --demo"),
        }
    }

    println!("Configuration:");
    println!("  Port:              {}", config.port_name);
    println!("  Baud rate:         {}", config.baud_rate);
    println!("  Read timeout:      {}ms", config.timeout_ms);
    println!("  Decode attempts:   {}", config.resync_attempts);
    println!();

    let transport = open_transport(&config)
        .with_context(|| format!("failed to open {}", config.port_name))?;
    let mut link = Link::with_config(transport, &config);
    query(&mut link)
}

fn query<T: Transport>(link: &mut Link<T>) -> Result<()> {
    let product = link
        .request_product_data()
        .context("product query failed")?;

    println!("Product ID:        {}", product.product_id);
    println!("Software version:  {}", product.version_string());
    println!("Device:            {}", product.description());
    for extra in product.descriptions.iter().skip(1) {
        println!("                   {}", extra);
    }

    let (tx_bytes, rx_bytes, tx_packets, rx_packets) = link.get_counters();
    println!();
    println!(
        "Sent {} packets ({} bytes), received {} packets ({} bytes)",
        tx_packets, tx_bytes, rx_packets, rx_bytes
    );
    Ok(())
}

/// Scripted replies of a device answering one product request
fn simulated_device() -> Result<MemoryTransport> {
    let ack = PacketBuilder::new()
        .u16_le(u16::from(PacketId::ProductRequest.as_u8()))
        .build(ACK)?;
    let product = PacketBuilder::new()
        .u16_le(130)
        .u16_le(370)
        .bytes(b"eTrex Software Version 3.70\0")
        .build(PacketId::ProductData.as_u8())?;

    let mut replies = Vec::new();
    ack.encode_into(&mut replies);
    product.encode_into(&mut replies);
    Ok(MemoryTransport::new(replies))
}

fn value<'a>(args: &'a [String], i: usize, flag: &str) -> Result<&'a str> {
    match args.get(i) {
        Some(v) => Ok(v.as_str()),
        None => bail!("{} needs a value", flag),
    }
}

fn print_ports() {
    let ports = list_ports();
    if ports.is_empty() {
        println!("No serial ports found");
    }
    for port in ports {
        println!("{:<28} {}", port.name, port.display_name());
    }
}

fn print_help() {
    println!("Garmin Product Query Tool");
    println!();
    println!("Usage: product_query [OPTIONS] [PORT]");
    println!();
    println!("Options:");
    println!("  --port, -p PORT     Serial port (default: first port found)");
    println!("  --baud, -b RATE     Baud rate (default: 9600)");
    println!("  --timeout, -t MS    Read timeout (default: 1000)");
    println!("  --resync, -r N      Decode attempts per packet (default: 1)");
    println!("  --config, -c FILE   Load settings from a JSON file");
    println!("  --list, -l          List serial ports and exit");
    println!("  --demo              Use a simulated device");
    println!("  --help, -h          Show this help");
}
