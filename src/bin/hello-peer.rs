//! hello-peer: run one HELLO handshake against a server.
//!
//! Sends `HELLO <sequence>`, prints the server's reply, sends the final
//! message and exits. Any deviation exits with a non-zero status.

use clap::Parser;
use hello_reactor::config::validate_port;
use hello_reactor::peer;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "hello-peer")]
#[command(version = "0.1.0")]
#[command(about = "HELLO handshake client", long_about = None)]
struct Args {
    /// Server IPv4 address
    host: Ipv4Addr,

    /// Server port (1024-49151)
    port: u16,

    /// Initial sequence number
    #[arg(value_parser = clap::value_parser!(i64).range(0..))]
    sequence: i64,

    /// Connect/read/write timeout in seconds
    #[arg(long, default_value_t = 5)]
    timeout: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let addr = SocketAddr::from((args.host, validate_port(args.port)?));
    debug!(addr = %addr, sequence = args.sequence, "Connecting");

    let reply = peer::handshake(addr, args.sequence, Duration::from_secs(args.timeout))?;
    println!("HELLO {reply}");

    info!(addr = %addr, reply, "Handshake completed");
    Ok(())
}
