//! hello-reactor: non-blocking HELLO handshake server
//!
//! Features:
//! - Single-threaded event loop, no thread per connection
//! - Level-triggered (poll) or edge-triggered (epoll/kqueue) backend
//! - Fixed connection capacity; excess connections are closed on accept
//! - Configuration via CLI arguments or TOML file

use hello_reactor::config::Config;
use hello_reactor::runtime;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        host = %config.host,
        port = config.port,
        backend = %config.backend,
        max_connections = config.max_connections,
        backlog = config.backlog,
        poll_timeout_ms = config.poll_timeout_ms,
        parse_mode = ?config.parse_mode,
        "Starting hello-reactor server"
    );

    runtime::run(&config)?;
    Ok(())
}
