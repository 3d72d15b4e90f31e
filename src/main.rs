//! selector-httpd: a single-threaded selector-driven server
//!
//! One mio event loop multiplexes every connection. Each connection carries
//! exactly one request:
//! - accumulate bytes until the request is complete
//! - answer it (serve a file, echo it back, or stop the server)
//! - close the connection
//!
//! Configuration via CLI arguments or TOML file.

mod config;
mod protocols;
mod runtime;

use config::Config;
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
        listen = %config.listen,
        protocol = ?config.protocol,
        framing = ?config.framing,
        chunk_size = config.chunk_size,
        root = %config.root.display(),
        "Starting selector-httpd"
    );

    runtime::run(config)?;

    info!("Server stopped");
    Ok(())
}
