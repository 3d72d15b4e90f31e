//! Single-threaded readiness-based runtime.
//!
//! Built from small pieces:
//! - `ConnectionBuffer`: per-connection request accumulation and framing
//! - `Connection`: connection state machine and slab registry
//! - `Responder`: synchronous request processing
//! - `Reactor`: the mio event loop tying them together

mod buffer;
mod connection;
mod event_loop;
mod protocol;

pub use buffer::Framing;
pub use event_loop::Reactor;

use crate::config::Config;
use event_loop::ShutdownHandle;
use std::io;
use std::thread;
use tracing::{info, warn};

/// Bind the configured address and run the reactor until shutdown.
///
/// Ctrl-C stops the reactor the same way a `close` request does.
pub fn run(config: Config) -> io::Result<()> {
    let mut reactor = Reactor::bind(&config)?;
    info!(addr = %reactor.local_addr(), "Listening");

    watch_ctrl_c(reactor.shutdown_handle())?;
    reactor.run()
}

/// Wait for Ctrl-C on a background thread, then stop the reactor.
fn watch_ctrl_c(handle: ShutdownHandle) -> io::Result<()> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    thread::Builder::new()
        .name("signal".to_string())
        .spawn(move || {
            if let Err(e) = rt.block_on(tokio::signal::ctrl_c()) {
                warn!(error = %e, "Failed to listen for Ctrl-C");
                return;
            }
            info!("Shutdown signal received");
            if let Err(e) = handle.shutdown() {
                warn!(error = %e, "Failed to wake reactor");
            }
        })?;

    Ok(())
}
