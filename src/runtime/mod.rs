//! Single-threaded readiness runtime.
//!
//! - `ConnectionTable`: fixed-capacity slot registry (no I/O)
//! - `select`: query-set builder and the `poll(2)` wait
//! - `EventLoop`: accept/read dispatch over the table
//! - `Handler`: what the bytes read from a slot mean

pub mod connection;
pub mod event_loop;
pub mod handler;
pub mod select;
pub mod shutdown;

pub use connection::{ConnectionSlot, ConnectionTable, SlotState};
pub use event_loop::{EventLoop, ServerError, Turn};
pub use handler::{Disposition, Handler, HelloHandler};
pub use shutdown::ShutdownHandle;

use crate::config::Config;
use tracing::info;

/// Bind, install signal handlers and serve until SIGINT/SIGTERM.
pub fn run(config: Config) -> Result<(), ServerError> {
    let mut event_loop = EventLoop::bind(&config, HelloHandler::new())?;
    event_loop.install_signal_handlers()?;

    let addr = event_loop
        .local_addr()
        .map_err(|source| ServerError::Setup {
            stage: "getsockname",
            source,
        })?;
    info!(
        addr = %addr,
        backlog = config.backlog,
        max_clients = config.max_clients,
        buffer_size = config.buffer_size,
        "Server listening"
    );

    event_loop.run()
}
