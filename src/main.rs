//! hello-mux server
//!
//! Listens on a TCP port and multiplexes up to `max_clients` connections on
//! a single thread. Configuration via CLI arguments or TOML file; runs until
//! SIGINT/SIGTERM.

use hello_mux::config::Config;
use hello_mux::runtime;
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

    runtime::run(config)?;
    Ok(())
}
