//! hello-client: send one Hello frame to a hello-mux server.

use clap::Parser;
use hello_mux::client;
use hello_mux::protocol::PROTOCOL_VERSION;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "hello-client")]
#[command(version = "0.1.0")]
#[command(about = "Send a hello handshake to a hello-mux server", long_about = None)]
struct Args {
    /// Server IPv4 address in dotted-decimal form
    address: Ipv4Addr,

    /// Server port
    #[arg(short, long, default_value_t = 8080)]
    port: u16,

    /// Protocol version to announce
    #[arg(long, default_value_t = PROTOCOL_VERSION)]
    protocol_version: u32,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
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

    let addr = SocketAddr::V4(SocketAddrV4::new(args.address, args.port));
    client::send_hello(addr, args.protocol_version)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;

    #[test]
    fn test_address_is_required() {
        let err = Args::try_parse_from(["hello-client"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn test_invalid_address_rejected() {
        assert!(Args::try_parse_from(["hello-client", "not-an-ip"]).is_err());
        assert!(Args::try_parse_from(["hello-client", "10.0.0.256"]).is_err());
    }

    #[test]
    fn test_defaults() {
        let args = Args::try_parse_from(["hello-client", "10.0.0.1"]).unwrap();
        assert_eq!(args.address, Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(args.port, 8080);
        assert_eq!(args.protocol_version, 1);
    }

    #[test]
    fn test_overrides() {
        let args = Args::try_parse_from([
            "hello-client",
            "127.0.0.1",
            "-p",
            "5555",
            "--protocol-version",
            "2",
        ])
        .unwrap();
        assert_eq!(args.port, 5555);
        assert_eq!(args.protocol_version, 2);
    }
}
