//! Client side of the hello handshake.
//!
//! Connects, sends exactly one Hello frame and closes. The server never
//! answers, so there is nothing to read back.

use crate::protocol::{encode, Message};
use std::io::{self, Write};
use std::net::{SocketAddr, TcpStream};
use tracing::{debug, info};

/// Send one Hello frame carrying `version` to `addr`.
pub fn send_hello(addr: SocketAddr, version: u32) -> io::Result<()> {
    let mut stream = TcpStream::connect(addr)?;
    info!(server = %addr, "Connected");

    let frame = encode(&Message::Hello { version });
    stream.write_all(&frame)?;
    stream.flush()?;
    debug!(bytes = frame.len(), version, "Sent hello");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::net::TcpListener;

    #[test]
    fn test_send_hello_writes_one_frame_and_closes() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        send_hello(addr, 1).unwrap();

        let (mut server_side, _) = listener.accept().unwrap();
        let mut received = Vec::new();
        server_side.read_to_end(&mut received).unwrap();
        assert_eq!(received, vec![0, 0, 0, 0, 0, 4, 0, 0, 0, 1]);
    }

    #[test]
    fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        assert!(send_hello(addr, 1).is_err());
    }
}
