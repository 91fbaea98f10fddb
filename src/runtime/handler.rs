//! Application-level handling of bytes read from a client slot.
//!
//! The event loop owns the transport; a `Handler` only decides what the
//! bytes mean and whether the connection stays open. Handlers never write
//! back to the peer.

use crate::protocol::{self, DecodeResult, Message, PROTOCOL_VERSION};
use tracing::{debug, info, warn};

/// What the loop should do with a connection after its data was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Keep,
    Close,
}

/// Consumer of data received on a slot.
pub trait Handler {
    /// Called once per successful read with exactly the bytes of that read.
    fn on_data(&mut self, slot: usize, data: &[u8]) -> Disposition;
}

/// Decodes the hello handshake and checks the protocol version.
#[derive(Debug, Default)]
pub struct HelloHandler {
    handshakes: u64,
}

impl HelloHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful v1 handshakes seen so far.
    pub fn handshakes(&self) -> u64 {
        self.handshakes
    }
}

impl Handler for HelloHandler {
    fn on_data(&mut self, slot: usize, data: &[u8]) -> Disposition {
        debug!(
            slot,
            bytes = data.len(),
            data = %String::from_utf8_lossy(data),
            "Received data from client"
        );

        match protocol::decode(data) {
            DecodeResult::Complete(Message::Hello { version }, _) if version == PROTOCOL_VERSION => {
                self.handshakes += 1;
                info!(slot, version, "Client connected with protocol v1");
                Disposition::Keep
            }
            DecodeResult::Complete(Message::Hello { version }, _) => {
                warn!(slot, version, "Protocol version mismatch");
                Disposition::Close
            }
            DecodeResult::Incomplete => {
                warn!(slot, bytes = data.len(), "Truncated hello frame");
                Disposition::Close
            }
            DecodeResult::Error(e) => {
                warn!(slot, error = %e, "Protocol mismatch");
                Disposition::Close
            }
        }
    }
}
