//! hello-mux: a single-threaded `poll(2)` TCP server.
//!
//! One thread owns a listening socket and a fixed-capacity table of client
//! slots. Every turn it waits for readiness across all of them, accepts at
//! most one new client and performs one read per ready client. Clients
//! introduce themselves with a single Hello frame.

pub mod client;
pub mod config;
pub mod protocol;
pub mod runtime;
