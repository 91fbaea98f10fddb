//! Single-threaded multiplexing loop.
//!
//! Each turn rebuilds the query set from the connection table, blocks in
//! `poll(2)` until something is readable, then dispatches:
//! - listener ready: accept exactly one connection into the first free slot,
//!   or close it straight away when the table is full
//! - client ready: one read into the slot buffer; EOF or error releases the slot
//!
//! The listener is always serviced before clients within a turn. Pending
//! connections beyond the first stay queued and keep the listener ready
//! for the next turn.

use crate::config::Config;
use crate::runtime::connection::ConnectionTable;
use crate::runtime::handler::{Disposition, Handler};
use crate::runtime::select::{self, build_query_set};
use crate::runtime::shutdown::{Shutdown, ShutdownHandle};
use std::fmt;
use std::io;
use std::net::{AddrParseError, SocketAddr, TcpListener};
use std::os::unix::io::{AsRawFd, RawFd};
use tracing::{debug, error, info, trace, warn};

/// Fatal server errors. Per-connection failures never surface here.
#[derive(Debug)]
pub enum ServerError {
    /// The configured listen address does not parse.
    InvalidAddress(String, AddrParseError),
    /// A setup step (socket, bind, listen, ...) failed.
    Setup {
        stage: &'static str,
        source: io::Error,
    },
    /// The readiness wait itself failed.
    Poll(io::Error),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerError::InvalidAddress(addr, e) => {
                write!(f, "Invalid listen address '{addr}': {e}")
            }
            ServerError::Setup { stage, source } => write!(f, "{stage} failed: {source}"),
            ServerError::Poll(e) => write!(f, "Readiness wait failed: {e}"),
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ServerError::InvalidAddress(_, e) => Some(e),
            ServerError::Setup { source, .. } => Some(source),
            ServerError::Poll(e) => Some(e),
        }
    }
}

fn setup(stage: &'static str) -> impl FnOnce(io::Error) -> ServerError {
    move |source| ServerError::Setup { stage, source }
}

/// What happened during one turn of the loop.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Turn {
    /// Slot that received a newly accepted connection.
    pub accepted: Option<usize>,
    /// A connection was accepted and closed because the table was full.
    pub rejected: bool,
    /// Slots whose read returned data, in dispatch order.
    pub received: Vec<usize>,
    /// Slots released this turn, in dispatch order.
    pub released: Vec<usize>,
    /// Shutdown was requested; nothing else was dispatched.
    pub shutdown: bool,
}

/// The multiplexing loop and everything it exclusively owns.
pub struct EventLoop<H> {
    listener: TcpListener,
    table: ConnectionTable,
    handler: H,
    shutdown: Shutdown,
}

impl<H: Handler> EventLoop<H> {
    /// Create the listening socket and an empty connection table.
    pub fn bind(config: &Config, handler: H) -> Result<Self, ServerError> {
        let addr: SocketAddr = config
            .listen
            .parse()
            .map_err(|e| ServerError::InvalidAddress(config.listen.clone(), e))?;

        let listener = create_listener(addr, config.backlog)?;
        let shutdown = Shutdown::new().map_err(setup("shutdown pipe"))?;

        Ok(Self {
            listener,
            table: ConnectionTable::new(config.max_clients, config.buffer_size),
            handler,
            shutdown,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn table(&self) -> &ConnectionTable {
        &self.table
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.handle()
    }

    /// Stop the loop on SIGINT/SIGTERM.
    pub fn install_signal_handlers(&self) -> Result<(), ServerError> {
        self.shutdown
            .install_signal_handlers()
            .map_err(setup("signal handler"))
    }

    /// Run turns until shutdown, then close every open connection.
    pub fn run(&mut self) -> Result<(), ServerError> {
        loop {
            if self.turn()?.shutdown {
                break;
            }
        }

        let drained = self.close_all();
        info!(drained, "Server shut down");
        Ok(())
    }

    /// Execute one build/wait/dispatch cycle.
    pub fn turn(&mut self) -> Result<Turn, ServerError> {
        let set = build_query_set(
            self.listener.as_raw_fd(),
            Some(self.shutdown.as_raw_fd()),
            &self.table,
        );
        trace!(watched = set.len(), "Waiting for readiness");

        let readiness = match select::wait(&set, None) {
            Ok(readiness) => readiness,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                debug!("Readiness wait interrupted");
                return Ok(Turn::default());
            }
            Err(e) => {
                error!(error = %e, "Readiness wait failed");
                return Err(ServerError::Poll(e));
            }
        };

        let mut turn = Turn::default();

        if readiness.shutdown_ready() {
            self.shutdown.drain();
            turn.shutdown = true;
            return Ok(turn);
        }

        if readiness.listener_ready() {
            self.accept_one(&mut turn);
        }

        for fd in readiness.clients() {
            self.service(fd, &mut turn);
        }

        Ok(turn)
    }

    fn accept_one(&mut self, turn: &mut Turn) {
        let (stream, peer) = match self.listener.accept() {
            Ok(accepted) => accepted,
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                debug!("Listener ready but no connection pending");
                return;
            }
            Err(e) => {
                warn!(error = %e, "Accept failed");
                return;
            }
        };

        let Some(slot) = self.table.find_free_slot() else {
            warn!(
                peer = %peer,
                capacity = self.table.capacity(),
                "Server full, closing new connection"
            );
            turn.rejected = true;
            return;
        };

        if let Err(e) = stream.set_nonblocking(true) {
            warn!(peer = %peer, error = %e, "Failed to configure connection");
            return;
        }

        self.table.occupy(slot, stream, Some(peer));
        turn.accepted = Some(slot);
        info!(slot, peer = %peer, connections = self.table.len(), "New connection");
    }

    fn service(&mut self, fd: RawFd, turn: &mut Turn) {
        let Some(slot) = self.table.find_slot_by_descriptor(fd) else {
            return;
        };
        let Some(conn) = self.table.slot_mut(slot) else {
            return;
        };
        let peer = conn.peer();

        match conn.read() {
            Ok(0) => {
                info!(slot, peer = ?peer, "Client disconnected");
                self.release(slot, turn);
            }
            Ok(n) => {
                turn.received.push(slot);
                if self.handler.on_data(slot, conn.received(n)) == Disposition::Close {
                    debug!(slot, peer = ?peer, "Handler closed connection");
                    self.release(slot, turn);
                }
            }
            Err(ref e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) =>
            {
                trace!(slot, "Spurious read wakeup");
            }
            Err(e) => {
                warn!(slot, peer = ?peer, error = %e, "Read failed, dropping client");
                self.release(slot, turn);
            }
        }
    }

    fn release(&mut self, slot: usize, turn: &mut Turn) {
        self.table.release(slot);
        turn.released.push(slot);
    }

    /// Release every occupied slot. Returns how many were closed.
    fn close_all(&mut self) -> usize {
        let occupied: Vec<usize> = self.table.occupied_slots().collect();
        for &slot in &occupied {
            self.table.release(slot);
        }
        occupied.len()
    }
}

/// Create a non-blocking TCP listener with the configured backlog.
fn create_listener(addr: SocketAddr, backlog: i32) -> Result<TcpListener, ServerError> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )
    .map_err(setup("socket"))?;

    socket
        .set_reuse_address(true)
        .map_err(setup("setsockopt"))?;
    socket.set_nonblocking(true).map_err(setup("setsockopt"))?;
    socket.bind(&addr.into()).map_err(setup("bind"))?;
    socket.listen(backlog).map_err(setup("listen"))?;

    Ok(socket.into())
}
