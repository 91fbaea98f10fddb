//! Readiness query set and the blocking wait over `poll(2)`.
//!
//! The set is rebuilt from scratch every iteration. Building it is a pure
//! function of the listener, the shutdown pipe and the connection table,
//! so it can be checked without touching the OS. Readiness is
//! level-triggered: a descriptor stays ready until drained.

use crate::runtime::connection::ConnectionTable;
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};

/// What a watched descriptor belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Listener,
    Shutdown,
    Client(usize),
}

/// One descriptor in the query set. Interest is always "readable".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Watch {
    pub fd: RawFd,
    pub source: Source,
}

/// Build the query set: listener first, then the shutdown pipe (if any),
/// then every occupied slot in table order.
pub fn build_query_set<S: AsRawFd>(
    listener: RawFd,
    shutdown: Option<RawFd>,
    table: &ConnectionTable<S>,
) -> Vec<Watch> {
    let mut set = Vec::with_capacity(table.len() + 2);
    set.push(Watch {
        fd: listener,
        source: Source::Listener,
    });
    if let Some(fd) = shutdown {
        set.push(Watch {
            fd,
            source: Source::Shutdown,
        });
    }
    set.extend(table.descriptors().map(|(idx, fd)| Watch {
        fd,
        source: Source::Client(idx),
    }));
    set
}

/// Descriptors reported ready by one wait, in query-set order.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Readiness {
    ready: Vec<Watch>,
}

impl Readiness {
    pub fn listener_ready(&self) -> bool {
        self.ready.iter().any(|w| w.source == Source::Listener)
    }

    pub fn shutdown_ready(&self) -> bool {
        self.ready.iter().any(|w| w.source == Source::Shutdown)
    }

    /// Ready client descriptors in table order.
    pub fn clients(&self) -> impl Iterator<Item = RawFd> + '_ {
        self.ready
            .iter()
            .filter(|w| matches!(w.source, Source::Client(_)))
            .map(|w| w.fd)
    }

    pub fn len(&self) -> usize {
        self.ready.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ready.is_empty()
    }
}

/// Block until at least one descriptor in `set` is readable.
///
/// Hang-up and error conditions count as ready so the following read
/// observes them. `timeout_ms` of `None` blocks indefinitely.
pub fn wait(set: &[Watch], timeout_ms: Option<i32>) -> io::Result<Readiness> {
    let mut fds: Vec<libc::pollfd> = set
        .iter()
        .map(|w| libc::pollfd {
            fd: w.fd,
            events: libc::POLLIN,
            revents: 0,
        })
        .collect();

    // SAFETY: `fds` is a valid, exclusively borrowed array of `fds.len()` pollfds.
    let rc = unsafe {
        libc::poll(
            fds.as_mut_ptr(),
            fds.len() as libc::nfds_t,
            timeout_ms.unwrap_or(-1),
        )
    };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }

    let ready = set
        .iter()
        .zip(fds.iter())
        .filter(|(_, pfd)| pfd.revents != 0)
        .map(|(w, _)| *w)
        .collect();
    Ok(Readiness { ready })
}
