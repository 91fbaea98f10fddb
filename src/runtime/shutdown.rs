//! Shutdown wakeup for the blocking readiness wait.
//!
//! A non-blocking socket pair acts as a self-pipe. Its read end sits in
//! every query set; writing a byte to the other end (from a signal handler
//! or a `ShutdownHandle`) makes the loop wake up and stop.

use std::io::{self, Read, Write};
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

/// Write end used by the signal handler. -1 when no handler is installed.
static SIGNAL_PIPE: AtomicI32 = AtomicI32::new(-1);

/// Owned self-pipe.
#[derive(Debug)]
pub struct Shutdown {
    reader: UnixStream,
    writer: Arc<UnixStream>,
}

/// Cloneable trigger for a `Shutdown`.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    writer: Arc<UnixStream>,
}

impl ShutdownHandle {
    /// Ask the loop to stop. Safe to call more than once.
    pub fn trigger(&self) -> io::Result<()> {
        match (&*self.writer).write(&[1]) {
            Ok(_) => Ok(()),
            // Pipe already full: a wakeup is pending anyway.
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl Shutdown {
    pub fn new() -> io::Result<Self> {
        let (reader, writer) = UnixStream::pair()?;
        reader.set_nonblocking(true)?;
        writer.set_nonblocking(true)?;
        Ok(Self {
            reader,
            writer: Arc::new(writer),
        })
    }

    pub fn handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            writer: Arc::clone(&self.writer),
        }
    }

    /// Route SIGINT and SIGTERM into this pipe.
    pub fn install_signal_handlers(&self) -> io::Result<()> {
        SIGNAL_PIPE.store(self.writer.as_raw_fd(), Ordering::SeqCst);
        // SAFETY: an all-zero sigaction is a valid "no flags, empty mask"
        // value; the handler field is filled in before use.
        let mut action: libc::sigaction = unsafe { std::mem::zeroed() };
        action.sa_sigaction = on_signal as *const () as libc::sighandler_t;
        action.sa_flags = 0;
        // SAFETY: `sa_mask` is a valid sigset_t owned by `action`.
        unsafe { libc::sigemptyset(&mut action.sa_mask) };

        for signal in [libc::SIGINT, libc::SIGTERM] {
            // SAFETY: `on_signal` only performs an atomic load and write(2),
            // both async-signal-safe.
            let rc = unsafe { libc::sigaction(signal, &action, std::ptr::null_mut()) };
            if rc != 0 {
                return Err(io::Error::last_os_error());
            }
        }
        Ok(())
    }

    /// Discard pending wakeup bytes.
    pub fn drain(&self) {
        let mut buf = [0u8; 64];
        while let Ok(n) = (&self.reader).read(&mut buf) {
            if n == 0 {
                break;
            }
        }
    }
}

impl AsRawFd for Shutdown {
    fn as_raw_fd(&self) -> RawFd {
        self.reader.as_raw_fd()
    }
}

impl Drop for Shutdown {
    fn drop(&mut self) {
        let _ = SIGNAL_PIPE.compare_exchange(
            self.writer.as_raw_fd(),
            -1,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }
}

extern "C" fn on_signal(_signal: libc::c_int) {
    let fd = SIGNAL_PIPE.load(Ordering::SeqCst);
    if fd >= 0 {
        let byte = 1u8;
        // SAFETY: writes one byte from a live stack location; errors are ignored.
        unsafe {
            libc::write(fd, &byte as *const u8 as *const libc::c_void, 1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::select::{wait, Source, Watch};

    fn watch(shutdown: &Shutdown) -> Vec<Watch> {
        vec![Watch {
            fd: shutdown.as_raw_fd(),
            source: Source::Shutdown,
        }]
    }

    #[test]
    fn test_trigger_wakes_wait() {
        let shutdown = Shutdown::new().unwrap();
        assert!(wait(&watch(&shutdown), Some(0)).unwrap().is_empty());

        shutdown.handle().trigger().unwrap();
        assert!(wait(&watch(&shutdown), Some(1000)).unwrap().shutdown_ready());
    }

    #[test]
    fn test_signal_wakes_wait() {
        let shutdown = Shutdown::new().unwrap();
        shutdown.install_signal_handlers().unwrap();

        // SAFETY: raise(3) delivers SIGTERM to this thread, which the
        // handler just installed turns into a pipe write.
        assert_eq!(unsafe { libc::raise(libc::SIGTERM) }, 0);
        assert!(wait(&watch(&shutdown), Some(1000)).unwrap().shutdown_ready());
    }

    #[test]
    fn test_drain_clears_wakeup() {
        let shutdown = Shutdown::new().unwrap();
        let handle = shutdown.handle();
        handle.trigger().unwrap();
        handle.clone().trigger().unwrap();

        shutdown.drain();
        assert!(wait(&watch(&shutdown), Some(0)).unwrap().is_empty());
    }
}
