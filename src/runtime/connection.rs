//! Fixed-capacity connection table.
//!
//! Each slot holds at most one accepted client plus a read buffer that the
//! slot owns for its whole lifetime. A slot is free iff it has no stream.
//! Slots are handed out first-fit by index, so a released slot is the
//! next candidate for reuse.

use std::io::{self, Read};
use std::net::{SocketAddr, TcpStream};
use std::os::unix::io::{AsRawFd, RawFd};

/// Observable slot state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// No connection; the slot may be handed out.
    Empty,
    /// Holds a live client connection.
    Connected,
}

/// A single table entry.
#[derive(Debug)]
pub struct ConnectionSlot<S = TcpStream> {
    stream: Option<S>,
    peer: Option<SocketAddr>,
    buffer: Box<[u8]>,
}

impl<S> ConnectionSlot<S> {
    fn new(buffer_size: usize) -> Self {
        Self {
            stream: None,
            peer: None,
            buffer: vec![0u8; buffer_size].into_boxed_slice(),
        }
    }

    pub fn state(&self) -> SlotState {
        if self.stream.is_some() {
            SlotState::Connected
        } else {
            SlotState::Empty
        }
    }

    pub fn is_free(&self) -> bool {
        self.stream.is_none()
    }

    /// Remote address recorded at accept time.
    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// The whole slot buffer, including bytes past the latest read.
    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }
}

impl<S: AsRawFd> ConnectionSlot<S> {
    /// Socket descriptor, or `None` for a free slot.
    pub fn descriptor(&self) -> Option<RawFd> {
        self.stream.as_ref().map(|s| s.as_raw_fd())
    }
}

impl<S: Read> ConnectionSlot<S> {
    /// Perform one read into the slot buffer starting at offset 0.
    ///
    /// Returns the number of bytes read; `Ok(0)` means the peer closed.
    pub fn read(&mut self) -> io::Result<usize> {
        match self.stream.as_mut() {
            Some(stream) => stream.read(&mut self.buffer),
            None => Err(io::Error::new(io::ErrorKind::NotConnected, "slot is empty")),
        }
    }

    /// Bytes produced by a read that returned `n`.
    pub fn received(&self, n: usize) -> &[u8] {
        &self.buffer[..n.min(self.buffer.len())]
    }
}

/// Fixed-capacity table of client slots.
///
/// Capacity never changes after construction; at most `capacity`
/// connections are held at once.
#[derive(Debug)]
pub struct ConnectionTable<S = TcpStream> {
    slots: Vec<ConnectionSlot<S>>,
    occupied: usize,
}

impl<S> ConnectionTable<S> {
    /// Create a table with `capacity` empty slots of `buffer_size` bytes each.
    pub fn new(capacity: usize, buffer_size: usize) -> Self {
        let slots = (0..capacity)
            .map(|_| ConnectionSlot::new(buffer_size))
            .collect();
        Self { slots, occupied: 0 }
    }

    /// Index of the first free slot, or `None` when the table is full.
    pub fn find_free_slot(&self) -> Option<usize> {
        self.slots.iter().position(ConnectionSlot::is_free)
    }

    /// Place an accepted connection in a free slot.
    pub fn occupy(&mut self, idx: usize, stream: S, peer: Option<SocketAddr>) {
        let slot = &mut self.slots[idx];
        debug_assert!(slot.is_free(), "slot {idx} is already occupied");
        if slot.stream.is_none() {
            self.occupied += 1;
        }
        slot.stream = Some(stream);
        slot.peer = peer;
    }

    /// Close the slot's connection and return the slot to the free pool.
    ///
    /// The caller must only release occupied slots. The buffer is zeroed
    /// so the next occupant never sees the previous connection's bytes.
    pub fn release(&mut self, idx: usize) {
        let slot = &mut self.slots[idx];
        debug_assert!(!slot.is_free(), "slot {idx} released while empty");
        if slot.stream.take().is_some() {
            self.occupied -= 1;
        }
        slot.peer = None;
        slot.buffer.fill(0);
    }

    pub fn slot(&self, idx: usize) -> Option<&ConnectionSlot<S>> {
        self.slots.get(idx)
    }

    pub fn slot_mut(&mut self, idx: usize) -> Option<&mut ConnectionSlot<S>> {
        self.slots.get_mut(idx)
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.occupied
    }

    pub fn is_empty(&self) -> bool {
        self.occupied == 0
    }

    pub fn is_full(&self) -> bool {
        self.occupied == self.slots.len()
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Indices of occupied slots, in table order.
    pub fn occupied_slots(&self) -> impl Iterator<Item = usize> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| !slot.is_free())
            .map(|(idx, _)| idx)
    }
}

impl<S: AsRawFd> ConnectionTable<S> {
    /// Slot currently owning descriptor `fd`.
    pub fn find_slot_by_descriptor(&self, fd: RawFd) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| slot.descriptor() == Some(fd))
    }

    /// `(index, descriptor)` for every occupied slot, in table order.
    pub fn descriptors(&self) -> impl Iterator<Item = (usize, RawFd)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(idx, slot)| slot.descriptor().map(|fd| (idx, fd)))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Socket stand-in: a fixed descriptor number and a canned payload.
    #[derive(Debug)]
    pub(crate) struct FakeStream {
        pub fd: RawFd,
        pub data: Vec<u8>,
    }

    impl FakeStream {
        pub fn new(fd: RawFd) -> Self {
            Self { fd, data: Vec::new() }
        }

        pub fn with_data(fd: RawFd, data: &[u8]) -> Self {
            Self {
                fd,
                data: data.to_vec(),
            }
        }
    }

    impl AsRawFd for FakeStream {
        fn as_raw_fd(&self) -> RawFd {
            self.fd
        }
    }

    impl Read for FakeStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = self.data.len().min(buf.len());
            buf[..n].copy_from_slice(&self.data[..n]);
            self.data.drain(..n);
            Ok(n)
        }
    }

    #[test]
    fn test_new_table_is_empty() {
        let table: ConnectionTable<FakeStream> = ConnectionTable::new(4, 16);
        assert_eq!(table.capacity(), 4);
        assert_eq!(table.len(), 0);
        assert!(table.is_empty());
        assert_eq!(table.find_free_slot(), Some(0));
        assert_eq!(table.slot(3).unwrap().state(), SlotState::Empty);
        assert!(table.slot(4).is_none());
    }

    #[test]
    fn test_first_fit_allocation() {
        let mut table = ConnectionTable::new(3, 16);

        table.occupy(0, FakeStream::new(10), None);
        table.occupy(1, FakeStream::new(11), None);
        assert_eq!(table.find_free_slot(), Some(2));

        table.release(0);
        assert_eq!(table.find_free_slot(), Some(0));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_full_table() {
        let mut table = ConnectionTable::new(2, 16);
        table.occupy(0, FakeStream::new(10), None);
        table.occupy(1, FakeStream::new(11), None);

        assert!(table.is_full());
        assert_eq!(table.find_free_slot(), None);
    }

    #[test]
    fn test_find_slot_by_descriptor() {
        let mut table = ConnectionTable::new(4, 16);
        table.occupy(0, FakeStream::new(10), None);
        table.occupy(2, FakeStream::new(12), None);

        assert_eq!(table.find_slot_by_descriptor(12), Some(2));
        assert_eq!(table.find_slot_by_descriptor(10), Some(0));
        assert_eq!(table.find_slot_by_descriptor(11), None);

        table.release(2);
        assert_eq!(table.find_slot_by_descriptor(12), None);
    }

    #[test]
    fn test_released_slot_matches_fresh_slot() {
        let peer: SocketAddr = "127.0.0.1:4000".parse().unwrap();
        let mut table = ConnectionTable::new(1, 8);
        table.occupy(0, FakeStream::with_data(10, b"secret!!"), Some(peer));

        let slot = table.slot_mut(0).unwrap();
        assert_eq!(slot.state(), SlotState::Connected);
        assert_eq!(slot.peer(), Some(peer));
        let n = slot.read().unwrap();
        assert_eq!(slot.received(n), b"secret!!");

        table.release(0);
        let slot = table.slot(0).unwrap();
        assert_eq!(slot.state(), SlotState::Empty);
        assert_eq!(slot.descriptor(), None);
        assert_eq!(slot.peer(), None);
        assert!(slot.buffer().iter().all(|&b| b == 0));
        assert_eq!(table.find_free_slot(), Some(0));
    }

    #[test]
    fn test_read_overwrites_from_start() {
        let mut table = ConnectionTable::new(1, 4);
        table.occupy(0, FakeStream::with_data(10, b"abcdef"), None);
        let slot = table.slot_mut(0).unwrap();

        let n = slot.read().unwrap();
        assert_eq!(slot.received(n), b"abcd");

        // Stale tail stays in the buffer but is not part of the read.
        let n = slot.read().unwrap();
        assert_eq!(slot.received(n), b"ef");
        assert_eq!(slot.buffer(), b"efcd");

        assert_eq!(slot.read().unwrap(), 0);
    }

    #[test]
    fn test_read_on_empty_slot_fails() {
        let mut table: ConnectionTable<FakeStream> = ConnectionTable::new(1, 8);
        let err = table.slot_mut(0).unwrap().read().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
    }

    #[test]
    fn test_occupied_iteration_is_in_index_order() {
        let mut table = ConnectionTable::new(5, 8);
        table.occupy(3, FakeStream::new(13), None);
        table.occupy(1, FakeStream::new(11), None);
        table.occupy(4, FakeStream::new(14), None);

        assert_eq!(table.occupied_slots().collect::<Vec<_>>(), vec![1, 3, 4]);
        assert_eq!(
            table.descriptors().collect::<Vec<_>>(),
            vec![(1, 11), (3, 13), (4, 14)]
        );
    }
}
