//! Connection state machine and connection table.
//!
//! Each accepted socket gets a [`ConnectionSlot`] that owns the socket and
//! its receive buffer. The slot advances through the handshake:
//!
//! ```text
//! SynSent --HELLO n / reply HELLO n+1--> Established --HELLO n+2--> Closed
//! ```
//!
//! Dropping a slot closes its socket and frees its buffer, so a connection is
//! torn down exactly once, when the event loop removes it from the table.

use crate::protocol::{self, HelloMessage, ParseError, ParseMode, Sequence, MAX_LINE};
use crate::runtime::buffer::ReceiveBuffer;
use mio::net::TcpStream;
use slab::Slab;
use std::fmt;
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::os::unix::io::{AsRawFd, RawFd};
use thiserror::Error;
use tracing::info;

/// Handshake progress of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// Accepted, waiting for the peer's first `HELLO n`.
    SynSent,
    /// Replied `HELLO n+1`; waiting for `HELLO n+2`.
    Established {
        /// Sequence number the server sent.
        expected: Sequence,
    },
    /// Terminal.
    Closed,
}

/// A peer broke the handshake contract.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Violation {
    #[error("malformed message: {0}")]
    Malformed(#[from] ParseError),
    #[error("unexpected sequence number: expected {expected}, received {received}")]
    UnexpectedSequence {
        expected: Sequence,
        received: Sequence,
    },
    #[error("message exceeds {max} bytes without terminator", max = MAX_LINE)]
    Oversized,
}

/// Why a connection left the table.
#[derive(Debug)]
pub enum CloseReason {
    /// Both handshake rounds finished as expected.
    Completed,
    /// Peer closed before the handshake finished.
    PeerClosed,
    /// Peer sent something the protocol does not allow.
    Violation(Violation),
    /// Read or write failed.
    Io(io::Error),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::Completed => f.write_str("handshake completed"),
            CloseReason::PeerClosed => f.write_str("peer closed connection"),
            CloseReason::Violation(v) => write!(f, "protocol violation: {v}"),
            CloseReason::Io(e) => write!(f, "i/o error: {e}"),
        }
    }
}

/// Side effect requested by a state transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Send this message to the peer.
    Reply(HelloMessage),
    /// Handshake finished; close.
    Complete,
    /// Close because of a protocol violation.
    Reject(Violation),
    /// Message arrived in a terminal state; drop it.
    Ignore,
}

/// Apply one received message to `state`.
pub fn transition(
    state: HandshakeState,
    message: &[u8],
    mode: ParseMode,
) -> (HandshakeState, Action) {
    match state {
        HandshakeState::SynSent => match mode.parse(message) {
            Ok(sequence) => {
                let next = sequence.saturating_add(1);
                (
                    HandshakeState::Established { expected: next },
                    Action::Reply(protocol::format_hello(next)),
                )
            }
            Err(e) => (HandshakeState::Closed, Action::Reject(e.into())),
        },
        HandshakeState::Established { expected } => {
            let action = match mode.parse(message) {
                Ok(received) if received == expected.saturating_add(1) => Action::Complete,
                Ok(received) => Action::Reject(Violation::UnexpectedSequence {
                    expected: expected.saturating_add(1),
                    received,
                }),
                Err(e) => Action::Reject(e.into()),
            };
            (HandshakeState::Closed, action)
        }
        HandshakeState::Closed => (HandshakeState::Closed, Action::Ignore),
    }
}

/// Result of handling a readiness notification.
#[derive(Debug)]
pub enum Progress {
    /// Connection stays in the table.
    Open,
    /// Connection must be removed from the table and dropped.
    Closed(CloseReason),
}

/// A single accepted connection.
#[derive(Debug)]
pub struct ConnectionSlot {
    stream: TcpStream,
    peer: SocketAddr,
    state: HandshakeState,
    buffer: ReceiveBuffer,
}

impl ConnectionSlot {
    /// Activate a slot for a freshly accepted, non-blocking stream.
    pub fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        Self {
            stream,
            peer,
            state: HandshakeState::SynSent,
            buffer: ReceiveBuffer::new(),
        }
    }

    pub fn fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Handle a readable notification.
    ///
    /// With `drain` set (edge-triggered backends) the socket is read until it
    /// reports `WouldBlock`; otherwise a single read is performed and the
    /// backend reports the descriptor again if more data is pending.
    pub fn on_readable(&mut self, drain: bool, mode: ParseMode) -> Progress {
        if self.state == HandshakeState::Closed {
            return Progress::Open;
        }

        loop {
            match self.stream.read(self.buffer.spare_mut()) {
                Ok(0) => return self.close(CloseReason::PeerClosed),
                Ok(n) => {
                    self.buffer.advance(n);
                    if let Some(reason) = self.process_messages(mode) {
                        return self.close(reason);
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Progress::Open,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return self.close(CloseReason::Io(e)),
            }

            if !drain {
                return Progress::Open;
            }
        }
    }

    /// Run every complete buffered message through the state machine.
    fn process_messages(&mut self, mode: ParseMode) -> Option<CloseReason> {
        while let Some(message) = self.buffer.take_message() {
            info!(
                peer = %self.peer,
                message = %String::from_utf8_lossy(&message),
                "Received"
            );

            let (next, action) = transition(self.state, &message, mode);
            self.state = next;

            match action {
                Action::Reply(reply) => {
                    if let Err(e) = write_reply(&mut self.stream, &reply) {
                        return Some(CloseReason::Io(e));
                    }
                }
                Action::Complete => return Some(CloseReason::Completed),
                Action::Reject(violation) => return Some(CloseReason::Violation(violation)),
                Action::Ignore => return None,
            }
        }

        if self.buffer.is_full() {
            return Some(CloseReason::Violation(Violation::Oversized));
        }

        None
    }

    fn close(&mut self, reason: CloseReason) -> Progress {
        self.state = HandshakeState::Closed;
        Progress::Closed(reason)
    }
}

/// Write a whole reply without blocking.
///
/// Only readability is watched, so a reply that cannot be written at once is
/// reported as an error.
fn write_reply(stream: &mut TcpStream, reply: &HelloMessage) -> io::Result<()> {
    let bytes = reply.as_bytes();
    let mut written = 0;

    while written < bytes.len() {
        match stream.write(&bytes[written..]) {
            Ok(0) => {
                return Err(io::Error::new(io::ErrorKind::WriteZero, "write returned 0"));
            }
            Ok(n) => written += n,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }

    Ok(())
}

/// Fixed-capacity table of active connections.
///
/// Slot ids double as multiplexer tokens. Lookup, insert and remove are O(1).
pub struct ConnectionTable {
    slots: Slab<ConnectionSlot>,
    capacity: usize,
}

impl ConnectionTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Slab::with_capacity(capacity),
            capacity,
        }
    }

    /// Insert a connection, returning its slot id.
    ///
    /// When the table is full the slot is handed back to the caller.
    pub fn insert(&mut self, slot: ConnectionSlot) -> Result<usize, ConnectionSlot> {
        if self.is_full() {
            return Err(slot);
        }
        Ok(self.slots.insert(slot))
    }

    pub fn get_mut(&mut self, id: usize) -> Option<&mut ConnectionSlot> {
        self.slots.get_mut(id)
    }

    /// Remove a connection; the id becomes free for reuse.
    pub fn remove(&mut self, id: usize) -> Option<ConnectionSlot> {
        self.slots.try_remove(id)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.slots.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
