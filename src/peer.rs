//! Blocking handshake client.
//!
//! Drives the protocol from the other end, one step after another:
//! send `HELLO n`, expect `HELLO n+1`, send `HELLO n+2`, close.

use crate::protocol::{self, ParseError, Sequence, MAX_LINE};
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PeerError {
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("server closed the connection without replying")]
    Closed,

    #[error("malformed reply: {0}")]
    Parse(#[from] ParseError),

    #[error("reply exceeds {max} bytes without terminator", max = MAX_LINE)]
    Oversized,

    #[error("unexpected sequence number: expected {expected}, received {received}")]
    UnexpectedSequence {
        expected: Sequence,
        received: Sequence,
    },
}

/// A connected handshake client.
pub struct Peer {
    stream: TcpStream,
}

impl Peer {
    /// Connect, using `timeout` for the connect and every later read/write.
    pub fn connect(addr: SocketAddr, timeout: Duration) -> Result<Self, PeerError> {
        let stream = TcpStream::connect_timeout(&addr, timeout)
            .map_err(|source| PeerError::Connect { addr, source })?;
        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;
        Ok(Self { stream })
    }

    /// Send `HELLO <sequence>` with its terminator.
    pub fn send_hello(&mut self, sequence: Sequence) -> Result<(), PeerError> {
        self.send_raw(protocol::format_hello(sequence).as_bytes())
    }

    /// Send arbitrary bytes.
    pub fn send_raw(&mut self, bytes: &[u8]) -> Result<(), PeerError> {
        self.stream.write_all(bytes)?;
        self.stream.flush()?;
        Ok(())
    }

    /// Read one NUL-terminated message, terminator stripped.
    pub fn recv_message(&mut self) -> Result<Vec<u8>, PeerError> {
        let mut buf = [0u8; MAX_LINE];
        let mut filled = 0;

        loop {
            if let Some((message, _)) = protocol::next_message(&buf[..filled]) {
                return Ok(message.to_vec());
            }
            if filled == buf.len() {
                return Err(PeerError::Oversized);
            }

            match self.stream.read(&mut buf[filled..]) {
                Ok(0) => return Err(PeerError::Closed),
                Ok(n) => filled += n,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(ref e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted
                    ) =>
                {
                    return Err(PeerError::Closed);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Read a `HELLO <n>` reply and return `n`.
    pub fn recv_hello(&mut self) -> Result<Sequence, PeerError> {
        let message = self.recv_message()?;
        Ok(protocol::parse_hello(&message)?)
    }

    /// Run the full handshake starting at `sequence`; returns the server's reply.
    pub fn handshake(mut self, sequence: Sequence) -> Result<Sequence, PeerError> {
        self.send_hello(sequence)?;

        let reply = self.recv_hello()?;
        let expected = sequence.saturating_add(1);
        if reply != expected {
            return Err(PeerError::UnexpectedSequence {
                expected,
                received: reply,
            });
        }

        self.send_hello(reply.saturating_add(1))?;
        Ok(reply)
    }
}

/// Connect to `addr` and run one handshake.
pub fn handshake(
    addr: SocketAddr,
    sequence: Sequence,
    timeout: Duration,
) -> Result<Sequence, PeerError> {
    Peer::connect(addr, timeout)?.handshake(sequence)
}
