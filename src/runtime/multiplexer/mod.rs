//! Readiness multiplexing.
//!
//! The event loop asks a [`Multiplexer`] which registered descriptors are
//! readable. Two backends are provided:
//! - [`LevelTriggered`]: `poll(2)`. A descriptor with unread data is reported
//!   on every call until drained.
//! - [`EdgeTriggered`]: mio (epoll on Linux, kqueue on macOS). A descriptor is
//!   reported once per not-ready to ready transition, so the handler must read
//!   until `WouldBlock` or the connection stalls.
//!
//! Both share the same token space: the listener uses [`LISTENER_TOKEN`] and
//! each connection uses its slot id.

mod edge;
mod level;

pub use edge::EdgeTriggered;
pub use level::LevelTriggered;

use clap::ValueEnum;
use mio::Token;
use serde::Deserialize;
use std::fmt;
use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

/// Token reserved for the listening socket.
pub const LISTENER_TOKEN: Token = Token(usize::MAX);

/// Readiness notification semantics of a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Level,
    Edge,
}

/// Interest-set registration and readiness polling.
pub trait Multiplexer: Send {
    /// Start watching `fd` for readability, reporting it as `token`.
    fn register(&mut self, fd: RawFd, token: Token) -> io::Result<()>;

    /// Stop watching `fd`. Must be called before the descriptor is closed.
    fn deregister(&mut self, fd: RawFd) -> io::Result<()>;

    /// Wait up to `timeout` for readiness and replace the contents of `ready`
    /// with the tokens of ready descriptors.
    ///
    /// An interrupted wait returns `Ok` with no tokens.
    fn poll(&mut self, ready: &mut Vec<Token>, timeout: Option<Duration>) -> io::Result<()>;

    /// Notification semantics of this backend.
    fn trigger(&self) -> Trigger;
}

/// Backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// poll(2), level-triggered
    Level,
    /// epoll/kqueue via mio, edge-triggered
    #[default]
    Edge,
}

impl Backend {
    /// Create a multiplexer sized for `capacity` descriptors.
    pub fn open(self, capacity: usize) -> io::Result<Box<dyn Multiplexer>> {
        let mux: Box<dyn Multiplexer> = match self {
            Backend::Level => Box::new(LevelTriggered::with_capacity(capacity)),
            Backend::Edge => Box::new(EdgeTriggered::with_capacity(capacity)?),
        };
        Ok(mux)
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Level => f.write_str("level"),
            Backend::Edge => f.write_str("edge"),
        }
    }
}
