//! Non-blocking handshake runtime.
//!
//! A single thread multiplexes every connection:
//! - `Multiplexer`: level-triggered (poll) or edge-triggered (epoll/kqueue)
//!   readiness notification
//! - `ConnectionTable`: fixed-capacity slab of connection slots
//! - `ConnectionSlot`: per-connection handshake state machine
//! - `Server`: the event loop tying them together

mod buffer;
mod connection;
mod event_loop;
mod multiplexer;
mod stats;

pub use buffer::ReceiveBuffer;
pub use connection::{
    transition, Action, CloseReason, ConnectionSlot, ConnectionTable, HandshakeState, Progress,
    Violation,
};
pub use event_loop::{run, Server, ShutdownHandle};
pub use multiplexer::{
    Backend, EdgeTriggered, LevelTriggered, Multiplexer, Trigger, LISTENER_TOKEN,
};
pub use stats::{Stats, StatsSnapshot};
