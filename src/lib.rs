//! hello-reactor: a non-blocking server for the two-round HELLO handshake.
//!
//! One thread multiplexes many TCP connections through either a
//! level-triggered (`poll`) or edge-triggered (epoll/kqueue) backend,
//! tracking each connection in a fixed-capacity table while its handshake
//! runs:
//!
//! ```text
//! peer -> HELLO n
//!         HELLO n+1 <- server
//! peer -> HELLO n+2
//! ```

pub mod config;
pub mod error;
pub mod peer;
pub mod protocol;
pub mod runtime;

pub use config::Config;
pub use error::{ServerError, SetupError};
pub use runtime::{Backend, Server, ShutdownHandle};
