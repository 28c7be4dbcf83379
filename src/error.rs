//! Fatal server errors.
//!
//! Per-connection failures never show up here; they end as a
//! [`CloseReason`](crate::runtime::CloseReason) inside the event loop.

use crate::config::ConfigError;
use crate::runtime::Backend;
use std::io;
use std::net::SocketAddr;
use thiserror::Error;

/// Failure while bringing the server up.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to create listening socket: {0}")]
    Socket(#[source] io::Error),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("failed to listen on {addr}: {source}")]
    Listen {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("failed to create {backend}-triggered multiplexer: {source}")]
    Multiplexer {
        backend: Backend,
        #[source]
        source: io::Error,
    },

    #[error("failed to register listener: {0}")]
    Register(#[source] io::Error),
}

/// Failure that stops a running server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Setup(#[from] SetupError),

    #[error("readiness poll failed: {0}")]
    Poll(#[source] io::Error),
}
