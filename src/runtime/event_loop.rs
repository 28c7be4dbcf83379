//! Single-threaded readiness event loop.
//!
//! One thread owns the listener, the multiplexer and the connection table.
//! Every socket is non-blocking; the only place the loop waits is the
//! multiplexer poll, which is bounded by `poll_timeout` so housekeeping runs
//! even without traffic.
//!
//! Each ready token is either the listener (accept until `WouldBlock`) or a
//! connection slot id (advance its handshake). With an edge-triggered backend
//! connection reads drain the socket; with a level-triggered one a single
//! read per notification is enough.

use crate::config::Config;
use crate::error::{ServerError, SetupError};
use crate::protocol::ParseMode;
use crate::runtime::connection::{CloseReason, ConnectionSlot, ConnectionTable, Progress};
use crate::runtime::multiplexer::{Backend, Multiplexer, Trigger, LISTENER_TOKEN};
use crate::runtime::stats::Stats;
use mio::net::{TcpListener, TcpStream};
use mio::Token;
use std::io;
use std::net::SocketAddr;
use std::os::unix::io::AsRawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Stops a running [`Server`] at its next loop iteration.
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandle(Arc<AtomicBool>);

impl ShutdownHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shutdown(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_shutdown(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Handshake server driven by a readiness multiplexer.
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
    backend: Backend,
    mux: Box<dyn Multiplexer>,
    connections: ConnectionTable,
    parse_mode: ParseMode,
    poll_timeout: Duration,
    stats_interval: Duration,
    stats: Arc<Stats>,
    shutdown: ShutdownHandle,
    /// Set when an accept burst stopped on an error with connections
    /// possibly still queued in the backlog.
    accept_stalled: bool,
}

impl Server {
    /// Bind the listener and create the multiplexer.
    ///
    /// Any failure here is fatal for the process.
    pub fn bind(config: &Config) -> Result<Self, SetupError> {
        let addr = config.listen_addr()?;
        let listener = TcpListener::from_std(create_listener(addr, config.backlog)?);
        let local_addr = listener.local_addr().map_err(SetupError::Socket)?;

        // Room for every connection plus the listener
        let mut mux = config
            .backend
            .open(config.max_connections + 1)
            .map_err(|source| SetupError::Multiplexer {
                backend: config.backend,
                source,
            })?;
        mux.register(listener.as_raw_fd(), LISTENER_TOKEN)
            .map_err(SetupError::Register)?;

        info!(
            addr = %local_addr,
            backend = %config.backend,
            max_connections = config.max_connections,
            parse_mode = ?config.parse_mode,
            "Listening"
        );

        Ok(Self {
            listener,
            local_addr,
            backend: config.backend,
            mux,
            connections: ConnectionTable::new(config.max_connections),
            parse_mode: config.parse_mode,
            poll_timeout: config.poll_timeout(),
            stats_interval: config.stats_interval(),
            stats: Arc::new(Stats::new()),
            shutdown: ShutdownHandle::new(),
            accept_stalled: false,
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    /// Shared counters, readable from other threads.
    pub fn stats(&self) -> Arc<Stats> {
        Arc::clone(&self.stats)
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Number of connections currently holding a slot.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Run the event loop until the shutdown handle fires.
    ///
    /// Only a failing poll ends the loop with an error; per-connection
    /// failures tear down that connection and nothing else.
    pub fn run(&mut self) -> Result<(), ServerError> {
        let mut ready = Vec::with_capacity(self.connections.capacity() + 1);
        let mut last_report = Instant::now();

        while !self.shutdown.is_shutdown() {
            self.turn(&mut ready)?;

            if last_report.elapsed() >= self.stats_interval {
                self.report_stats();
                last_report = Instant::now();
            }
        }

        if self.connections.is_empty() {
            info!("Event loop stopped");
        } else {
            info!(
                active = self.connections.len(),
                "Event loop stopped with connections still open"
            );
        }
        Ok(())
    }

    /// One poll and the dispatch of everything it reported.
    fn turn(&mut self, ready: &mut Vec<Token>) -> Result<(), ServerError> {
        self.mux
            .poll(ready, Some(self.poll_timeout))
            .map_err(ServerError::Poll)?;

        let mut listener_ready = false;
        for &token in ready.iter() {
            match token {
                LISTENER_TOKEN => {
                    listener_ready = true;
                    self.accept_connections();
                }
                Token(conn_id) => self.handle_connection_event(conn_id),
            }
        }

        // An edge-triggered listener is not reported again for connections
        // already queued when the last burst failed
        if self.accept_stalled && !listener_ready {
            self.accept_connections();
        }

        Ok(())
    }

    /// Accept until the listener would block, so edge-triggered listeners
    /// never leave a pending connection unreported.
    ///
    /// Any other error (EMFILE, ENFILE, ...) ends the burst and marks it
    /// stalled; the next loop turn tries again.
    fn accept_connections(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => self.admit(stream, peer),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.accept_stalled = false;
                    break;
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!(error = %e, "Accept error, retrying on next turn");
                    self.accept_stalled = true;
                    break;
                }
            }
        }
    }

    fn admit(&mut self, stream: TcpStream, peer: SocketAddr) {
        let slot = ConnectionSlot::new(stream, peer);
        let fd = slot.fd();

        let conn_id = match self.connections.insert(slot) {
            Ok(id) => id,
            Err(slot) => {
                // Dropping the slot closes the socket without a reply
                drop(slot);
                self.stats.record_rejected();
                warn!(
                    peer = %peer,
                    max_connections = self.connections.capacity(),
                    "Connection limit reached, closing new connection"
                );
                return;
            }
        };

        if let Err(e) = self.mux.register(fd, Token(conn_id)) {
            warn!(conn_id, peer = %peer, error = %e, "Failed to register connection");
            self.connections.remove(conn_id);
            return;
        }

        self.stats.record_accepted();
        debug!(conn_id, peer = %peer, "Accepted connection");
    }

    fn handle_connection_event(&mut self, conn_id: usize) {
        let drain = self.mux.trigger() == Trigger::Edge;

        let progress = match self.connections.get_mut(conn_id) {
            Some(slot) => slot.on_readable(drain, self.parse_mode),
            None => {
                debug!(conn_id, "Stale readiness notification");
                return;
            }
        };

        if let Progress::Closed(reason) = progress {
            self.close_connection(conn_id, reason);
        }
    }

    /// Deregister, then drop the slot, which closes the socket and frees the buffer.
    fn close_connection(&mut self, conn_id: usize, reason: CloseReason) {
        if let Some(slot) = self.connections.remove(conn_id) {
            if let Err(e) = self.mux.deregister(slot.fd()) {
                debug!(conn_id, error = %e, "Failed to deregister connection");
            }
            let peer = slot.peer();
            drop(slot);

            match reason {
                CloseReason::Completed => {
                    self.stats.record_completed();
                    info!(conn_id, peer = %peer, "Handshake completed");
                }
                CloseReason::PeerClosed => {
                    self.stats.record_peer_closed();
                    debug!(conn_id, peer = %peer, "Peer closed before handshake completed");
                }
                CloseReason::Violation(violation) => {
                    self.stats.record_violation();
                    warn!(conn_id, peer = %peer, %violation, "Protocol violation");
                }
                CloseReason::Io(e) => {
                    self.stats.record_io_error();
                    debug!(conn_id, peer = %peer, error = %e, "Connection error");
                }
            }
        }
    }

    fn report_stats(&self) {
        let snap = self.stats.snapshot();
        debug!(
            active = snap.active,
            accepted = snap.accepted,
            rejected = snap.rejected,
            completed = snap.completed,
            violations = snap.violations,
            peer_closed = snap.peer_closed,
            io_errors = snap.io_errors,
            "Stats"
        );
    }
}

/// Create a non-blocking TCP listener with SO_REUSEADDR.
fn create_listener(addr: SocketAddr, backlog: i32) -> Result<std::net::TcpListener, SetupError> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )
    .map_err(SetupError::Socket)?;

    socket.set_reuse_address(true).map_err(SetupError::Socket)?;
    socket.set_nonblocking(true).map_err(SetupError::Socket)?;
    socket
        .bind(&addr.into())
        .map_err(|source| SetupError::Bind { addr, source })?;
    socket
        .listen(backlog)
        .map_err(|source| SetupError::Listen { addr, source })?;

    Ok(socket.into())
}

/// Bind a server from `config` and run it on the current thread.
pub fn run(config: &Config) -> Result<(), ServerError> {
    let mut server = Server::bind(config)?;
    server.run()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn test_config(backend: Backend) -> Config {
        Config {
            port: 0,
            backend,
            max_connections: 4,
            poll_timeout_ms: 10,
            ..Config::default()
        }
    }

    #[test]
    fn test_bind_ephemeral_port() {
        for backend in [Backend::Level, Backend::Edge] {
            let server = Server::bind(&test_config(backend)).unwrap();
            assert_ne!(server.local_addr().port(), 0);
            assert_eq!(server.backend(), backend);
            assert_eq!(server.connection_count(), 0);
        }
    }

    #[test]
    fn test_bind_address_in_use() {
        let first = Server::bind(&test_config(Backend::Edge)).unwrap();

        // A live listener on the same port makes the second bind fail
        let config = Config {
            port: first.local_addr().port(),
            ..test_config(Backend::Edge)
        };
        assert!(matches!(
            Server::bind(&config),
            Err(SetupError::Bind { .. }) | Err(SetupError::Listen { .. })
        ));
    }

    #[test]
    fn test_bind_invalid_host() {
        let config = Config {
            host: "not-an-address".to_string(),
            ..test_config(Backend::Level)
        };
        assert!(matches!(Server::bind(&config), Err(SetupError::Config(_))));
    }

    #[test]
    fn test_shutdown_stops_idle_loop() {
        let mut server = Server::bind(&test_config(Backend::Level)).unwrap();
        let handle = server.shutdown_handle();

        let worker = thread::spawn(move || server.run());
        thread::sleep(Duration::from_millis(50));
        handle.shutdown();

        assert!(worker.join().unwrap().is_ok());
        assert!(handle.is_shutdown());
    }

    #[test]
    fn test_stale_notification_is_ignored() {
        let mut server = Server::bind(&test_config(Backend::Level)).unwrap();
        let _client = std::net::TcpStream::connect(server.local_addr()).unwrap();
        thread::sleep(Duration::from_millis(50));

        let mut ready = Vec::new();
        server.turn(&mut ready).unwrap();
        assert_eq!(server.connection_count(), 1);

        server.close_connection(0, CloseReason::PeerClosed);
        let before = server.stats.snapshot();
        assert_eq!(before.peer_closed, 1);
        assert_eq!(before.active, 0);

        // Freed slot and a never-used id both fall through untouched
        server.handle_connection_event(0);
        server.handle_connection_event(3);
        assert_eq!(server.connection_count(), 0);
        assert_eq!(server.stats.snapshot(), before);
    }

    #[test]
    fn test_stalled_accept_is_retried() {
        let mut server = Server::bind(&test_config(Backend::Edge)).unwrap();
        let _client = std::net::TcpStream::connect(server.local_addr()).unwrap();
        thread::sleep(Duration::from_millis(50));

        // Consume the listener edge without accepting, as a failed burst would
        let mut ready = Vec::new();
        server
            .mux
            .poll(&mut ready, Some(Duration::from_millis(50)))
            .unwrap();
        assert_eq!(ready, vec![LISTENER_TOKEN]);

        // No new edge: the queued connection stays in the backlog
        server.turn(&mut ready).unwrap();
        assert_eq!(server.connection_count(), 0);

        server.accept_stalled = true;
        server.turn(&mut ready).unwrap();
        assert_eq!(server.connection_count(), 1);
        assert!(!server.accept_stalled);
        assert_eq!(server.stats.snapshot().accepted, 1);
    }
}
