//! Level-triggered backend built on `poll(2)`.
//!
//! The interest set is a flat array of `pollfd` entries handed to the kernel
//! on every call, with `revents` reset beforehand.

use super::{Multiplexer, Trigger};
use mio::Token;
use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

pub struct LevelTriggered {
    fds: Vec<libc::pollfd>,
    /// Token for each entry of `fds`, same index.
    tokens: Vec<Token>,
}

impl LevelTriggered {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            fds: Vec::with_capacity(capacity),
            tokens: Vec::with_capacity(capacity),
        }
    }

    /// Number of registered descriptors.
    #[cfg(test)]
    fn len(&self) -> usize {
        self.fds.len()
    }

    fn position(&self, fd: RawFd) -> Option<usize> {
        self.fds.iter().position(|pfd| pfd.fd == fd)
    }
}

impl Multiplexer for LevelTriggered {
    fn register(&mut self, fd: RawFd, token: Token) -> io::Result<()> {
        if self.position(fd).is_some() {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("descriptor {fd} already registered"),
            ));
        }

        self.fds.push(libc::pollfd {
            fd,
            events: libc::POLLIN,
            revents: 0,
        });
        self.tokens.push(token);
        Ok(())
    }

    fn deregister(&mut self, fd: RawFd) -> io::Result<()> {
        let idx = self.position(fd).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("descriptor {fd} not registered"),
            )
        })?;

        self.fds.swap_remove(idx);
        self.tokens.swap_remove(idx);
        Ok(())
    }

    fn poll(&mut self, ready: &mut Vec<Token>, timeout: Option<Duration>) -> io::Result<()> {
        ready.clear();

        for pfd in &mut self.fds {
            pfd.revents = 0;
        }

        // SAFETY: `fds` is an exclusively borrowed, initialized array of
        // `fds.len()` pollfd entries for the duration of the call.
        let rc = unsafe {
            libc::poll(
                self.fds.as_mut_ptr(),
                self.fds.len() as libc::nfds_t,
                timeout_ms(timeout),
            )
        };

        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(err);
        }

        if rc > 0 {
            // POLLHUP/POLLERR are reported as ready too; the read surfaces them.
            ready.extend(
                self.fds
                    .iter()
                    .zip(&self.tokens)
                    .filter(|(pfd, _)| pfd.revents != 0)
                    .map(|(_, &token)| token),
            );
        }

        Ok(())
    }

    fn trigger(&self) -> Trigger {
        Trigger::Level
    }
}

/// Convert a timeout to poll(2) milliseconds, rounding sub-millisecond
/// timeouts up so they do not turn into a busy loop.
fn timeout_ms(timeout: Option<Duration>) -> libc::c_int {
    match timeout {
        None => -1,
        Some(d) if d.is_zero() => 0,
        Some(d) => {
            let ms = d.as_millis().max(1);
            ms.min(libc::c_int::MAX as u128) as libc::c_int
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::os::unix::io::AsRawFd;
    use std::os::unix::net::UnixStream;

    const SHORT: Option<Duration> = Some(Duration::from_millis(20));

    #[test]
    fn test_timeout_conversion() {
        assert_eq!(timeout_ms(None), -1);
        assert_eq!(timeout_ms(Some(Duration::ZERO)), 0);
        assert_eq!(timeout_ms(Some(Duration::from_micros(10))), 1);
        assert_eq!(timeout_ms(Some(Duration::from_millis(100))), 100);
    }

    #[test]
    fn test_level_reports_until_drained() {
        let (mut tx, mut rx) = UnixStream::pair().unwrap();
        rx.set_nonblocking(true).unwrap();

        let mut mux = LevelTriggered::with_capacity(4);
        mux.register(rx.as_raw_fd(), Token(3)).unwrap();

        let mut ready = Vec::new();
        mux.poll(&mut ready, SHORT).unwrap();
        assert!(ready.is_empty());

        tx.write_all(b"HELLO 1\0").unwrap();

        // Reported again and again while data stays unread
        mux.poll(&mut ready, SHORT).unwrap();
        assert_eq!(ready, vec![Token(3)]);
        mux.poll(&mut ready, SHORT).unwrap();
        assert_eq!(ready, vec![Token(3)]);

        let mut buf = [0u8; 32];
        assert_eq!(rx.read(&mut buf).unwrap(), 8);

        mux.poll(&mut ready, SHORT).unwrap();
        assert!(ready.is_empty());
    }

    #[test]
    fn test_level_register_deregister() {
        let (_a, b) = UnixStream::pair().unwrap();
        let (_c, d) = UnixStream::pair().unwrap();

        let mut mux = LevelTriggered::with_capacity(4);
        mux.register(b.as_raw_fd(), Token(0)).unwrap();
        mux.register(d.as_raw_fd(), Token(1)).unwrap();
        assert_eq!(mux.len(), 2);

        // Duplicate registration is rejected
        assert!(mux.register(b.as_raw_fd(), Token(7)).is_err());

        mux.deregister(b.as_raw_fd()).unwrap();
        assert_eq!(mux.len(), 1);
        assert!(mux.deregister(b.as_raw_fd()).is_err());
    }

    #[test]
    fn test_level_reports_hangup() {
        let (tx, rx) = UnixStream::pair().unwrap();

        let mut mux = LevelTriggered::with_capacity(1);
        mux.register(rx.as_raw_fd(), Token(5)).unwrap();
        drop(tx);

        let mut ready = Vec::new();
        mux.poll(&mut ready, SHORT).unwrap();
        assert_eq!(ready, vec![Token(5)]);
    }
}
