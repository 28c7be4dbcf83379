//! Edge-triggered backend built on mio.
//!
//! mio registers descriptors with `EPOLLET` on Linux and `EV_CLEAR` on macOS,
//! so readiness is reported once per arrival of new data.

use super::{Multiplexer, Trigger};
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};
use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

pub struct EdgeTriggered {
    poll: Poll,
    events: Events,
}

impl EdgeTriggered {
    /// Create the backend with room for `capacity` events per poll.
    pub fn with_capacity(capacity: usize) -> io::Result<Self> {
        Ok(Self {
            poll: Poll::new()?,
            events: Events::with_capacity(capacity.max(1)),
        })
    }
}

impl Multiplexer for EdgeTriggered {
    fn register(&mut self, fd: RawFd, token: Token) -> io::Result<()> {
        self.poll
            .registry()
            .register(&mut SourceFd(&fd), token, Interest::READABLE)
    }

    fn deregister(&mut self, fd: RawFd) -> io::Result<()> {
        self.poll.registry().deregister(&mut SourceFd(&fd))
    }

    fn poll(&mut self, ready: &mut Vec<Token>, timeout: Option<Duration>) -> io::Result<()> {
        ready.clear();

        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(()),
            Err(e) => return Err(e),
        }

        ready.extend(self.events.iter().map(|event| event.token()));
        Ok(())
    }

    fn trigger(&self) -> Trigger {
        Trigger::Edge
    }
}
