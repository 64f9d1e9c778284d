//! File-descriptor readiness multiplexer backed by poll(2). Every blocking
//! decision in the crate goes through [Poller::poll]: callers subscribe a
//! descriptor set to IN/OUT events and read back a combined result mask of
//! IN_READY/OUT_READY/ERROR/TIMEOUT bits. Error, hangup, and invalid events
//! are always subscribed regardless of the caller's mask.

use crate::context::ShutdownToken;
use crate::fail::Fail;

use std::os::unix::io::RawFd;

//==============================================================================
// Constants & Structures
//==============================================================================

/// Subscribed-event bits.
pub const EVENT_IN: u32 = 0x01;
pub const EVENT_OUT: u32 = 0x02;

/// Returned-event bits.
pub const REVENT_IN_READY: u32 = 0x01;
pub const REVENT_OUT_READY: u32 = 0x02;
pub const REVENT_ERROR: u32 = 0x04;
pub const REVENT_TIMEOUT: u32 = 0x08;

/// Slice used to emulate an infinite wait so shutdown stays observable.
const BLOCK_SLICE_MS: i32 = 100;

pub struct Poller {
    fds: Vec<libc::pollfd>,
    /// Wait bound in milliseconds: -1 blocks (in bounded slices), 0 returns
    /// immediately, positive waits at most that long.
    pub timeout_ms: i32,
    pevents: u32,
    revents: u32,
    shutdown: ShutdownToken,
}

//==============================================================================
// Associate Functions
//==============================================================================

impl Poller {
    /// Creates an empty readiness set subscribed to input events.
    pub fn new(shutdown: ShutdownToken) -> Self {
        Self {
            fds: Vec::new(),
            timeout_ms: 0,
            pevents: EVENT_IN,
            revents: 0,
            shutdown,
        }
    }

    /// Adds a descriptor to the set. Fails if it is already a member.
    pub fn insert_fd(&mut self, fd: RawFd) -> Result<(), Fail> {
        if self.fds.iter().any(|p| p.fd == fd) {
            error!("fd {} is already in the readiness set", fd);
            return Err(Fail::AlreadyRegistered { fd });
        }
        self.fds.push(libc::pollfd { fd, events: 0, revents: 0 });
        self.apply_mask();
        Ok(())
    }

    /// Removes a descriptor from the set. Fails if it is not a member.
    pub fn remove_fd(&mut self, fd: RawFd) -> Result<(), Fail> {
        match self.fds.iter().position(|p| p.fd == fd) {
            Some(i) => {
                self.fds.remove(i);
                Ok(())
            }
            None => {
                error!("fd {} is not in the readiness set", fd);
                Err(Fail::NotRegistered { fd })
            }
        }
    }

    pub fn len(&self) -> usize {
        self.fds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fds.is_empty()
    }

    /// Sets the desired-event mask (EVENT_IN | EVENT_OUT) over all members.
    pub fn set_events(&mut self, mask: u32) {
        self.pevents = mask;
        self.apply_mask();
    }

    /// Combined returned-event mask from the most recent poll.
    pub fn revents(&self) -> u32 {
        self.revents
    }

    fn apply_mask(&mut self) {
        for pfd in self.fds.iter_mut() {
            let mut events = libc::POLLPRI | libc::POLLERR | libc::POLLHUP | libc::POLLNVAL;
            #[cfg(target_os = "linux")]
            {
                events |= libc::POLLRDHUP;
            }
            if self.pevents & EVENT_IN != 0 {
                events |= libc::POLLIN;
            }
            if self.pevents & EVENT_OUT != 0 {
                events |= libc::POLLOUT;
            }
            pfd.events = events;
        }
    }

    /// Waits up to the configured timeout for any member to become ready.
    /// On success the combined mask is readable through [revents] and the
    /// per-member masks through [events_at]. A failed underlying wait (not a
    /// timeout) is fatal for the whole set.
    pub fn poll(&mut self) -> Result<(), Fail> {
        if self.fds.is_empty() {
            return Err(Fail::Invalid { details: "empty readiness set" });
        }
        self.revents = 0;
        loop {
            let slice = if self.timeout_ms < 0 { BLOCK_SLICE_MS } else { self.timeout_ms };
            let n = unsafe {
                libc::poll(self.fds.as_mut_ptr(), self.fds.len() as libc::nfds_t, slice)
            };
            if n < 0 {
                let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
                // A signal interrupting the wait reads as a timeout so the
                // caller's loop can observe the shutdown flag.
                if errno == libc::EINTR {
                    self.revents = REVENT_TIMEOUT;
                    return Ok(());
                }
                error!("poll failed (errno {})", errno);
                return Err(Fail::PollFailed { errno });
            }
            if n == 0 {
                if self.timeout_ms < 0 && !self.shutdown.is_set() {
                    continue;
                }
                self.revents = REVENT_TIMEOUT;
                return Ok(());
            }
            for i in 0..self.fds.len() {
                let ev = self.events_at(i);
                // Idle members contribute nothing to the combined mask.
                if ev != REVENT_TIMEOUT {
                    self.revents |= ev;
                }
            }
            return Ok(());
        }
    }

    /// Returned events for the member at `pos`.
    pub fn events_at(&self, pos: usize) -> u32 {
        let pfd = match self.fds.get(pos) {
            Some(p) => p,
            None => return 0,
        };
        let mut ret = 0;

        let mut err = pfd.revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0;
        #[cfg(target_os = "linux")]
        {
            err |= pfd.revents & libc::POLLRDHUP != 0;
        }
        if err {
            ret |= REVENT_ERROR;
        }

        if pfd.revents & libc::POLLIN != 0 {
            // A readable descriptor whose peek yields zero bytes is a hung-up
            // stream peer on platforms without a dedicated hangup event.
            #[cfg(not(target_os = "linux"))]
            {
                if hangup_peek(pfd.fd) {
                    return ret | REVENT_ERROR;
                }
            }
            ret |= REVENT_IN_READY;
        }

        if pfd.revents & libc::POLLOUT != 0 {
            ret |= REVENT_OUT_READY;
        }

        if ret == 0 {
            ret = REVENT_TIMEOUT;
        }
        ret
    }
}

/// Zero-byte MSG_PEEK probe: distinguishes "input ready" from "peer closed"
/// where hangup surfaces as a readable EOF.
#[cfg(not(target_os = "linux"))]
fn hangup_peek(fd: RawFd) -> bool {
    let mut probe = [0u8; 1];
    let n = unsafe {
        libc::recv(
            fd,
            probe.as_mut_ptr() as *mut libc::c_void,
            probe.len(),
            libc::MSG_PEEK | libc::MSG_DONTWAIT,
        )
    };
    n == 0
}

//==============================================================================
// Unit Tests
//==============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::net::{TcpListener, TcpStream};
    use std::os::unix::io::AsRawFd;
    use std::thread;
    use std::time::Duration;

    fn loopback_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, server)
    }

    #[test]
    fn idle_descriptor_times_out() {
        let (client, _server) = loopback_pair();
        let mut poller = Poller::new(ShutdownToken::new());
        poller.insert_fd(client.as_raw_fd()).unwrap();
        poller.timeout_ms = 0;
        poller.poll().unwrap();
        assert_eq!(poller.revents(), REVENT_TIMEOUT);
    }

    #[test]
    fn insert_remove_roundtrip() {
        let (client, server) = loopback_pair();
        let mut poller = Poller::new(ShutdownToken::new());
        assert_eq!(poller.len(), 0);
        poller.insert_fd(client.as_raw_fd()).unwrap();
        assert!(poller.insert_fd(client.as_raw_fd()).is_err());
        poller.insert_fd(server.as_raw_fd()).unwrap();
        assert_eq!(poller.len(), 2);
        poller.remove_fd(client.as_raw_fd()).unwrap();
        assert_eq!(poller.len(), 1);
        assert!(poller.remove_fd(client.as_raw_fd()).is_err());
    }

    #[test]
    fn readable_descriptor_reports_input() {
        let (mut client, server) = loopback_pair();
        let mut poller = Poller::new(ShutdownToken::new());
        poller.insert_fd(server.as_raw_fd()).unwrap();
        poller.timeout_ms = 1000;
        client.write_all(b"x").unwrap();
        poller.poll().unwrap();
        assert_ne!(poller.revents() & REVENT_IN_READY, 0);
    }

    #[test]
    fn closed_peer_reports_error() {
        let (client, server) = loopback_pair();
        let mut poller = Poller::new(ShutdownToken::new());
        poller.insert_fd(server.as_raw_fd()).unwrap();
        poller.timeout_ms = 1000;
        drop(client);
        thread::sleep(Duration::from_millis(20));
        poller.poll().unwrap();
        assert_ne!(poller.revents() & REVENT_ERROR, 0);
    }

    #[test]
    fn infinite_timeout_observes_shutdown() {
        let (client, _server) = loopback_pair();
        let shutdown = ShutdownToken::new();
        let mut poller = Poller::new(shutdown.clone());
        poller.insert_fd(client.as_raw_fd()).unwrap();
        poller.timeout_ms = -1;
        shutdown.set();
        let t0 = std::time::Instant::now();
        poller.poll().unwrap();
        assert_eq!(poller.revents(), REVENT_TIMEOUT);
        assert!(t0.elapsed() < Duration::from_secs(2));
    }
}
