//! Socket endpoint. An [Endpoint] owns a kernel descriptor, its readiness
//! subscription, a token bucket, and per-flow statistics, and exposes a
//! uniform non-blocking operation set over both transports. Blocking is
//! synthesized by polling the readiness engine with the configured timeout:
//! every receive/send is attempted once, classified fatal or retryable, and
//! retried at most once after a readiness wait.

pub mod addr;
mod dgram;
mod stream;
mod sys;

pub use self::addr::SockAddr;

use crate::bucket::TokenBucket;
use crate::clock;
use crate::config::{EndpointConf, Role, SockOpt, Transport};
use crate::fail::Fail;
use crate::poller::{Poller, EVENT_IN};
use crate::stats::FlowInfo;

use std::fmt;
use std::net::IpAddr;
use std::os::unix::io::RawFd;
use std::thread;
use std::time::Duration;

//==============================================================================
// Constants & Structures
//==============================================================================

/// Endpoint state bitset. Bits accumulate as the endpoint advances; closing
/// resets the set to CLOSED.
#[derive(Clone, Copy, Eq, PartialEq)]
pub struct SockState(u32);

impl SockState {
    pub const CLOSED: SockState = SockState(0x01);
    pub const OPEN: SockState = SockState(0x02);
    pub const BOUND: SockState = SockState(0x04);
    pub const LISTENING: SockState = SockState(0x08);
    pub const CONNECTED: SockState = SockState(0x10);

    pub fn contains(self, other: SockState) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: SockState) {
        self.0 |= other.0;
    }
}

impl Default for SockState {
    fn default() -> Self {
        SockState::CLOSED
    }
}

impl std::ops::BitOr for SockState {
    type Output = SockState;

    fn bitor(self, rhs: SockState) -> SockState {
        SockState(self.0 | rhs.0)
    }
}

impl fmt::Debug for SockState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "SockState({:#04x})", self.0)
    }
}

/// Half-close direction for [Endpoint::shutdown].
#[derive(Clone, Copy, Debug)]
pub enum Direction {
    Read,
    Write,
    Both,
}

/// Transport-level receive outcome. Distinguishes bytes actually received
/// from a readiness-wait timeout, so the statistics wrapper can count a
/// zero-length datagram as a successful call.
enum RecvOutcome {
    Data(usize),
    NotReady,
}

pub struct Endpoint {
    id: u32,
    fd: RawFd,
    conf: EndpointConf,
    state: SockState,
    pub event: Poller,
    pub bucket: TokenBucket,
    pub info: FlowInfo,
    addr_self: SockAddr,
    addr_peer: SockAddr,
    /// Datagram endpoints adopt their peer from the first received datagram.
    peer_latched: bool,
}

//==============================================================================
// Associate Functions
//==============================================================================

impl Endpoint {
    /// Creates an endpoint in the CLOSED state; no descriptor exists until
    /// [open](Self::open).
    pub fn new(id: u32, conf: EndpointConf) -> Self {
        let mut event = Poller::new(conf.shutdown.clone());
        event.timeout_ms = conf.timeout_ms;
        let bucket = TokenBucket::new(conf.rate_bps, conf.buflen as u64);
        Self {
            id,
            fd: -1,
            conf,
            state: SockState::CLOSED,
            event,
            bucket,
            info: FlowInfo::default(),
            addr_self: SockAddr::default(),
            addr_peer: SockAddr::default(),
            peer_latched: false,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn state(&self) -> SockState {
        self.state
    }

    pub fn conf(&self) -> &EndpointConf {
        &self.conf
    }

    pub fn addr_self(&self) -> &SockAddr {
        &self.addr_self
    }

    pub fn addr_peer(&self) -> &SockAddr {
        &self.addr_peer
    }

    /// Creates the descriptor, applies socket options, and registers the
    /// readiness subscription.
    pub fn open(&mut self) -> Result<(), Fail> {
        if self.state.contains(SockState::OPEN) {
            return Err(Fail::Invalid { details: "endpoint is already open" });
        }
        let family = match self.conf.ip {
            IpAddr::V4(_) => libc::AF_INET,
            IpAddr::V6(_) => libc::AF_INET6,
        };
        let socktype = match self.conf.transport {
            Transport::Stream => libc::SOCK_STREAM,
            Transport::Datagram => libc::SOCK_DGRAM,
        };
        let fd = sys::socket(family, socktype).map_err(|errno| {
            error!("socket {} creation failed (errno {})", self.id, errno);
            Fail::SocketCreate { errno }
        })?;
        if let Err(errno) = sys::set_nonblocking(fd) {
            let _ = sys::close(fd);
            return Err(Fail::SocketCreate { errno });
        }
        if let Err(errno) = sys::setsockopt_int(fd, libc::SOL_SOCKET, libc::SO_REUSEADDR, 1) {
            error!("socket {} SO_REUSEADDR failed (errno {})", self.id, errno);
            let _ = sys::close(fd);
            return Err(Fail::SocketOpt { name: libc::SO_REUSEADDR, errno });
        }
        #[cfg(target_os = "macos")]
        {
            if let Err(errno) = sys::setsockopt_int(fd, libc::SOL_SOCKET, libc::SO_NOSIGPIPE, 1) {
                error!("socket {} SO_NOSIGPIPE failed (errno {})", self.id, errno);
                let _ = sys::close(fd);
                return Err(Fail::SocketOpt { name: libc::SO_NOSIGPIPE, errno });
            }
        }
        for opt in self.conf.opts.iter() {
            if let Err(errno) = sys::setsockopt_int(fd, opt.level, opt.name, opt.value) {
                error!(
                    "socket {} option {}/{} failed (errno {})",
                    self.id, opt.level, opt.name, errno
                );
                let _ = sys::close(fd);
                return Err(Fail::SocketOpt { name: opt.name, errno });
            }
        }
        self.fd = fd;
        if let Err(e) = self.event.insert_fd(fd) {
            let _ = sys::close(fd);
            self.fd = -1;
            return Err(e);
        }
        self.event.set_events(EVENT_IN);
        self.addr_self = SockAddr::from_ip_port(self.conf.ip, self.conf.port);
        self.addr_peer = self.addr_self;
        self.state = SockState::OPEN;
        trace!("socket {} opened (fd {})", self.id, fd);
        Ok(())
    }

    /// Closes the descriptor and resets the state to CLOSED. Best effort:
    /// failures are logged, never raised.
    pub fn close(&mut self) {
        if self.fd >= 0 {
            let _ = self.event.remove_fd(self.fd);
            if let Err(errno) = sys::close(self.fd) {
                warn!("socket {} could not be closed (errno {})", self.id, errno);
            }
            self.fd = -1;
        }
        if self.info.start_us > 0 && self.info.stop_us == 0 {
            self.info.stop_us = clock::now_us();
        }
        self.state = SockState::CLOSED;
    }

    /// Assigns the local address. A client without an explicit bind address
    /// is a no-op; the kernel picks an ephemeral port at connect.
    pub fn bind(&mut self) -> Result<(), Fail> {
        let (ip, port) = match self.conf.role {
            Role::Client => match self.conf.bind_addr {
                Some(a) => a,
                None => return Ok(()),
            },
            _ => (self.conf.ip, self.conf.port),
        };
        sys::bind(self.fd, &SockAddr::from_ip_port(ip, port)).map_err(|errno| {
            error!("socket {} bind to {}:{} failed (errno {})", self.id, ip, port, errno);
            Fail::Bind { errno }
        })?;
        self.refresh_addr_self();
        self.state.insert(SockState::BOUND);
        Ok(())
    }

    /// Marks the endpoint as a listener with the configured backlog.
    pub fn listen(&mut self) -> Result<(), Fail> {
        match self.conf.transport {
            Transport::Stream => stream::listen(self),
            Transport::Datagram => dgram::listen(self),
        }
    }

    /// Accepts one pending flow, returning `Ok(None)` on readiness timeout
    /// or transient readiness errors. The new endpoint inherits this
    /// listener's configuration and starts its statistics clock.
    pub fn accept(&mut self, id: u32) -> Result<Option<Endpoint>, Fail> {
        match self.conf.transport {
            Transport::Stream => stream::accept(self, id),
            Transport::Datagram => dgram::accept(self, id),
        }
    }

    /// Advances the connect state machine. `Ok(true)` once connected,
    /// `Ok(false)` while in progress; the caller retries until either
    /// outcome or shutdown.
    pub fn connect(&mut self) -> Result<bool, Fail> {
        match self.conf.transport {
            Transport::Stream => stream::connect(self),
            Transport::Datagram => dgram::connect(self),
        }
    }

    /// Receives at most `buf.len()` bytes. `Ok(0)` means the readiness wait
    /// timed out and the call may be retried, or, on a datagram endpoint,
    /// that a zero-length datagram arrived (counted as a successful call in
    /// the statistics); errors are flow-fatal.
    pub fn recv(&mut self, buf: &mut [u8]) -> Result<usize, Fail> {
        let begin = clock::now_us();
        let result = match self.conf.transport {
            Transport::Stream => stream::recv(self, buf),
            Transport::Datagram => dgram::recv(self, buf),
        };
        let end = clock::now_us();
        match result {
            Ok(RecvOutcome::Data(n)) => {
                self.info.recv.record_pass(n, begin, end);
                Ok(n)
            }
            Ok(RecvOutcome::NotReady) => {
                self.info.recv.record_fail(begin, end);
                Ok(0)
            }
            Err(e) => {
                self.info.recv.record_fail(begin, end);
                Err(e)
            }
        }
    }

    /// Sends at most `buf.len()` bytes, subject to token-bucket admission.
    /// A declined admission backs off for the bucket's computed delay
    /// (bounded by the configured timeout) and reports `Ok(0)`.
    pub fn send(&mut self, buf: &[u8]) -> Result<usize, Fail> {
        let want = buf.len() as u64;
        let begin = clock::now_us();
        if self.bucket.is_limited() && want > 0 && self.bucket.remove(want) == 0 {
            let cap = if self.conf.timeout_ms < 0 {
                100 * clock::USEC_PER_MSEC
            } else {
                self.conf.timeout_ms as u64 * clock::USEC_PER_MSEC
            };
            let wait = self.bucket.delay(want).min(cap);
            if wait > 0 {
                thread::sleep(Duration::from_micros(wait));
            }
            self.info.send.record_fail(begin, clock::now_us());
            return Ok(0);
        }
        let result = match self.conf.transport {
            Transport::Stream => stream::send(self, buf),
            Transport::Datagram => dgram::send(self, buf),
        };
        let end = clock::now_us();
        match result {
            Ok(n) if n > 0 => {
                self.info.send.record_pass(n, begin, end);
                if self.bucket.is_limited() && (n as u64) < want {
                    self.bucket.give_back(want - n as u64);
                }
            }
            _ => {
                self.info.send.record_fail(begin, end);
                if self.bucket.is_limited() {
                    self.bucket.give_back(want);
                }
            }
        }
        result
    }

    /// Directional half-close. Best effort.
    pub fn shutdown(&mut self, dir: Direction) {
        let how = match dir {
            Direction::Read => libc::SHUT_RD,
            Direction::Write => libc::SHUT_WR,
            Direction::Both => libc::SHUT_RDWR,
        };
        if let Err(errno) = sys::shutdown(self.fd, how) {
            warn!("socket {} shutdown failed (errno {})", self.id, errno);
        }
    }

    /// Applies options to the live descriptor.
    pub fn set_opts(&mut self, opts: &[SockOpt]) -> Result<(), Fail> {
        for opt in opts {
            sys::setsockopt_int(self.fd, opt.level, opt.name, opt.value)
                .map_err(|errno| Fail::SocketOpt { name: opt.name, errno })?;
        }
        Ok(())
    }

    /// Reads one integer option back from the descriptor.
    pub fn opt(&self, level: i32, name: i32) -> Result<i32, Fail> {
        sys::getsockopt_int(self.fd, level, name)
            .map_err(|errno| Fail::SocketOpt { name, errno })
    }

    /// Reads a list of integer options back from the descriptor.
    pub fn get_opts(&self, names: &[(i32, i32)]) -> Result<Vec<SockOpt>, Fail> {
        let mut opts = Vec::with_capacity(names.len());
        for &(level, name) in names {
            opts.push(SockOpt { level, name, value: self.opt(level, name)? });
        }
        Ok(opts)
    }

    /// Smoothed round-trip time in microseconds, where the kernel exposes it.
    pub fn rtt_us(&self) -> Option<u32> {
        #[cfg(target_os = "linux")]
        {
            if self.conf.transport == Transport::Stream && self.fd >= 0 {
                return sys::tcp_info(self.fd).ok().map(|ti| ti.tcpi_rtt);
            }
        }
        None
    }

    /// Refreshes the per-direction kernel window figures.
    pub fn refresh_windows(&mut self) {
        if self.conf.transport != Transport::Stream || self.fd < 0 {
            return;
        }
        #[cfg(target_os = "linux")]
        {
            if let Ok(ti) = sys::tcp_info(self.fd) {
                self.info.send.window = Some(ti.tcpi_snd_cwnd.saturating_mul(ti.tcpi_snd_mss));
                self.info.recv.window = Some(ti.tcpi_rcv_space);
                return;
            }
        }
        self.info.send.window =
            sys::getsockopt_int(self.fd, libc::SOL_SOCKET, libc::SO_SNDBUF).ok().map(|v| v as u32);
        self.info.recv.window =
            sys::getsockopt_int(self.fd, libc::SOL_SOCKET, libc::SO_RCVBUF).ok().map(|v| v as u32);
    }

    fn refresh_addr_self(&mut self) {
        match sys::getsockname(self.fd) {
            Ok(addr) => self.addr_self = addr,
            Err(errno) => {
                warn!("socket {} getsockname failed (errno {})", self.id, errno);
            }
        }
    }

    fn refresh_addr_peer(&mut self) {
        match sys::getpeername(self.fd) {
            Ok(addr) => self.addr_peer = addr,
            Err(errno) => {
                warn!("socket {} getpeername failed (errno {})", self.id, errno);
            }
        }
    }
}

/// Readiness wait for a blocked send: subscribes OUT, polls once with the
/// configured timeout, and restores the IN-only subscription before
/// reporting the returned mask.
fn wait_writable(ep: &mut Endpoint) -> Result<u32, Fail> {
    ep.event.set_events(crate::poller::EVENT_OUT);
    let polled = ep.event.poll();
    let revents = ep.event.revents();
    ep.event.set_events(EVENT_IN);
    polled?;
    Ok(revents)
}

//==============================================================================
// Trait Implementations
//==============================================================================

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Endpoint(id={}, fd={}, state={:?})", self.id, self.fd, self.state)
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        if self.fd >= 0 {
            self.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_bits_accumulate() {
        let mut state = SockState::default();
        assert!(state.contains(SockState::CLOSED));
        state = SockState::OPEN;
        state.insert(SockState::BOUND);
        state.insert(SockState::LISTENING);
        assert!(state.contains(SockState::OPEN));
        assert!(state.contains(SockState::BOUND));
        assert!(state.contains(SockState::LISTENING));
        assert!(!state.contains(SockState::CONNECTED));
        assert!(state.contains(SockState::OPEN | SockState::BOUND));
    }

    #[test]
    fn open_close_lifecycle() {
        let mut ep = Endpoint::new(1, EndpointConf::default());
        assert!(ep.state().contains(SockState::CLOSED));
        ep.open().unwrap();
        assert!(ep.state().contains(SockState::OPEN));
        assert!(ep.fd() >= 0);
        assert!(ep.open().is_err());
        ep.close();
        assert!(ep.state().contains(SockState::CLOSED));
        assert_eq!(ep.fd(), -1);
    }
}
