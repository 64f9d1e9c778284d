//! Datagram (UDP) operations. A connected datagram endpoint uses the
//! send/recv pair; an unconnected one uses sendto/recvfrom and adopts its
//! peer from the first successfully received datagram. An oversized
//! datagram (EMSGSIZE) is fatal on the send path and logs the discovered
//! path MTU.

use super::sys;
use super::{Endpoint, RecvOutcome, SockState};

use crate::clock;
use crate::fail::{is_errno_fatal, Fail};
use crate::poller::{REVENT_ERROR, REVENT_IN_READY, REVENT_OUT_READY};

/// Datagram sockets have no kernel listen; the state transition alone makes
/// the accept/poll loop uniform across transports.
pub(super) fn listen(ep: &mut Endpoint) -> Result<(), Fail> {
    if !ep.state.contains(SockState::BOUND) {
        return Err(Fail::Invalid { details: "listen requires a bound endpoint" });
    }
    if ep.conf.backlog == 0 {
        return Err(Fail::Invalid { details: "backlog length" });
    }
    ep.state.insert(SockState::LISTENING);
    ep.refresh_addr_self();
    info!("socket {} listening on {}", ep.id, ep.addr_self);
    Ok(())
}

/// Polls the listener and, on readable input, returns a new endpoint that
/// shares the listener's socket (via a duplicated descriptor) and will
/// demultiplex datagrams by peer address on its first recv.
pub(super) fn accept(listener: &mut Endpoint, id: u32) -> Result<Option<Endpoint>, Fail> {
    if !listener.state.contains(SockState::LISTENING) {
        return Err(Fail::Invalid { details: "accept requires a listening endpoint" });
    }
    if let Err(e) = listener.event.poll() {
        warn!("socket {} accept readiness wait failed: {}", listener.id, e);
        return Ok(None);
    }
    let revents = listener.event.revents();
    if revents & REVENT_IN_READY == 0 || revents & REVENT_ERROR != 0 {
        return Ok(None);
    }
    match sys::dup(listener.fd) {
        Ok(fd) => {
            let mut ep = Endpoint::new(id, listener.conf.clone());
            ep.fd = fd;
            if let Err(e) = ep.event.insert_fd(fd) {
                let _ = sys::close(fd);
                ep.fd = -1;
                return Err(e);
            }
            ep.addr_self = listener.addr_self;
            ep.info.start_us = clock::now_us();
            ep.state = SockState::OPEN;
            trace!("socket {} accepted datagram flow on {}", ep.id, ep.addr_self);
            Ok(Some(ep))
        }
        Err(errno) => {
            error!("socket {} descriptor clone failed (errno {})", listener.id, errno);
            Err(Fail::Accept { errno })
        }
    }
}

/// Kernel-connects the datagram socket so the local port can be retrieved
/// and the send/recv pair can be used.
pub(super) fn connect(ep: &mut Endpoint) -> Result<bool, Fail> {
    if !ep.state.contains(SockState::OPEN) {
        return Err(Fail::Invalid { details: "connect requires an open endpoint" });
    }
    if ep.info.start_us == 0 {
        ep.info.start_us = clock::now_us();
    }
    if ep.state.contains(SockState::CONNECTED) {
        return Ok(true);
    }
    let target = super::SockAddr::from_ip_port(ep.conf.ip, ep.conf.port);
    sys::connect(ep.fd, &target).map_err(|errno| {
        error!("socket {} connect error ({})", ep.id, errno);
        Fail::Connect { errno }
    })?;
    ep.addr_peer = target;
    ep.peer_latched = true;
    ep.state.insert(SockState::CONNECTED);
    ep.refresh_addr_self();
    trace!("socket {} connected to {}", ep.id, ep.addr_peer);
    Ok(true)
}

fn attempt_recv(ep: &mut Endpoint, buf: &mut [u8]) -> Result<usize, i32> {
    if ep.state.contains(SockState::CONNECTED) {
        return sys::recv(ep.fd, buf);
    }
    let (n, peer) = sys::recvfrom(ep.fd, buf)?;
    if n > 0 && !ep.peer_latched {
        ep.addr_peer = peer;
        ep.peer_latched = true;
        trace!("socket {} adopted peer {}", ep.id, ep.addr_peer);
    }
    Ok(n)
}

pub(super) fn recv(ep: &mut Endpoint, buf: &mut [u8]) -> Result<RecvOutcome, Fail> {
    match attempt_recv(ep, buf) {
        // A zero-length datagram is a successful call.
        Ok(n) => Ok(RecvOutcome::Data(n)),
        Err(errno) if is_errno_fatal(errno) => {
            error!("socket {} recv fatal error ({})", ep.id, errno);
            Err(Fail::Recv { errno })
        }
        Err(errno) => {
            trace!("socket {} recv non-fatal error ({})", ep.id, errno);
            ep.event.poll()?;
            let revents = ep.event.revents();
            if revents & REVENT_ERROR != 0 {
                return Err(Fail::ReadinessError {});
            }
            if revents & REVENT_IN_READY == 0 {
                return Ok(RecvOutcome::NotReady);
            }
            match attempt_recv(ep, buf) {
                Ok(n) => Ok(RecvOutcome::Data(n)),
                Err(errno) if is_errno_fatal(errno) => {
                    error!("socket {} recv fatal error ({})", ep.id, errno);
                    Err(Fail::Recv { errno })
                }
                Err(_) => Ok(RecvOutcome::NotReady),
            }
        }
    }
}

fn attempt_send(ep: &mut Endpoint, buf: &[u8]) -> Result<usize, i32> {
    if ep.state.contains(SockState::CONNECTED) {
        sys::send(ep.fd, buf)
    } else {
        sys::sendto(ep.fd, buf, &ep.addr_peer)
    }
}

fn fatal_send(ep: &Endpoint, len: usize, errno: i32) -> Fail {
    if errno == libc::EMSGSIZE {
        // The configured datagram exceeds what the path accepts.
        #[cfg(target_os = "linux")]
        {
            if let Ok(mtu) = sys::path_mtu(ep.fd) {
                error!(
                    "socket {} datagram payload ({}) is larger than the path MTU ({})",
                    ep.id, len, mtu
                );
                return Fail::MsgSize { len };
            }
        }
        error!("socket {} datagram payload ({}) exceeds the maximum message size", ep.id, len);
        return Fail::MsgSize { len };
    }
    error!("socket {} send fatal error ({})", ep.id, errno);
    Fail::Send { errno }
}

pub(super) fn send(ep: &mut Endpoint, buf: &[u8]) -> Result<usize, Fail> {
    match attempt_send(ep, buf) {
        Ok(n) => Ok(n),
        Err(errno) if is_errno_fatal(errno) || errno == libc::EMSGSIZE => {
            Err(fatal_send(ep, buf.len(), errno))
        }
        Err(errno) => {
            trace!("socket {} send non-fatal error ({})", ep.id, errno);
            let revents = super::wait_writable(ep)?;
            if revents & REVENT_ERROR != 0 {
                return Err(Fail::ReadinessError {});
            }
            if revents & REVENT_OUT_READY == 0 {
                return Ok(0);
            }
            match attempt_send(ep, buf) {
                Ok(n) => Ok(n),
                Err(errno) if is_errno_fatal(errno) || errno == libc::EMSGSIZE => {
                    Err(fatal_send(ep, buf.len(), errno))
                }
                Err(_) => Ok(0),
            }
        }
    }
}
