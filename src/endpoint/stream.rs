//! Stream (TCP) operations: listen/accept, the non-blocking connect state
//! machine, and the attempt → classify → single-retry receive/send paths.

use super::sys;
use super::{Endpoint, RecvOutcome, SockState};

use crate::clock;
use crate::fail::{is_errno_fatal, Fail};
use crate::poller::{EVENT_IN, EVENT_OUT, REVENT_ERROR, REVENT_IN_READY, REVENT_OUT_READY};

pub(super) fn listen(ep: &mut Endpoint) -> Result<(), Fail> {
    if !ep.state.contains(SockState::BOUND) {
        return Err(Fail::Invalid { details: "listen requires a bound endpoint" });
    }
    sys::listen(ep.fd, ep.conf.backlog).map_err(|errno| {
        error!(
            "socket {} failed to listen on {} (errno {})",
            ep.id, ep.addr_self, errno
        );
        Fail::Listen { errno }
    })?;
    ep.state.insert(SockState::LISTENING);
    ep.refresh_addr_self();
    info!(
        "socket {} listening on {} with a backlog of {}",
        ep.id, ep.addr_self, ep.conf.backlog
    );
    Ok(())
}

pub(super) fn accept(listener: &mut Endpoint, id: u32) -> Result<Option<Endpoint>, Fail> {
    if !listener.state.contains(SockState::LISTENING) {
        return Err(Fail::Invalid { details: "accept requires a listening endpoint" });
    }
    if let Err(e) = listener.event.poll() {
        // Transient readiness errors do not take the listener down.
        warn!("socket {} accept readiness wait failed: {}", listener.id, e);
        return Ok(None);
    }
    let revents = listener.event.revents();
    if revents & REVENT_IN_READY == 0 || revents & REVENT_ERROR != 0 {
        return Ok(None);
    }
    match sys::accept(listener.fd) {
        Ok((fd, peer)) => {
            let ts = clock::now_us();
            let mut ep = Endpoint::new(id, listener.conf.clone());
            ep.fd = fd;
            if let Err(e) = ep.event.insert_fd(fd) {
                let _ = sys::close(fd);
                ep.fd = -1;
                return Err(e);
            }
            ep.event.set_events(EVENT_IN);
            ep.addr_peer = peer;
            ep.peer_latched = true;
            ep.refresh_addr_self();
            ep.refresh_addr_peer();
            ep.info.start_us = ts;
            ep.state = SockState::OPEN | SockState::CONNECTED;
            trace!(
                "socket {} accepted on {} from {}",
                ep.id, ep.addr_self, ep.addr_peer
            );
            Ok(Some(ep))
        }
        Err(errno) if !is_errno_fatal(errno) => {
            // Raced away or interrupted; the listener stays healthy.
            trace!("socket {} accept non-fatal error ({})", listener.id, errno);
            Ok(None)
        }
        Err(errno) => {
            error!("socket {} accept failed (errno {})", listener.id, errno);
            Err(Fail::Accept { errno })
        }
    }
}

/// One step of the TCP connect state machine. OPEN is the entry state; the
/// in-progress wait subscribes OUT on the readiness engine and restores the
/// IN-only subscription afterwards.
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
    let connected = match sys::connect(ep.fd, &target) {
        Ok(()) => true,
        Err(libc::EINPROGRESS) => {
            debug!("socket {} connect now in progress", ep.id);
            ep.event.set_events(EVENT_IN | EVENT_OUT);
            let polled = ep.event.poll();
            let revents = ep.event.revents();
            ep.event.set_events(EVENT_IN);
            polled?;
            if revents & REVENT_ERROR != 0 {
                let errno = sys::getsockopt_int(ep.fd, libc::SOL_SOCKET, libc::SO_ERROR)
                    .unwrap_or(0);
                error!("socket {} connect failed (errno {})", ep.id, errno);
                ep.close();
                return Err(Fail::Connect { errno });
            }
            revents & REVENT_OUT_READY != 0
        }
        Err(libc::EISCONN) => true,
        Err(libc::EALREADY) => {
            debug!("socket {} connect already in progress", ep.id);
            false
        }
        Err(libc::EINVAL) => {
            error!("socket {} connect fatal error ({})", ep.id, libc::EINVAL);
            ep.close();
            return Err(Fail::Connect { errno: libc::EINVAL });
        }
        Err(errno) => {
            debug!("socket {} connect error ({})", ep.id, errno);
            false
        }
    };
    if connected {
        ep.state.insert(SockState::CONNECTED);
        ep.peer_latched = true;
        ep.refresh_addr_self();
        ep.refresh_addr_peer();
        trace!("socket {} connected to {}", ep.id, ep.addr_peer);
    }
    Ok(connected)
}

pub(super) fn recv(ep: &mut Endpoint, buf: &mut [u8]) -> Result<RecvOutcome, Fail> {
    match sys::recv(ep.fd, buf) {
        // A zero-byte read on a connected stream is the peer's EOF.
        Ok(0) => Err(Fail::PeerClosed {}),
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
            match sys::recv(ep.fd, buf) {
                // Input was ready yet nothing arrived: the peer is gone.
                Ok(0) => Err(Fail::PeerClosed {}),
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

pub(super) fn send(ep: &mut Endpoint, buf: &[u8]) -> Result<usize, Fail> {
    match sys::send(ep.fd, buf) {
        Ok(n) => Ok(n),
        Err(errno) if is_errno_fatal(errno) => {
            error!("socket {} send fatal error ({})", ep.id, errno);
            Err(Fail::Send { errno })
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
            match sys::send(ep.fd, buf) {
                Ok(n) => Ok(n),
                Err(errno) if is_errno_fatal(errno) => {
                    error!("socket {} send fatal error ({})", ep.id, errno);
                    Err(Fail::Send { errno })
                }
                Err(_) => Ok(0),
            }
        }
    }
}
