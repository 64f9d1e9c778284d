//! Chat mode: a line-oriented TCP session between two endpoints. A reader
//! thread forwards stdin lines over a channel; the session loop multiplexes
//! peer input (printed to stdout) with queued local lines (sent to the
//! peer). The session ends on peer close or shutdown signal; a server then
//! returns to accepting the next peer.

use crate::config::{Config, Role, Transport};
use crate::context::ProcessCtx;
use crate::endpoint::Endpoint;
use crate::fail::Fail;
use crate::form;

use bytes::BytesMut;
use crossbeam_channel::{Receiver, Sender};

use std::io::{self, BufRead};
use std::thread;
use std::time::Duration;

/// Readiness timeout inside a chat session; short, so queued local lines
/// flush promptly even while the peer is quiet.
const SESSION_TIMEOUT_MS: i32 = 100;

const CHAT_BUFLEN: usize = 4096;

pub fn run(cfg: &Config, ctx: &ProcessCtx) -> Result<(), Fail> {
    if cfg.endpoint.transport != Transport::Stream {
        return Err(Fail::Unsupported { details: "chat mode requires tcp" });
    }
    let (tx, rx) = crossbeam_channel::unbounded::<String>();
    thread::spawn(move || stdin_reader(tx));

    match cfg.endpoint.role {
        Role::Client => {
            let mut ep = Endpoint::new(1, cfg.endpoint.clone());
            ep.open()?;
            ep.bind()?;
            while !ctx.shutdown.is_set() {
                match ep.connect() {
                    Ok(true) => {
                        session(ep, &rx, ctx);
                        return Ok(());
                    }
                    Ok(false) => thread::sleep(Duration::from_millis(10)),
                    Err(e) => {
                        ep.close();
                        return Err(e);
                    }
                }
            }
            ep.close();
            Ok(())
        }
        Role::Server | Role::Peer => {
            let mut listener = Endpoint::new(0, cfg.endpoint.clone());
            listener.open()?;
            listener.bind()?;
            listener.listen()?;
            let mut next_id = 1;
            while !ctx.shutdown.is_set() {
                match listener.accept(next_id) {
                    Ok(Some(peer)) => {
                        next_id += 1;
                        session(peer, &rx, ctx);
                    }
                    Ok(None) => {}
                    Err(e) => {
                        listener.close();
                        return Err(e);
                    }
                }
            }
            listener.close();
            Ok(())
        }
    }
}

fn stdin_reader(tx: Sender<String>) {
    let stdin = io::stdin();
    let mut handle = stdin.lock();
    let mut line = String::new();
    loop {
        line.clear();
        match handle.read_line(&mut line) {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                if tx.send(line.clone()).is_err() {
                    break;
                }
            }
        }
    }
}

fn session(mut ep: Endpoint, rx: &Receiver<String>, ctx: &ProcessCtx) {
    info!("chat session with {}", ep.addr_peer());
    ep.event.timeout_ms = SESSION_TIMEOUT_MS;
    let mut buf = BytesMut::with_capacity(CHAT_BUFLEN);
    buf.resize(CHAT_BUFLEN, 0);

    'outer: while !ctx.shutdown.is_set() {
        match ep.recv(&mut buf) {
            Ok(0) => {}
            Ok(n) => form::put(&String::from_utf8_lossy(&buf[..n])),
            Err(e) => {
                info!("chat peer left: {}", e);
                break;
            }
        }
        while let Ok(line) = rx.try_recv() {
            let bytes = line.as_bytes();
            let mut off = 0;
            while off < bytes.len() {
                if ctx.shutdown.is_set() {
                    break 'outer;
                }
                match ep.send(&bytes[off..]) {
                    Ok(n) => off += n,
                    Err(e) => {
                        error!("chat send failed: {}", e);
                        break 'outer;
                    }
                }
            }
        }
    }
    ep.close();
}
