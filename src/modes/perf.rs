//! Performance mode. In the server role a dedicated acceptor task turns
//! each accepted connection into a per-flow receive task; in the client
//! role one send task runs per configured parallel flow. Every flow loops
//! readiness wait → token-bucket admission → transfer → statistics update
//! and reports through the header/body/footer formatter lines.

use crate::clock;
use crate::config::{Config, EndpointConf, Role, Transport};
use crate::context::ProcessCtx;
use crate::endpoint::{Direction, Endpoint};
use crate::fail::Fail;
use crate::form::{self, PerfFormat};
use crate::pool::ThreadPool;

use bytes::BytesMut;
use rand::{rngs::SmallRng, RngCore, SeedableRng};
use slab::Slab;

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

//==============================================================================
// Constants & Structures
//==============================================================================

/// Cadence of the per-flow body line.
const BODY_INTERVAL_US: u64 = 1_000_000;

/// Accept-poll bound while idle, so the idle spinner keeps animating even
/// under a long configured flow timeout.
const IDLE_REFRESH_MS: i32 = 200;

/// Acceptor task id: distinct from every flow id, which start at 1.
const ACCEPTOR_TASK_ID: u32 = 0;

//==============================================================================
// Driver
//==============================================================================

pub fn run(cfg: &Config, ctx: &ProcessCtx) -> Result<(), Fail> {
    match cfg.endpoint.role {
        Role::Client => run_client(cfg, ctx),
        Role::Server | Role::Peer => run_server(cfg, ctx),
    }
}

fn run_server(cfg: &Config, ctx: &ProcessCtx) -> Result<(), Fail> {
    let mut listener = Endpoint::new(0, cfg.endpoint.clone());
    listener.open()?;
    listener.bind()?;
    listener.listen()?;

    // One worker is pinned by the acceptor for the process lifetime.
    let pool = Arc::new(ThreadPool::new(cfg.threads.max(2), super::affinity_cores(cfg.affinity)));
    pool.start();

    let active = Arc::new(AtomicU32::new(0));
    let failed = Arc::new(AtomicBool::new(false));
    {
        let pool = pool.clone();
        let ctx = ctx.clone();
        let active = active.clone();
        let failed = failed.clone();
        pool.clone().execute(ACCEPTOR_TASK_ID, move || {
            acceptor_loop(listener, pool, ctx, active, failed);
        });
    }

    while !ctx.shutdown.is_set() && !failed.load(Ordering::Relaxed) {
        thread::sleep(Duration::from_millis(100));
    }
    ctx.shutdown.set();
    pool.stop();

    if failed.load(Ordering::Relaxed) {
        return Err(Fail::Invalid { details: "listener terminated abnormally" });
    }
    Ok(())
}

fn acceptor_loop(
    mut listener: Endpoint,
    pool: Arc<ThreadPool>,
    ctx: ProcessCtx,
    active: Arc<AtomicU32>,
    failed: Arc<AtomicBool>,
) {
    let mut form = PerfFormat::new();
    // Connection ids are recycled through a slab so long-lived servers keep
    // compact, reusable ids; slot 0 belongs to the listener.
    let ids: Arc<Mutex<Slab<()>>> = Arc::new(Mutex::new(Slab::new()));
    match ids.lock() {
        Ok(mut slab) => {
            slab.insert(());
        }
        Err(_) => return,
    }
    let transport = listener.conf().transport;
    let self_addr = listener.addr_self().to_string();
    if listener.event.timeout_ms < 0 || listener.event.timeout_ms > IDLE_REFRESH_MS {
        listener.event.timeout_ms = IDLE_REFRESH_MS;
    }

    while !ctx.shutdown.is_set() {
        // Datagram flows share the listener socket and demultiplex by peer,
        // so only one is driven at a time.
        if transport == Transport::Datagram && active.load(Ordering::Relaxed) > 0 {
            thread::sleep(Duration::from_millis(10));
            continue;
        }
        let id = match ids.lock() {
            Ok(mut slab) => slab.insert(()) as u32,
            Err(_) => break,
        };
        match listener.accept(id) {
            Ok(Some(flow)) => {
                debug!("server accepted connection on {}", self_addr);
                active.fetch_add(1, Ordering::Relaxed);
                let ctx = ctx.clone();
                let active = active.clone();
                let ids = ids.clone();
                pool.execute(id, move || {
                    flow_recv_loop(flow, &ctx);
                    active.fetch_sub(1, Ordering::Relaxed);
                    if let Ok(mut slab) = ids.lock() {
                        slab.remove(id as usize);
                    }
                });
            }
            Ok(None) => {
                if let Ok(mut slab) = ids.lock() {
                    slab.remove(id as usize);
                }
                if active.load(Ordering::Relaxed) == 0 {
                    form::put(&form.idle(transport, &self_addr));
                }
            }
            Err(e) => {
                // A fatal listener takes the whole program down.
                error!("socket 0 acceptor failed: {}", e);
                failed.store(true, Ordering::Relaxed);
                break;
            }
        }
    }
    listener.close();
}

fn flow_recv_loop(mut ep: Endpoint, ctx: &ProcessCtx) {
    let form = PerfFormat::new();
    form::put(&form.head(&ep));

    let buflen = ep.conf().buflen;
    let byte_limit = ep.conf().byte_limit;
    let time_limit_us = ep.conf().time_limit_us;
    let mut buf = BytesMut::with_capacity(buflen);
    buf.resize(buflen, 0);
    let mut next_body = clock::now_us() + BODY_INTERVAL_US;

    while !ctx.shutdown.is_set() {
        if byte_limit > 0 && ep.info.recv.total_bytes >= byte_limit {
            break;
        }
        let now = clock::now_us();
        if time_limit_us > 0 && ep.info.elapsed_us(now) >= time_limit_us {
            break;
        }
        match ep.recv(&mut buf) {
            Ok(_) => {}
            Err(e) => {
                debug!("socket {} flow ended: {}", ep.id(), e);
                break;
            }
        }
        let now = clock::now_us();
        if now >= next_body {
            ep.refresh_windows();
            form::put(&form.body(&ep, true));
            next_body = now + BODY_INTERVAL_US;
        }
    }
    ep.close();
    form::put(&form.foot(&ep, true));
}

fn run_client(cfg: &Config, ctx: &ProcessCtx) -> Result<(), Fail> {
    let pool = ThreadPool::new(cfg.threads.max(cfg.parallel as usize), super::affinity_cores(cfg.affinity));
    pool.start();

    for i in 0..cfg.parallel {
        let id = i + 1;
        let conf = cfg.endpoint.clone();
        let ctx = ctx.clone();
        pool.execute(id, move || client_flow(id, conf, &ctx));
    }

    let reached = pool.wait_for_completion(cfg.parallel);
    pool.stop();
    if reached || ctx.shutdown.is_set() {
        Ok(())
    } else {
        Err(Fail::Invalid { details: "client flows did not complete" })
    }
}

fn client_flow(id: u32, conf: EndpointConf, ctx: &ProcessCtx) {
    let mut ep = Endpoint::new(id, conf);
    if let Err(e) = ep.open().and_then(|_| ep.bind()) {
        error!("socket {} setup failed: {}", id, e);
        return;
    }
    loop {
        if ctx.shutdown.is_set() {
            ep.close();
            return;
        }
        match ep.connect() {
            Ok(true) => break,
            Ok(false) => thread::sleep(Duration::from_millis(10)),
            Err(e) => {
                error!("socket {} connect failed: {}", id, e);
                ep.close();
                return;
            }
        }
    }

    let form = PerfFormat::new();
    form::put(&form.head(&ep));

    let buflen = ep.conf().buflen;
    let byte_limit = ep.conf().byte_limit;
    let time_limit_us = ep.conf().time_limit_us;
    let transport = ep.conf().transport;
    let mut payload = vec![0u8; buflen];
    SmallRng::seed_from_u64(id as u64).fill_bytes(&mut payload);
    let mut next_body = clock::now_us() + BODY_INTERVAL_US;

    while !ctx.shutdown.is_set() {
        let sent = ep.info.send.total_bytes;
        if byte_limit > 0 && sent >= byte_limit {
            break;
        }
        let now = clock::now_us();
        if time_limit_us > 0 && ep.info.elapsed_us(now) >= time_limit_us {
            break;
        }
        let want = if byte_limit > 0 {
            (byte_limit - sent).min(buflen as u64) as usize
        } else {
            buflen
        };
        match ep.send(&payload[..want]) {
            Ok(_) => {}
            Err(e) => {
                debug!("socket {} flow ended: {}", id, e);
                break;
            }
        }
        let now = clock::now_us();
        if now >= next_body {
            ep.refresh_windows();
            form::put(&form.body(&ep, false));
            next_body = now + BODY_INTERVAL_US;
        }
    }
    if transport == Transport::Stream {
        ep.shutdown(Direction::Write);
    }
    ep.close();
    form::put(&form.foot(&ep, false));
}
