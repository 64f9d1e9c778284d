//! End-to-end perf-mode runs over loopback: a server driver in one thread,
//! a client driver in another, shut down through the process context the
//! way the binary does it.

use sockflow::config::{Config, EndpointConf, Role, Transport};
use sockflow::context::ProcessCtx;
use sockflow::modes;

use std::net::{IpAddr, Ipv4Addr};
use std::thread;
use std::time::Duration;

fn endpoint_conf(transport: Transport, role: Role, port: u16, ctx: &ProcessCtx) -> EndpointConf {
    EndpointConf {
        transport,
        role,
        ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
        port,
        timeout_ms: 200,
        shutdown: ctx.shutdown.clone(),
        ..EndpointConf::default()
    }
}

fn do_perf_end_to_end(transport: Transport, port: u16, byte_limit: u64, buflen: usize) {
    let server_ctx = ProcessCtx::new();
    let server = {
        let ctx = server_ctx.clone();
        thread::spawn(move || {
            let cfg = Config {
                threads: 3,
                endpoint: endpoint_conf(transport, Role::Server, port, &ctx),
                ..Config::default()
            };
            modes::run(&cfg, &ctx)
        })
    };
    // The listener binds synchronously at driver start; the client retries
    // refused connects anyway.
    thread::sleep(Duration::from_millis(100));

    let client_ctx = ProcessCtx::new();
    let mut endpoint = endpoint_conf(transport, Role::Client, port, &client_ctx);
    endpoint.byte_limit = byte_limit;
    endpoint.buflen = buflen;
    endpoint.timeout_ms = 1000;
    let cfg = Config { parallel: 2, threads: 3, endpoint, ..Config::default() };
    modes::run(&cfg, &client_ctx).unwrap();

    server_ctx.shutdown.set();
    server.join().unwrap().unwrap();
}

#[test]
fn sockflow_perf_tcp_end_to_end() {
    do_perf_end_to_end(Transport::Stream, 15701, 262_144, 16384);
}

#[test]
fn sockflow_perf_udp_end_to_end() {
    do_perf_end_to_end(Transport::Datagram, 15702, 12_400, 248);
}
