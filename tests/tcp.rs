use crossbeam_channel;

use sockflow::clock;
use sockflow::config::{EndpointConf, Role, Transport};
use sockflow::endpoint::{Direction, Endpoint, SockState};

use std::net::{IpAddr, Ipv4Addr};
use std::thread;

mod common;

use common::*;

fn stream_conf(role: Role, port: u16) -> EndpointConf {
    EndpointConf {
        transport: Transport::Stream,
        role,
        ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
        port,
        timeout_ms: 1000,
        ..EndpointConf::default()
    }
}

//==============================================================================
// Loopback Throughput
//==============================================================================

/// Tests that a bounded byte count crosses a loopback connection intact and
/// that both footer totals agree.
fn do_tcp_loopback_throughput() {
    const XFER: u64 = 1_048_576;
    let (port_tx, port_rx) = crossbeam_channel::bounded(1);

    let server = thread::spawn(move || {
        let mut listener = Endpoint::new(0, stream_conf(Role::Server, 0));
        listener.open().unwrap();
        listener.bind().unwrap();
        listener.listen().unwrap();
        port_tx.send(listener.addr_self().port()).unwrap();

        let mut flow = accept_one(&mut listener);
        let mut buf = vec![0u8; 65536];
        loop {
            if flow.info.recv.total_bytes >= XFER {
                break;
            }
            match flow.recv(&mut buf) {
                Ok(_) => {}
                Err(e) => panic!("server flow failed early: {}", e),
            }
        }
        assert_eq!(flow.info.recv.total_bytes, XFER);
        assert!(flow.info.recv.passed_calls > 0);
        flow.close();
        assert!(flow.state().contains(SockState::CLOSED));
        assert!(listener.state().contains(SockState::LISTENING));
        listener.close();
    });

    let client = thread::spawn(move || {
        let port = port_rx.recv().unwrap();
        let mut ep = Endpoint::new(1, stream_conf(Role::Client, port));
        ep.open().unwrap();
        ep.bind().unwrap();
        connect_blocking(&mut ep);
        assert!(ep.state().contains(SockState::CONNECTED));

        let payload = vec![0xa5u8; 65536];
        while ep.info.send.total_bytes < XFER {
            let want = (XFER - ep.info.send.total_bytes).min(payload.len() as u64) as usize;
            ep.send(&payload[..want]).unwrap();
        }
        assert_eq!(ep.info.send.total_bytes, XFER);
        ep.shutdown(Direction::Write);
        ep.close();
        assert!(ep.state().contains(SockState::CLOSED));
    });

    server.join().unwrap();
    client.join().unwrap();
}

#[test]
fn sockflow_tcp_loopback_throughput() {
    do_tcp_loopback_throughput();
}

//==============================================================================
// Peer Close Detection
//==============================================================================

/// Tests that a closed peer surfaces as a flow-fatal receive after exactly
/// the bytes it sent, while the listener keeps listening.
fn do_tcp_peer_close() {
    let (port_tx, port_rx) = crossbeam_channel::bounded(1);

    let server = thread::spawn(move || {
        let mut listener = Endpoint::new(0, stream_conf(Role::Server, 0));
        listener.open().unwrap();
        listener.bind().unwrap();
        listener.listen().unwrap();
        port_tx.send(listener.addr_self().port()).unwrap();

        let mut flow = accept_one(&mut listener);
        let mut buf = vec![0u8; 1024];
        let fatal = loop {
            match flow.recv(&mut buf) {
                Ok(_) => {}
                Err(e) => break e,
            }
        };
        assert!(fatal.is_flow_fatal());
        assert_eq!(flow.info.recv.total_bytes, 1);
        flow.close();
        assert!(listener.state().contains(SockState::LISTENING));
        listener.close();
    });

    let client = thread::spawn(move || {
        let port = port_rx.recv().unwrap();
        let mut ep = Endpoint::new(1, stream_conf(Role::Client, port));
        ep.open().unwrap();
        connect_blocking(&mut ep);
        loop {
            match ep.send(b"x") {
                Ok(1) => break,
                Ok(_) => {}
                Err(e) => panic!("client send failed: {}", e),
            }
        }
        ep.close();
    });

    server.join().unwrap();
    client.join().unwrap();
}

#[test]
fn sockflow_tcp_peer_close() {
    do_tcp_peer_close();
}

//==============================================================================
// Rate-Limited Send
//==============================================================================

/// Tests that the token bucket holds a one-second 1 MB/s flow to the right
/// order of magnitude.
fn do_tcp_rate_limited() {
    const RATE_BPS: u64 = 8_000_000;
    const TIME_US: u64 = 1_000_000;
    let (port_tx, port_rx) = crossbeam_channel::bounded(1);

    let server = thread::spawn(move || {
        let mut listener = Endpoint::new(0, stream_conf(Role::Server, 0));
        listener.open().unwrap();
        listener.bind().unwrap();
        listener.listen().unwrap();
        port_tx.send(listener.addr_self().port()).unwrap();

        let mut flow = accept_one(&mut listener);
        let mut buf = vec![0u8; 65536];
        loop {
            match flow.recv(&mut buf) {
                Ok(_) => {}
                Err(_) => break,
            }
        }
        flow.close();
        listener.close();
    });

    let client = thread::spawn(move || {
        let port = port_rx.recv().unwrap();
        let mut conf = stream_conf(Role::Client, port);
        conf.rate_bps = RATE_BPS;
        conf.buflen = 8192;
        let mut ep = Endpoint::new(1, conf);
        ep.open().unwrap();
        connect_blocking(&mut ep);

        let payload = vec![0u8; 8192];
        let start = clock::now_us();
        while clock::elapsed_since(start) < TIME_US {
            ep.send(&payload).unwrap();
        }
        let total = ep.info.send.total_bytes;
        // 1 MB/s for one second, with generous scheduling slack.
        assert!(total >= 300_000, "rate limiter too strict: {} bytes", total);
        assert!(total <= 3_000_000, "rate limiter too loose: {} bytes", total);
        ep.shutdown(Direction::Write);
        ep.close();
    });

    server.join().unwrap();
    client.join().unwrap();
}

#[test]
fn sockflow_tcp_rate_limited() {
    do_tcp_rate_limited();
}
