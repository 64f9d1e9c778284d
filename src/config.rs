//! Parsed configuration. The CLI layer owns flag parsing and unit-string
//! conversion; the core consumes these structures with addresses already
//! split into an [IpAddr] and a port.

use crate::context::ShutdownToken;

use derive_more::Display;

use std::net::{IpAddr, Ipv4Addr};

//==============================================================================
// Constants & Structures
//==============================================================================

pub const DEFAULT_PORT: u16 = 5001;
pub const DEFAULT_BACKLOG: i32 = 128;
pub const DEFAULT_TIMEOUT_MS: i32 = 1000;
pub const DEFAULT_BUFLEN: usize = 65536;

#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum Mode {
    #[display(fmt = "perf")]
    Perf,
    #[display(fmt = "chat")]
    Chat,
}

#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum Role {
    #[display(fmt = "client")]
    Client,
    #[display(fmt = "server")]
    Server,
    #[display(fmt = "peer")]
    Peer,
}

#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum Transport {
    #[display(fmt = "tcp")]
    Stream,
    #[display(fmt = "udp")]
    Datagram,
}

/// One low-level socket option applied at open time.
#[derive(Clone, Copy, Debug)]
pub struct SockOpt {
    pub level: i32,
    pub name: i32,
    pub value: i32,
}

/// Immutable per-endpoint configuration. `ip`/`port` name the bind address
/// for a server endpoint and the peer address for a client endpoint; a
/// client may additionally pin its local address with `bind_addr`.
#[derive(Clone)]
pub struct EndpointConf {
    pub transport: Transport,
    pub role: Role,
    pub ip: IpAddr,
    pub port: u16,
    pub bind_addr: Option<(IpAddr, u16)>,
    pub backlog: i32,
    pub timeout_ms: i32,
    /// Per-flow byte cap; 0 = unlimited.
    pub byte_limit: u64,
    /// Token-bucket fill rate in bits per second; 0 = unlimited.
    pub rate_bps: u64,
    /// Per-flow wall-clock cap in microseconds; 0 = unlimited.
    pub time_limit_us: u64,
    /// Buffer length handed to each receive/send call.
    pub buflen: usize,
    pub opts: Vec<SockOpt>,
    pub shutdown: ShutdownToken,
}

/// Full program configuration handed to a mode driver.
#[derive(Clone)]
pub struct Config {
    pub mode: Mode,
    /// Number of parallel client flows.
    pub parallel: u32,
    /// Worker pool size.
    pub threads: usize,
    /// Advisory CPU affinity mask for pool workers.
    pub affinity: Option<u64>,
    pub endpoint: EndpointConf,
}

//==============================================================================
// Trait Implementations
//==============================================================================

impl Default for EndpointConf {
    fn default() -> Self {
        Self {
            transport: Transport::Stream,
            role: Role::Server,
            ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: DEFAULT_PORT,
            bind_addr: None,
            backlog: DEFAULT_BACKLOG,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            byte_limit: 0,
            rate_bps: 0,
            time_limit_us: 0,
            buflen: DEFAULT_BUFLEN,
            opts: Vec::new(),
            shutdown: ShutdownToken::new(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: Mode::Perf,
            parallel: 1,
            threads: 2,
            affinity: None,
            endpoint: EndpointConf::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names() {
        assert_eq!(Transport::Stream.to_string(), "tcp");
        assert_eq!(Transport::Datagram.to_string(), "udp");
        assert_eq!(Role::Client.to_string(), "client");
        assert_eq!(Mode::Perf.to_string(), "perf");
    }

    #[test]
    fn defaults() {
        let conf = EndpointConf::default();
        assert_eq!(conf.port, DEFAULT_PORT);
        assert_eq!(conf.timeout_ms, DEFAULT_TIMEOUT_MS);
        assert_eq!(conf.byte_limit, 0);
        assert_eq!(conf.rate_bps, 0);
    }
}
