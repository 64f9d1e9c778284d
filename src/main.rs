//! Command-line entry point. Flag parsing, unit-string conversion, logger
//! setup, and signal wiring live here; everything past the parsed
//! [Config] is the library's concern.

use clap::Parser;
use log::error;

use sockflow::config::{Config, EndpointConf, Mode, Role, Transport};
use sockflow::context::ProcessCtx;
use sockflow::fail::Fail;
use sockflow::modes;
use sockflow::units;

use std::net::{IpAddr, SocketAddr};
use std::process;

/// Datagram payloads default below the common path MTU; stream payloads
/// default to one socket buffer.
const DEFAULT_STREAM_BUFLEN: usize = 65536;
const DEFAULT_DGRAM_BUFLEN: usize = 1470;

#[derive(Parser)]
#[command(name = "sockflow", version, about = "TCP/UDP socket benchmarking and chat utility")]
struct Cli {
    /// Enable chat mode
    #[arg(long, conflicts_with = "perf")]
    chat: bool,

    /// Enable performance benchmarking mode (default)
    #[arg(long)]
    perf: bool,

    /// Run as a client connecting to IP:PORT
    #[arg(short = 'c', long, value_name = "IP:PORT", conflicts_with = "server")]
    client: Option<String>,

    /// Run as a server listening on IP:PORT
    #[arg(short = 's', long, value_name = "IP:PORT")]
    server: Option<String>,

    /// Run as a peer listening on IP:PORT (accepts and relays both ways)
    #[arg(long, value_name = "IP:PORT", conflicts_with_all = ["client", "server"])]
    peer: Option<String>,

    /// Use UDP instead of TCP
    #[arg(long)]
    udp: bool,

    /// Bind to a specific local address (client role)
    #[arg(short = 'B', long, value_name = "IP:PORT")]
    bind: Option<String>,

    /// Number of parallel client flows
    #[arg(short = 'p', long, default_value_t = 1)]
    parallel: u32,

    /// Per-flow rate limit, e.g. 8Mbps (0 = unlimited)
    #[arg(short = 'r', long, value_name = "BITRATE", default_value = "0", value_parser = parse_rate)]
    rate: u64,

    /// Per-flow byte cap, e.g. 1MiB (0 = unlimited)
    #[arg(short = 'n', long, value_name = "BYTES", default_value = "0", value_parser = parse_bytes)]
    bytes: u64,

    /// Per-flow time cap, e.g. 5s (0 = unlimited)
    #[arg(short = 't', long, value_name = "TIME", default_value = "0", value_parser = parse_time)]
    time: u64,

    /// Advisory worker CPU affinity mask, hex
    #[arg(short = 'A', long, value_name = "MASK", value_parser = parse_mask)]
    affinity: Option<u64>,

    /// Listener backlog
    #[arg(short = 'b', long, default_value_t = 128)]
    backlog: i32,

    /// Readiness wait timeout in milliseconds (-1 blocks)
    #[arg(short = 'T', long = "timeout", default_value_t = 1000)]
    timeout_ms: i32,

    /// Per-call buffer length, e.g. 64KiB
    #[arg(short = 'l', long, value_name = "BYTES", value_parser = parse_bytes)]
    buflen: Option<u64>,

    /// Worker pool size (default: parallel flows + 1)
    #[arg(short = 'q', long)]
    threads: Option<usize>,
}

fn parse_rate(s: &str) -> Result<u64, String> {
    units::parse_bitrate(s).map_err(|e| e.to_string())
}

fn parse_bytes(s: &str) -> Result<u64, String> {
    units::parse_bytes(s).map_err(|e| e.to_string())
}

fn parse_time(s: &str) -> Result<u64, String> {
    units::parse_time_us(s).map_err(|e| e.to_string())
}

fn parse_mask(s: &str) -> Result<u64, String> {
    let digits = s.trim_start_matches("0x");
    u64::from_str_radix(digits, 16).map_err(|_| "expected a hex mask".to_string())
}

fn split_host_port(s: &str) -> Result<(IpAddr, u16), Fail> {
    let addr: SocketAddr = s
        .parse()
        .map_err(|_| Fail::AddrParse { details: "expected IP:PORT" })?;
    Ok((addr.ip(), addr.port()))
}

fn build_config(cli: &Cli) -> Result<Config, Fail> {
    let (role, addr) = match (&cli.client, &cli.server, &cli.peer) {
        (Some(a), None, None) => (Role::Client, a.as_str()),
        (None, Some(a), None) => (Role::Server, a.as_str()),
        (None, None, Some(a)) => (Role::Peer, a.as_str()),
        (None, None, None) => (Role::Server, "0.0.0.0:5001"),
        _ => return Err(Fail::Invalid { details: "choose one of --client, --server, --peer" }),
    };
    let (ip, port) = split_host_port(addr)?;
    let transport = if cli.udp { Transport::Datagram } else { Transport::Stream };
    let bind_addr = match &cli.bind {
        Some(b) => Some(split_host_port(b)?),
        None => None,
    };
    let default_buflen = match transport {
        Transport::Stream => DEFAULT_STREAM_BUFLEN,
        Transport::Datagram => DEFAULT_DGRAM_BUFLEN,
    };
    let buflen = cli.buflen.map(|b| b as usize).unwrap_or(default_buflen);
    if buflen == 0 {
        return Err(Fail::Invalid { details: "buffer length must be nonzero" });
    }
    if cli.parallel == 0 {
        return Err(Fail::Invalid { details: "parallel flow count must be nonzero" });
    }

    Ok(Config {
        mode: if cli.chat { Mode::Chat } else { Mode::Perf },
        parallel: cli.parallel,
        threads: cli.threads.unwrap_or(cli.parallel as usize + 1),
        affinity: cli.affinity,
        endpoint: EndpointConf {
            transport,
            role,
            ip,
            port,
            bind_addr,
            backlog: cli.backlog,
            timeout_ms: cli.timeout_ms,
            byte_limit: cli.bytes,
            rate_bps: cli.rate,
            time_limit_us: cli.time,
            buflen,
            ..EndpointConf::default()
        },
    })
}

fn main() {
    let _logger = flexi_logger::Logger::with_env_or_str("warn")
        .format(flexi_logger::colored_default_format)
        .start();

    let cli = Cli::parse();
    let mut cfg = match build_config(&cli) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("configuration error: {}", e);
            process::exit(1);
        }
    };

    let ctx = ProcessCtx::new();
    if let Err(e) = ctx.install_signal_handlers() {
        error!("{}", e);
        process::exit(1);
    }

    // The endpoint configuration carries the process shutdown handle so
    // every blocking readiness wait can observe it.
    cfg.endpoint.shutdown = ctx.shutdown.clone();

    if let Err(e) = modes::run(&cfg, &ctx) {
        error!("{}", e);
        process::exit(1);
    }
}
