//! Perf-mode presentation: header, body, and footer lines per flow, plus
//! the idle line a listening server prints while no peer is attached.

use crate::clock;
use crate::config::Transport;
use crate::endpoint::Endpoint;
use crate::units;

use std::io::{self, Write};

//==============================================================================
// Constants & Structures
//==============================================================================

static SPINNER: [char; 4] = ['|', '/', '-', '\\'];

/// Stateful line formatter; one per driver task that produces output.
#[derive(Default)]
pub struct PerfFormat {
    spin: usize,
}

//==============================================================================
// Associate Functions
//==============================================================================

impl PerfFormat {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connection header: id, addresses, a progress placeholder, and the
    /// column labels for the body lines that follow.
    pub fn head(&self, ep: &Endpoint) -> String {
        format!(
            "[{:>3}] {} -> {} (----)\n{:>5} {:>14} {:>12} {:>12} {:>10} {:>12}\n",
            ep.id(),
            ep.addr_self(),
            ep.addr_peer(),
            "[ ID]",
            "Transferred",
            "Rate",
            "Elapsed",
            "RTT",
            "Window"
        )
    }

    /// Periodic body line with the current totals for one direction.
    pub fn body(&self, ep: &Endpoint, recv_side: bool) -> String {
        let stats = if recv_side { &ep.info.recv } else { &ep.info.send };
        let elapsed = ep.info.elapsed_us(clock::now_us());
        let rate_bps = if elapsed > 0 {
            stats.total_bytes.saturating_mul(8).saturating_mul(clock::USEC_PER_SEC) / elapsed
        } else {
            0
        };
        let rtt = match ep.rtt_us() {
            Some(us) => units::format_time_us(us as u64),
            None => "-".to_string(),
        };
        let window = match stats.window {
            Some(w) => units::format_bytes(w as u64),
            None => "-".to_string(),
        };
        format!(
            "[{:>3}] {:>14} {:>12} {:>12} {:>10} {:>12}\n",
            ep.id(),
            units::format_bytes(stats.total_bytes),
            units::format_bitrate(rate_bps),
            units::format_time_us(elapsed),
            rtt,
            window
        )
    }

    /// Final totals after the flow closes.
    pub fn foot(&self, ep: &Endpoint, recv_side: bool) -> String {
        let stats = if recv_side { &ep.info.recv } else { &ep.info.send };
        let elapsed = ep.info.elapsed_us(clock::now_us());
        let rate_bps = if elapsed > 0 {
            stats.total_bytes.saturating_mul(8).saturating_mul(clock::USEC_PER_SEC) / elapsed
        } else {
            0
        };
        format!(
            "[{:>3}] {:>14} {:>12} {:>12} calls {}/{} bytes {}\n",
            ep.id(),
            units::format_bytes(stats.total_bytes),
            units::format_bitrate(rate_bps),
            units::format_time_us(elapsed),
            stats.passed_calls,
            stats.failed_calls,
            stats.total_bytes
        )
    }

    /// Idle line for a listening server with no attached peer. The trailing
    /// carriage return lets successive calls animate the spinner in place.
    pub fn idle(&mut self, transport: Transport, self_addr: &str) -> String {
        format!("Listening on {} {} {} \r", transport, self_addr, self.spin())
    }

    fn spin(&mut self) -> char {
        self.spin = (self.spin + 1) % SPINNER.len();
        SPINNER[self.spin]
    }
}

/// Writes a formatted line to the output sink. Stdout serializes
/// internally, so concurrent flows interleave whole lines at worst.
pub fn put(line: &str) {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    let _ = out.write_all(line.as_bytes());
    let _ = out.flush();
}

//==============================================================================
// Unit Tests
//==============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spinner_cycles_in_order() {
        let mut form = PerfFormat::new();
        let seen: Vec<char> = (0..8)
            .map(|_| {
                let line = form.idle(Transport::Stream, "127.0.0.1:5001");
                line.chars().rev().nth(2).unwrap()
            })
            .collect();
        assert_eq!(&seen[..4], &['/', '-', '\\', '|']);
        // The cycle repeats with period four.
        assert_eq!(&seen[..4], &seen[4..]);
        let distinct: std::collections::HashSet<char> = seen.iter().cloned().collect();
        assert_eq!(distinct.len(), 4);
    }

    #[test]
    fn idle_line_shape() {
        let mut form = PerfFormat::new();
        let line = form.idle(Transport::Datagram, "0.0.0.0:5001");
        assert!(line.starts_with("Listening on udp 0.0.0.0:5001 "));
        assert!(line.ends_with('\r'));
    }
}
