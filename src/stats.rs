//! Per-flow statistics. One [FlowStats] exists per transfer direction; every
//! endpoint receive/send call folds its outcome into the owning direction.
//! Flows are single-owner, so no synchronization is needed here.

//==============================================================================
// Constants & Structures
//==============================================================================

/// Aggregate over a sampled quantity (buffer lengths, in practice).
#[derive(Clone, Copy, Debug, Default)]
pub struct QtyStats {
    pub cnt: u64,
    pub sum: u64,
    pub min: u64,
    pub max: u64,
    pub avg: u64,
    /// Monotonic timestamp of the first sample in microseconds.
    pub first_us: u64,
    /// Monotonic timestamp of the latest sample in microseconds.
    pub last_us: u64,
}

/// Counters for one transfer direction of a flow.
#[derive(Clone, Copy, Debug, Default)]
pub struct FlowStats {
    /// Whether the most recent call succeeded.
    pub last_call_ok: bool,
    /// Monotonic timestamp at which the most recent call returned.
    pub last_ts_us: u64,
    /// Cumulative time spent in successful calls.
    pub passed_time_us: u64,
    /// Cumulative time spent in failed calls.
    pub failed_time_us: u64,
    pub passed_calls: u64,
    pub failed_calls: u64,
    /// Buffer-length aggregate over successful calls.
    pub buflen: QtyStats,
    pub total_bytes: u64,
    /// Current kernel window size, when the transport exposes one.
    pub window: Option<u32>,
}

/// Flow lifetime stamps plus both directions.
#[derive(Clone, Copy, Debug, Default)]
pub struct FlowInfo {
    pub start_us: u64,
    pub stop_us: u64,
    pub recv: FlowStats,
    pub send: FlowStats,
}

//==============================================================================
// Associate Functions
//==============================================================================

impl QtyStats {
    pub fn add(&mut self, val: u64, now_us: u64) {
        self.cnt += 1;
        self.sum += val;
        self.avg = self.sum / self.cnt;
        if self.cnt == 1 {
            self.min = val;
            self.max = val;
            self.first_us = now_us;
        } else {
            self.min = self.min.min(val);
            self.max = self.max.max(val);
        }
        self.last_us = now_us;
    }
}

impl FlowStats {
    /// Folds a successful call transferring `len` bytes.
    pub fn record_pass(&mut self, len: usize, begin_us: u64, end_us: u64) {
        self.last_call_ok = true;
        self.last_ts_us = end_us;
        self.passed_time_us += end_us.saturating_sub(begin_us);
        self.passed_calls += 1;
        self.buflen.add(len as u64, end_us);
        self.total_bytes += len as u64;
    }

    /// Folds a call that transferred nothing (would-block retry or error).
    pub fn record_fail(&mut self, begin_us: u64, end_us: u64) {
        self.last_call_ok = false;
        self.last_ts_us = end_us;
        self.failed_time_us += end_us.saturating_sub(begin_us);
        self.failed_calls += 1;
    }
}

impl FlowInfo {
    /// Flow duration in microseconds: start to stop, or start to `now_us`
    /// while the flow is still active.
    pub fn elapsed_us(&self, now_us: u64) -> u64 {
        if self.start_us == 0 {
            return 0;
        }
        let end = if self.stop_us > 0 { self.stop_us } else { now_us };
        end.saturating_sub(self.start_us)
    }
}

//==============================================================================
// Unit Tests
//==============================================================================
