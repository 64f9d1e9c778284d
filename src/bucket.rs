//! Token-bucket rate limiter. The bucket is consulted once per send, so all
//! operations are O(1) and allocation-free. Tokens are bytes; the fill rate
//! is configured in bits per second and converted once at construction.

use crate::clock;

//==============================================================================
// Constants & Structures
//==============================================================================

pub struct TokenBucket {
    /// Fill rate in bytes per second. Zero means unlimited.
    rate: u64,
    /// Bucket capacity in bytes.
    capacity: u64,
    /// Bytes currently available.
    level: u64,
    /// Monotonic timestamp of the last refill in microseconds.
    last_fill_us: u64,
}

//==============================================================================
// Associate Functions
//==============================================================================

impl TokenBucket {
    /// Creates a full bucket. `rate_bps` of zero disables limiting entirely;
    /// `burst_bytes` bounds how much may be admitted after an idle period.
    pub fn new(rate_bps: u64, burst_bytes: u64) -> Self {
        let capacity = burst_bytes.max(1);
        Self {
            rate: rate_bps / 8,
            capacity,
            level: capacity,
            last_fill_us: clock::now_us(),
        }
    }

    /// True if this bucket enforces a rate ceiling.
    pub fn is_limited(&self) -> bool {
        self.rate > 0
    }

    /// Removes `tokens` bytes if the full amount is available, returning the
    /// amount removed. Partial removal is forbidden: the result is either
    /// `tokens` or zero, and on zero the caller must back off by `delay`.
    pub fn remove(&mut self, tokens: u64) -> u64 {
        self.remove_at(tokens, clock::now_us())
    }

    /// Returns unused tokens to the bucket, clamped at capacity. Used when a
    /// send call consumed fewer bytes than the caller reserved.
    pub fn give_back(&mut self, tokens: u64) {
        if self.rate > 0 {
            self.level = self.capacity.min(self.level + tokens);
        }
    }

    /// Microseconds to wait before `tokens` bytes will be available.
    pub fn delay(&mut self, tokens: u64) -> u64 {
        self.delay_at(tokens, clock::now_us())
    }

    fn remove_at(&mut self, tokens: u64, now_us: u64) -> u64 {
        if self.rate == 0 {
            return tokens;
        }
        self.refill(now_us);
        if self.level >= tokens {
            self.level -= tokens;
            tokens
        } else {
            0
        }
    }

    fn delay_at(&mut self, tokens: u64, now_us: u64) -> u64 {
        if self.rate == 0 {
            return 0;
        }
        self.refill(now_us);
        if self.level >= tokens {
            0
        } else {
            let deficit = tokens - self.level;
            (deficit * clock::USEC_PER_SEC + self.rate - 1) / self.rate
        }
    }

    /// Advances the refill stamp only when at least one whole token has
    /// accrued, so a rapid caller cannot starve the bucket by resetting the
    /// stamp before fractional credit accumulates.
    fn refill(&mut self, now_us: u64) {
        let elapsed = now_us.saturating_sub(self.last_fill_us);
        let accrued = elapsed * self.rate / clock::USEC_PER_SEC;
        if accrued > 0 {
            self.level = self.capacity.min(self.level + accrued);
            self.last_fill_us = now_us;
        }
    }
}

//==============================================================================
// Unit Tests
//==============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: u64 = 8_000_000; // 1 MB/s
    const BURST: u64 = 65536;

    #[test]
    fn full_burst_then_empty() {
        let mut tb = TokenBucket::new(RATE, BURST);
        let now = tb.last_fill_us;
        assert_eq!(tb.remove_at(BURST, now), BURST);
        assert_eq!(tb.remove_at(1, now), 0);
    }

    #[test]
    fn refill_tracks_elapsed_time() {
        let mut tb = TokenBucket::new(RATE, BURST);
        let now = tb.last_fill_us;
        assert_eq!(tb.remove_at(BURST, now), BURST);
        // 10 ms at 1 MB/s accrues 10,000 bytes.
        assert_eq!(tb.remove_at(10_000, now + 10_000), 10_000);
        assert_eq!(tb.remove_at(1, now + 10_000), 0);
    }

    #[test]
    fn refill_clamps_at_capacity() {
        let mut tb = TokenBucket::new(RATE, BURST);
        let now = tb.last_fill_us;
        // A long idle period must not accrue beyond one burst.
        assert_eq!(tb.remove_at(BURST, now + 3600 * 1_000_000), BURST);
        assert_eq!(tb.remove_at(1, now + 3600 * 1_000_000), 0);
    }

    #[test]
    fn delay_bounds() {
        let mut tb = TokenBucket::new(RATE, BURST);
        let now = tb.last_fill_us;
        assert_eq!(tb.delay_at(BURST, now), 0);
        tb.remove_at(BURST, now);
        let d = tb.delay_at(BURST, now);
        // Upper bound from the testable properties: n * 8 * 1e6 / R plus
        // one-token rounding.
        assert!(d <= BURST * 8 * 1_000_000 / RATE + 1);
        assert!(d > 0);
    }

    #[test]
    fn give_back_clamps() {
        let mut tb = TokenBucket::new(RATE, BURST);
        tb.give_back(BURST * 4);
        let now = tb.last_fill_us;
        assert_eq!(tb.remove_at(BURST, now), BURST);
        assert_eq!(tb.remove_at(1, now), 0);
    }

    #[test]
    fn unlimited_never_blocks() {
        let mut tb = TokenBucket::new(0, BURST);
        let now = tb.last_fill_us;
        assert_eq!(tb.remove_at(u64::max_value() / 2, now), u64::max_value() / 2);
        assert_eq!(tb.delay_at(u64::max_value() / 2, now), 0);
    }

    #[test]
    fn rapid_calls_do_not_starve() {
        // 1 Mbps = 125 bytes/ms; polling every 100 µs must still accrue.
        let mut tb = TokenBucket::new(1_000_000, 1024);
        let now = tb.last_fill_us;
        tb.remove_at(1024, now);
        let mut t = now;
        let mut got = 0;
        while got == 0 && t < now + 200_000 {
            t += 100;
            got = tb.remove_at(12, t);
        }
        assert_eq!(got, 12);
    }
}
