//! Monotonic clock reported in microseconds. All flow timing in the crate
//! goes through these two functions so that statistics are immune to
//! realtime clock adjustments.

use std::sync::OnceLock;
use std::time::Instant;

pub const USEC_PER_SEC: u64 = 1_000_000;
pub const USEC_PER_MSEC: u64 = 1_000;

static ANCHOR: OnceLock<Instant> = OnceLock::new();

fn anchor() -> Instant {
    *ANCHOR.get_or_init(Instant::now)
}

/// Microseconds elapsed since the process clock anchor.
pub fn now_us() -> u64 {
    anchor().elapsed().as_micros() as u64
}

/// Microseconds elapsed since `ref_us`, saturating at zero if the reference
/// is in the future.
pub fn elapsed_since(ref_us: u64) -> u64 {
    now_us().saturating_sub(ref_us)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn monotonic_advance() {
        let t0 = now_us();
        thread::sleep(Duration::from_millis(5));
        let t1 = now_us();
        assert!(t1 > t0);
        assert!(elapsed_since(t0) >= 5_000);
    }

    #[test]
    fn elapsed_saturates() {
        assert_eq!(elapsed_since(u64::max_value()), 0);
    }
}
