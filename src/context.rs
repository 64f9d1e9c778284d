//! Process-wide context. Shutdown is a single atomic flag set from the
//! signal handlers and consulted by every blocking loop in the crate; no
//! other global mutable state exists.

use crate::fail::Fail;

use signal_hook::consts::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cloneable handle to the process shutdown flag.
#[derive(Clone, Default)]
pub struct ShutdownToken(Arc<AtomicBool>);

impl ShutdownToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

/// Explicit process context handed to the mode drivers.
#[derive(Clone, Default)]
pub struct ProcessCtx {
    pub shutdown: ShutdownToken,
}

impl ProcessCtx {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers SIGHUP, SIGINT, SIGTERM, and SIGQUIT to request graceful
    /// shutdown by setting the shutdown flag.
    pub fn install_signal_handlers(&self) -> Result<(), Fail> {
        for sig in [SIGHUP, SIGINT, SIGTERM, SIGQUIT].iter() {
            signal_hook::flag::register(*sig, (self.shutdown.0).clone())
                .map_err(|e| Fail::Signal { errno: e.raw_os_error().unwrap_or(0) })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_clones_share_state() {
        let a = ShutdownToken::new();
        let b = a.clone();
        assert!(!b.is_set());
        a.set();
        assert!(b.is_set());
    }
}
