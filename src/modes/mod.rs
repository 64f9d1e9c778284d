//! Mode drivers. A driver instantiates flows according to the parsed
//! configuration, hands them to the worker pool, collects statistics, and
//! renders output through the formatter boundary.

pub mod chat;
pub mod perf;

use crate::config::{Config, Mode};
use crate::context::ProcessCtx;
use crate::fail::Fail;

/// Runs the configured mode to completion or shutdown.
pub fn run(cfg: &Config, ctx: &ProcessCtx) -> Result<(), Fail> {
    match cfg.mode {
        Mode::Perf => perf::run(cfg, ctx),
        Mode::Chat => chat::run(cfg, ctx),
    }
}

/// Resolves an advisory CPU affinity mask into pinnable core ids. An empty
/// result disables pinning.
pub(crate) fn affinity_cores(mask: Option<u64>) -> Vec<core_affinity::CoreId> {
    let mask = match mask {
        Some(m) if m != 0 => m,
        _ => return Vec::new(),
    };
    match core_affinity::get_core_ids() {
        Some(cores) => cores
            .into_iter()
            .filter(|c| c.id < 64 && mask & (1u64 << c.id) != 0)
            .collect(),
        None => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_masks_disable_pinning() {
        assert!(affinity_cores(None).is_empty());
        assert!(affinity_cores(Some(0)).is_empty());
    }
}
