//! sockflow establishes TCP or UDP flows between a client and a server
//! endpoint, optionally rate-limited and optionally time- or volume-bounded,
//! and reports throughput, latency, and connection statistics per flow in
//! real time. The crate is organized around four subsystems: a poll(2)-based
//! readiness engine ([poller]), a polymorphic socket endpoint ([endpoint]),
//! a token-bucket rate limiter ([bucket]), and a worker-pool scheduler
//! ([pool]). The mode drivers ([modes]) wire those together per flow.

#[macro_use]
extern crate log;

pub mod bucket;
pub mod clock;
pub mod config;
pub mod context;
pub mod endpoint;
pub mod fail;
pub mod form;
pub mod modes;
pub mod poller;
pub mod pool;
pub mod stats;
pub mod units;
