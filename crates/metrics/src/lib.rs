//! The Metrics Pipeline: correlating a spawned assistant to its session
//! file, tailing it incrementally, parsing per-dialect logs into uniform
//! deltas, persisting them durably, and aggregating them for transmission.

pub mod aggregator;
pub mod collector;
pub mod correlator;
pub mod delta_store;
pub mod git;
pub mod parser;
pub mod session_store;
pub mod snapshot;
pub mod sync_state;
pub mod transmitter;
