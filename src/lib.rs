//! Recuento - in-process call-edge profiler with exactly-once flush
//!
//! This library provides the recording runtime linked into instrumented
//! processes (per-edge call counting with race-free persistence at
//! process end) and the offline toolkit that decodes and symbolizes the
//! recorded sessions.
//!
//! The runtime surface is intentionally tiny: instrumentation calls
//! [`on_call`] (or the C-ABI `__mcount_internal` export) with two raw
//! addresses on every monitored function entry; everything else, from
//! lazy session setup to the single flush, happens behind it.

pub mod call_edge;
pub mod calls_file;
pub mod cli;
pub mod config;
pub mod counter_store;
pub mod flush;
pub mod maps_file;
pub mod maps_snapshot;
pub mod record;
pub mod recorder;
pub mod report;
pub mod session;
pub mod symbolize;

pub use call_edge::{AddressWidth, CallEdge};
pub use recorder::{global, on_call, Profiler};
