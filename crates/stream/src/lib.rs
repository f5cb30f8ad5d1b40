//! Streaming: which nodes stay resident as loaders move.
//!
//! # Invariants
//! - Keep-alive runs before the eviction scan of the same tick.
//! - Only leaves with no observers are ever queued for eviction.
//! - Streaming only queues commands; the kernel's phases apply them.

mod budget;
mod streaming;

pub use budget::{StreamConfig, StreamStats, TickTimer};
pub use streaming::{collect_unused, keep_alive, request_loads, stream_level, stream_region};
