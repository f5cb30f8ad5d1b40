//! Tick scheduling for spatial worlds.
//!
//! One tick runs the phases of [`Phase::ALL`] in order. Each phase fans out
//! over a disjoint partition (loaders, levels, regions or worlds), so
//! workers of the same phase never alias mutable state.
//!
//! # Invariants
//! - Phases run in declared order; running one early is an error.
//! - Creation walks levels coarsest first, destruction finest first.
//! - Simulation time only moves in the `End` phase or through
//!   [`Engine::advance_time`].

mod config;
mod engine;
mod phase;

pub use config::{ConfigError, EngineConfig};
pub use engine::{Engine, TickStats};
pub use phase::{LevelOrder, Partition, Phase, PhaseCursor};

/// Errors raised by the scheduler.
#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    #[error("phase {got} run out of order, expected {expected}")]
    OutOfOrder { expected: Phase, got: Phase },
    #[error("thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}
