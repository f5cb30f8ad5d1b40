//! Developer tooling: read-only inspection of worlds and engines.
//!
//! # Invariants
//! - Inspection never mutates; every query takes shared references.

pub mod inspector;

pub use inspector::{EngineSummary, LevelSummary, NodeInfo, SpatialInspector, WorldSummary};
