//! Spatial kernel: the multi-resolution node hierarchy and its lifecycle.
//!
//! # Invariants
//! - Links between nodes are presence bits, never references; neighbour
//!   and parent/child links are always symmetric outside a create or
//!   destroy pass.
//! - A node's parent is resident before the node itself, except on the
//!   coarsest level. A node is never removed while it has children.
//! - Every lifecycle transition goes through a command queue or an explicit
//!   operation; processors observe transitions but cannot veto them.

pub mod command;
pub mod config;
pub mod error;
pub mod factory;
pub mod hierarchy;
pub mod level;
mod lifecycle;
pub mod node;
pub mod region;
pub mod world;

pub use command::{
    BatchContext, BoxedLevelProcessor, BoxedNodeProcessor, BoxedRegionProcessor, CommandKind,
    CommandState, LevelCommandProcessor, LevelCommandState, NodeCommandProcessor,
    NodeCommandState, ProcessorRegistry, RegionCommandProcessor, RegionCommandState, level_fn,
    node_fn, region_fn, run_batch,
};
pub use config::{MAX_LEVEL_COUNT, WorldConfig};
pub use error::SpatialError;
pub use factory::{NodeFactory, PlainFactory};
pub use hierarchy::Hierarchy;
pub use level::{Level, Queue};
pub use node::{Node, NodeState};
pub use region::{MergeStats, Region, RegionTickStats};
pub use world::World;
