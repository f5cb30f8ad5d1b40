use spatial_common::{Coord, RegionId};

/// Errors raised by hierarchy mutations.
///
/// Every check happens before any link is touched, so an `Err` never leaves
/// the octree half-updated.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SpatialError {
    #[error("level {level} is outside the configured range 0..{level_count}")]
    LevelOutOfRange { level: u8, level_count: u8 },
    #[error("a node already exists at {0}")]
    NodeExists(Coord),
    #[error("no node resident at {0}")]
    NodeMissing(Coord),
    #[error("cannot create {coord}: parent {parent} is not resident")]
    ParentMissing { coord: Coord, parent: Coord },
    #[error("cannot remove {0} while it still has children")]
    HasChildren(Coord),
    #[error("node {0} has no observers to release")]
    NoObservers(Coord),
    #[error("region not found: {0}")]
    RegionNotFound(RegionId),
    #[error("cannot merge region {0} into itself")]
    SelfMerge(RegionId),
    #[error("level count mismatch: {source_levels} vs {destination_levels}")]
    LevelCountMismatch {
        source_levels: u8,
        destination_levels: u8,
    },
    #[error("broken link at {coord}: {reason}")]
    BrokenLink { coord: Coord, reason: String },
}
