//! Shared value types for the spatial workspace: fractal coordinates,
//! level-0 bounds, ids, simulation time and loader descriptors.

pub mod aabb;
pub mod coord;
pub mod loader;
pub mod time;
pub mod types;

pub use aabb::Aabb;
pub use coord::{
    CHILD_COUNT, Coord, NEIGHBOUR_COUNT, NEIGHBOUR_OFFSETS, octant_offset, opposite_neighbour,
};
pub use loader::{Loader, for_each_coord_in_sphere};
pub use time::SimTime;
pub use types::{LoaderId, RegionId, WorldId};
