use crate::Coord;
use glam::IVec3;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Axis-aligned box in level-0 cell space, half-open: `[min, max)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Aabb {
    pub min: IVec3,
    pub max: IVec3,
}

impl Aabb {
    /// A box covering every representable cell.
    pub const EVERYTHING: Self = Self {
        min: IVec3::splat(i32::MIN),
        max: IVec3::splat(i32::MAX),
    };

    /// Build a box from two corners in any order.
    pub fn new(a: IVec3, b: IVec3) -> Self {
        Self {
            min: a.min(b),
            max: a.max(b),
        }
    }

    /// The level-0 footprint of a coordinate.
    pub fn of_coord(coord: Coord) -> Self {
        let min = coord.rel_pos();
        Self {
            min,
            max: min + IVec3::splat(coord.tile_size()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.min.cmpge(self.max).any()
    }

    pub fn contains_point(&self, p: IVec3) -> bool {
        p.cmpge(self.min).all() && p.cmplt(self.max).all()
    }

    pub fn intersects(&self, other: &Aabb) -> bool {
        self.min.cmplt(other.max).all() && other.min.cmplt(self.max).all()
    }

    /// True if any part of the coordinate's footprint lies inside the box.
    pub fn intersects_coord(&self, coord: Coord) -> bool {
        self.intersects(&Self::of_coord(coord))
    }

    /// Smallest box containing both.
    pub fn union(&self, other: &Aabb) -> Self {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        Self {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    pub fn size(&self) -> IVec3 {
        (self.max - self.min).max(IVec3::ZERO)
    }
}

impl Default for Aabb {
    fn default() -> Self {
        Self::EVERYTHING
    }
}

impl fmt::Display for Aabb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} .. {})", self.min, self.max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corners_are_normalized() {
        let b = Aabb::new(IVec3::new(4, -1, 2), IVec3::new(0, 3, -2));
        assert_eq!(b.min, IVec3::new(0, -1, -2));
        assert_eq!(b.max, IVec3::new(4, 3, 2));
    }

    #[test]
    fn contains_is_half_open() {
        let b = Aabb::new(IVec3::ZERO, IVec3::splat(2));
        assert!(b.contains_point(IVec3::ZERO));
        assert!(b.contains_point(IVec3::ONE));
        assert!(!b.contains_point(IVec3::splat(2)));
    }

    #[test]
    fn coord_footprint_intersection() {
        let b = Aabb::new(IVec3::ZERO, IVec3::splat(2));
        assert!(b.intersects_coord(Coord::from_xyz(1, 1, 1, 0)));
        assert!(!b.intersects_coord(Coord::from_xyz(2, 0, 0, 0)));
        // Level 1 cell (0,0,0) spans [-1, 1).
        assert!(b.intersects_coord(Coord::from_xyz(0, 0, 0, 1)));
    }

    #[test]
    fn union_grows_to_cover_both() {
        let a = Aabb::new(IVec3::ZERO, IVec3::splat(2));
        let b = Aabb::new(IVec3::splat(2), IVec3::splat(3));
        let u = a.union(&b);
        assert_eq!(u.min, IVec3::ZERO);
        assert_eq!(u.max, IVec3::splat(3));
        assert_eq!(u.size(), IVec3::splat(3));
    }

    #[test]
    fn everything_contains_origin() {
        assert!(Aabb::EVERYTHING.contains_point(IVec3::ZERO));
        assert!(!Aabb::EVERYTHING.is_empty());
    }
}
