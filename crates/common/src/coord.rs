//! Fractal coordinates: a cell position plus a level of detail.
//!
//! Level 0 is the finest level. Parent/child mapping alternates with the
//! parity of the level so that children are anchored asymmetrically under
//! their parent (`[2p, 2p+1]` below an even level, `[2p-1, 2p]` below an odd
//! level). Repeating the two mappings keeps the coarse cells roughly centred
//! on the origin without any declared world extent.

use glam::IVec3;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Div, Mul, Rem, Sub};

/// Number of children of every non-finest coordinate.
pub const CHILD_COUNT: usize = 8;

/// Number of same-level face neighbours.
pub const NEIGHBOUR_COUNT: usize = 6;

/// Face neighbour offsets ordered `-X, -Y, -Z, +Z, +Y, +X` so that the
/// opposite of direction `i` is `5 - i`.
pub const NEIGHBOUR_OFFSETS: [IVec3; NEIGHBOUR_COUNT] = [
    IVec3::new(-1, 0, 0),
    IVec3::new(0, -1, 0),
    IVec3::new(0, 0, -1),
    IVec3::new(0, 0, 1),
    IVec3::new(0, 1, 0),
    IVec3::new(1, 0, 0),
];

/// Direction pointing back at a neighbour.
pub const fn opposite_neighbour(direction: usize) -> usize {
    NEIGHBOUR_COUNT - 1 - direction
}

/// Offset of the child with the given octant index relative to the
/// bottom-left child. Bit 0 is X, bit 1 is Y, bit 2 is Z.
pub const fn octant_offset(octant: usize) -> IVec3 {
    IVec3::new(
        (octant & 1) as i32,
        ((octant >> 1) & 1) as i32,
        ((octant >> 2) & 1) as i32,
    )
}

/// A position in a spatial world at a specific level of detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Coord {
    /// Cell position measured in cells of this coordinate's own level.
    pub pos: IVec3,
    /// Level of detail, 0 = finest.
    pub level: u8,
}

impl Coord {
    pub const fn new(pos: IVec3, level: u8) -> Self {
        Self { pos, level }
    }

    pub const fn from_xyz(x: i32, y: i32, z: i32, level: u8) -> Self {
        Self {
            pos: IVec3::new(x, y, z),
            level,
        }
    }

    /// The coordinate one level coarser that contains this one.
    ///
    /// Level 255 has no coarser level and is its own parent.
    pub fn parent(self) -> Self {
        if self.level == u8::MAX {
            return self;
        }
        let pos = if self.level % 2 == 0 {
            per_axis(self.pos, |p| (p >> 1) + (p & 1))
        } else {
            per_axis(self.pos, |p| p >> 1)
        };
        Self::new(pos, self.level + 1)
    }

    /// The containing coordinate at `level`. Returns `self` when `level` is
    /// not coarser than this coordinate.
    pub fn ancestor(self, level: u8) -> Self {
        let mut coord = self;
        while coord.level < level {
            coord = coord.parent();
        }
        coord
    }

    /// The child at octant 0. `None` at level 0. Positions past the `i32`
    /// range wrap.
    pub fn bottom_left_child(self) -> Option<Self> {
        if self.level == 0 {
            return None;
        }
        let pos = if self.level % 2 == 0 {
            per_axis(self.pos, |p| p.wrapping_mul(2))
        } else {
            per_axis(self.pos, |p| p.wrapping_mul(2).wrapping_sub(1))
        };
        Some(Self::new(pos, self.level - 1))
    }

    /// The child at the given octant index (0..8). `None` at level 0.
    pub fn child(self, octant: usize) -> Option<Self> {
        debug_assert!(octant < CHILD_COUNT, "octant out of range");
        self.bottom_left_child()
            .map(|first| Self::new(wrapping_add(first.pos, octant_offset(octant)), first.level))
    }

    /// All 8 children in octant order, or `None` at level 0.
    pub fn children(self) -> Option<[Self; CHILD_COUNT]> {
        let first = self.bottom_left_child()?;
        Some(std::array::from_fn(|octant| {
            Self::new(wrapping_add(first.pos, octant_offset(octant)), first.level)
        }))
    }

    /// Run a callback for each of the 8 children. Does nothing at level 0.
    pub fn for_each_child(self, mut callback: impl FnMut(Self)) {
        if let Some(children) = self.children() {
            for child in children {
                callback(child);
            }
        }
    }

    /// Octant index of this coordinate inside its parent.
    pub fn child_index(self) -> usize {
        // Even levels anchor children at 2P - 1, odd levels at 2P.
        let offset = if self.level % 2 == 0 {
            per_axis(self.pos, |p| 1 - (p & 1))
        } else {
            per_axis(self.pos, |p| p & 1)
        };
        (offset.x | (offset.y << 1) | (offset.z << 2)) as usize
    }

    /// The same-level neighbour in direction `direction` (see
    /// [`NEIGHBOUR_OFFSETS`]).
    pub fn neighbour(self, direction: usize) -> Self {
        Self::new(wrapping_add(self.pos, NEIGHBOUR_OFFSETS[direction]), self.level)
    }

    /// Edge length of this coordinate's footprint in level-0 cells.
    /// Saturates at `i32::MAX` from level 31 up.
    pub fn tile_size(self) -> i32 {
        if self.level >= 31 {
            i32::MAX
        } else {
            1 << self.level
        }
    }

    /// Level-0 origin of this coordinate's footprint, saturated to the
    /// `i32` range.
    pub fn rel_pos(self) -> IVec3 {
        let tile = 1i64.checked_shl(u32::from(self.level)).filter(|t| *t > 0).unwrap_or(i64::MAX);
        let shift = 2 * u32::from(self.level.div_ceil(2));
        let offset = 1i64.checked_shl(shift).filter(|o| *o > 0).unwrap_or(i64::MAX) / 3;
        per_axis(self.pos, |p| {
            let origin = i64::from(p).saturating_mul(tile).saturating_sub(offset);
            origin.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
        })
    }
}

impl fmt::Display for Coord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {}, {})@L{}",
            self.pos.x, self.pos.y, self.pos.z, self.level
        )
    }
}

// Scalar operators wrap on overflow. A zero divisor yields a zero position.

impl Add<i32> for Coord {
    type Output = Self;
    fn add(self, rhs: i32) -> Self {
        Self::new(per_axis(self.pos, |p| p.wrapping_add(rhs)), self.level)
    }
}

impl Sub<i32> for Coord {
    type Output = Self;
    fn sub(self, rhs: i32) -> Self {
        Self::new(per_axis(self.pos, |p| p.wrapping_sub(rhs)), self.level)
    }
}

impl Mul<i32> for Coord {
    type Output = Self;
    fn mul(self, rhs: i32) -> Self {
        Self::new(per_axis(self.pos, |p| p.wrapping_mul(rhs)), self.level)
    }
}

impl Div<i32> for Coord {
    type Output = Self;
    fn div(self, rhs: i32) -> Self {
        Self::new(per_axis(self.pos, |p| if rhs == 0 { 0 } else { p.wrapping_div(rhs) }), self.level)
    }
}

impl Rem<i32> for Coord {
    type Output = Self;
    fn rem(self, rhs: i32) -> Self {
        Self::new(per_axis(self.pos, |p| if rhs == 0 { 0 } else { p.wrapping_rem(rhs) }), self.level)
    }
}

fn per_axis(v: IVec3, f: impl Fn(i32) -> i32) -> IVec3 {
    IVec3::new(f(v.x), f(v.y), f(v.z))
}

fn wrapping_add(a: IVec3, b: IVec3) -> IVec3 {
    IVec3::new(a.x.wrapping_add(b.x), a.y.wrapping_add(b.y), a.z.wrapping_add(b.z))
}
