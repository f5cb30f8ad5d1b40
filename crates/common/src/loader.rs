//! Loader descriptors: the observers that decide which coordinates stay
//! resident.

use crate::Coord;
use glam::IVec3;
use serde::{Deserialize, Serialize};

/// Streaming parameters of one observer.
///
/// Loaders are plain data. Whatever owns the observer moves `position`
/// between ticks; the streaming steps only read it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Loader {
    /// Level-0 cell the observer stands in.
    pub position: IVec3,
    /// Sphere radius, in cells of the level being streamed.
    pub radius_per_level: u32,
    /// Finest level this loader requests (inclusive).
    pub min_level: u8,
    /// Coarsest bound (exclusive).
    pub max_level: u8,
    /// Request loads every `update_cadence` ticks. 0 and 1 both mean every
    /// tick. Keep-alive is not gated.
    pub update_cadence: u32,
}

impl Default for Loader {
    fn default() -> Self {
        Self {
            position: IVec3::ZERO,
            radius_per_level: 1,
            min_level: 0,
            max_level: 1,
            update_cadence: 1,
        }
    }
}

impl Loader {
    pub fn new(position: IVec3, radius_per_level: u32, min_level: u8, max_level: u8) -> Self {
        Self {
            position,
            radius_per_level,
            min_level,
            max_level,
            update_cadence: 1,
        }
    }

    pub fn with_cadence(mut self, update_cadence: u32) -> Self {
        self.update_cadence = update_cadence;
        self
    }

    pub fn covers_level(&self, level: u8) -> bool {
        self.min_level <= level && level < self.max_level
    }

    /// Whether the loader requests loads in the given tick.
    pub fn is_active(&self, tick: u64) -> bool {
        self.update_cadence <= 1 || tick % u64::from(self.update_cadence) == 0
    }

    /// The cell containing the loader at `level`.
    pub fn center(&self, level: u8) -> Coord {
        Coord::new(self.position, 0).ancestor(level)
    }

    /// Visit every coordinate this loader wants resident at `level`.
    /// Visits nothing when the level is out of range.
    pub fn for_each_coord(&self, level: u8, f: impl FnMut(Coord)) {
        if !self.covers_level(level) {
            return;
        }
        for_each_coord_in_sphere(self.center(level), self.radius_per_level, f);
    }

    /// Collect [`Loader::for_each_coord`] into a vector.
    pub fn coords(&self, level: u8) -> Vec<Coord> {
        let mut out = Vec::new();
        self.for_each_coord(level, |c| out.push(c));
        out
    }
}

/// Visit every same-level coordinate whose cell comes within `radius` cells
/// of the centre of `center`'s cell.
///
/// Distances are measured on doubled coordinates so the test stays in
/// integers: the cell centre sits at `2c + 1` and the candidate cell spans
/// `[2p, 2p + 2]`. A radius of 1 yields the 3x3x3 block, a radius of 0
/// yields nothing.
pub fn for_each_coord_in_sphere(center: Coord, radius: u32, mut f: impl FnMut(Coord)) {
    if radius == 0 {
        return;
    }
    let r = i32::try_from(radius).unwrap_or(i32::MAX);
    let limit = 4i64.saturating_mul(i64::from(r) * i64::from(r));
    let axis = |d: i32| -> i64 {
        let gap = (2 * i64::from(d)).abs().saturating_sub(1).max(0);
        gap.saturating_mul(gap)
    };
    // Cells past the i32 range do not exist.
    let step = |p: i32, d: i32| p.checked_add(d);
    for z in -r..=r {
        let dz = axis(z);
        if dz >= limit {
            continue;
        }
        for y in -r..=r {
            let dyz = dz.saturating_add(axis(y));
            if dyz >= limit {
                continue;
            }
            for x in -r..=r {
                if dyz.saturating_add(axis(x)) >= limit {
                    continue;
                }
                let pos = step(center.pos.x, x)
                    .zip(step(center.pos.y, y))
                    .zip(step(center.pos.z, z));
                if let Some(((px, py), pz)) = pos {
                    f(Coord::from_xyz(px, py, pz, center.level));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn sphere(center: Coord, radius: u32) -> Vec<Coord> {
        let mut out = Vec::new();
        for_each_coord_in_sphere(center, radius, |c| out.push(c));
        out
    }

    #[test]
    fn radius_one_is_full_block() {
        let center = Coord::from_xyz(3, -2, 5, 1);
        let coords = sphere(center, 1);
        assert_eq!(coords.len(), 27);
        let unique: HashSet<_> = coords.iter().copied().collect();
        assert_eq!(unique.len(), 27);
        for c in coords {
            assert_eq!(c.level, 1);
            let d = (c.pos - center.pos).abs();
            assert!(d.max_element() <= 1);
        }
    }

    #[test]
    fn radius_zero_is_empty() {
        assert!(sphere(Coord::default(), 0).is_empty());
    }

    #[test]
    fn radius_two_trims_corners() {
        let coords = sphere(Coord::default(), 2);
        assert!(coords.contains(&Coord::from_xyz(2, 0, 0, 0)));
        assert!(coords.contains(&Coord::from_xyz(2, 1, 1, 0)));
        assert!(!coords.contains(&Coord::from_xyz(2, 2, 0, 0)));
        assert!(coords.len() > 27 && coords.len() < 125);
    }

    #[test]
    fn sphere_stops_at_position_limits() {
        let corner = Coord::from_xyz(i32::MAX, i32::MIN, 0, 0);
        let coords = sphere(corner, 1);
        assert_eq!(coords.len(), 12);
        assert!(coords.iter().all(|c| c.pos.x <= i32::MAX && c.pos.x >= i32::MAX - 1));
        assert!(coords.iter().all(|c| c.pos.y >= i32::MIN && c.pos.y <= i32::MIN + 1));

        let far = Loader::new(IVec3::splat(i32::MAX), 1, 0, 3);
        assert_eq!(far.coords(0).len(), 8);
        assert!(!far.coords(2).is_empty());
    }

    #[test]
    fn level_range_limits_coverage() {
        let loader = Loader::new(IVec3::ZERO, 1, 0, 3);
        assert!(loader.covers_level(0));
        assert!(loader.covers_level(2));
        assert!(!loader.covers_level(3));
        assert!(loader.coords(3).is_empty());
        assert_eq!(loader.coords(2).len(), 27);
    }

    #[test]
    fn center_follows_ancestry() {
        let loader = Loader::new(IVec3::new(5, -3, 0), 1, 0, 4);
        assert_eq!(loader.center(0), Coord::from_xyz(5, -3, 0, 0));
        assert_eq!(loader.center(2), Coord::from_xyz(5, -3, 0, 0).ancestor(2));
    }

    #[test]
    fn cadence_skips_ticks() {
        let every = Loader::default();
        assert!(every.is_active(7));
        let third = Loader::default().with_cadence(3);
        assert!(third.is_active(0));
        assert!(!third.is_active(1));
        assert!(third.is_active(6));
        let zero = Loader::default().with_cadence(0);
        assert!(zero.is_active(5));
    }
}
