//! The owning array of levels and all link maintenance.
//!
//! # Invariants
//! - Neighbour bits are symmetric: A links B in direction `i` iff B links A
//!   in `opposite(i)`, and a bit is set iff the neighbour is resident.
//! - Every node below the coarsest level has a resident parent, its
//!   `parent_index` equals its octant, and the parent's child bit is set.
//! - A node is never removed while it has children.

use crate::{Level, Node, NodeFactory, SpatialError};
use spatial_common::{CHILD_COUNT, Coord, NEIGHBOUR_COUNT, opposite_neighbour};

#[derive(Debug)]
pub struct Hierarchy<N, L> {
    levels: Vec<Level<N, L>>,
}

impl<N, L> Hierarchy<N, L> {
    /// Build `level_count` empty levels with payloads from `factory`.
    pub fn new<F>(factory: &F, level_count: u8) -> Self
    where
        F: NodeFactory<Node = N, Level = L>,
    {
        Self {
            levels: (0..level_count)
                .map(|i| Level::new(i, factory.create_level(i)))
                .collect(),
        }
    }

    pub fn level_count(&self) -> u8 {
        self.levels.len() as u8
    }

    pub fn coarsest_level(&self) -> u8 {
        self.level_count().saturating_sub(1)
    }

    pub fn level(&self, index: u8) -> Option<&Level<N, L>> {
        self.levels.get(index as usize)
    }

    pub fn level_mut(&mut self, index: u8) -> Option<&mut Level<N, L>> {
        self.levels.get_mut(index as usize)
    }

    /// Levels ordered finest to coarsest.
    pub fn levels(&self) -> &[Level<N, L>] {
        &self.levels
    }

    pub fn levels_mut(&mut self) -> &mut [Level<N, L>] {
        &mut self.levels
    }

    pub fn node_count(&self) -> usize {
        self.levels.iter().map(Level::len).sum()
    }

    /// O(1) lookup. `None` for an out-of-range level or an empty slot.
    pub fn get(&self, coord: Coord) -> Option<&Node<N>> {
        self.level(coord.level)?.get(coord)
    }

    pub fn get_mut(&mut self, coord: Coord) -> Option<&mut Node<N>> {
        self.level_mut(coord.level)?.get_mut(coord)
    }

    pub fn contains(&self, coord: Coord) -> bool {
        self.get(coord).is_some()
    }

    pub(crate) fn check_level(&self, level: u8) -> Result<(), SpatialError> {
        if level < self.level_count() {
            Ok(())
        } else {
            Err(SpatialError::LevelOutOfRange {
                level,
                level_count: self.level_count(),
            })
        }
    }

    /// Insert a node and link it to its resident neighbours and parent,
    /// both directions. Any link bits carried by `node` are discarded.
    pub fn insert(&mut self, mut node: Node<N>) -> Result<&mut Node<N>, SpatialError> {
        let coord = node.coord();
        self.check_level(coord.level)?;
        if self.contains(coord) {
            return Err(SpatialError::NodeExists(coord));
        }
        let has_parent = coord.level < self.coarsest_level();
        let parent = coord.parent();
        if has_parent && !self.contains(parent) {
            return Err(SpatialError::ParentMissing { coord, parent });
        }

        node.clear_links();
        let level = &mut self.levels[coord.level as usize];
        for dir in 0..NEIGHBOUR_COUNT {
            if let Some(other) = level.nodes.get_mut(&coord.neighbour(dir).pos) {
                other.link_neighbour(opposite_neighbour(dir));
                node.link_neighbour(dir);
            }
        }
        if has_parent {
            let octant = coord.child_index();
            if let Some(p) = self.get_mut(parent) {
                p.link_child(octant);
            }
            node.set_parent(octant as u8);
        }

        tracing::trace!(%coord, "node linked");
        let level = &mut self.levels[coord.level as usize];
        Ok(level.nodes.entry(coord.pos).or_insert(node))
    }

    /// Unlink and remove a leaf node, returning ownership of it.
    pub fn remove(&mut self, coord: Coord) -> Result<Node<N>, SpatialError> {
        self.check_level(coord.level)?;
        let node = self.get(coord).ok_or(SpatialError::NodeMissing(coord))?;
        if !node.is_leaf() {
            return Err(SpatialError::HasChildren(coord));
        }
        let neighbour_mask = node.neighbour_mask();
        let parent_index = node.parent_index();

        let level = &mut self.levels[coord.level as usize];
        for dir in 0..NEIGHBOUR_COUNT {
            if neighbour_mask & (1 << dir) == 0 {
                continue;
            }
            if let Some(other) = level.nodes.get_mut(&coord.neighbour(dir).pos) {
                other.unlink_neighbour(opposite_neighbour(dir));
            }
        }
        let mut node = level
            .nodes
            .remove(&coord.pos)
            .ok_or(SpatialError::NodeMissing(coord))?;
        if let Some(octant) = parent_index {
            if let Some(p) = self.get_mut(coord.parent()) {
                p.unlink_child(octant as usize);
            }
        }
        node.clear_links();
        tracing::trace!(%coord, "node unlinked");
        Ok(node)
    }

    /// Coordinates of the subtree rooted at `root`, children before their
    /// parent, `root` last.
    pub fn subtree_post_order(&self, root: Coord) -> Result<Vec<Coord>, SpatialError> {
        self.check_level(root.level)?;
        if !self.contains(root) {
            return Err(SpatialError::NodeMissing(root));
        }
        let mut out = Vec::new();
        self.post_order_into(root, &mut out);
        Ok(out)
    }

    fn post_order_into(&self, coord: Coord, out: &mut Vec<Coord>) {
        if let Some(node) = self.get(coord) {
            for child in node.child_coords() {
                self.post_order_into(child, out);
            }
        }
        out.push(coord);
    }

    /// Pre-order walk over every descendant of `root` (not `root` itself),
    /// skipping empty child slots via the children mask.
    pub fn for_each_child_node_recursive(&self, root: Coord, mut callback: impl FnMut(&Node<N>)) {
        self.visit_children(root, &mut callback);
    }

    fn visit_children(&self, coord: Coord, callback: &mut impl FnMut(&Node<N>)) {
        let Some(node) = self.get(coord) else {
            return;
        };
        for child in node.child_coords() {
            if let Some(child_node) = self.get(child) {
                callback(child_node);
                self.visit_children(child, callback);
            }
        }
    }

    /// Check every link invariant, reporting the first violation.
    pub fn validate(&self) -> Result<(), SpatialError> {
        let broken = |coord: Coord, reason: String| SpatialError::BrokenLink { coord, reason };
        let coarsest = self.coarsest_level();
        for level in &self.levels {
            for (pos, node) in &level.nodes {
                let coord = node.coord();
                if coord.pos != *pos || coord.level != level.index() {
                    return Err(broken(coord, format!("stored under {pos} at level {}", level.index())));
                }
                for dir in 0..NEIGHBOUR_COUNT {
                    let other = self.get(coord.neighbour(dir));
                    match (node.has_neighbour(dir), other) {
                        (true, None) => {
                            return Err(broken(coord, format!("neighbour {dir} is not resident")));
                        }
                        (false, Some(_)) => {
                            return Err(broken(coord, format!("neighbour {dir} is resident but unlinked")));
                        }
                        (true, Some(other)) if !other.has_neighbour(opposite_neighbour(dir)) => {
                            return Err(broken(coord, format!("neighbour {dir} does not link back")));
                        }
                        _ => {}
                    }
                }
                if coord.level < coarsest {
                    let octant = coord.child_index();
                    if node.parent_index() != Some(octant as u8) {
                        let reason =
                            format!("parent index is {:?}, expected {octant}", node.parent_index());
                        return Err(broken(coord, reason));
                    }
                    match self.get(coord.parent()) {
                        None => return Err(broken(coord, "parent is not resident".into())),
                        Some(p) if !p.has_child(octant) => {
                            return Err(broken(coord, "parent does not link back".into()));
                        }
                        _ => {}
                    }
                } else if node.parent_index().is_some() {
                    return Err(broken(coord, "coarsest node has a parent".into()));
                }
                for octant in 0..CHILD_COUNT {
                    let child = coord.child(octant).and_then(|c| self.get(c));
                    if node.has_child(octant) != child.is_some() {
                        return Err(broken(coord, format!("child bit {octant} disagrees with residency")));
                    }
                }
            }
        }
        Ok(())
    }
}
