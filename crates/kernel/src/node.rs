use serde::{Deserialize, Serialize};
use spatial_common::{CHILD_COUNT, Coord, NEIGHBOUR_COUNT, SimTime};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Lifecycle of a resident node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum NodeState {
    #[default]
    Unloaded,
    Loading,
    Loaded,
    Unloading,
    Deleting,
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unloaded => "unloaded",
            Self::Loading => "loading",
            Self::Loaded => "loaded",
            Self::Unloading => "unloading",
            Self::Deleting => "deleting",
        };
        f.write_str(s)
    }
}

/// A single addressable cell.
///
/// Links to the parent, children and neighbours are stored as presence
/// bits only. The linked coordinates are derived from this node's own
/// coordinate, so a node never holds a reference to another node. Link bits
/// are maintained exclusively by [`crate::Hierarchy`].
#[derive(Debug)]
pub struct Node<N> {
    coord: Coord,
    state: NodeState,
    parent_index: Option<u8>,
    children_mask: u8,
    neighbour_mask: u8,
    num_observers: u32,
    network_version: u32,
    /// Microseconds of simulation time. Atomic so loaders running in
    /// parallel can stamp shared nodes through `&self`.
    last_update_time: AtomicU64,
    /// Payload produced by the world's factory.
    pub data: N,
}

impl<N> Node<N> {
    pub(crate) fn new(coord: Coord, data: N) -> Self {
        Self {
            coord,
            state: NodeState::Unloaded,
            parent_index: None,
            children_mask: 0,
            neighbour_mask: 0,
            num_observers: 0,
            network_version: 0,
            last_update_time: AtomicU64::new(0),
            data,
        }
    }

    pub fn coord(&self) -> Coord {
        self.coord
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    pub fn set_state(&mut self, state: NodeState) {
        self.state = state;
    }

    /// Octant of this node inside its parent, `None` at the coarsest level.
    pub fn parent_index(&self) -> Option<u8> {
        self.parent_index
    }

    pub fn parent_coord(&self) -> Option<Coord> {
        self.parent_index.map(|_| self.coord.parent())
    }

    pub fn children_mask(&self) -> u8 {
        self.children_mask
    }

    pub fn has_child(&self, octant: usize) -> bool {
        self.children_mask & (1 << octant) != 0
    }

    pub fn is_leaf(&self) -> bool {
        self.children_mask == 0
    }

    /// Coordinates of the children currently linked, in octant order.
    pub fn child_coords(&self) -> impl Iterator<Item = Coord> + '_ {
        (0..CHILD_COUNT)
            .filter(|&octant| self.has_child(octant))
            .filter_map(|octant| self.coord.child(octant))
    }

    pub fn neighbour_mask(&self) -> u8 {
        self.neighbour_mask
    }

    pub fn has_neighbour(&self, direction: usize) -> bool {
        self.neighbour_mask & (1 << direction) != 0
    }

    /// Coordinates of the neighbours currently linked, with their direction.
    pub fn neighbour_coords(&self) -> impl Iterator<Item = (usize, Coord)> + '_ {
        (0..NEIGHBOUR_COUNT)
            .filter(|&dir| self.has_neighbour(dir))
            .map(|dir| (dir, self.coord.neighbour(dir)))
    }

    pub fn num_observers(&self) -> u32 {
        self.num_observers
    }

    pub fn network_version(&self) -> u32 {
        self.network_version
    }

    /// Bump the version after the node's payload changed. Returns the new
    /// version, which sticks at `u32::MAX`.
    pub fn bump_version(&mut self) -> u32 {
        self.network_version = self.network_version.saturating_add(1);
        self.network_version
    }

    /// Adopt a version observed elsewhere, e.g. restored from storage.
    /// Never lowers the current version.
    pub fn raise_version(&mut self, version: u32) -> u32 {
        self.network_version = self.network_version.max(version);
        self.network_version
    }

    pub fn last_update_time(&self) -> SimTime {
        SimTime::from_micros(self.last_update_time.load(Ordering::Relaxed))
    }

    /// Stamp the node as needed at `now`. Never moves the timestamp
    /// backwards.
    pub fn touch(&self, now: SimTime) {
        self.last_update_time
            .fetch_max(now.as_micros(), Ordering::Relaxed);
    }

    /// True when nothing has touched the node for longer than `timeout`.
    pub fn is_expired(&self, now: SimTime, timeout: std::time::Duration) -> bool {
        now.since(self.last_update_time()) > timeout
    }

    pub(crate) fn add_observer(&mut self) -> u32 {
        self.num_observers = self.num_observers.saturating_add(1);
        self.num_observers
    }

    /// Returns `None` when there was no observer to release.
    pub(crate) fn remove_observer(&mut self) -> Option<u32> {
        self.num_observers = self.num_observers.checked_sub(1)?;
        Some(self.num_observers)
    }

    pub(crate) fn clear_links(&mut self) {
        self.parent_index = None;
        self.children_mask = 0;
        self.neighbour_mask = 0;
    }

    pub(crate) fn set_parent(&mut self, octant: u8) {
        self.parent_index = Some(octant);
    }

    pub(crate) fn link_child(&mut self, octant: usize) {
        self.children_mask |= 1 << octant;
    }

    pub(crate) fn unlink_child(&mut self, octant: usize) {
        self.children_mask &= !(1 << octant);
    }

    pub(crate) fn link_neighbour(&mut self, direction: usize) {
        self.neighbour_mask |= 1 << direction;
    }

    pub(crate) fn unlink_neighbour(&mut self, direction: usize) {
        self.neighbour_mask &= !(1 << direction);
    }

    /// Fold a colliding copy of the same coordinate into this node.
    ///
    /// The copy with the higher `network_version` keeps its payload and
    /// state; on a tie this node wins. Observer counts add up and the
    /// timestamp takes the later value. Links are left untouched.
    pub(crate) fn absorb(&mut self, mut other: Node<N>) {
        if other.network_version > self.network_version {
            std::mem::swap(&mut self.data, &mut other.data);
            self.state = other.state;
            self.network_version = other.network_version;
        }
        self.num_observers = self.num_observers.saturating_add(other.num_observers);
        self.touch(other.last_update_time());
    }
}
