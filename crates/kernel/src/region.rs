use crate::lifecycle;
use crate::{
    BatchContext, CommandKind, Hierarchy, Level, Node, NodeFactory, NodeState, ProcessorRegistry,
    Queue, SpatialError,
};
use spatial_common::{Aabb, Coord, Loader, LoaderId, RegionId, SimTime, WorldId};
use std::collections::{BTreeMap, HashSet};
use std::ops::Add;
use std::sync::Arc;
use std::time::Duration;

/// Counters produced by one region tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegionTickStats {
    pub flushed: usize,
    pub evicted: usize,
    pub created: usize,
    pub loaded: usize,
    pub unloaded: usize,
    pub destroyed: usize,
    pub ticked: usize,
}

impl Add for RegionTickStats {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self {
            flushed: self.flushed + rhs.flushed,
            evicted: self.evicted + rhs.evicted,
            created: self.created + rhs.created,
            loaded: self.loaded + rhs.loaded,
            unloaded: self.unloaded + rhs.unloaded,
            destroyed: self.destroyed + rhs.destroyed,
            ticked: self.ticked + rhs.ticked,
        }
    }
}

/// Outcome of folding one region into another.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    /// Nodes moved into previously empty slots.
    pub moved: usize,
    /// Nodes resident in both regions, folded into one.
    pub collisions: usize,
    /// Pending commands carried over.
    pub commands: usize,
}

/// An independently schedulable slice of a world with its own hierarchy
/// and loaders.
pub struct Region<F: NodeFactory> {
    id: RegionId,
    world: WorldId,
    aabb: Aabb,
    factory: Arc<F>,
    hierarchy: Hierarchy<F::Node, F::Level>,
    loaders: BTreeMap<LoaderId, Loader>,
    changed: HashSet<Coord>,
    no_observers: HashSet<Coord>,
}

impl<F: NodeFactory> std::fmt::Debug for Region<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Region")
            .field("id", &self.id)
            .field("world", &self.world)
            .field("aabb", &self.aabb)
            .field("nodes", &self.hierarchy.node_count())
            .field("loaders", &self.loaders.len())
            .field("changed", &self.changed.len())
            .field("no_observers", &self.no_observers.len())
            .finish()
    }
}

impl<F: NodeFactory> Region<F> {
    pub fn new(world: WorldId, aabb: Aabb, factory: Arc<F>, level_count: u8) -> Self {
        let hierarchy = Hierarchy::new(factory.as_ref(), level_count);
        Self {
            id: RegionId::new(),
            world,
            aabb,
            factory,
            hierarchy,
            loaders: BTreeMap::new(),
            changed: HashSet::new(),
            no_observers: HashSet::new(),
        }
    }

    pub fn id(&self) -> RegionId {
        self.id
    }

    pub fn world(&self) -> WorldId {
        self.world
    }

    pub fn aabb(&self) -> Aabb {
        self.aabb
    }

    pub fn hierarchy(&self) -> &Hierarchy<F::Node, F::Level> {
        &self.hierarchy
    }

    pub fn level_mut(&mut self, index: u8) -> Option<&mut Level<F::Node, F::Level>> {
        self.hierarchy.level_mut(index)
    }

    pub fn levels_mut(&mut self) -> &mut [Level<F::Node, F::Level>] {
        self.hierarchy.levels_mut()
    }

    pub fn node_count(&self) -> usize {
        self.hierarchy.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.node_count() == 0
    }

    pub fn get_node(&self, coord: Coord) -> Option<&Node<F::Node>> {
        self.hierarchy.get(coord)
    }

    pub fn get_node_mut(&mut self, coord: Coord) -> Option<&mut Node<F::Node>> {
        self.hierarchy.get_mut(coord)
    }

    /// True if any part of the coordinate's footprint lies in this region.
    pub fn covers(&self, coord: Coord) -> bool {
        self.aabb.intersects_coord(coord)
    }

    /// Create `coord` (and missing ancestors) right away and queue the new
    /// nodes for load. Returns `false` if it was already resident.
    pub fn load_node(&mut self, coord: Coord, now: SimTime) -> Result<bool, SpatialError> {
        let mut created = Vec::new();
        let fresh = lifecycle::ensure_node(
            &mut self.hierarchy,
            self.factory.as_ref(),
            coord,
            now,
            &mut created,
        )?;
        self.no_observers.extend(created);
        Ok(fresh)
    }

    /// Unload the subtree rooted at `coord` immediately, running unload
    /// processors. Returns the number of nodes removed.
    pub fn unload_node(
        &mut self,
        coord: Coord,
        processors: &ProcessorRegistry<F>,
        tick: u64,
        now: SimTime,
    ) -> Result<usize, SpatialError> {
        let ctx = self.batch_context(CommandKind::Unload, tick, now).at_level(coord.level);
        let removed = lifecycle::unload_subtree(&mut self.hierarchy, &processors.unload, &ctx, coord)?;
        self.forget(&removed);
        Ok(removed.len())
    }

    fn forget(&mut self, removed: &[Coord]) {
        for c in removed {
            self.changed.remove(c);
            self.no_observers.remove(c);
        }
    }

    pub fn observe(&mut self, coord: Coord) -> Result<u32, SpatialError> {
        let node = self
            .hierarchy
            .get_mut(coord)
            .ok_or(SpatialError::NodeMissing(coord))?;
        let count = node.add_observer();
        self.no_observers.remove(&coord);
        Ok(count)
    }

    pub fn release(&mut self, coord: Coord) -> Result<u32, SpatialError> {
        let node = self
            .hierarchy
            .get_mut(coord)
            .ok_or(SpatialError::NodeMissing(coord))?;
        let count = node
            .remove_observer()
            .ok_or(SpatialError::NoObservers(coord))?;
        if count == 0 {
            self.no_observers.insert(coord);
        }
        Ok(count)
    }

    /// Flag a node's payload as changed. The next tick flushes it through
    /// the tick processors and bumps its `network_version`.
    pub fn mark_changed(&mut self, coord: Coord) -> Result<(), SpatialError> {
        if !self.hierarchy.contains(coord) {
            return Err(SpatialError::NodeMissing(coord));
        }
        self.changed.insert(coord);
        Ok(())
    }

    pub fn is_changed(&self, coord: Coord) -> bool {
        self.changed.contains(&coord)
    }

    pub fn changed_count(&self) -> usize {
        self.changed.len()
    }

    pub fn no_observer_count(&self) -> usize {
        self.no_observers.len()
    }

    pub fn add_loader(&mut self, loader: Loader) -> LoaderId {
        let id = LoaderId::new();
        self.loaders.insert(id, loader);
        id
    }

    pub fn loader_mut(&mut self, id: LoaderId) -> Option<&mut Loader> {
        self.loaders.get_mut(&id)
    }

    pub fn remove_loader(&mut self, id: LoaderId) -> Option<Loader> {
        self.loaders.remove(&id)
    }

    pub fn loaders(&self) -> impl Iterator<Item = (&LoaderId, &Loader)> {
        self.loaders.iter()
    }

    /// A copy of the loaders together with mutable levels, for streaming.
    pub fn loaders_and_levels(&mut self) -> (Vec<Loader>, &mut [Level<F::Node, F::Level>]) {
        let loaders = self.loaders.values().copied().collect();
        (loaders, self.hierarchy.levels_mut())
    }

    pub fn validate_links(&self) -> Result<(), SpatialError> {
        self.hierarchy.validate()
    }

    fn batch_context(&self, kind: CommandKind, tick: u64, now: SimTime) -> BatchContext {
        BatchContext::new(self.world, kind, tick, now)
    }

    /// One region tick: flush changed nodes through the tick processors,
    /// evict expired unobserved leaves, then drain the region's create,
    /// load, tick, unload and destroy queues.
    pub fn tick(
        &mut self,
        processors: &ProcessorRegistry<F>,
        tick: u64,
        now: SimTime,
        eviction_timeout: Duration,
    ) -> RegionTickStats {
        let _span = tracing::debug_span!("region_tick", region = %self.id).entered();
        let mut stats = RegionTickStats {
            flushed: self.flush_changed(processors, tick, now),
            evicted: self.evict_expired(now, eviction_timeout),
            ..Default::default()
        };

        let created = lifecycle::create_pending(&mut self.hierarchy, self.factory.as_ref(), now);
        stats.created = created.len();
        self.no_observers.extend(created);

        let base = self.batch_context(CommandKind::Load, tick, now);
        for level in self.hierarchy.levels_mut() {
            let index = level.index();
            stats.loaded += lifecycle::load_level(level, &processors.load, &base.at_level(index));
            let ctx = base.with_kind(CommandKind::Tick).at_level(index);
            stats.ticked += lifecycle::tick_level(level, &processors.tick, &ctx);
            let ctx = base.with_kind(CommandKind::Unload).at_level(index);
            stats.unloaded += lifecycle::unload_level(level, &processors.unload, &ctx);
        }

        let ctx = base.with_kind(CommandKind::Unload);
        let removed = lifecycle::destroy_pending(&mut self.hierarchy, &processors.unload, &ctx);
        stats.destroyed = removed.len();
        self.forget(&removed);

        if stats != RegionTickStats::default() {
            tracing::debug!(?stats, "region ticked");
        }
        stats
    }

    fn flush_changed(&mut self, processors: &ProcessorRegistry<F>, tick: u64, now: SimTime) -> usize {
        if self.changed.is_empty() {
            return 0;
        }
        let mut changed: Vec<Coord> = self.changed.drain().collect();
        changed.sort_unstable_by_key(|c| (c.level, c.pos.x, c.pos.y, c.pos.z));
        let base = self.batch_context(CommandKind::Tick, tick, now);
        let mut flushed = 0;
        for level in self.hierarchy.levels_mut() {
            let index = level.index();
            let commands: Vec<Coord> = changed
                .iter()
                .copied()
                .filter(|&c| c.level == index)
                .collect();
            for &c in &commands {
                if let Some(node) = level.get_mut(c) {
                    node.bump_version();
                    node.touch(now);
                }
            }
            flushed += crate::command::run_node_batch(
                &processors.tick,
                &base.at_level(index),
                level,
                &commands,
            );
        }
        flushed
    }

    fn evict_expired(&mut self, now: SimTime, timeout: Duration) -> usize {
        let mut candidates: Vec<Coord> = self.no_observers.iter().copied().collect();
        candidates.sort_unstable_by_key(|c| (c.level, c.pos.x, c.pos.y, c.pos.z));
        let mut evicted = 0;
        for c in candidates {
            let Some(level) = self.hierarchy.level_mut(c.level) else {
                continue;
            };
            let Some(node) = level.get_mut(c) else {
                self.no_observers.remove(&c);
                continue;
            };
            let evictable = node.is_leaf()
                && node.num_observers() == 0
                && node.state() == NodeState::Loaded
                && node.is_expired(now, timeout);
            if evictable {
                node.set_state(NodeState::Unloading);
                level.push(Queue::Unload, c);
                evicted += 1;
            }
        }
        evicted
    }

    /// Move every live node and pending command of `source` into
    /// `destination`, leaving `source` empty.
    ///
    /// Nodes move coarsest level first so parents land before children;
    /// inserting each node relinks it with whatever is already resident,
    /// which rebuilds the links across the former boundary. When both
    /// regions hold the same coordinate the copies are folded into one
    /// (see [`Node`] version rules), so identity stays unique.
    pub fn merge_to_other_region(
        source: &mut Region<F>,
        destination: &mut Region<F>,
    ) -> Result<MergeStats, SpatialError> {
        if source.id == destination.id {
            return Err(SpatialError::SelfMerge(source.id));
        }
        let source_levels = source.hierarchy.level_count();
        let destination_levels = destination.hierarchy.level_count();
        if source_levels != destination_levels {
            return Err(SpatialError::LevelCountMismatch {
                source_levels,
                destination_levels,
            });
        }

        let mut stats = MergeStats::default();
        for index in (0..source_levels).rev() {
            let Some(level) = source.hierarchy.level_mut(index) else {
                continue;
            };
            stats.commands += level.pending_total();
            let mut queues = std::mem::take(&mut level.queues);
            let mut nodes: Vec<_> = level.nodes.drain().map(|(_, node)| node).collect();
            nodes.sort_unstable_by_key(|n| {
                let p = n.coord().pos;
                (p.x, p.y, p.z)
            });
            for node in nodes {
                let coord = node.coord();
                match destination.hierarchy.get_mut(coord) {
                    Some(existing) => {
                        existing.absorb(node);
                        stats.collisions += 1;
                    }
                    None => {
                        destination.hierarchy.insert(node)?;
                        stats.moved += 1;
                    }
                }
            }
            if let Some(dst_level) = destination.hierarchy.level_mut(index) {
                dst_level.queues.append(&mut queues);
            }
        }

        destination.changed.extend(source.changed.drain());
        source.no_observers.clear();
        destination.no_observers = destination
            .hierarchy
            .levels()
            .iter()
            .flat_map(|level| level.nodes())
            .filter(|n| n.num_observers() == 0)
            .map(|n| n.coord())
            .collect();
        destination.loaders.append(&mut source.loaders);
        destination.aabb = destination.aabb.union(&source.aabb);

        tracing::debug!(
            source = %source.id,
            destination = %destination.id,
            ?stats,
            "regions merged"
        );
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{PlainFactory, node_fn};
    use glam::IVec3;
    use std::sync::Mutex;

    fn region(levels: u8) -> Region<PlainFactory> {
        Region::new(WorldId::new(), Aabb::EVERYTHING, Arc::new(PlainFactory), levels)
    }

    fn loaded(region: &mut Region<PlainFactory>, coords: &[Coord]) {
        for &c in coords {
            region.load_node(c, SimTime::ZERO).unwrap();
        }
        region.tick(&ProcessorRegistry::default(), 0, SimTime::ZERO, Duration::from_secs(20));
    }

    #[test]
    fn merge_relinks_across_boundary() {
        let a0 = Coord::from_xyz(0, 0, 0, 0);
        let a1 = Coord::from_xyz(1, 0, 0, 0);
        let b0 = Coord::from_xyz(2, 0, 0, 0);
        let mut a = region(1);
        let mut b = region(1);
        loaded(&mut a, &[a0, a1]);
        loaded(&mut b, &[b0]);

        let stats = Region::merge_to_other_region(&mut b, &mut a).unwrap();
        assert_eq!(stats.moved, 1);
        assert_eq!(stats.collisions, 0);
        assert_eq!(a.node_count(), 3);
        assert!(b.is_empty());
        assert!(b.get_node(b0).is_none());

        // +X of (1,0,0) is direction 5, -X of (2,0,0) is direction 0.
        assert!(a.get_node(a1).unwrap().has_neighbour(5));
        assert!(a.get_node(b0).unwrap().has_neighbour(0));
        a.validate_links().unwrap();
        b.validate_links().unwrap();
    }

    #[test]
    fn merge_keeps_identity_unique() {
        let c = Coord::from_xyz(0, 0, 0, 0);
        let mut a = region(1);
        let mut b = region(1);
        loaded(&mut a, &[c]);
        loaded(&mut b, &[c]);
        b.observe(c).unwrap();
        b.mark_changed(c).unwrap();
        b.tick(&ProcessorRegistry::default(), 1, SimTime::ZERO, Duration::from_secs(20));
        assert_eq!(b.get_node(c).unwrap().network_version(), 1);

        let stats = Region::merge_to_other_region(&mut b, &mut a).unwrap();
        assert_eq!(stats.collisions, 1);
        assert_eq!(a.node_count(), 1);
        let node = a.get_node(c).unwrap();
        assert_eq!(node.network_version(), 1);
        assert_eq!(node.num_observers(), 1);
        assert_eq!(a.no_observer_count(), 0);
    }

    #[test]
    fn merge_moves_pending_commands_and_loaders() {
        let mut a = region(2);
        let mut b = region(2);
        b.add_loader(Loader::default());
        b.level_mut(0).unwrap().push(Queue::Create, Coord::from_xyz(4, 4, 4, 0));
        let stats = Region::merge_to_other_region(&mut b, &mut a).unwrap();
        assert_eq!(stats.commands, 1);
        assert_eq!(a.loaders().count(), 1);
        assert_eq!(b.loaders().count(), 0);
        assert_eq!(a.hierarchy().level(0).unwrap().pending(Queue::Create).len(), 1);
    }

    #[test]
    fn merge_rejects_mismatched_levels() {
        let mut a = region(2);
        let mut b = region(3);
        assert!(matches!(
            Region::merge_to_other_region(&mut b, &mut a),
            Err(SpatialError::LevelCountMismatch { source_levels: 3, destination_levels: 2 })
        ));
    }

    #[test]
    fn merge_unions_bounds() {
        let world = WorldId::new();
        let factory = Arc::new(PlainFactory);
        let mut a = Region::new(world, Aabb::new(IVec3::ZERO, IVec3::splat(2)), factory.clone(), 1);
        let mut b = Region::new(world, Aabb::new(IVec3::splat(2), IVec3::splat(4)), factory, 1);
        Region::merge_to_other_region(&mut b, &mut a).unwrap();
        assert_eq!(a.aabb(), Aabb::new(IVec3::ZERO, IVec3::splat(4)));
    }

    #[test]
    fn release_without_observers_fails() {
        let c = Coord::default();
        let mut r = region(1);
        r.load_node(c, SimTime::ZERO).unwrap();
        assert_eq!(r.release(c).unwrap_err(), SpatialError::NoObservers(c));
        assert_eq!(r.observe(c).unwrap(), 1);
        assert_eq!(r.no_observer_count(), 0);
        assert_eq!(r.release(c).unwrap(), 0);
        assert_eq!(r.no_observer_count(), 1);
    }

    #[test]
    fn tick_flushes_changed_through_processors() {
        let c = Coord::default();
        let mut r = region(1);
        loaded(&mut r, &[c]);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut processors = ProcessorRegistry::<PlainFactory>::default();
        let log = seen.clone();
        processors.tick.push(Box::new(node_fn(
            "mirror",
            move |ctx: &BatchContext, _: &mut (), node: &mut Node<()>| {
                log.lock().unwrap().push((ctx.kind, node.network_version()));
            },
        )));
        r.mark_changed(c).unwrap();
        r.mark_changed(c).unwrap();
        let stats = r.tick(&processors, 3, SimTime::from_micros(40), Duration::from_secs(20));
        assert_eq!(stats.flushed, 1);
        assert_eq!(*seen.lock().unwrap(), vec![(CommandKind::Tick, 1)]);
        assert_eq!(r.get_node(c).unwrap().last_update_time(), SimTime::from_micros(40));
        assert!(!r.is_changed(c));
    }

    #[test]
    fn tick_evicts_expired_unobserved_leaves() {
        let leaf = Coord::default();
        let mut r = region(2);
        loaded(&mut r, &[leaf]);
        let timeout = Duration::from_secs(20);
        let later = SimTime::from_secs_f64(30.0);
        let first = r.tick(&ProcessorRegistry::default(), 1, later, timeout);
        // Only the leaf is evictable; its parent still has a child.
        assert_eq!(first.evicted, 1);
        assert_eq!(first.destroyed, 1);
        assert!(r.get_node(leaf).is_none());
        let second = r.tick(&ProcessorRegistry::default(), 2, later, timeout);
        assert_eq!(second.destroyed, 1);
        assert!(r.is_empty());
    }

    #[test]
    fn observed_nodes_survive_eviction() {
        let c = Coord::default();
        let mut r = region(1);
        loaded(&mut r, &[c]);
        r.observe(c).unwrap();
        let stats = r.tick(
            &ProcessorRegistry::default(),
            1,
            SimTime::from_secs_f64(60.0),
            Duration::from_secs(20),
        );
        assert_eq!(stats.evicted, 0);
        assert!(r.get_node(c).is_some());
    }

    #[test]
    fn unload_node_removes_subtree() {
        let leaf = Coord::from_xyz(3, 3, 3, 0);
        let mut r = region(3);
        r.load_node(leaf, SimTime::ZERO).unwrap();
        let removed = r
            .unload_node(leaf.ancestor(2), &ProcessorRegistry::default(), 0, SimTime::ZERO)
            .unwrap();
        assert_eq!(removed, 3);
        assert!(r.is_empty());
        assert_eq!(r.no_observer_count(), 0);
    }
}
