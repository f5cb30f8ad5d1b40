use crate::command::run_batch;
use crate::lifecycle;
use crate::{
    BatchContext, CommandKind, Hierarchy, Level, LevelCommandProcessor, MergeStats, Node,
    NodeCommandProcessor, NodeFactory, NodeState, ProcessorRegistry, Queue, Region,
    RegionCommandProcessor, RegionTickStats, SpatialError, WorldConfig,
};
use rayon::prelude::*;
use spatial_common::{Aabb, Coord, RegionId, SimTime, WorldId};
use std::collections::BTreeMap;
use std::sync::Arc;

/// A multi-resolution spatial world.
///
/// Owns the hierarchy of levels, the processors attached to node lifecycle
/// events and the regions partitioning it. All lifecycle work goes through
/// the command queues and is drained by the phase methods, which the
/// scheduler calls in a fixed order once per tick.
pub struct World<F: NodeFactory> {
    id: WorldId,
    config: WorldConfig,
    bounds: Aabb,
    factory: Arc<F>,
    hierarchy: Hierarchy<F::Node, F::Level>,
    processors: ProcessorRegistry<F>,
    regions: BTreeMap<RegionId, Region<F>>,
    tick: u64,
    now: SimTime,
}

impl<F: NodeFactory> std::fmt::Debug for World<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("World")
            .field("id", &self.id)
            .field("config", &self.config)
            .field("bounds", &self.bounds)
            .field("nodes", &self.node_count())
            .field("regions", &self.regions.len())
            .field("processors", &self.processors)
            .field("tick", &self.tick)
            .field("now", &self.now)
            .finish()
    }
}

impl<F: NodeFactory> World<F> {
    pub fn new(config: WorldConfig, factory: F) -> Self {
        let factory = Arc::new(factory);
        let hierarchy = Hierarchy::new(factory.as_ref(), config.level_count);
        tracing::debug!(levels = config.level_count, "world created");
        Self {
            id: WorldId::new(),
            config,
            bounds: Aabb::EVERYTHING,
            factory,
            hierarchy,
            processors: ProcessorRegistry::default(),
            regions: BTreeMap::new(),
            tick: 0,
            now: SimTime::ZERO,
        }
    }

    pub fn with_bounds(mut self, bounds: Aabb) -> Self {
        self.bounds = bounds;
        self
    }

    pub fn id(&self) -> WorldId {
        self.id
    }

    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    pub fn bounds(&self) -> Aabb {
        self.bounds
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    pub fn hierarchy(&self) -> &Hierarchy<F::Node, F::Level> {
        &self.hierarchy
    }

    pub fn level(&self, index: u8) -> Option<&Level<F::Node, F::Level>> {
        self.hierarchy.level(index)
    }

    pub fn level_mut(&mut self, index: u8) -> Option<&mut Level<F::Node, F::Level>> {
        self.hierarchy.level_mut(index)
    }

    pub fn level_count(&self) -> u8 {
        self.hierarchy.level_count()
    }

    pub fn node_count(&self) -> usize {
        self.hierarchy.node_count()
    }

    pub fn region_count(&self) -> usize {
        self.regions.len()
    }

    /// Total nodes across the world's own hierarchy and all its regions.
    pub fn total_node_count(&self) -> usize {
        self.node_count() + self.regions.values().map(Region::node_count).sum::<usize>()
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn now(&self) -> SimTime {
        self.now
    }

    /// Set the clock for the tick about to run. Time never moves backwards.
    pub fn set_time(&mut self, tick: u64, now: SimTime) {
        self.tick = tick;
        self.now = self.now.max(now);
    }

    pub fn processors(&self) -> &ProcessorRegistry<F> {
        &self.processors
    }

    pub fn register_load_processor(
        &mut self,
        processor: impl NodeCommandProcessor<F::Node, F::Level> + 'static,
    ) {
        self.processors.load.push(Box::new(processor));
    }

    pub fn register_unload_processor(
        &mut self,
        processor: impl NodeCommandProcessor<F::Node, F::Level> + 'static,
    ) {
        self.processors.unload.push(Box::new(processor));
    }

    pub fn register_tick_processor(
        &mut self,
        processor: impl NodeCommandProcessor<F::Node, F::Level> + 'static,
    ) {
        self.processors.tick.push(Box::new(processor));
    }

    pub fn register_level_processor(
        &mut self,
        processor: impl LevelCommandProcessor<F::Node, F::Level> + 'static,
    ) {
        self.processors.level.push(Box::new(processor));
    }

    pub fn register_region_processor(&mut self, processor: impl RegionCommandProcessor<F> + 'static) {
        self.processors.region.push(Box::new(processor));
    }

    fn batch_context(&self, kind: CommandKind) -> BatchContext {
        BatchContext::new(self.id, kind, self.tick, self.now)
    }

    /// O(1) lookup. `None` for an out-of-range level or an empty slot.
    pub fn get_node(&self, coord: Coord) -> Option<&Node<F::Node>> {
        self.hierarchy.get(coord)
    }

    pub fn get_node_mut(&mut self, coord: Coord) -> Option<&mut Node<F::Node>> {
        self.hierarchy.get_mut(coord)
    }

    /// Create and link one node immediately. Its parent must be resident
    /// unless `coord` sits on the coarsest level. The node starts in
    /// `Loading` and is queued for the next load phase.
    pub fn create_node(&mut self, coord: Coord) -> Result<&mut Node<F::Node>, SpatialError> {
        let data = self.factory.create_node(coord);
        let now = self.now;
        self.hierarchy.insert(Node::new(coord, data))?;
        if let Some(level) = self.hierarchy.level_mut(coord.level) {
            level.push(Queue::Load, coord);
        }
        let node = self
            .hierarchy
            .get_mut(coord)
            .ok_or(SpatialError::NodeMissing(coord))?;
        node.set_state(NodeState::Loading);
        node.touch(now);
        Ok(node)
    }

    /// Unload the subtree rooted at `coord` immediately: unload processors
    /// run leaf first for nodes not already unloaded, then every node is
    /// unlinked and dropped. Returns the number of nodes removed.
    pub fn unload_node(&mut self, coord: Coord) -> Result<usize, SpatialError> {
        let ctx = self.batch_context(CommandKind::Unload);
        let removed =
            lifecycle::unload_subtree(&mut self.hierarchy, &self.processors.unload, &ctx, coord)?;
        tracing::debug!(%coord, removed = removed.len(), "subtree unloaded");
        Ok(removed.len())
    }

    /// Pre-order walk over the resident descendants of `coord`.
    pub fn for_each_child_node_recursive(&self, coord: Coord, callback: impl FnMut(&Node<F::Node>)) {
        self.hierarchy.for_each_child_node_recursive(coord, callback);
    }

    pub fn observe(&mut self, coord: Coord) -> Result<u32, SpatialError> {
        self.hierarchy
            .get_mut(coord)
            .map(Node::add_observer)
            .ok_or(SpatialError::NodeMissing(coord))
    }

    pub fn release(&mut self, coord: Coord) -> Result<u32, SpatialError> {
        let node = self
            .hierarchy
            .get_mut(coord)
            .ok_or(SpatialError::NodeMissing(coord))?;
        node.remove_observer().ok_or(SpatialError::NoObservers(coord))
    }

    /// Request creation in the next create phase. `false` if the level is
    /// out of range.
    pub fn queue_create(&mut self, coord: Coord) -> bool {
        self.hierarchy
            .level_mut(coord.level)
            .is_some_and(|level| level.push(Queue::Create, coord))
    }

    /// Request unload in the next unload phase. A resident node moves to
    /// `Unloading` right away.
    pub fn queue_unload(&mut self, coord: Coord) -> bool {
        let Some(level) = self.hierarchy.level_mut(coord.level) else {
            return false;
        };
        if let Some(node) = level.get_mut(coord) {
            if node.state() != NodeState::Deleting {
                node.set_state(NodeState::Unloading);
            }
        }
        level.push(Queue::Unload, coord)
    }

    pub fn queue_tick(&mut self, coord: Coord) -> bool {
        self.hierarchy
            .level_mut(coord.level)
            .is_some_and(|level| level.push(Queue::Tick, coord))
    }

    pub fn validate_links(&self) -> Result<(), SpatialError> {
        self.hierarchy.validate()?;
        for region in self.regions.values() {
            region.validate_links()?;
        }
        Ok(())
    }

    // Phases, in scheduling order.

    /// Per-level work: level processors first, then `f`, one worker per
    /// level. Returns what `f` produced for each level, finest first.
    pub fn level_worker_phase<G, R>(&mut self, f: G) -> Vec<R>
    where
        G: Fn(&mut Level<F::Node, F::Level>) -> R + Sync,
        R: Send,
    {
        let _span = tracing::debug_span!("level_worker", world = %self.id).entered();
        let ctx = self.batch_context(CommandKind::Level);
        let processors = &self.processors.level;
        self.hierarchy
            .levels_mut()
            .par_iter_mut()
            .map(|level| {
                let ctx = ctx.at_level(level.index());
                run_batch(
                    processors,
                    &[level.index()],
                    |p| p.initialize(&ctx),
                    |_, states| {
                        for state in states.iter_mut() {
                            state.process(&ctx, level);
                        }
                    },
                );
                f(level)
            })
            .collect()
    }

    /// Per-region work, one worker per region: region processors, then `f`,
    /// then the region's own tick.
    pub fn region_worker_phase<G>(&mut self, f: G) -> RegionTickStats
    where
        G: Fn(&mut Region<F>) + Sync,
    {
        let _span = tracing::debug_span!("region_worker", world = %self.id).entered();
        let ctx = self.batch_context(CommandKind::Region);
        let timeout = self.config.eviction_timeout();
        let processors = &self.processors;
        self.regions
            .par_iter_mut()
            .map(|(id, region)| {
                run_batch(
                    &processors.region,
                    &[*id],
                    |p| p.initialize(&ctx),
                    |_, states| {
                        for state in states.iter_mut() {
                            state.process(&ctx, region);
                        }
                    },
                );
                f(region);
                region.tick(processors, ctx.tick, ctx.now, timeout)
            })
            .reduce(RegionTickStats::default, |a, b| a + b)
    }

    /// Whole-world work: drain every tick queue through the tick processors.
    pub fn world_worker_phase(&mut self) -> usize {
        let ctx = self.batch_context(CommandKind::Tick);
        let processors = &self.processors.tick;
        self.hierarchy
            .levels_mut()
            .iter_mut()
            .map(|level| {
                let ctx = ctx.at_level(level.index());
                lifecycle::tick_level(level, processors, &ctx)
            })
            .sum()
    }

    /// Drain create queues coarsest level first. Returns the number of
    /// nodes created, ancestors included.
    pub fn create_phase(&mut self) -> usize {
        let _span = tracing::debug_span!("create", world = %self.id).entered();
        let created = lifecycle::create_pending(&mut self.hierarchy, self.factory.as_ref(), self.now);
        if !created.is_empty() {
            tracing::debug!(count = created.len(), "nodes created");
        }
        created.len()
    }

    /// Drain load queues, one worker per level.
    pub fn load_phase(&mut self) -> usize {
        let ctx = self.batch_context(CommandKind::Load);
        let processors = &self.processors.load;
        self.hierarchy
            .levels_mut()
            .par_iter_mut()
            .map(|level| {
                let ctx = ctx.at_level(level.index());
                lifecycle::load_level(level, processors, &ctx)
            })
            .sum()
    }

    /// Drain unload queues, one worker per level.
    pub fn unload_phase(&mut self) -> usize {
        let ctx = self.batch_context(CommandKind::Unload);
        let processors = &self.processors.unload;
        self.hierarchy
            .levels_mut()
            .par_iter_mut()
            .map(|level| {
                let ctx = ctx.at_level(level.index());
                lifecycle::unload_level(level, processors, &ctx)
            })
            .sum()
    }

    /// Remove nodes whose unload has run, finest level first. Returns the
    /// number of nodes removed.
    pub fn destroy_phase(&mut self) -> usize {
        let _span = tracing::debug_span!("destroy", world = %self.id).entered();
        let ctx = self.batch_context(CommandKind::Unload);
        let removed = lifecycle::destroy_pending(&mut self.hierarchy, &self.processors.unload, &ctx);
        if !removed.is_empty() {
            tracing::debug!(count = removed.len(), "nodes destroyed");
        }
        removed.len()
    }

    // Regions.

    /// Add an empty region covering `aabb`.
    pub fn add_region(&mut self, aabb: Aabb) -> RegionId {
        let region = Region::new(self.id, aabb, self.factory.clone(), self.level_count());
        let id = region.id();
        self.regions.insert(id, region);
        id
    }

    pub fn region(&self, id: RegionId) -> Option<&Region<F>> {
        self.regions.get(&id)
    }

    pub fn region_mut(&mut self, id: RegionId) -> Option<&mut Region<F>> {
        self.regions.get_mut(&id)
    }

    pub fn remove_region(&mut self, id: RegionId) -> Option<Region<F>> {
        self.regions.remove(&id)
    }

    pub fn regions(&self) -> impl Iterator<Item = &Region<F>> {
        self.regions.values()
    }

    /// The first region whose bounds contain the level-0 origin of
    /// `coord`'s footprint.
    pub fn region_at(&self, coord: Coord) -> Option<RegionId> {
        let origin = coord.rel_pos();
        self.regions
            .values()
            .find(|r| r.aabb().contains_point(origin))
            .map(Region::id)
    }

    /// Fold region `source` into `destination` and drop `source`.
    pub fn merge_regions(
        &mut self,
        source: RegionId,
        destination: RegionId,
    ) -> Result<MergeStats, SpatialError> {
        if source == destination {
            return Err(SpatialError::SelfMerge(source));
        }
        if !self.regions.contains_key(&destination) {
            return Err(SpatialError::RegionNotFound(destination));
        }
        let mut src = self
            .regions
            .remove(&source)
            .ok_or(SpatialError::RegionNotFound(source))?;
        let result = match self.regions.get_mut(&destination) {
            Some(dst) => Region::merge_to_other_region(&mut src, dst),
            None => Err(SpatialError::RegionNotFound(destination)),
        };
        if result.is_err() {
            self.regions.insert(source, src);
        }
        result
    }
}
