use std::collections::HashSet;
use std::time::Duration;

use spatial_common::{Coord, Loader, SimTime};
use spatial_kernel::{Level, NodeFactory, NodeState, Queue, Region};

use crate::budget::{StreamConfig, StreamStats};

/// Stamp every resident node inside the loader's spheres with `now`.
///
/// Runs before any eviction scan of the same tick so a node the loader
/// still covers is never seen as stale. Only needs shared access: the
/// timestamp is atomic, so loaders can run in parallel.
pub fn keep_alive<N, L>(levels: &[Level<N, L>], loader: &Loader, now: SimTime) -> usize {
    let mut touched = 0;
    for level in levels {
        loader.for_each_coord(level.index(), |coord| {
            if let Some(node) = level.get(coord) {
                node.touch(now);
                touched += 1;
            }
        });
    }
    touched
}

/// Queue creation of every coordinate an active loader covers on this level
/// but which has no resident node. Returns the number of requests queued.
///
/// Requests are unique within one call; duplicates across calls are folded
/// by the create phase.
pub fn request_loads<'a, N, L>(
    level: &mut Level<N, L>,
    loaders: impl IntoIterator<Item = &'a Loader>,
    tick: u64,
    budget: Option<usize>,
) -> usize {
    let limit = budget.unwrap_or(usize::MAX);
    let mut requested = HashSet::new();
    for loader in loaders {
        if !loader.is_active(tick) || !loader.covers_level(level.index()) {
            continue;
        }
        loader.for_each_coord(level.index(), |coord| {
            if requested.len() < limit && !level.contains(coord) {
                requested.insert(coord);
            }
        });
    }
    let mut requested: Vec<Coord> = requested.into_iter().collect();
    requested.sort_unstable_by_key(|c| (c.pos.x, c.pos.y, c.pos.z));
    for &coord in &requested {
        level.push(Queue::Create, coord);
    }
    if !requested.is_empty() {
        tracing::trace!(level = level.index(), count = requested.len(), "loads requested");
    }
    requested.len()
}

/// Queue every expired, unobserved, loaded leaf of this level for unload.
/// Queued nodes move to `Unloading`. Returns the number queued.
pub fn collect_unused<N, L>(
    level: &mut Level<N, L>,
    now: SimTime,
    timeout: Duration,
    budget: Option<usize>,
) -> usize {
    let mut expired: Vec<Coord> = level
        .nodes()
        .filter(|n| {
            n.is_leaf()
                && n.num_observers() == 0
                && n.state() == NodeState::Loaded
                && n.is_expired(now, timeout)
        })
        .map(|n| n.coord())
        .collect();
    expired.sort_unstable_by_key(|c| (c.pos.x, c.pos.y, c.pos.z));
    expired.truncate(budget.unwrap_or(usize::MAX));
    for &coord in &expired {
        if let Some(node) = level.get_mut(coord) {
            node.set_state(NodeState::Unloading);
        }
        level.push(Queue::Unload, coord);
    }
    if !expired.is_empty() {
        tracing::debug!(level = level.index(), count = expired.len(), "unused nodes queued for unload");
    }
    expired.len()
}

/// Load requests and eviction for one level, if the level is due this tick.
pub fn stream_level<N, L>(
    config: &StreamConfig,
    level: &mut Level<N, L>,
    loaders: &[Loader],
    tick: u64,
    now: SimTime,
    eviction_timeout: Duration,
) -> StreamStats {
    if !config.level_due(tick, level.index()) {
        return StreamStats::default();
    }
    StreamStats {
        requested: request_loads(level, loaders, tick, config.create_budget),
        evicted: collect_unused(level, now, eviction_timeout, config.unload_budget),
        ..Default::default()
    }
}

/// Keep-alive and load requests for a region's own loaders. Keep-alive runs
/// for every loader on every tick; cadence only gates load requests.
/// Eviction of region nodes happens in the region's tick.
pub fn stream_region<F: NodeFactory>(
    config: &StreamConfig,
    region: &mut Region<F>,
    tick: u64,
    now: SimTime,
) -> StreamStats {
    let (loaders, levels) = region.loaders_and_levels();
    let mut stats = StreamStats::default();
    for loader in &loaders {
        stats.touched += keep_alive(levels, loader, now);
    }
    for level in levels.iter_mut() {
        if config.level_due(tick, level.index()) {
            stats.requested += request_loads(level, &loaders, tick, config.create_budget);
        }
    }
    stats
}
