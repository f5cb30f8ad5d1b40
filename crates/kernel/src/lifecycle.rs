//! Queue draining shared by worlds and regions: create, load, unload,
//! tick and destroy, each with the base state transitions applied whether
//! or not any processor is registered.

use crate::command::{BoxedNodeProcessor, run_node_batch};
use crate::{BatchContext, Hierarchy, Level, Node, NodeFactory, NodeState, Queue, SpatialError};
use spatial_common::{Coord, SimTime};

fn sort_dedup(coords: &mut Vec<Coord>) {
    coords.sort_unstable_by_key(|c| (c.level, c.pos.x, c.pos.y, c.pos.z));
    coords.dedup();
}

/// Create `coord` and any missing ancestors, coarsest first. New nodes
/// start in `Loading`, are stamped with `now` and queued for load.
/// Returns `false` if `coord` was already resident.
pub(crate) fn ensure_node<F: NodeFactory>(
    hierarchy: &mut Hierarchy<F::Node, F::Level>,
    factory: &F,
    coord: Coord,
    now: SimTime,
    created: &mut Vec<Coord>,
) -> Result<bool, SpatialError> {
    hierarchy.check_level(coord.level)?;
    if hierarchy.contains(coord) {
        return Ok(false);
    }
    for level in (coord.level..=hierarchy.coarsest_level()).rev() {
        let c = coord.ancestor(level);
        if hierarchy.contains(c) {
            continue;
        }
        let node = hierarchy.insert(Node::new(c, factory.create_node(c)))?;
        node.set_state(NodeState::Loading);
        node.touch(now);
        if let Some(level) = hierarchy.level_mut(level) {
            level.push(Queue::Load, c);
        }
        created.push(c);
    }
    Ok(true)
}

/// Drain every create queue, coarsest level first. Duplicate requests and
/// requests for resident coordinates are no-ops.
pub(crate) fn create_pending<F: NodeFactory>(
    hierarchy: &mut Hierarchy<F::Node, F::Level>,
    factory: &F,
    now: SimTime,
) -> Vec<Coord> {
    let mut created = Vec::new();
    for index in (0..hierarchy.level_count()).rev() {
        let Some(level) = hierarchy.level_mut(index) else {
            continue;
        };
        let mut pending = level.take(Queue::Create);
        sort_dedup(&mut pending);
        for coord in pending {
            if let Err(err) = ensure_node(hierarchy, factory, coord, now, &mut created) {
                tracing::warn!(%coord, %err, "create request dropped");
            }
        }
    }
    created
}

/// Drain one level's load queue: run load processors, then mark `Loaded`.
pub(crate) fn load_level<N, L>(
    level: &mut Level<N, L>,
    processors: &[BoxedNodeProcessor<N, L>],
    ctx: &BatchContext,
) -> usize {
    let mut commands = level.take(Queue::Load);
    sort_dedup(&mut commands);
    commands.retain(|&c| level.get(c).is_some_and(|n| n.state() == NodeState::Loading));
    run_node_batch(processors, ctx, level, &commands);
    for &c in &commands {
        if let Some(node) = level.get_mut(c) {
            node.set_state(NodeState::Loaded);
        }
    }
    commands.len()
}

/// Drain one level's unload queue: leaves run unload processors, move to
/// `Deleting` and wait in the destroy queue. Nodes that gained children
/// since they were queued go back to `Loaded`.
pub(crate) fn unload_level<N, L>(
    level: &mut Level<N, L>,
    processors: &[BoxedNodeProcessor<N, L>],
    ctx: &BatchContext,
) -> usize {
    let mut pending = level.take(Queue::Unload);
    sort_dedup(&mut pending);
    let mut commands = Vec::with_capacity(pending.len());
    for c in pending {
        let Some(node) = level.get_mut(c) else {
            continue;
        };
        if node.state() == NodeState::Deleting {
            continue;
        }
        if node.is_leaf() {
            commands.push(c);
        } else {
            tracing::debug!(coord = %c, "unload skipped, node gained children");
            node.set_state(NodeState::Loaded);
        }
    }
    run_node_batch(processors, ctx, level, &commands);
    for &c in &commands {
        if let Some(node) = level.get_mut(c) {
            node.set_state(NodeState::Deleting);
        }
        level.push(Queue::Destroy, c);
    }
    commands.len()
}

/// Drain one level's tick queue through the tick processors.
pub(crate) fn tick_level<N, L>(
    level: &mut Level<N, L>,
    processors: &[BoxedNodeProcessor<N, L>],
    ctx: &BatchContext,
) -> usize {
    let mut commands = level.take(Queue::Tick);
    sort_dedup(&mut commands);
    commands.retain(|&c| level.contains(c));
    run_node_batch(processors, ctx, level, &commands)
}

/// Unload the subtree rooted at `root`, leaf first. Unload processors run
/// for every node not already `Deleting`; then every node is unlinked and
/// dropped. Returns the removed coordinates in removal order.
pub(crate) fn unload_subtree<N, L>(
    hierarchy: &mut Hierarchy<N, L>,
    processors: &[BoxedNodeProcessor<N, L>],
    ctx: &BatchContext,
    root: Coord,
) -> Result<Vec<Coord>, SpatialError> {
    let order = hierarchy.subtree_post_order(root)?;
    for index in 0..=root.level {
        let Some(level) = hierarchy.level_mut(index) else {
            continue;
        };
        let commands: Vec<Coord> = order
            .iter()
            .copied()
            .filter(|&c| c.level == index)
            .filter(|&c| level.get(c).is_some_and(|n| n.state() != NodeState::Deleting))
            .collect();
        run_node_batch(processors, &ctx.at_level(index), level, &commands);
        for &c in &commands {
            if let Some(node) = level.get_mut(c) {
                node.set_state(NodeState::Deleting);
            }
        }
    }
    for &c in &order {
        hierarchy.remove(c)?;
    }
    Ok(order)
}

/// Drain every destroy queue, finest level first.
pub(crate) fn destroy_pending<N, L>(
    hierarchy: &mut Hierarchy<N, L>,
    processors: &[BoxedNodeProcessor<N, L>],
    ctx: &BatchContext,
) -> Vec<Coord> {
    let mut removed = Vec::new();
    for index in 0..hierarchy.level_count() {
        let Some(level) = hierarchy.level_mut(index) else {
            continue;
        };
        let mut pending = level.take(Queue::Destroy);
        sort_dedup(&mut pending);
        for coord in pending {
            if !hierarchy.contains(coord) {
                continue;
            }
            match unload_subtree(hierarchy, processors, &ctx.at_level(index), coord) {
                Ok(coords) => removed.extend(coords),
                Err(err) => tracing::warn!(%coord, %err, "destroy failed"),
            }
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CommandKind, PlainFactory, node_fn};
    use spatial_common::WorldId;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn hierarchy(levels: u8) -> Hierarchy<(), ()> {
        Hierarchy::new(&PlainFactory, levels)
    }

    fn ctx(kind: CommandKind) -> BatchContext {
        BatchContext::new(WorldId::new(), kind, 0, SimTime::from_micros(5))
    }

    fn counting(counter: &Arc<AtomicUsize>) -> Vec<BoxedNodeProcessor<(), ()>> {
        let counter = counter.clone();
        vec![Box::new(node_fn("count", move |_: &BatchContext, _: &mut (), _: &mut Node<()>| {
            counter.fetch_add(1, Ordering::Relaxed);
        }))]
    }

    #[test]
    fn ensure_node_creates_ancestors_coarsest_first() {
        let mut h = hierarchy(3);
        let mut created = Vec::new();
        let c = Coord::from_xyz(3, 0, -1, 0);
        assert!(ensure_node(&mut h, &PlainFactory, c, SimTime::from_micros(7), &mut created).unwrap());
        assert_eq!(created, vec![c.ancestor(2), c.ancestor(1), c]);
        let node = h.get(c).unwrap();
        assert_eq!(node.state(), NodeState::Loading);
        assert_eq!(node.last_update_time(), SimTime::from_micros(7));
        assert_eq!(h.level(0).unwrap().pending(Queue::Load), &[c]);
        assert!(!ensure_node(&mut h, &PlainFactory, c, SimTime::ZERO, &mut created).unwrap());
        h.validate().unwrap();
    }

    #[test]
    fn duplicate_creates_make_one_node() {
        let mut h = hierarchy(2);
        let c = Coord::from_xyz(0, 0, 0, 0);
        let level = h.level_mut(0).unwrap();
        level.push(Queue::Create, c);
        level.push(Queue::Create, c);
        level.push(Queue::Create, c);
        let created = create_pending(&mut h, &PlainFactory, SimTime::ZERO);
        assert_eq!(created.len(), 2);
        assert_eq!(h.node_count(), 2);
        assert!(h.level(0).unwrap().pending(Queue::Create).is_empty());
    }

    #[test]
    fn load_marks_loaded_without_processors() {
        let mut h = hierarchy(1);
        let c = Coord::default();
        ensure_node(&mut h, &PlainFactory, c, SimTime::ZERO, &mut Vec::new()).unwrap();
        let level = h.level_mut(0).unwrap();
        assert_eq!(load_level(level, &[], &ctx(CommandKind::Load)), 1);
        assert_eq!(level.get(c).unwrap().state(), NodeState::Loaded);
        assert!(level.pending(Queue::Load).is_empty());
    }

    #[test]
    fn unload_then_destroy_removes_leaf() {
        let mut h = hierarchy(1);
        let c = Coord::default();
        ensure_node(&mut h, &PlainFactory, c, SimTime::ZERO, &mut Vec::new()).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let processors = counting(&counter);
        let level = h.level_mut(0).unwrap();
        level.push(Queue::Unload, c);
        level.push(Queue::Unload, c);
        assert_eq!(unload_level(level, &processors, &ctx(CommandKind::Unload)), 1);
        assert_eq!(level.get(c).unwrap().state(), NodeState::Deleting);
        let removed = destroy_pending(&mut h, &processors, &ctx(CommandKind::Unload));
        assert_eq!(removed, vec![c]);
        assert!(h.get(c).is_none());
        // Processors ran once during unload and not again on destroy.
        assert_eq!(counter.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn unload_of_parent_reverts_to_loaded() {
        let mut h = hierarchy(2);
        let leaf = Coord::default();
        ensure_node(&mut h, &PlainFactory, leaf, SimTime::ZERO, &mut Vec::new()).unwrap();
        let parent = leaf.parent();
        let level = h.level_mut(1).unwrap();
        level.push(Queue::Unload, parent);
        assert_eq!(unload_level(level, &[], &ctx(CommandKind::Unload)), 0);
        assert_eq!(level.get(parent).unwrap().state(), NodeState::Loaded);
        assert!(level.pending(Queue::Destroy).is_empty());
    }

    #[test]
    fn unload_subtree_runs_processors_leaf_first() {
        let mut h = hierarchy(3);
        let leaf = Coord::from_xyz(1, 1, 1, 0);
        ensure_node(&mut h, &PlainFactory, leaf, SimTime::ZERO, &mut Vec::new()).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let processors = counting(&counter);
        let root = leaf.ancestor(2);
        let removed = unload_subtree(&mut h, &processors, &ctx(CommandKind::Unload), root).unwrap();
        assert_eq!(removed, vec![leaf, leaf.ancestor(1), root]);
        assert_eq!(counter.load(Ordering::Relaxed), 3);
        assert_eq!(h.node_count(), 0);
    }

    #[test]
    fn tick_skips_missing_nodes() {
        let mut h = hierarchy(1);
        let c = Coord::default();
        ensure_node(&mut h, &PlainFactory, c, SimTime::ZERO, &mut Vec::new()).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let processors = counting(&counter);
        let level = h.level_mut(0).unwrap();
        level.push(Queue::Tick, c);
        level.push(Queue::Tick, Coord::from_xyz(5, 5, 5, 0));
        assert_eq!(tick_level(level, &processors, &ctx(CommandKind::Tick)), 1);
        assert_eq!(counter.load(Ordering::Relaxed), 1);
    }
}
