use std::time::Duration;

use glam::IVec3;
use spatial_common::{Coord, SimTime, WorldId};
use spatial_kernel::{Level, NodeFactory, NodeState, World};
use spatial_schedule::Engine;

/// Inspector for developer tooling.
///
/// Provides read-only queries against worlds and engines for debugging,
/// profiling and the CLI.
pub struct SpatialInspector;

impl SpatialInspector {
    /// Produce a summary of one world, levels finest first.
    pub fn summary<F: NodeFactory>(world: &World<F>) -> WorldSummary {
        WorldSummary {
            id: world.id(),
            tick: world.tick(),
            now: world.now(),
            node_count: world.node_count(),
            region_count: world.region_count(),
            total_node_count: world.total_node_count(),
            levels: world.hierarchy().levels().iter().map(Self::level_summary).collect(),
        }
    }

    pub fn level_summary<N, L>(level: &Level<N, L>) -> LevelSummary {
        let mut summary = LevelSummary {
            level: level.index(),
            nodes: level.len(),
            pending: level.pending_total(),
            ..Default::default()
        };
        for node in level.nodes() {
            match node.state() {
                NodeState::Loading => summary.loading += 1,
                NodeState::Loaded => summary.loaded += 1,
                NodeState::Unloading => summary.unloading += 1,
                NodeState::Deleting => summary.deleting += 1,
                NodeState::Unloaded => {}
            }
            if node.num_observers() > 0 {
                summary.observed += 1;
            }
        }
        summary
    }

    /// Link and lifecycle details of one resident node.
    pub fn inspect_node<F: NodeFactory>(world: &World<F>, coord: Coord) -> Option<NodeInfo> {
        world.get_node(coord).map(|node| NodeInfo {
            coord,
            state: node.state(),
            parent: node.parent_coord(),
            children: node.child_coords().count(),
            neighbours: node.neighbour_coords().count(),
            observers: node.num_observers(),
            version: node.network_version(),
            last_update: node.last_update_time(),
            origin: coord.rel_pos(),
        })
    }

    pub fn engine_summary<F: NodeFactory>(engine: &Engine<F>) -> EngineSummary {
        EngineSummary {
            tick: engine.tick_count(),
            now: engine.now(),
            worlds: engine.world_count(),
            loaders: engine.loader_count(),
            nodes: engine.node_count(),
            regions: engine.region_count(),
            average_tick: engine.timer().average(),
            slowest_tick: engine.timer().max(),
        }
    }
}

/// Summary of world state for the inspector.
#[derive(Debug, Clone)]
pub struct WorldSummary {
    pub id: WorldId,
    pub tick: u64,
    pub now: SimTime,
    pub node_count: usize,
    pub region_count: usize,
    /// Nodes in the world hierarchy plus every region.
    pub total_node_count: usize,
    pub levels: Vec<LevelSummary>,
}

impl std::fmt::Display for WorldSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "World [{}]: tick={} time={} nodes={} regions={} total_nodes={}",
            self.id, self.tick, self.now, self.node_count, self.region_count, self.total_node_count
        )?;
        for level in &self.levels {
            writeln!(f, "  {level}")?;
        }
        Ok(())
    }
}

/// Per-level node counts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LevelSummary {
    pub level: u8,
    pub nodes: usize,
    pub loading: usize,
    pub loaded: usize,
    pub unloading: usize,
    pub deleting: usize,
    pub observed: usize,
    /// Commands waiting in any queue.
    pub pending: usize,
}

impl std::fmt::Display for LevelSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "L{}: nodes={} loading={} loaded={} unloading={} deleting={} observed={} pending={}",
            self.level,
            self.nodes,
            self.loading,
            self.loaded,
            self.unloading,
            self.deleting,
            self.observed,
            self.pending
        )
    }
}

/// Detailed info about a single node.
#[derive(Debug, Clone)]
pub struct NodeInfo {
    pub coord: Coord,
    pub state: NodeState,
    pub parent: Option<Coord>,
    pub children: usize,
    pub neighbours: usize,
    pub observers: u32,
    pub version: u32,
    pub last_update: SimTime,
    /// Level-0 position of the node's footprint corner.
    pub origin: IVec3,
}

impl std::fmt::Display for NodeInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Node {} [{}] children={} neighbours={} observers={} v{} updated={} origin=({}, {}, {})",
            self.coord,
            self.state,
            self.children,
            self.neighbours,
            self.observers,
            self.version,
            self.last_update,
            self.origin.x,
            self.origin.y,
            self.origin.z,
        )
    }
}

/// Engine-wide counters and tick timing.
#[derive(Debug, Clone)]
pub struct EngineSummary {
    pub tick: u64,
    pub now: SimTime,
    pub worlds: usize,
    pub loaders: usize,
    pub nodes: usize,
    pub regions: usize,
    pub average_tick: Duration,
    pub slowest_tick: Duration,
}

impl std::fmt::Display for EngineSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Engine: tick={} time={} worlds={} loaders={} nodes={} regions={} avg_tick={:?} max_tick={:?}",
            self.tick,
            self.now,
            self.worlds,
            self.loaders,
            self.nodes,
            self.regions,
            self.average_tick,
            self.slowest_tick
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spatial_common::Loader;
    use spatial_kernel::{PlainFactory, WorldConfig};
    use spatial_schedule::EngineConfig;

    fn world() -> World<PlainFactory> {
        World::new(WorldConfig::with_levels(2), PlainFactory)
    }

    #[test]
    fn summary_empty_world() {
        let w = world();
        let summary = SpatialInspector::summary(&w);
        assert_eq!(summary.tick, 0);
        assert_eq!(summary.node_count, 0);
        assert_eq!(summary.levels.len(), 2);
        assert!(summary.levels.iter().all(|l| l.nodes == 0));
    }

    #[test]
    fn summary_counts_states_per_level() {
        let mut w = world();
        w.create_node(Coord::from_xyz(0, 0, 0, 1)).unwrap();
        w.create_node(Coord::default()).unwrap();
        w.load_phase();
        w.observe(Coord::default()).unwrap();
        w.queue_unload(Coord::from_xyz(0, 0, 0, 1));

        let summary = SpatialInspector::summary(&w);
        assert_eq!(summary.node_count, 2);
        assert_eq!(summary.levels[0].loaded, 1);
        assert_eq!(summary.levels[0].observed, 1);
        assert_eq!(summary.levels[1].unloading, 1);
        assert_eq!(summary.levels[1].pending, 1);
    }

    #[test]
    fn inspect_node_reports_links() {
        let mut w = world();
        let parent = Coord::from_xyz(0, 0, 0, 1);
        w.create_node(parent).unwrap();
        w.create_node(Coord::default()).unwrap();

        let info = SpatialInspector::inspect_node(&w, parent).unwrap();
        assert_eq!(info.children, 1);
        assert_eq!(info.state, NodeState::Loading);
        assert!(info.parent.is_none());

        let child = SpatialInspector::inspect_node(&w, Coord::default()).unwrap();
        assert_eq!(child.parent, Some(parent));
        assert!(SpatialInspector::inspect_node(&w, Coord::from_xyz(9, 9, 9, 0)).is_none());
    }

    #[test]
    fn summary_display() {
        let w = world();
        let s = format!("{}", SpatialInspector::summary(&w));
        assert!(s.contains("tick=0"));
        assert!(s.contains("L1: nodes=0"));
    }

    #[test]
    fn engine_summary_tracks_ticks() {
        let mut engine = Engine::new(EngineConfig {
            world: WorldConfig::with_levels(1),
            threads: Some(1),
            ..Default::default()
        })
        .unwrap();
        engine.add_world(PlainFactory);
        engine.add_loader(Loader::new(IVec3::ZERO, 1, 0, 1));
        engine.tick().unwrap();

        let summary = SpatialInspector::engine_summary(&engine);
        assert_eq!(summary.tick, 1);
        assert_eq!(summary.worlds, 1);
        assert_eq!(summary.loaders, 1);
        assert_eq!(summary.nodes, 27);
        assert!(summary.to_string().starts_with("Engine: tick=1"));
    }
}
