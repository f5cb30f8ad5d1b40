use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use rayon::prelude::*;
use spatial_common::{Loader, LoaderId, SimTime, WorldId};
use spatial_kernel::{NodeFactory, RegionTickStats, World};
use spatial_stream::{StreamStats, TickTimer, keep_alive, stream_level, stream_region};

use crate::{EngineConfig, Phase, PhaseCursor, ScheduleError};

/// Counters for one completed tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickStats {
    pub tick: u64,
    pub stream: StreamStats,
    pub regions: RegionTickStats,
    /// Tick-queue commands drained by the world worker.
    pub ticked: usize,
    pub created: usize,
    pub loaded: usize,
    pub unloaded: usize,
    pub destroyed: usize,
    pub duration: Duration,
}

/// Drives any number of worlds through the tick phases on a dedicated
/// worker pool.
///
/// Loaders registered on the engine stream every world; loaders registered
/// on a region only stream that region.
pub struct Engine<F: NodeFactory> {
    config: EngineConfig,
    pool: rayon::ThreadPool,
    worlds: Vec<World<F>>,
    loaders: BTreeMap<LoaderId, Loader>,
    cursor: PhaseCursor,
    tick: u64,
    now: SimTime,
    current: TickStats,
    last: TickStats,
    started: Option<Instant>,
    timer: TickTimer,
}

impl<F: NodeFactory> std::fmt::Debug for Engine<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("worlds", &self.worlds.len())
            .field("loaders", &self.loaders.len())
            .field("threads", &self.pool.current_num_threads())
            .field("tick", &self.tick)
            .field("now", &self.now)
            .field("next_phase", &self.cursor.expected())
            .finish()
    }
}

impl<F: NodeFactory> Engine<F> {
    pub fn new(config: EngineConfig) -> Result<Self, ScheduleError> {
        config.validate()?;
        let mut builder =
            rayon::ThreadPoolBuilder::new().thread_name(|i| format!("spatial-worker-{i}"));
        if let Some(threads) = config.threads {
            builder = builder.num_threads(threads);
        }
        let pool = builder.build()?;
        tracing::info!(
            threads = pool.current_num_threads(),
            levels = config.world.level_count,
            "engine started"
        );
        Ok(Self {
            config,
            pool,
            worlds: Vec::new(),
            loaders: BTreeMap::new(),
            cursor: PhaseCursor::default(),
            tick: 0,
            now: SimTime::ZERO,
            current: TickStats::default(),
            last: TickStats::default(),
            started: None,
            timer: TickTimer::default(),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // Worlds.

    /// Create a world with the engine's world configuration.
    pub fn add_world(&mut self, factory: F) -> WorldId {
        self.insert_world(World::new(self.config.world.clone(), factory))
    }

    pub fn insert_world(&mut self, mut world: World<F>) -> WorldId {
        world.set_time(self.tick, self.now);
        let id = world.id();
        self.worlds.push(world);
        id
    }

    pub fn world(&self, id: WorldId) -> Option<&World<F>> {
        self.worlds.iter().find(|w| w.id() == id)
    }

    pub fn world_mut(&mut self, id: WorldId) -> Option<&mut World<F>> {
        self.worlds.iter_mut().find(|w| w.id() == id)
    }

    pub fn remove_world(&mut self, id: WorldId) -> Option<World<F>> {
        let index = self.worlds.iter().position(|w| w.id() == id)?;
        Some(self.worlds.remove(index))
    }

    pub fn worlds(&self) -> &[World<F>] {
        &self.worlds
    }

    // Loaders.

    pub fn add_loader(&mut self, loader: Loader) -> LoaderId {
        let id = LoaderId::new();
        self.loaders.insert(id, loader);
        tracing::debug!(%id, position = ?loader.position, "loader added");
        id
    }

    pub fn loader(&self, id: LoaderId) -> Option<&Loader> {
        self.loaders.get(&id)
    }

    pub fn loader_mut(&mut self, id: LoaderId) -> Option<&mut Loader> {
        self.loaders.get_mut(&id)
    }

    pub fn remove_loader(&mut self, id: LoaderId) -> Option<Loader> {
        self.loaders.remove(&id)
    }

    pub fn loaders(&self) -> impl Iterator<Item = (LoaderId, &Loader)> {
        self.loaders.iter().map(|(id, l)| (*id, l))
    }

    // Counters.

    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    pub fn now(&self) -> SimTime {
        self.now
    }

    pub fn world_count(&self) -> usize {
        self.worlds.len()
    }

    /// Levels of worlds created through [`Engine::add_world`].
    pub fn level_count(&self) -> u8 {
        self.config.world.level_count
    }

    pub fn loader_count(&self) -> usize {
        self.loaders.len()
    }

    /// Resident nodes across every world, regions included.
    pub fn node_count(&self) -> usize {
        self.worlds.iter().map(World::total_node_count).sum()
    }

    pub fn region_count(&self) -> usize {
        self.worlds.iter().map(World::region_count).sum()
    }

    pub fn next_phase(&self) -> Phase {
        self.cursor.expected()
    }

    pub fn last_tick(&self) -> TickStats {
        self.last
    }

    pub fn timer(&self) -> &TickTimer {
        &self.timer
    }

    /// Move simulation time forward without running a tick.
    pub fn advance_time(&mut self, dt: Duration) {
        self.now = self.now + dt;
    }

    // Scheduling.

    /// Run every phase once, in order.
    pub fn tick(&mut self) -> Result<TickStats, ScheduleError> {
        let _span = tracing::info_span!("engine_tick", tick = self.tick).entered();
        for phase in Phase::ALL {
            self.run_phase(phase)?;
        }
        Ok(self.last)
    }

    /// Run `n` ticks and return the stats of the last one.
    pub fn run_ticks(&mut self, n: u64) -> Result<TickStats, ScheduleError> {
        for _ in 0..n {
            self.tick()?;
        }
        Ok(self.last)
    }

    /// Run a single phase. Phases must be run in [`Phase::ALL`] order;
    /// returns the amount of work the phase did.
    pub fn run_phase(&mut self, phase: Phase) -> Result<usize, ScheduleError> {
        self.cursor.advance(phase)?;
        let _span = tracing::debug_span!("phase", %phase, tick = self.tick).entered();

        let tick = self.tick;
        let now = self.now;
        let pool = &self.pool;
        let worlds = &mut self.worlds;
        let current = &mut self.current;
        let stream = &self.config.stream;

        let work = match phase {
            Phase::Loader => {
                self.started = Some(Instant::now());
                *current = TickStats {
                    tick,
                    ..Default::default()
                };
                for world in worlds.iter_mut() {
                    world.set_time(tick, now);
                }
                let worlds = &*worlds;
                let touched = pool.install(|| {
                    self.loaders
                        .par_iter()
                        .map(|(_, loader)| {
                            worlds
                                .iter()
                                .map(|w| keep_alive(w.hierarchy().levels(), loader, now))
                                .sum::<usize>()
                        })
                        .sum::<usize>()
                });
                current.stream.touched += touched;
                touched
            }
            Phase::LevelWorker => {
                let loaders: Vec<Loader> = self.loaders.values().copied().collect();
                let stats = pool.install(|| {
                    worlds
                        .par_iter_mut()
                        .map(|w| {
                            let timeout = w.config().eviction_timeout();
                            w.level_worker_phase(|level| {
                                stream_level(stream, level, &loaders, tick, now, timeout)
                            })
                            .into_iter()
                            .fold(StreamStats::default(), |a, b| a + b)
                        })
                        .reduce(StreamStats::default, |a, b| a + b)
                });
                current.stream += stats;
                stats.requested + stats.evicted
            }
            Phase::RegionWorker => {
                let (streamed, regions) = pool.install(|| {
                    worlds
                        .par_iter_mut()
                        .map(|w| {
                            let streamed = std::sync::Mutex::new(StreamStats::default());
                            let regions = w.region_worker_phase(|region| {
                                let stats = stream_region(stream, region, tick, now);
                                if let Ok(mut total) = streamed.lock() {
                                    *total += stats;
                                }
                            });
                            let streamed = streamed.into_inner().unwrap_or_default();
                            (streamed, regions)
                        })
                        .reduce(
                            || (StreamStats::default(), RegionTickStats::default()),
                            |a, b| (a.0 + b.0, a.1 + b.1),
                        )
                });
                current.stream += streamed;
                current.regions = current.regions + regions;
                regions.created + regions.loaded + regions.unloaded + regions.destroyed
            }
            Phase::WorldWorker => {
                let ticked = pool.install(|| {
                    worlds
                        .par_iter_mut()
                        .map(|w| w.world_worker_phase())
                        .sum::<usize>()
                });
                current.ticked += ticked;
                ticked
            }
            Phase::Create => {
                let created =
                    pool.install(|| worlds.par_iter_mut().map(|w| w.create_phase()).sum::<usize>());
                current.created += created;
                created
            }
            Phase::Load => {
                let loaded =
                    pool.install(|| worlds.par_iter_mut().map(|w| w.load_phase()).sum::<usize>());
                current.loaded += loaded;
                loaded
            }
            Phase::Unload => {
                let unloaded =
                    pool.install(|| worlds.par_iter_mut().map(|w| w.unload_phase()).sum::<usize>());
                current.unloaded += unloaded;
                unloaded
            }
            Phase::Destroy => {
                let destroyed = pool
                    .install(|| worlds.par_iter_mut().map(|w| w.destroy_phase()).sum::<usize>());
                current.destroyed += destroyed;
                destroyed
            }
            Phase::End => {
                let duration = self.started.take().map(|s| s.elapsed()).unwrap_or_default();
                current.duration = duration;
                self.timer.record(duration);
                self.last = *current;
                self.tick += 1;
                self.now = self.now + self.config.tick_interval();
                tracing::debug!(
                    tick = self.last.tick,
                    created = self.last.created,
                    destroyed = self.last.destroyed,
                    ?duration,
                    "tick complete"
                );
                0
            }
        };
        Ok(work)
    }
}
