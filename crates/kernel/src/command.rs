//! Command processors and the batch executor.
//!
//! A processor attaches a side effect to one kind of command. For every
//! batch the executor asks each registered processor for a fresh state,
//! feeds every queued command to every state in registration order, then
//! destroys the states. Processors never see an empty batch.

use crate::{Level, Node, NodeFactory, Region};
use spatial_common::{Coord, SimTime, WorldId};
use std::fmt;
use std::marker::PhantomData;

/// Which queue or worker a batch comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Load,
    Unload,
    Tick,
    Level,
    Region,
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Load => "load",
            Self::Unload => "unload",
            Self::Tick => "tick",
            Self::Level => "level",
            Self::Region => "region",
        };
        f.write_str(s)
    }
}

/// Everything a processor learns about the batch it is initialized for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchContext {
    pub world: WorldId,
    pub kind: CommandKind,
    /// Level being processed. `None` for region batches.
    pub level: Option<u8>,
    pub now: SimTime,
    pub tick: u64,
}

impl BatchContext {
    pub fn new(world: WorldId, kind: CommandKind, tick: u64, now: SimTime) -> Self {
        Self {
            world,
            kind,
            level: None,
            now,
            tick,
        }
    }

    pub fn at_level(mut self, level: u8) -> Self {
        self.level = Some(level);
        self
    }

    pub fn with_kind(mut self, kind: CommandKind) -> Self {
        self.kind = kind;
        self
    }
}

/// Per-batch state shared by all processor kinds.
pub trait CommandState {
    /// Called once after the last command of the batch.
    fn destroy(self: Box<Self>) {}
}

pub trait NodeCommandState<N, L>: CommandState {
    fn process(&mut self, ctx: &BatchContext, level: &mut L, node: &mut Node<N>);
}

/// Reacts to load, unload or tick commands on single nodes.
pub trait NodeCommandProcessor<N, L>: Send + Sync {
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    fn initialize<'a>(&'a self, ctx: &BatchContext) -> Box<dyn NodeCommandState<N, L> + 'a>;
}

pub trait LevelCommandState<N, L>: CommandState {
    fn process(&mut self, ctx: &BatchContext, level: &mut Level<N, L>);
}

/// Runs once per level during the level-worker phase.
pub trait LevelCommandProcessor<N, L>: Send + Sync {
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    fn initialize<'a>(&'a self, ctx: &BatchContext) -> Box<dyn LevelCommandState<N, L> + 'a>;
}

pub trait RegionCommandState<F: NodeFactory>: CommandState {
    fn process(&mut self, ctx: &BatchContext, region: &mut Region<F>);
}

/// Runs once per region during the region-worker phase.
pub trait RegionCommandProcessor<F: NodeFactory>: Send + Sync {
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    fn initialize<'a>(&'a self, ctx: &BatchContext) -> Box<dyn RegionCommandState<F> + 'a>;
}

pub type BoxedNodeProcessor<N, L> = Box<dyn NodeCommandProcessor<N, L>>;
pub type BoxedLevelProcessor<N, L> = Box<dyn LevelCommandProcessor<N, L>>;
pub type BoxedRegionProcessor<F> = Box<dyn RegionCommandProcessor<F>>;

/// Run one batch: initialize every processor, dispatch every command to
/// all states, destroy every state. Returns the number of commands
/// dispatched. An empty batch initializes nothing.
pub fn run_batch<'p, P, S, C>(
    processors: &'p [Box<P>],
    commands: &[C],
    initialize: impl Fn(&'p P) -> Box<S>,
    mut dispatch: impl FnMut(&C, &mut [Box<S>]),
) -> usize
where
    P: ?Sized,
    S: ?Sized + CommandState,
{
    if commands.is_empty() {
        return 0;
    }
    let mut states: Vec<Box<S>> = processors.iter().map(|p| initialize(p.as_ref())).collect();
    for command in commands {
        dispatch(command, &mut states);
    }
    for state in states {
        state.destroy();
    }
    commands.len()
}

/// All processors registered on a world, by command kind.
pub struct ProcessorRegistry<F: NodeFactory> {
    pub(crate) load: Vec<BoxedNodeProcessor<F::Node, F::Level>>,
    pub(crate) unload: Vec<BoxedNodeProcessor<F::Node, F::Level>>,
    pub(crate) tick: Vec<BoxedNodeProcessor<F::Node, F::Level>>,
    pub(crate) level: Vec<BoxedLevelProcessor<F::Node, F::Level>>,
    pub(crate) region: Vec<BoxedRegionProcessor<F>>,
}

impl<F: NodeFactory> Default for ProcessorRegistry<F> {
    fn default() -> Self {
        Self {
            load: Vec::new(),
            unload: Vec::new(),
            tick: Vec::new(),
            level: Vec::new(),
            region: Vec::new(),
        }
    }
}

impl<F: NodeFactory> ProcessorRegistry<F> {
    /// Registered node processors for `kind`. Empty for the level and
    /// region kinds.
    pub fn node_processors(&self, kind: CommandKind) -> &[BoxedNodeProcessor<F::Node, F::Level>] {
        match kind {
            CommandKind::Load => &self.load,
            CommandKind::Unload => &self.unload,
            CommandKind::Tick => &self.tick,
            CommandKind::Level | CommandKind::Region => &[],
        }
    }

    pub fn len(&self) -> usize {
        self.load.len() + self.unload.len() + self.tick.len() + self.level.len() + self.region.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<F: NodeFactory> fmt::Debug for ProcessorRegistry<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = |v: &[BoxedNodeProcessor<F::Node, F::Level>]| -> Vec<String> {
            v.iter().map(|p| p.name().to_string()).collect()
        };
        f.debug_struct("ProcessorRegistry")
            .field("load", &names(&self.load))
            .field("unload", &names(&self.unload))
            .field("tick", &names(&self.tick))
            .field("level", &self.level.len())
            .field("region", &self.region.len())
            .finish()
    }
}

/// Run every node processor over `commands` on one level. Commands whose
/// node is no longer resident are skipped.
pub(crate) fn run_node_batch<N, L>(
    processors: &[BoxedNodeProcessor<N, L>],
    ctx: &BatchContext,
    level: &mut Level<N, L>,
    commands: &[Coord],
) -> usize {
    run_batch(
        processors,
        commands,
        |p| p.initialize(ctx),
        |&coord, states| {
            let Some((data, node)) = level.data_and_node(coord) else {
                return;
            };
            for state in states.iter_mut() {
                state.process(ctx, data, node);
            }
        },
    )
}

/// Adapter registering a closure as a node processor.
pub struct NodeFn<N, L, G> {
    name: &'static str,
    f: G,
    _marker: PhantomData<fn(&mut L, &mut N)>,
}

/// Wrap `f` as a [`NodeCommandProcessor`].
pub fn node_fn<N, L, G>(name: &'static str, f: G) -> NodeFn<N, L, G>
where
    G: Fn(&BatchContext, &mut L, &mut Node<N>) + Send + Sync,
{
    NodeFn {
        name,
        f,
        _marker: PhantomData,
    }
}

struct NodeFnState<'a, G>(&'a G);

impl<G> CommandState for NodeFnState<'_, G> {}

impl<N, L, G> NodeCommandState<N, L> for NodeFnState<'_, G>
where
    G: Fn(&BatchContext, &mut L, &mut Node<N>),
{
    fn process(&mut self, ctx: &BatchContext, level: &mut L, node: &mut Node<N>) {
        (self.0)(ctx, level, node)
    }
}

impl<N, L, G> NodeCommandProcessor<N, L> for NodeFn<N, L, G>
where
    G: Fn(&BatchContext, &mut L, &mut Node<N>) + Send + Sync,
{
    fn name(&self) -> &str {
        self.name
    }

    fn initialize<'a>(&'a self, _ctx: &BatchContext) -> Box<dyn NodeCommandState<N, L> + 'a> {
        Box::new(NodeFnState(&self.f))
    }
}

/// Adapter registering a closure as a level processor.
pub struct LevelFn<N, L, G> {
    name: &'static str,
    f: G,
    _marker: PhantomData<fn(&mut L, &mut N)>,
}

pub fn level_fn<N, L, G>(name: &'static str, f: G) -> LevelFn<N, L, G>
where
    G: Fn(&BatchContext, &mut Level<N, L>) + Send + Sync,
{
    LevelFn {
        name,
        f,
        _marker: PhantomData,
    }
}

struct LevelFnState<'a, G>(&'a G);

impl<G> CommandState for LevelFnState<'_, G> {}

impl<N, L, G> LevelCommandState<N, L> for LevelFnState<'_, G>
where
    G: Fn(&BatchContext, &mut Level<N, L>),
{
    fn process(&mut self, ctx: &BatchContext, level: &mut Level<N, L>) {
        (self.0)(ctx, level)
    }
}

impl<N, L, G> LevelCommandProcessor<N, L> for LevelFn<N, L, G>
where
    G: Fn(&BatchContext, &mut Level<N, L>) + Send + Sync,
{
    fn name(&self) -> &str {
        self.name
    }

    fn initialize<'a>(&'a self, _ctx: &BatchContext) -> Box<dyn LevelCommandState<N, L> + 'a> {
        Box::new(LevelFnState(&self.f))
    }
}

/// Adapter registering a closure as a region processor.
pub struct RegionFn<F, G> {
    name: &'static str,
    f: G,
    _marker: PhantomData<fn(&mut F)>,
}

pub fn region_fn<F, G>(name: &'static str, f: G) -> RegionFn<F, G>
where
    F: NodeFactory,
    G: Fn(&BatchContext, &mut Region<F>) + Send + Sync,
{
    RegionFn {
        name,
        f,
        _marker: PhantomData,
    }
}

struct RegionFnState<'a, G>(&'a G);

impl<G> CommandState for RegionFnState<'_, G> {}

impl<F, G> RegionCommandState<F> for RegionFnState<'_, G>
where
    F: NodeFactory,
    G: Fn(&BatchContext, &mut Region<F>),
{
    fn process(&mut self, ctx: &BatchContext, region: &mut Region<F>) {
        (self.0)(ctx, region)
    }
}

impl<F, G> RegionCommandProcessor<F> for RegionFn<F, G>
where
    F: NodeFactory,
    G: Fn(&BatchContext, &mut Region<F>) + Send + Sync,
{
    fn name(&self) -> &str {
        self.name
    }

    fn initialize<'a>(&'a self, _ctx: &BatchContext) -> Box<dyn RegionCommandState<F> + 'a> {
        Box::new(RegionFnState(&self.f))
    }
}
