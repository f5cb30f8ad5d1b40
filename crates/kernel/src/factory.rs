use spatial_common::Coord;

/// Produces the payloads a particular kind of world attaches to its nodes
/// and levels.
pub trait NodeFactory: Send + Sync + 'static {
    type Node: Send + Sync + 'static;
    type Level: Send + Sync + 'static;

    fn create_node(&self, coord: Coord) -> Self::Node;
    fn create_level(&self, level: u8) -> Self::Level;
}

/// Factory for worlds that carry no payload at all.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainFactory;

impl NodeFactory for PlainFactory {
    type Node = ();
    type Level = ();

    fn create_node(&self, _coord: Coord) -> Self::Node {}
    fn create_level(&self, _level: u8) -> Self::Level {}
}
