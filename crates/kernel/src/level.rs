use crate::Node;
use glam::IVec3;
use spatial_common::Coord;
use std::collections::HashMap;

/// The pending-command queues of one level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Queue {
    Create,
    Load,
    Unload,
    Tick,
    /// Nodes whose unload processors already ran, awaiting removal in the
    /// finest-first destroy pass.
    Destroy,
}

impl Queue {
    pub const ALL: [Queue; 5] = [
        Queue::Create,
        Queue::Load,
        Queue::Unload,
        Queue::Tick,
        Queue::Destroy,
    ];
}

#[derive(Debug, Default)]
pub(crate) struct CommandQueues {
    pub(crate) create: Vec<Coord>,
    pub(crate) load: Vec<Coord>,
    pub(crate) unload: Vec<Coord>,
    pub(crate) tick: Vec<Coord>,
    pub(crate) destroy: Vec<Coord>,
}

impl CommandQueues {
    pub(crate) fn get(&self, queue: Queue) -> &Vec<Coord> {
        match queue {
            Queue::Create => &self.create,
            Queue::Load => &self.load,
            Queue::Unload => &self.unload,
            Queue::Tick => &self.tick,
            Queue::Destroy => &self.destroy,
        }
    }

    pub(crate) fn get_mut(&mut self, queue: Queue) -> &mut Vec<Coord> {
        match queue {
            Queue::Create => &mut self.create,
            Queue::Load => &mut self.load,
            Queue::Unload => &mut self.unload,
            Queue::Tick => &mut self.tick,
            Queue::Destroy => &mut self.destroy,
        }
    }

    /// Move every pending command of `other` to the back of these queues.
    pub(crate) fn append(&mut self, other: &mut CommandQueues) {
        for queue in Queue::ALL {
            self.get_mut(queue).append(other.get_mut(queue));
        }
    }
}

/// One resolution tier: the nodes resident at this level, the level's
/// factory payload, and its command queues.
#[derive(Debug)]
pub struct Level<N, L> {
    index: u8,
    pub(crate) nodes: HashMap<IVec3, Node<N>>,
    pub(crate) queues: CommandQueues,
    /// Payload produced by the world's factory.
    pub data: L,
}

impl<N, L> Level<N, L> {
    pub(crate) fn new(index: u8, data: L) -> Self {
        Self {
            index,
            nodes: HashMap::new(),
            queues: CommandQueues::default(),
            data,
        }
    }

    pub fn index(&self) -> u8 {
        self.index
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Lookup by coordinate. `None` if the coordinate belongs to another
    /// level or nothing is resident.
    pub fn get(&self, coord: Coord) -> Option<&Node<N>> {
        if coord.level != self.index {
            return None;
        }
        self.nodes.get(&coord.pos)
    }

    pub fn get_mut(&mut self, coord: Coord) -> Option<&mut Node<N>> {
        if coord.level != self.index {
            return None;
        }
        self.nodes.get_mut(&coord.pos)
    }

    pub fn contains(&self, coord: Coord) -> bool {
        self.get(coord).is_some()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node<N>> {
        self.nodes.values()
    }

    pub fn nodes_mut(&mut self) -> impl Iterator<Item = &mut Node<N>> {
        self.nodes.values_mut()
    }

    /// Push a command. Returns `false` if the coordinate is on another
    /// level.
    pub fn push(&mut self, queue: Queue, coord: Coord) -> bool {
        if coord.level != self.index {
            return false;
        }
        self.queues.get_mut(queue).push(coord);
        true
    }

    pub fn pending(&self, queue: Queue) -> &[Coord] {
        self.queues.get(queue)
    }

    pub fn pending_total(&self) -> usize {
        Queue::ALL.iter().map(|&q| self.queues.get(q).len()).sum()
    }

    pub(crate) fn take(&mut self, queue: Queue) -> Vec<Coord> {
        std::mem::take(self.queues.get_mut(queue))
    }

    /// Split borrow of the payload and one node, for processors.
    pub(crate) fn data_and_node(&mut self, coord: Coord) -> Option<(&mut L, &mut Node<N>)> {
        if coord.level != self.index {
            return None;
        }
        let node = self.nodes.get_mut(&coord.pos)?;
        Some((&mut self.data, node))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookups_reject_other_levels() {
        let mut level: Level<(), ()> = Level::new(2, ());
        let c = Coord::from_xyz(0, 1, 0, 2);
        level.nodes.insert(c.pos, Node::new(c, ()));
        assert!(level.contains(c));
        assert!(!level.contains(Coord::from_xyz(0, 1, 0, 1)));
        assert!(level.get_mut(Coord::from_xyz(0, 1, 0, 3)).is_none());
        assert_eq!(level.len(), 1);
    }

    #[test]
    fn push_and_take_queues() {
        let mut level: Level<(), ()> = Level::new(0, ());
        assert!(level.push(Queue::Create, Coord::from_xyz(1, 0, 0, 0)));
        assert!(!level.push(Queue::Create, Coord::from_xyz(1, 0, 0, 1)));
        assert!(level.push(Queue::Tick, Coord::from_xyz(2, 0, 0, 0)));
        assert_eq!(level.pending(Queue::Create).len(), 1);
        assert_eq!(level.pending_total(), 2);
        let taken = level.take(Queue::Create);
        assert_eq!(taken, vec![Coord::from_xyz(1, 0, 0, 0)]);
        assert!(level.pending(Queue::Create).is_empty());
    }

    #[test]
    fn append_moves_all_queues() {
        let mut a = CommandQueues::default();
        let mut b = CommandQueues::default();
        b.unload.push(Coord::default());
        b.destroy.push(Coord::default());
        a.append(&mut b);
        assert_eq!(a.unload.len(), 1);
        assert_eq!(a.destroy.len(), 1);
        assert!(b.unload.is_empty());
    }
}
