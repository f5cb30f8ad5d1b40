use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ScheduleError;

/// The named stages of one tick, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Phase {
    Loader,
    LevelWorker,
    RegionWorker,
    WorldWorker,
    Create,
    Load,
    Unload,
    Destroy,
    End,
}

/// What a phase fans out over. Workers of one phase never share a
/// partition key, so they never touch the same level or region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Partition {
    PerLoader,
    PerWorldLevel,
    PerRegion,
    PerWorld,
    SingleThreaded,
}

/// Order in which one worker walks a world's levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LevelOrder {
    Unordered,
    CoarsestFirst,
    FinestFirst,
}

impl Phase {
    pub const ALL: [Phase; 9] = [
        Phase::Loader,
        Phase::LevelWorker,
        Phase::RegionWorker,
        Phase::WorldWorker,
        Phase::Create,
        Phase::Load,
        Phase::Unload,
        Phase::Destroy,
        Phase::End,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    /// The phase after this one, wrapping from `End` to `Loader`.
    pub fn next(self) -> Phase {
        Self::ALL[(self.index() + 1) % Self::ALL.len()]
    }

    pub fn partition(self) -> Partition {
        match self {
            Phase::Loader => Partition::PerLoader,
            Phase::LevelWorker | Phase::Load | Phase::Unload => Partition::PerWorldLevel,
            Phase::RegionWorker => Partition::PerRegion,
            Phase::WorldWorker | Phase::Create | Phase::Destroy => Partition::PerWorld,
            Phase::End => Partition::SingleThreaded,
        }
    }

    pub fn level_order(self) -> LevelOrder {
        match self {
            Phase::Create => LevelOrder::CoarsestFirst,
            Phase::Destroy => LevelOrder::FinestFirst,
            _ => LevelOrder::Unordered,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Phase::Loader => "loader",
            Phase::LevelWorker => "level-worker",
            Phase::RegionWorker => "region-worker",
            Phase::WorldWorker => "world-worker",
            Phase::Create => "create",
            Phase::Load => "load",
            Phase::Unload => "unload",
            Phase::Destroy => "destroy",
            Phase::End => "end",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Tracks which phase may run next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseCursor {
    expected: Phase,
}

impl Default for PhaseCursor {
    fn default() -> Self {
        Self {
            expected: Phase::Loader,
        }
    }
}

impl PhaseCursor {
    pub fn expected(&self) -> Phase {
        self.expected
    }

    /// True between `Loader` and `End` of one tick.
    pub fn in_tick(&self) -> bool {
        self.expected != Phase::Loader
    }

    /// Accept `phase` if it is the one expected, and move on.
    pub fn advance(&mut self, phase: Phase) -> Result<(), ScheduleError> {
        if phase != self.expected {
            return Err(ScheduleError::OutOfOrder {
                expected: self.expected,
                got: phase,
            });
        }
        self.expected = phase.next();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phases_are_in_declared_order() {
        for pair in Phase::ALL.windows(2) {
            assert!(pair[0] < pair[1]);
            assert_eq!(pair[0].next(), pair[1]);
        }
        assert_eq!(Phase::End.next(), Phase::Loader);
    }

    #[test]
    fn partitions_match_ordering_contract() {
        assert_eq!(Phase::Loader.partition(), Partition::PerLoader);
        assert_eq!(Phase::LevelWorker.partition(), Partition::PerWorldLevel);
        assert_eq!(Phase::RegionWorker.partition(), Partition::PerRegion);
        assert_eq!(Phase::Create.partition(), Partition::PerWorld);
        assert_eq!(Phase::Create.level_order(), LevelOrder::CoarsestFirst);
        assert_eq!(Phase::Destroy.level_order(), LevelOrder::FinestFirst);
        assert_eq!(Phase::End.partition(), Partition::SingleThreaded);
    }

    #[test]
    fn cursor_rejects_out_of_order() {
        let mut cursor = PhaseCursor::default();
        let err = cursor.advance(Phase::Create).unwrap_err();
        assert!(matches!(
            err,
            ScheduleError::OutOfOrder {
                expected: Phase::Loader,
                got: Phase::Create
            }
        ));
        for phase in Phase::ALL {
            cursor.advance(phase).unwrap();
        }
        assert!(!cursor.in_tick());
        cursor.advance(Phase::Loader).unwrap();
        assert!(cursor.in_tick());
        assert_eq!(cursor.expected(), Phase::LevelWorker);
    }
}
