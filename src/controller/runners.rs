//! The controller's runner catalogue (spec.md §3 "runner record", §4.1).
//!
//! Runners are spawned and released far more often than, say, connections,
//! so the table is a dense `slab::Slab` keyed by [`RunnerId`] rather than a
//! `HashMap` — the same indexing trade the teacher crate makes for its own
//! object table.

use slab::Slab;

use crate::bridge::{DynSlots, Messenger};
use crate::runner::LockBlock;
use crate::task::{RunnerId, RunnerKind, TaskId};

/// The three blocking call-family channels a single runner owns (spec.md
/// §3 "messengers", §5 "each messenger is owned by the runner that last
/// posted a request on it until the matching wake"). One trio per runner,
/// not one trio for the whole controller — two runners making concurrent
/// host calls must not clobber each other's status/payload slots.
pub struct MessengerTrio {
    pub console: Messenger<DynSlots>,
    pub network: Messenger<DynSlots>,
    pub persistence: Messenger<DynSlots>,
}

/// Everything the controller remembers about one live runner.
pub struct RunnerRecord {
    pub kind: RunnerKind,
    pub lock: LockBlock<DynSlots>,
    pub messengers: MessengerTrio,
    pub current_task: Option<TaskId>,
    /// Set by the controller's panic handler (spec.md §4.1 "panic"): the
    /// runner has unwound to its top level and stopped, but the record is
    /// kept around for post-mortem inspection rather than released.
    pub dormant: bool,
}

impl RunnerRecord {
    pub fn new(kind: RunnerKind, lock: LockBlock<DynSlots>, messengers: MessengerTrio) -> Self {
        Self { kind, lock, messengers, current_task: None, dormant: false }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerTableError {
    NotFound,
}

/// Runner catalogue. Spawning is performed by [`super::Controller`] (it
/// alone may start a Worker); this table just tracks what has been spawned.
#[derive(Default)]
pub struct RunnerTable {
    runners: Slab<RunnerRecord>,
}

impl RunnerTable {
    pub fn new() -> Self {
        Self { runners: Slab::new() }
    }

    pub fn insert(&mut self, record: RunnerRecord) -> RunnerId {
        RunnerId(self.runners.insert(record))
    }

    pub fn get(&self, id: RunnerId) -> Option<&RunnerRecord> {
        self.runners.get(id.0)
    }

    pub fn get_mut(&mut self, id: RunnerId) -> Option<&mut RunnerRecord> {
        self.runners.get_mut(id.0)
    }

    /// Find the runner currently hosting `task`, if any (spec.md §4.1
    /// "serialize" needs to route a wake to the right runner's lock block).
    pub fn find_by_task(&self, task: TaskId) -> Option<RunnerId> {
        self.runners
            .iter()
            .find(|(_, record)| record.current_task == Some(task))
            .map(|(index, _)| RunnerId(index))
    }

    /// Release (terminate) a runner. Safe even if it is currently parked in
    /// its serialize block, since that block is a leaf of its own work loop
    /// (spec.md §4.1 "task release").
    pub fn release(&mut self, id: RunnerId) -> Result<RunnerRecord, RunnerTableError> {
        if !self.runners.contains(id.0) {
            return Err(RunnerTableError::NotFound);
        }
        Ok(self.runners.remove(id.0))
    }

    pub fn len(&self) -> usize {
        self.runners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runners.is_empty()
    }
}

#[cfg(test)]
pub(crate) fn native_messenger_trio() -> MessengerTrio {
    use crate::bridge::NativeSlots;
    MessengerTrio {
        console: Messenger::new(Box::new(NativeSlots::new())),
        network: Messenger::new(Box::new(NativeSlots::new())),
        persistence: Messenger::new(Box::new(NativeSlots::new())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::NativeLockSlots;

    fn native_record(kind: RunnerKind) -> RunnerRecord {
        RunnerRecord::new(kind, LockBlock::new(Box::new(NativeLockSlots::new())), native_messenger_trio())
    }

    #[test]
    fn insert_and_release_round_trip() {
        let mut table = RunnerTable::new();
        let id = table.insert(native_record(RunnerKind::Task));
        assert_eq!(table.len(), 1);
        table.release(id).unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn release_unknown_runner_is_reported() {
        let mut table = RunnerTable::new();
        let id = table.insert(native_record(RunnerKind::Primary));
        table.release(id).unwrap();
        assert_eq!(table.release(id), Err(RunnerTableError::NotFound));
    }

    #[test]
    fn find_by_task_locates_the_hosting_runner() {
        let mut table = RunnerTable::new();
        let id = table.insert(native_record(RunnerKind::Task));
        table.get_mut(id).unwrap().current_task = Some(TaskId(5));
        assert_eq!(table.find_by_task(TaskId(5)), Some(id));
        assert_eq!(table.find_by_task(TaskId(6)), None);
    }
}
