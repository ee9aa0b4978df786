//! Identifiers for the data model in spec.md §3
//!
//! Newtypes over raw integers, following the teacher's `Pid`/`TaskId`/`Fd`
//! convention (`kernel::process::Pid`, `kernel::task::TaskId`): a thin
//! wrapper plus a `Display` impl, nothing more.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identity of a task (process or thread) as known to the guest kernel.
/// Opaque to the host beyond being a key into the runner and task tables.
/// `Serialize`/`Deserialize` so it can ride inside a [`crate::controller::ControllerMessage`]
/// across the worker→controller `postMessage` boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task:{}", self.0)
    }
}

/// Identity of a runner (a Worker hosting one Wasm-level CPU or task).
/// Host-allocated, dense, and released frequently, so the controller indexes
/// runners in a `slab` rather than a `HashMap` (see DESIGN.md).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RunnerId(pub usize);

impl fmt::Display for RunnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "runner:{}", self.0)
    }
}

/// Identity of a CPU, distinct from a task-hosting runner only in that it
/// never terminates on its own (spec.md §4.1 "Primary/Secondary CPU runner").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CpuId(pub u32);

impl fmt::Display for CpuId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cpu:{}", self.0)
    }
}

/// Identity of a logical network connection multiplexed over the relay
/// channel (spec.md §4.4 "id").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(pub u32);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn:{}", self.0)
    }
}

/// Which kind of runner a Worker was spawned to host (spec.md §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerKind {
    /// Boots the guest kernel and never returns.
    Primary,
    /// Runs the secondary-CPU entry and never returns.
    Secondary,
    /// Hosts a single task (process or thread); returns when the task exits.
    Task,
}

impl fmt::Display for RunnerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunnerKind::Primary => write!(f, "primary"),
            RunnerKind::Secondary => write!(f, "secondary"),
            RunnerKind::Task => write!(f, "task"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_impls_are_stable() {
        assert_eq!(TaskId(7).to_string(), "task:7");
        assert_eq!(RunnerId(3).to_string(), "runner:3");
        assert_eq!(ConnectionId(8).to_string(), "conn:8");
        assert_eq!(RunnerKind::Task.to_string(), "task");
    }
}
