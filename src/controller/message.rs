//! Messages a runner sends to the controller (spec.md §4.1, §9 "dynamic
//! dispatch over many message shapes" — a closed set of cases discriminated
//! by a tag, dispatched with exhaustive matching rather than a
//! name-indexed table).
//!
//! This is the controller-bound half of the traffic; [`super::runners`]
//! holds what the controller remembers in response, and [`crate::bridge`]
//! carries the separate host-call request family.

use serde::{Deserialize, Serialize};

use crate::bridge::HostCallRequest;
use crate::runner::{TaskRunMode, UserModuleParams};
use crate::task::{CpuId, TaskId};

/// Parameters for a new task, as named by the kernel's task-create host
/// callback (spec.md §4.1 "task spawn").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskCreateParams {
    pub new_task: TaskId,
    pub user_module: Option<UserModuleParams>,
    pub mode: TaskRunMode,
}

/// Every shape of message a runner can send the controller. `Serialize`/
/// `Deserialize` so a runner's Worker can hand one of these to the
/// controller as a JSON string over `postMessage` (spec.md §4.1 "a runner
/// never talks to another runner directly" — this is the one channel that
/// connects them).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ControllerMessage {
    /// Primary runner reporting the init task's identity once boot has
    /// allocated it (spec.md §8 scenario 1 "boot-to-init").
    StartPrimary { init_task: TaskId },
    /// Primary (or another already-running) runner asking the controller
    /// to start a secondary CPU (spec.md §4.1 "SMP"; only the controller
    /// may spawn a Worker).
    StartSecondary { cpu: CpuId, idle_task: TaskId },
    /// Kernel switching to a task for the first time (spec.md §4.1 "task
    /// creation").
    CreateAndRunTask(TaskCreateParams),
    /// Cooperative hand-off: the sender is giving up its turn and naming
    /// which task should run next (spec.md §4.1 "cooperative hand-off").
    /// Only meaningful pre-SMP, though the host does not enforce that.
    /// `from` is written into the target runner's `last_task` cell so the
    /// woken runner's resumed guest code can see who yielded to it.
    Serialize { from: TaskId, wake: TaskId },
    /// A task has exited; release the runner hosting it (spec.md §4.1
    /// "task release").
    TaskRelease { task: TaskId },
    /// Kernel panic (spec.md §4.1 "panic"). Carries only a message; the
    /// sending runner is identified by the controller from the delivery
    /// channel, not from this payload.
    Panic { message: String },
    /// A blocking host call (spec.md §4.3).
    HostCall(HostCallRequest),
}

impl ControllerMessage {
    /// Encode for `postMessage` across the worker→controller boundary.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_call_round_trips_through_json() {
        use crate::bridge::{ConsoleCall, HostCall, HostCallRequest};

        let msg = ControllerMessage::HostCall(HostCallRequest {
            call: HostCall::Console(ConsoleCall::Write { buf_offset: 0x100, len: 4 }),
        });
        let json = msg.to_json().unwrap();
        let decoded = ControllerMessage::from_json(&json).unwrap();
        assert!(matches!(
            decoded,
            ControllerMessage::HostCall(HostCallRequest { call: HostCall::Console(ConsoleCall::Write { buf_offset: 0x100, len: 4 }) })
        ));
    }

    #[test]
    fn serialize_round_trips_through_json() {
        let msg = ControllerMessage::Serialize { from: TaskId(1), wake: TaskId(9) };
        let json = msg.to_json().unwrap();
        let decoded = ControllerMessage::from_json(&json).unwrap();
        assert!(matches!(decoded, ControllerMessage::Serialize { from: TaskId(1), wake: TaskId(9) }));
    }
}
