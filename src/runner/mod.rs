//! Per-Worker runner bodies and the primitives they block on (spec.md
//! §4.1, §5).

pub mod entry;
pub mod lock;
pub mod tail;
#[cfg(target_arch = "wasm32")]
pub mod worker_entry;

pub use entry::{PrimaryBootParams, RunnerBody, RunnerError, SecondaryBootParams, TaskParams, TaskRunMode, UserModuleParams};
pub use lock::{LockBlock, NativeLockSlots};
pub use tail::{TailCode, TailState, UserModeTail};
#[cfg(target_arch = "wasm32")]
pub use worker_entry::install_runner_entry_point;
