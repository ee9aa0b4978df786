//! Synchronous host-call bridge (spec.md §4.3).
//!
//! Turns asynchronous main-thread capabilities into blocking calls a guest
//! driver can make from inside a syscall: a runner arms a [`Messenger`],
//! posts a [`request::HostCall`] to the controller, and blocks until the
//! controller writes a result back through the same messenger.

mod messenger;
mod request;

pub use messenger::{AtomicSlots, DynSlots, Messenger, NativeSlots, StatusCode, STATUS_PENDING};
#[cfg(target_arch = "wasm32")]
pub use messenger::WasmSlots;
pub use request::{CallFamily, ConsoleCall, HostCall, HostCallRequest, NetworkCall, PersistenceCall};
