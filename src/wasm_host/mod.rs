//! Host-side WebAssembly instantiation (spec.md §4.1, §6).
//!
//! The host runtime is itself compiled to WebAssembly and runs inside the
//! browser page; it instantiates the guest kernel module and every guest
//! user-executable module through `js_sys::WebAssembly`, the only way one
//! wasm module can host another from within the same engine.

pub mod abi;
pub mod imports;
pub mod loader;

pub use loader::{LoaderError, UNIMPLEMENTED_SYSCALL_RESULT};
#[cfg(target_arch = "wasm32")]
pub use loader::{instantiate, instantiate_sync, HostModule};
