//! Memory isolation & syscall translation (spec.md §4.2)
//!
//! Gives each user process a private linear memory while letting the guest
//! kernel keep believing every syscall pointer argument is directly
//! dereferenceable in its own (kernel) memory. See DESIGN.md for how this
//! generalizes `kernel::memory` from the teacher crate.

mod backing;
mod descriptor;
mod kernel_memory;
mod scratch;
mod translate;
mod user_memory;

pub use backing::{LinearMemory, MemoryError, NativeMemory, WASM_PAGE_SIZE};
#[cfg(target_arch = "wasm32")]
pub use backing::WasmMemory;
pub use descriptor::{ArgKind, CopyLen, DescriptorTable, IoVecDirection, LenSpec, SyscallDescriptor};
pub use kernel_memory::KernelMemory;
pub use scratch::ScratchRegion;
pub use translate::{translate_and_invoke, RawArgs, TranslateError, MAX_SYSCALL_ARGS};
pub use user_memory::UserMemory;
