//! Assembles the `env` import object handed to `WebAssembly.instantiate`
//! for both the kernel module and a user-executable module (spec.md §6).
//!
//! The kernel module imports a family of host callbacks plus the seven
//! numbered syscall stubs; a user module imports only the stubs (translated)
//! plus its memory/table/globals. Both import the *same* wrapped stub
//! functions — the kernel's own kthreads and every user process share one
//! syscall entry path, just as a real Linux kernel's internal syscall-style
//! helpers and a process's `syscall()` both end up in the same entry table.

use js_sys::{Function, Object, Reflect, WebAssembly};

use super::abi::{kernel_imports, syscall_import_name, user_imports, MAX_SYSCALL_ARITY};

/// Build the `env` namespace object, inserting `memory` and every
/// pre-built host callback / wrapped syscall stub function. Unsatisfied
/// syscall imports (spec.md §4.2) are filled in separately by
/// [`bind_unimplemented_stubs`] once the module's own import list is known.
pub fn build_env_object(
    memory: &WebAssembly::Memory,
    host_callbacks: &[(&str, Function)],
    wrapped_syscalls: &[Function],
) -> Result<Object, ImportBuildError> {
    let env = Object::new();
    Reflect::set(&env, &user_imports::MEMORY.into(), memory)
        .map_err(|_| ImportBuildError::Reflect)?;

    for (name, func) in host_callbacks {
        Reflect::set(&env, &(*name).into(), func).map_err(|_| ImportBuildError::Reflect)?;
    }

    for (arity, func) in wrapped_syscalls.iter().enumerate() {
        let name = syscall_import_name(arity as u32);
        Reflect::set(&env, &name.clone().into(), func).map_err(|_| ImportBuildError::Reflect)?;
    }

    Ok(env)
}

/// For every import name in `unsatisfied` (produced by
/// [`super::loader::unsatisfied_syscall_imports`]), install a stub that
/// returns [`super::abi::ENOSYS`] regardless of arity.
pub fn bind_unimplemented_stubs(env: &Object, unsatisfied: &[&str], stub: &Function) -> Result<(), ImportBuildError> {
    for name in unsatisfied {
        Reflect::set(env, &(*name).into(), stub).map_err(|_| ImportBuildError::Reflect)?;
    }
    Ok(())
}

/// The complete set of host-callback import names the kernel module expects
/// (spec.md §6), in the order [`kernel_imports`] declares them. Used to
/// assert, in tests, that a builder wired up every one of them.
pub fn expected_host_callback_names() -> Vec<&'static str> {
    vec![
        kernel_imports::CPU_START,
        kernel_imports::CPU_STOP,
        kernel_imports::TASK_CREATE,
        kernel_imports::TASK_RUN,
        kernel_imports::TASK_RELEASE,
        kernel_imports::SERIALIZE,
        kernel_imports::PANIC,
        kernel_imports::STACK_TRACE_DUMP,
        kernel_imports::USER_TAIL_SELECT,
        kernel_imports::CLOCK_MONOTONIC,
        kernel_imports::CONSOLE_PUT,
        kernel_imports::CONSOLE_GET,
        kernel_imports::NETWORK_OPEN,
        kernel_imports::NETWORK_WRITE,
        kernel_imports::NETWORK_READ,
        kernel_imports::NETWORK_POLL,
        kernel_imports::NETWORK_CLOSE,
        kernel_imports::PERSISTENCE_SAVE,
        kernel_imports::PERSISTENCE_LOAD,
        kernel_imports::PERSISTENCE_DELETE,
        kernel_imports::PERSISTENCE_LIST,
        kernel_imports::USER_EXEC_LOAD,
    ]
}

pub fn expected_syscall_stub_count() -> u32 {
    MAX_SYSCALL_ARITY + 1
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportBuildError {
    Reflect,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expects_one_host_callback_per_declared_import() {
        assert_eq!(expected_host_callback_names().len(), 22);
    }

    #[test]
    fn expects_seven_syscall_stubs() {
        assert_eq!(expected_syscall_stub_count(), 7);
    }
}
