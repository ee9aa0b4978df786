//! Naming conventions for the kernel and user module import/export surface
//! (spec.md §6).
//!
//! Plain data: every name the host looks for on a guest module, gathered in
//! one place so [`super::loader`] and [`super::imports`] never hard-code a
//! string inline.

/// Single import namespace every host callback and syscall stub lives
/// under, on both the kernel and user modules.
pub const HOST_NAMESPACE: &str = "env";

/// Numbered syscall stubs are imported as `syscall0".."syscall6"`
/// (spec.md §6 "a vector of numbered syscall stubs (arities 0-6)").
pub const SYSCALL_IMPORT_PREFIX: &str = "syscall";
pub const MAX_SYSCALL_ARITY: u32 = 6;

/// Returned by an unimplemented syscall stub (spec.md §8 scenario 2): the
/// guest kernel's own ENOSYS.
pub const ENOSYS: i32 = -38;

pub mod kernel_exports {
    pub const BOOT: &str = "boot_entry";
    pub const SECONDARY_BOOT: &str = "secondary_boot_entry";
    pub const RETURN_FROM_FORK: &str = "return_from_fork";
    pub const USER_SP_GET: &str = "user_sp_get";
    pub const USER_TLS_BASE_GET: &str = "user_tls_base_get";
    pub const USER_TLS_BASE_SET: &str = "user_tls_base_set";
    pub const INIT_TASK_PTR: &str = "init_task";
    pub const CMDLINE_BUFFER: &str = "cmdline_buffer";
    pub const INITRD_START: &str = "initrd_start";
    pub const INITRD_END: &str = "initrd_end";
}

pub mod kernel_imports {
    pub const CPU_START: &str = "cpu_start";
    pub const CPU_STOP: &str = "cpu_stop";
    pub const TASK_CREATE: &str = "task_create";
    pub const TASK_RUN: &str = "task_run";
    pub const TASK_RELEASE: &str = "task_release";
    pub const SERIALIZE: &str = "serialize";
    pub const PANIC: &str = "panic";
    pub const STACK_TRACE_DUMP: &str = "stack_trace_dump";
    pub const USER_TAIL_SELECT: &str = "user_tail_select";
    pub const CLOCK_MONOTONIC: &str = "clock_monotonic";
    pub const CONSOLE_PUT: &str = "console_put";
    pub const CONSOLE_GET: &str = "console_get";
    pub const NETWORK_OPEN: &str = "network_open";
    pub const NETWORK_WRITE: &str = "network_write";
    pub const NETWORK_READ: &str = "network_read";
    pub const NETWORK_POLL: &str = "network_poll";
    pub const NETWORK_CLOSE: &str = "network_close";
    pub const PERSISTENCE_SAVE: &str = "persistence_save";
    pub const PERSISTENCE_LOAD: &str = "persistence_load";
    pub const PERSISTENCE_DELETE: &str = "persistence_delete";
    pub const PERSISTENCE_LIST: &str = "persistence_list";
    pub const USER_EXEC_LOAD: &str = "user_exec_load";
}

pub mod user_exports {
    pub const SIGNAL_HANDLER: &str = "signal_handler";
    pub const CLONE_CALLBACK: &str = "clone_callback";
    pub const TLS_BASE_SET: &str = "__set_tls_base";
    pub const APPLY_RELOCATIONS: &str = "__apply_relocations";
    pub const RUN_CONSTRUCTORS: &str = "__run_ctors";
    pub const ENTRY: &str = "_start";
}

pub mod user_imports {
    pub const MEMORY: &str = "memory";
    pub const ABORT: &str = "abort";
    pub const STACK_POINTER: &str = "__stack_pointer";
    pub const INDIRECT_TABLE: &str = "__indirect_function_table";
    pub const MEMORY_BASE: &str = "__memory_base";
    pub const TABLE_BASE: &str = "__table_base";
}

/// Name of the numbered syscall import for a given arity, e.g. `"syscall3"`.
pub fn syscall_import_name(arity: u32) -> String {
    format!("{SYSCALL_IMPORT_PREFIX}{arity}")
}

/// Whether an import name is shaped like a syscall stub, regardless of
/// whether the host actually satisfies it (spec.md §4.2 "unimplemented
/// syscalls").
pub fn is_syscall_import(name: &str) -> bool {
    name.strip_prefix(SYSCALL_IMPORT_PREFIX)
        .is_some_and(|rest| !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_syscall_import_shape() {
        assert!(is_syscall_import("syscall0"));
        assert!(is_syscall_import("syscall6"));
        assert!(!is_syscall_import("syscallfoo"));
        assert!(!is_syscall_import("console_put"));
    }

    #[test]
    fn builds_expected_import_name() {
        assert_eq!(syscall_import_name(3), "syscall3");
    }
}
