//! Runner bodies (spec.md §4.1 "runner kinds").
//!
//! Each of these runs inside one Worker, for the lifetime of that Worker.
//! Primary and secondary bodies never return; a task body returns when its
//! task exits, at which point the controller tears the runner down.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::task::{CpuId, RunnerKind, TaskId};
use crate::wasm_host::LoaderError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunnerError {
    Loader(LoaderError),
    /// spec.md §4.1: a clone-callback task whose user module has no such
    /// export is fatally broken.
    MissingCloneCallback,
    /// spec.md §4.1: boot's allocator failing is reported as a fatal error
    /// rather than silently wedging the primary runner.
    BootAllocatorFailed,
}

impl fmt::Display for RunnerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunnerError::Loader(e) => write!(f, "{e}"),
            RunnerError::MissingCloneCallback => write!(f, "clone-callback task has no clone_callback export"),
            RunnerError::BootAllocatorFailed => write!(f, "boot entry allocator failed"),
        }
    }
}

impl From<LoaderError> for RunnerError {
    fn from(e: LoaderError) -> Self {
        RunnerError::Loader(e)
    }
}

/// Parameters for a primary-CPU runner (spec.md §4.1).
#[derive(Debug, Clone)]
pub struct PrimaryBootParams {
    pub kernel_module: Vec<u8>,
    pub cmdline: String,
    pub initrd: Vec<u8>,
}

/// Parameters for a secondary-CPU runner.
#[derive(Debug, Clone)]
pub struct SecondaryBootParams {
    pub cpu: CpuId,
    pub idle_task: TaskId,
}

/// The two sub-modes of a task runner (spec.md §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskRunMode {
    /// The kernel already loaded user bytes into kernel memory; just
    /// instantiate the named user module and run its program entry.
    KthreadReturnedToInit,
    /// Invoke the already-instantiated user module's `clone_callback`
    /// export instead of its program entry.
    CloneCallback,
}

/// A user-executable module's load parameters, as handed down by the
/// kernel's task-create host call (spec.md §4.1 "task spawn").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserModuleParams {
    pub bytes_start: u32,
    pub bytes_end: u32,
    pub data_base: u32,
    pub table_base: u32,
}

/// Parameters for a task runner.
#[derive(Debug, Clone)]
pub struct TaskParams {
    pub previous: TaskId,
    pub new_task: TaskId,
    pub user_module: Option<UserModuleParams>,
    pub mode: TaskRunMode,
}

/// What kind of body a runner should execute, bundled with its parameters.
/// The controller constructs one of these per spawn and ships it to the
/// Worker (spec.md §4.1 "runner kinds").
pub enum RunnerBody {
    Primary(PrimaryBootParams),
    Secondary(SecondaryBootParams),
    Task(TaskParams),
}

impl RunnerBody {
    pub fn kind(&self) -> RunnerKind {
        match self {
            RunnerBody::Primary(_) => RunnerKind::Primary,
            RunnerBody::Secondary(_) => RunnerKind::Secondary,
            RunnerBody::Task(_) => RunnerKind::Task,
        }
    }
}

#[cfg(target_arch = "wasm32")]
pub use wasm_impl::{run_primary, run_secondary, run_task};

#[cfg(target_arch = "wasm32")]
mod wasm_impl {
    use super::*;
    use crate::memory::KernelMemory;
    use crate::wasm_host::abi::kernel_exports;
    use crate::wasm_host::{instantiate, HostModule};
    use js_sys::Object;
    use wasm_bindgen::JsValue;

    /// Instantiate the kernel module, grow kernel memory to fit the initrd,
    /// write cmdline/initrd into it, then call the boot entry. Never
    /// returns on success; the kernel's boot entry is itself divergent.
    pub async fn run_primary(
        params: &PrimaryBootParams,
        kernel_memory: &KernelMemory<crate::memory::WasmMemory>,
        env: &Object,
    ) -> Result<(), RunnerError> {
        let host_module = instantiate(&params.kernel_module, env).await?;

        let initrd_len = params.initrd.len() as u32;
        grow_for_initrd(kernel_memory, initrd_len);

        let cmdline_addr = read_export_address(&host_module, kernel_exports::CMDLINE_BUFFER)?;
        kernel_memory.write(cmdline_addr, params.cmdline.as_bytes()).map_err(|_| RunnerError::BootAllocatorFailed)?;

        let initrd_start = read_export_address(&host_module, kernel_exports::INITRD_START)?;
        kernel_memory.write(initrd_start, &params.initrd).map_err(|_| RunnerError::BootAllocatorFailed)?;

        let boot = host_module.export_function(kernel_exports::BOOT)?;
        boot.call0(&JsValue::NULL).map_err(|_| RunnerError::BootAllocatorFailed)?;
        Ok(())
    }

    pub async fn run_secondary(
        params: &SecondaryBootParams,
        env: &Object,
        kernel_module_bytes: &[u8],
    ) -> Result<(), RunnerError> {
        let host_module = instantiate(kernel_module_bytes, env).await?;
        let entry = host_module.export_function(kernel_exports::SECONDARY_BOOT)?;
        entry
            .call2(&JsValue::NULL, &(params.cpu.0 as f64).into(), &(params.idle_task.0 as f64).into())
            .map_err(|_| RunnerError::BootAllocatorFailed)?;
        Ok(())
    }

    pub async fn run_task(
        params: &TaskParams,
        env: &Object,
        kernel_module_bytes: &[u8],
        user_module_bytes: Option<&[u8]>,
        user_env: Option<&Object>,
    ) -> Result<(), RunnerError> {
        let kernel = instantiate(kernel_module_bytes, env).await?;
        let return_from_fork = kernel.export_function(kernel_exports::RETURN_FROM_FORK)?;
        return_from_fork
            .call2(
                &JsValue::NULL,
                &(params.previous.0 as f64).into(),
                &(params.new_task.0 as f64).into(),
            )
            .map_err(|_| RunnerError::BootAllocatorFailed)?;

        if let (Some(bytes), Some(user_env)) = (user_module_bytes, user_env) {
            let user = instantiate(bytes, user_env).await?;
            match params.mode {
                TaskRunMode::KthreadReturnedToInit => {
                    let start = user.export_function(crate::wasm_host::abi::user_exports::ENTRY)?;
                    start.call0(&JsValue::NULL).map_err(|_| RunnerError::BootAllocatorFailed)?;
                }
                TaskRunMode::CloneCallback => {
                    let callback = user
                        .export_function(crate::wasm_host::abi::user_exports::CLONE_CALLBACK)
                        .map_err(|_| RunnerError::MissingCloneCallback)?;
                    callback.call0(&JsValue::NULL).map_err(|_| RunnerError::MissingCloneCallback)?;
                }
            }
        }
        Ok(())
    }

    fn grow_for_initrd(kernel_memory: &KernelMemory<crate::memory::WasmMemory>, initrd_len: u32) {
        use crate::memory::{LinearMemory, WASM_PAGE_SIZE};
        let have = kernel_memory.len();
        if have < initrd_len {
            let delta_pages = (initrd_len - have).div_ceil(WASM_PAGE_SIZE);
            let _ = kernel_memory.grow(delta_pages);
        }
    }

    fn read_export_address(module: &HostModule, name: &str) -> Result<u32, RunnerError> {
        let func = module.export_function(name)?;
        let value = func.call0(&JsValue::NULL).map_err(|_| RunnerError::BootAllocatorFailed)?;
        Ok(value.as_f64().unwrap_or(0.0) as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runner_body_reports_its_kind() {
        let body = RunnerBody::Secondary(SecondaryBootParams { cpu: CpuId(1), idle_task: TaskId(2) });
        assert_eq!(body.kind(), RunnerKind::Secondary);
    }

    #[test]
    fn missing_clone_callback_is_a_distinct_error() {
        let err = RunnerError::MissingCloneCallback;
        assert_eq!(err.to_string(), "clone-callback task has no clone_callback export");
    }
}
